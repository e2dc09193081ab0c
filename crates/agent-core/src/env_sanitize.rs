//! Environment map sanitization and image digest validation (spec.md §4.3).
//!
//! Grounded on `job_runner.py::_build_env_args` and `_pull_and_verify_image`.

use std::collections::HashMap;

use regex::Regex;
use std::sync::OnceLock;

const MAX_VALUE_LEN: usize = 4096;

fn digest_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^sha256:[0-9a-f]{64}$").expect("valid regex"))
}

/// Validate a manifest's `docker_image_sha256` field. Leading/trailing
/// whitespace is stripped and the digest is lowercased before matching, per
/// spec.md §4.3 step 1. Returns the normalized digest on success.
pub fn validate_digest(raw: &str) -> Option<String> {
    let normalized = raw.trim().to_ascii_lowercase();
    digest_re().is_match(&normalized).then_some(normalized)
}

/// Sanitize one `(key, value)` declared-env entry per spec.md §4.3:
/// the key keeps only `[A-Za-z0-9_]` (entry dropped if that leaves it
/// empty); the value has NUL/LF/CR stripped and is truncated to 4096 chars.
/// Returns `None` if the entry must be dropped.
pub fn sanitize_entry(key: &str, value: &str) -> Option<(String, String)> {
    let clean_key: String = key.chars().filter(|c| c.is_ascii_alphanumeric() || *c == '_').collect();
    if clean_key.is_empty() {
        return None;
    }
    let clean_value: String = value
        .chars()
        .filter(|c| *c != '\0' && *c != '\n' && *c != '\r')
        .take(MAX_VALUE_LEN)
        .collect();
    Some((clean_key, clean_value))
}

/// Sanitize a full declared-env map into the ordered list of `--env KEY=VAL`
/// argument pairs, in iteration order of `env`.
pub fn sanitize_env(env: &HashMap<String, String>) -> Vec<(String, String)> {
    env.iter()
        .filter_map(|(k, v)| sanitize_entry(k, v))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_digest_accepted() {
        let digest = format!("sha256:{}", "a".repeat(64));
        assert_eq!(validate_digest(&digest).as_deref(), Some(digest.as_str()));
    }

    #[test]
    fn digest_is_case_and_whitespace_normalized() {
        let digest = format!("SHA256:{}", "A".repeat(64));
        let padded = format!("  {digest}  \n");
        let expected = format!("sha256:{}", "a".repeat(64));
        assert_eq!(validate_digest(&padded).as_deref(), Some(expected.as_str()));
    }

    #[test]
    fn malformed_digest_rejected() {
        assert!(validate_digest("sha256:zz").is_none());
        assert!(validate_digest("").is_none());
        assert!(validate_digest(&format!("sha256:{}", "a".repeat(63))).is_none());
    }

    #[test]
    fn env_sanitization_drops_empty_key_and_cleans_value() {
        let mut env = HashMap::new();
        env.insert("FOO".to_string(), "bar\n\0baz".to_string());
        env.insert("BAD KEY".to_string(), "x".to_string());
        env.insert(String::new(), "y".to_string());

        let mut sanitized = sanitize_env(&env);
        sanitized.sort();

        assert_eq!(
            sanitized,
            vec![
                ("BADKEY".to_string(), "x".to_string()),
                ("FOO".to_string(), "barbaz".to_string()),
            ]
        );
    }

    #[test]
    fn value_truncated_to_4096_chars() {
        let long = "x".repeat(5000);
        let (_, v) = sanitize_entry("K", &long).unwrap();
        assert_eq!(v.len(), MAX_VALUE_LEN);
    }
}
