//! Layered agent configuration: defaults, then `$HOME/.gp4u/provider.json`,
//! then environment variables, then CLI flags (spec.md §7, "Configuration
//! precedence"). Grounded on the atomic-write JSON pattern in the teacher's
//! `client-core::submitter` module.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

const DEFAULT_API_URL: &str = "https://gp4u.com";
const DEFAULT_REGION: &str = "us-east-1";
const DEFAULT_POLL_INTERVAL_SECS: u64 = 15;

/// On-disk configuration, persisted as pretty JSON. Every field is optional
/// so the file may carry only what the operator chooses to pin down.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub api_url: Option<String>,
    #[serde(default)]
    pub provider_token: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub poll_interval_secs: Option<u64>,
}

/// CLI-flag overrides, always taking precedence over file and env values
/// when present. `clap` hands these in already parsed.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub api_url: Option<String>,
    pub provider_token: Option<String>,
    pub region: Option<String>,
    pub poll_interval_secs: Option<u64>,
}

/// The fully resolved configuration the rest of the agent runs on.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub api_url: String,
    pub provider_token: String,
    pub region: String,
    pub poll_interval_secs: u64,
}

fn config_dir() -> Option<PathBuf> {
    std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".gp4u"))
}

fn config_path() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join("provider.json"))
}

fn load_file_config(path: &Path) -> Result<FileConfig, CoreError> {
    let raw = std::fs::read_to_string(path).map_err(|source| CoreError::ConfigRead {
        path: path.display().to_string(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|source| CoreError::ConfigParse {
        path: path.display().to_string(),
        source,
    })
}

/// Load `$HOME/.gp4u/provider.json` if it exists. A missing file is not an
/// error; a malformed one is.
pub fn load_config_file() -> Result<FileConfig, CoreError> {
    let Some(path) = config_path() else {
        return Ok(FileConfig::default());
    };
    if !path.exists() {
        return Ok(FileConfig::default());
    }
    load_file_config(&path)
}

/// Persist the given config to `$HOME/.gp4u/provider.json` via a
/// write-then-rename, so readers never observe a half-written file.
pub fn save_config_file(cfg: &FileConfig) -> anyhow::Result<()> {
    let path = config_path().ok_or_else(|| anyhow::anyhow!("HOME is not set"))?;
    let dir = path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("invalid config path: {}", path.display()))?;
    std::fs::create_dir_all(dir)?;

    let json = serde_json::to_string_pretty(cfg)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json)?;
    std::fs::rename(tmp, path)?;
    Ok(())
}

/// Resolve final configuration from defaults, the config file, environment
/// variables, and CLI overrides, in that ascending order of precedence.
///
/// Env vars are read directly here rather than via `clap(env = ...)` so this
/// function stays usable independent of the CLI layer; `agent::cli` still
/// declares the same `env = "..."` attributes for `--help` to document them.
pub fn resolve(file: FileConfig, cli: CliOverrides) -> Result<AgentConfig, CoreError> {
    let api_url = cli
        .api_url
        .or_else(|| std::env::var("GP4U_API_URL").ok())
        .or(file.api_url)
        .unwrap_or_else(|| DEFAULT_API_URL.to_string());

    let provider_token = cli
        .provider_token
        .or_else(|| std::env::var("GP4U_PROVIDER_TOKEN").ok())
        .or(file.provider_token)
        .ok_or(CoreError::MissingToken)?;

    let region = cli
        .region
        .or_else(|| std::env::var("GP4U_REGION").ok())
        .or(file.region)
        .unwrap_or_else(|| DEFAULT_REGION.to_string());

    let poll_interval_secs = cli
        .poll_interval_secs
        .or_else(|| std::env::var("GP4U_POLL_INTERVAL_SECS").ok().and_then(|v| v.parse().ok()))
        .or(file.poll_interval_secs)
        .unwrap_or(DEFAULT_POLL_INTERVAL_SECS);

    Ok(AgentConfig {
        api_url,
        provider_token,
        region,
        poll_interval_secs,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_token_anywhere_is_an_error() {
        let err = resolve(FileConfig::default(), CliOverrides::default()).unwrap_err();
        assert!(matches!(err, CoreError::MissingToken));
    }

    #[test]
    fn cli_overrides_file_and_defaults() {
        let file = FileConfig {
            api_url: Some("https://file.example".to_string()),
            provider_token: Some("file-token".to_string()),
            region: Some("eu-west-1".to_string()),
            poll_interval_secs: Some(30),
        };
        let cli = CliOverrides {
            api_url: Some("https://cli.example".to_string()),
            provider_token: Some("cli-token".to_string()),
            region: None,
            poll_interval_secs: None,
        };
        let cfg = resolve(file, cli).unwrap();
        assert_eq!(cfg.api_url, "https://cli.example");
        assert_eq!(cfg.provider_token, "cli-token");
        assert_eq!(cfg.region, "eu-west-1");
        assert_eq!(cfg.poll_interval_secs, 30);
    }

    #[test]
    fn defaults_apply_when_nothing_else_set() {
        let cli = CliOverrides {
            provider_token: Some("t".to_string()),
            ..Default::default()
        };
        let cfg = resolve(FileConfig::default(), cli).unwrap();
        assert_eq!(cfg.api_url, DEFAULT_API_URL);
        assert_eq!(cfg.region, DEFAULT_REGION);
        assert_eq!(cfg.poll_interval_secs, DEFAULT_POLL_INTERVAL_SECS);
    }

    #[test]
    fn file_roundtrips_through_write_and_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("provider.json");
        let cfg = FileConfig {
            api_url: Some("https://x.example".to_string()),
            provider_token: Some("tok".to_string()),
            region: Some("us-west-2".to_string()),
            poll_interval_secs: Some(20),
        };
        let json = serde_json::to_string_pretty(&cfg).unwrap();
        std::fs::write(&path, json).unwrap();
        let loaded = load_file_config(&path).unwrap();
        assert_eq!(loaded.provider_token.as_deref(), Some("tok"));
        assert_eq!(loaded.poll_interval_secs, Some(20));
    }
}
