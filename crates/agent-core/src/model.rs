//! The job manifest: the immutable assignment contract handed down by the
//! control plane (spec.md §3, "Job Manifest").

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// The as-received-over-the-wire assignment payload. Fields are optional or
/// loosely typed because the control plane is free to omit anything that has
/// a defensive default (spec.md §4.5, `admit`).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawManifest {
    /// Job identifier. May arrive as `id` or `job_id`.
    #[serde(default)]
    pub id: Option<String>,
    /// Alternate spelling of the job identifier some payloads use.
    #[serde(default)]
    pub job_id: Option<String>,
    #[serde(default)]
    pub subject_id: Option<String>,
    #[serde(default)]
    pub gpu_id: Option<String>,
    #[serde(default)]
    pub gpu_index: Option<u32>,
    #[serde(default)]
    pub docker_image: Option<String>,
    #[serde(default)]
    pub docker_image_sha256: Option<String>,
    #[serde(default)]
    pub command: Option<Vec<String>>,
    #[serde(default)]
    pub env: Option<HashMap<String, String>>,
    #[serde(default)]
    pub input_data_url: Option<String>,
    #[serde(default)]
    pub output_bucket: Option<String>,
    #[serde(default)]
    pub declared_framework: Option<String>,
    #[serde(default)]
    pub vram_allocated_gb: Option<f64>,
    #[serde(default)]
    pub ram_limit_gb: Option<f64>,
    #[serde(default)]
    pub expected_duration_h: Option<f64>,
    #[serde(default)]
    pub power_cap_watts: Option<f64>,
}

impl RawManifest {
    /// The job id, accepting either wire spelling. `None` means the
    /// assignment is malformed and must be rejected (spec.md §4.5, `admit`).
    pub fn job_id(&self) -> Option<&str> {
        self.id.as_deref().or(self.job_id.as_deref())
    }
}

/// The manifest a `JobRunner` owns for the lifetime of one job. Produced
/// once from a `RawManifest` via [`JobManifest::from_raw`] with the
/// defensive defaults spec.md §4.5 specifies, then never mutated.
#[derive(Debug, Clone, Serialize)]
pub struct JobManifest {
    /// Job identifier, assigned by the control plane.
    pub job_id: String,
    /// Subject (tenant/user) the job belongs to.
    pub subject_id: String,
    /// Control-plane-assigned GPU id.
    pub gpu_id: String,
    /// Local device index to pass to `--gpus device=<i>`.
    pub gpu_index: u32,
    /// Docker image reference, without digest.
    pub docker_image: String,
    /// Required `sha256:<64 hex>` digest. Validated in
    /// [`crate::env_sanitize`]'s sibling digest check before any container
    /// state is created.
    pub docker_image_sha256: String,
    /// Entrypoint argv.
    pub command: Vec<String>,
    /// Declared environment map, pre-sanitization.
    pub env: HashMap<String, String>,
    /// Pre-signed URL for input data, if any.
    pub input_data_url: Option<String>,
    /// Output bucket name.
    pub output_bucket: String,
    /// Framework tag the subject declared (e.g. "pytorch").
    pub declared_framework: String,
    /// VRAM allocation, GB.
    pub vram_allocated_gb: f64,
    /// Hard RAM limit, GB.
    pub ram_limit_gb: f64,
    /// Expected run duration, hours.
    pub expected_duration_h: f64,
    /// Power cap, watts.
    pub power_cap_watts: f64,
}

impl JobManifest {
    /// Build a manifest from the wire payload, applying the defensive
    /// defaults spec.md §4.5 specifies for `admit`. Returns `None` if the
    /// payload carries no job id at all.
    pub fn from_raw(raw: RawManifest) -> Option<Self> {
        let job_id = raw.job_id()?.to_string();
        Some(Self {
            job_id,
            subject_id: raw.subject_id.unwrap_or_else(|| "unknown".to_string()),
            gpu_id: raw.gpu_id.unwrap_or_default(),
            gpu_index: raw.gpu_index.unwrap_or(0),
            docker_image: raw.docker_image.unwrap_or_else(|| "alpine:latest".to_string()),
            docker_image_sha256: raw.docker_image_sha256.unwrap_or_default(),
            command: raw
                .command
                .unwrap_or_else(|| vec!["echo".to_string(), "hello".to_string()]),
            env: raw.env.unwrap_or_default(),
            input_data_url: raw.input_data_url,
            output_bucket: raw.output_bucket.unwrap_or_default(),
            declared_framework: raw.declared_framework.unwrap_or_else(|| "UNKNOWN".to_string()),
            vram_allocated_gb: raw.vram_allocated_gb.unwrap_or(8.0),
            ram_limit_gb: raw.ram_limit_gb.unwrap_or(32.0),
            expected_duration_h: raw.expected_duration_h.unwrap_or(1.0),
            power_cap_watts: raw.power_cap_watts.unwrap_or(300.0),
        })
    }

    /// The deterministic container name: `gp4u-<first 12 chars of job id>`.
    pub fn container_name(&self) -> String {
        let short: String = self.job_id.chars().take(12).collect();
        format!("gp4u-{short}")
    }

    /// Hard duration limit in whole seconds: `ceil(duration_h * 3600 * 1.1)`.
    pub fn duration_limit_secs(&self) -> u64 {
        (self.expected_duration_h * 3600.0 * 1.1).ceil().max(0.0) as u64
    }

    /// RAM limit in bytes (`ram_limit_gb * 2^30`).
    pub fn ram_limit_bytes(&self) -> u64 {
        (self.ram_limit_gb * 1024.0 * 1024.0 * 1024.0).round() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_job_id_rejected() {
        let raw = RawManifest::default();
        assert!(JobManifest::from_raw(raw).is_none());
    }

    #[test]
    fn accepts_either_id_spelling() {
        let mut raw = RawManifest::default();
        raw.job_id = Some("j1".to_string());
        let m = JobManifest::from_raw(raw).expect("job id present");
        assert_eq!(m.job_id, "j1");

        let mut raw = RawManifest::default();
        raw.id = Some("j2".to_string());
        let m = JobManifest::from_raw(raw).expect("job id present");
        assert_eq!(m.job_id, "j2");
    }

    #[test]
    fn defensive_defaults_applied() {
        let mut raw = RawManifest::default();
        raw.id = Some("j1".to_string());
        let m = JobManifest::from_raw(raw).unwrap();
        assert_eq!(m.docker_image, "alpine:latest");
        assert_eq!(m.command, vec!["echo".to_string(), "hello".to_string()]);
        assert_eq!(m.vram_allocated_gb, 8.0);
        assert_eq!(m.ram_limit_gb, 32.0);
        assert_eq!(m.expected_duration_h, 1.0);
        assert_eq!(m.power_cap_watts, 300.0);
    }

    #[test]
    fn container_name_truncates_to_12_chars() {
        let mut raw = RawManifest::default();
        raw.id = Some("abcdefghijklmnopqrstuvwxyz".to_string());
        let m = JobManifest::from_raw(raw).unwrap();
        assert_eq!(m.container_name(), "gp4u-abcdefghijkl");
    }

    #[test]
    fn duration_limit_floors_zero_to_zero() {
        let mut raw = RawManifest::default();
        raw.id = Some("j1".to_string());
        raw.expected_duration_h = Some(0.0);
        let m = JobManifest::from_raw(raw).unwrap();
        assert_eq!(m.duration_limit_secs(), 0);
    }

    #[test]
    fn duration_limit_applies_ten_percent_margin() {
        let mut raw = RawManifest::default();
        raw.id = Some("j1".to_string());
        raw.expected_duration_h = Some(0.001); // 3.6s -> ceil(3.96) = 4
        let m = JobManifest::from_raw(raw).unwrap();
        assert_eq!(m.duration_limit_secs(), 4);
    }

    #[test]
    fn ram_limit_bytes_conversion() {
        let mut raw = RawManifest::default();
        raw.id = Some("j1".to_string());
        raw.ram_limit_gb = Some(1.0);
        let m = JobManifest::from_raw(raw).unwrap();
        assert_eq!(m.ram_limit_bytes(), 1024 * 1024 * 1024);
    }
}
