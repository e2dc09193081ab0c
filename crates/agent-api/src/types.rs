//! Wire DTOs for the control-plane HTTP surface (spec.md §6).

use agent_core::model::RawManifest;
use serde::{Deserialize, Serialize};

/// Body for `POST /api/gpus/register`.
#[derive(Debug, Serialize)]
pub struct RegisterRequest<'a> {
    pub uuid: &'a str,
    pub name: &'a str,
    pub vram_gb: f64,
    pub driver: &'a str,
    pub cuda: Option<&'a str>,
    pub region: &'a str,
    pub provider_token: &'a str,
}

/// Response to `POST /api/gpus/register`. The control plane may spell the
/// assigned id either way.
#[derive(Debug, Deserialize, Default)]
pub struct RegisterResponse {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub gpu_id: Option<String>,
}

impl RegisterResponse {
    pub fn assigned_id(&self) -> Option<&str> {
        self.id.as_deref().or(self.gpu_id.as_deref())
    }
}

/// Response to `GET /api/jobs/assigned`.
#[derive(Debug, Deserialize, Default)]
pub struct AssignedJobsResponse {
    #[serde(default)]
    pub jobs: Vec<RawManifest>,
}

/// Body for `POST /api/jobs/{job_id}/accept`.
#[derive(Debug, Serialize)]
pub struct AcceptRequest<'a> {
    pub node_id: &'a str,
}

/// Body for `POST /api/telemetry/russian-doll`.
#[derive(Debug, Serialize)]
pub struct TelemetryRequest(pub serde_json::Value);

/// Response to a telemetry submission. Parsed into one shape rather than
/// probed as a loose map (spec.md §9, "Sum-typed responses"): the kill
/// decision is a typed field, not something callers dig for.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct TelemetryResponse {
    #[serde(default)]
    pub kill_job: bool,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub anomalies: Option<Vec<String>>,
    #[serde(default)]
    pub ok: Option<bool>,
}

impl TelemetryResponse {
    pub fn should_kill(&self) -> bool {
        self.kill_job
    }
}

/// Body for `PATCH /api/jobs`.
#[derive(Debug, Serialize)]
pub struct CompletionRequest<'a> {
    pub id: &'a str,
    pub status: &'a str,
    pub energy_kwh: f64,
}

/// Body for `POST /api/nodes/heartbeat`.
#[derive(Debug, Serialize)]
pub struct HeartbeatRequest<'a> {
    pub node_id: &'a str,
    pub active_jobs: u32,
    pub gpu_ids: &'a [String],
    pub timestamp: &'a str,
}
