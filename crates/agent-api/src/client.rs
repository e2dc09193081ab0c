//! Typed control-plane HTTP client (spec.md §4.2). Grounded on the
//! request/response shape of the teacher's `client-engine::backend` module;
//! generalized from two RPCs to the six endpoints spec.md §6 names, and from
//! backend-chosen retry to "no retry here, the caller is periodic."

use std::time::Duration;

use reqwest::{StatusCode, Url};
use tracing::warn;

use crate::error::ApiError;
use crate::types::{
    AcceptRequest, AssignedJobsResponse, CompletionRequest, HeartbeatRequest, RegisterRequest,
    RegisterResponse, TelemetryRequest, TelemetryResponse,
};

const REGISTER_TIMEOUT: Duration = Duration::from_secs(10);
const POLL_TIMEOUT: Duration = Duration::from_secs(10);
const ACCEPT_TIMEOUT: Duration = Duration::from_secs(5);
const TELEMETRY_TIMEOUT: Duration = Duration::from_secs(5);
const COMPLETION_TIMEOUT: Duration = Duration::from_secs(10);
const HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(5);

/// A thin, typed wrapper over the control-plane HTTP surface. Carries no
/// retry logic of its own: the Supervisor's poll loop and the watchdog's
/// tick loop are themselves periodic, so a failed call simply waits for the
/// next tick (spec.md §4.2, "Retry policy").
pub struct ControlPlaneClient {
    http: reqwest::Client,
    base_url: Url,
    token: String,
    node_id: String,
}

impl ControlPlaneClient {
    pub fn new(base_url: &str, token: impl Into<String>, node_id: impl Into<String>) -> anyhow::Result<Self> {
        let base_url = Url::parse(base_url)?;
        Ok(Self {
            http: reqwest::Client::new(),
            base_url,
            token: token.into(),
            node_id: node_id.into(),
        })
    }

    fn authed(&self, req: reqwest::RequestBuilder, timeout: Duration) -> reqwest::RequestBuilder {
        req.bearer_auth(&self.token)
            .header("X-Node-Id", &self.node_id)
            .timeout(timeout)
    }

    async fn error_for_status(res: reqwest::Response) -> ApiError {
        let status = res.status();
        let body = res.text().await.unwrap_or_default();
        ApiError::Status { status, body }
    }

    fn join(&self, path: &str) -> Result<Url, ApiError> {
        self.base_url.join(path).map_err(|err| ApiError::Status {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            body: format!("invalid endpoint path {path}: {err}"),
        })
    }

    /// `POST /api/gpus/register`. Registers one device descriptor.
    pub async fn register(&self, req: &RegisterRequest<'_>) -> Result<RegisterResponse, ApiError> {
        let url = self.join("api/gpus/register")?;
        let res = self
            .authed(self.http.post(url).json(req), REGISTER_TIMEOUT)
            .send()
            .await?;
        if !res.status().is_success() {
            return Err(Self::error_for_status(res).await);
        }
        Ok(res.json().await?)
    }

    /// `GET /api/jobs/assigned?gpu_ids=<csv>&node_id=<id>`. A 404 means no
    /// work and is not an error.
    pub async fn poll_assignments(&self, gpu_ids: &[String]) -> Result<AssignedJobsResponse, ApiError> {
        let mut url = self.join("api/jobs/assigned")?;
        url.query_pairs_mut()
            .append_pair("gpu_ids", &gpu_ids.join(","))
            .append_pair("node_id", &self.node_id);
        let res = self.authed(self.http.get(url), POLL_TIMEOUT).send().await?;
        if res.status() == StatusCode::NOT_FOUND {
            return Ok(AssignedJobsResponse::default());
        }
        if !res.status().is_success() {
            return Err(Self::error_for_status(res).await);
        }
        Ok(res.json().await?)
    }

    /// `POST /api/jobs/{job_id}/accept`. ACKs admission of one job.
    pub async fn ack(&self, job_id: &str) -> Result<(), ApiError> {
        let url = self.join(&format!("api/jobs/{job_id}/accept"))?;
        let req = AcceptRequest { node_id: &self.node_id };
        let res = self
            .authed(self.http.post(url).json(&req), ACCEPT_TIMEOUT)
            .send()
            .await?;
        if !res.status().is_success() {
            return Err(Self::error_for_status(res).await);
        }
        Ok(())
    }

    /// `POST /api/telemetry/russian-doll`. Submits one merged telemetry
    /// sample and returns the kill decision.
    pub async fn send_telemetry(&self, payload: serde_json::Value) -> Result<TelemetryResponse, ApiError> {
        let url = self.join("api/telemetry/russian-doll")?;
        let res = self
            .authed(self.http.post(url).json(&TelemetryRequest(payload)), TELEMETRY_TIMEOUT)
            .send()
            .await?;
        if !res.status().is_success() {
            return Err(Self::error_for_status(res).await);
        }
        Ok(res.json().await?)
    }

    /// `PATCH /api/jobs`. Reports a job's terminal status.
    pub async fn report_completion(&self, job_id: &str, status: &str, energy_kwh: f64) -> Result<(), ApiError> {
        let url = self.join("api/jobs")?;
        let req = CompletionRequest {
            id: job_id,
            status,
            energy_kwh,
        };
        let res = self
            .authed(self.http.patch(url).json(&req), COMPLETION_TIMEOUT)
            .send()
            .await?;
        if !res.status().is_success() {
            return Err(Self::error_for_status(res).await);
        }
        Ok(())
    }

    /// `POST /api/nodes/heartbeat`. Failures are swallowed by the caller;
    /// this method still returns the error so the caller can log it.
    pub async fn heartbeat(&self, active_jobs: u32, gpu_ids: &[String], timestamp: &str) -> Result<(), ApiError> {
        let url = self.join("api/nodes/heartbeat")?;
        let req = HeartbeatRequest {
            node_id: &self.node_id,
            active_jobs,
            gpu_ids,
            timestamp,
        };
        let res = self
            .authed(self.http.post(url).json(&req), HEARTBEAT_TIMEOUT)
            .send()
            .await?;
        if !res.status().is_success() {
            warn!(target: "agent::api", status = %res.status(), "heartbeat rejected by control plane");
            return Err(Self::error_for_status(res).await);
        }
        Ok(())
    }
}
