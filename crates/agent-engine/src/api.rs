//! Public API types for the GP4U provider agent engine.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for a running Supervisor instance.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Control-plane base URL.
    pub api_url: String,
    /// Provider bearer token.
    pub provider_token: String,
    /// Region tag sent at registration.
    pub region: String,
    /// Assignment poll cadence. Default 15s (spec.md §4.5).
    pub poll_interval: Duration,
}

impl EngineConfig {
    /// Default poll cadence.
    pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(15);
}

/// Lifecycle stage of one Runner, per spec.md §4.3's state machine table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunnerStage {
    /// Constructed, `run()` not yet called.
    Init,
    /// Validating the image digest and pulling the image.
    Verify,
    /// Scaffolding the workdir and staging input.
    Stage,
    /// Container running.
    Run,
    /// Container exited on its own.
    Exited,
    /// Container killed for exceeding its duration limit.
    TimedOut,
    /// Container killed by a remote kill signal.
    Killed,
    /// Fatal pre-run error (digest/pull failure).
    Failed,
    /// Completion has been reported to the control plane.
    Reported,
}

/// Terminal outcome of one job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobOutcome {
    /// Job identifier.
    pub job_id: String,
    /// `COMPLETE` or `FAILED`.
    pub status: String,
    /// Container exit code, or -1 on a forced kill.
    pub exit_code: i32,
    /// Energy consumed over the job's lifetime, kWh, rounded to 6 places.
    pub energy_kwh: f64,
    /// Tail of the container's combined stdout/stderr, at most 5000 bytes.
    pub logs: String,
}

impl JobOutcome {
    /// `true` iff `exit_code == 0`.
    pub fn is_success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Engine event stream payload. Mirrors the control-flow events a reader of
/// the logs would want to correlate, independent of the `tracing` output.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EngineEvent {
    /// Supervisor started its main loop.
    Started,
    /// Graceful shutdown requested.
    StopRequested,
    /// A device was registered with the control plane.
    DeviceRegistered { uuid: String, assigned_id: String },
    /// A job was admitted and a Runner spawned for it.
    JobAdmitted { job_id: String },
    /// A Runner transitioned state.
    JobStage { job_id: String, stage: RunnerStage },
    /// A Runner reached a terminal outcome.
    JobFinished { outcome: JobOutcome },
    /// Heartbeat sent.
    Heartbeat { active_jobs: u32 },
    /// Non-fatal warning.
    Warning { message: String },
    /// Non-fatal error.
    Error { message: String },
    /// Supervisor stopped; no Runners remain.
    Stopped,
}

/// Handle to a running Supervisor instance.
pub struct EngineHandle {
    pub(crate) inner: std::sync::Arc<crate::supervisor::SupervisorInner>,
    pub(crate) join: tokio::task::JoinHandle<anyhow::Result<()>>,
}

/// A cheap, cloneable handle for requesting shutdown and subscribing to
/// events, independent of the join future `EngineHandle::wait` consumes.
/// Callers that need to keep requesting a stop while concurrently awaiting
/// the Supervisor's exit should take one of these before calling `wait`.
#[derive(Clone)]
pub struct EngineController {
    inner: std::sync::Arc<crate::supervisor::SupervisorInner>,
}

impl EngineController {
    /// Subscribe to the engine event stream.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<EngineEvent> {
        self.inner.event_tx.subscribe()
    }

    /// Request a graceful shutdown (spec.md §5, "Cancellation").
    pub fn request_stop(&self) {
        self.inner.request_stop();
    }
}

/// Start a Supervisor. Returns immediately; the Supervisor's own task does
/// startup registration and then enters its poll loop.
pub fn start_engine(config: EngineConfig) -> EngineHandle {
    crate::supervisor::start_supervisor(config)
}

impl EngineHandle {
    /// Subscribe to the engine event stream.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<EngineEvent> {
        self.inner.event_tx.subscribe()
    }

    /// Request a graceful shutdown (spec.md §5, "Cancellation").
    pub fn request_stop(&self) {
        self.inner.request_stop();
    }

    /// A cloneable controller usable after `wait()` has taken ownership of
    /// this handle's join future.
    pub fn controller(&self) -> EngineController {
        EngineController { inner: self.inner.clone() }
    }

    /// Wait for the Supervisor to stop, returning its task result. Consumes
    /// the handle, so take a `controller()` first if a graceful stop still
    /// needs to be requested while this future is pending.
    pub async fn wait(self) -> anyhow::Result<()> {
        match self.join.await {
            Ok(res) => res,
            Err(err) => Err(anyhow::anyhow!("supervisor task join error: {err}")),
        }
    }
}
