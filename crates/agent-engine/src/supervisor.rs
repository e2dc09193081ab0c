//! The Agent Supervisor (spec.md §4.5): startup device registration, the
//! assignment poll loop, admission, and shutdown. Grounded on the teacher's
//! `EngineRuntime`/`EngineInner` split (`engine.rs`) — the broadcast event
//! channel, the `AtomicBool` + `Notify` stop signal, and the free-function
//! `start_engine` entry point are kept; the fixed worker pool is replaced
//! with one task per admitted job, per spec.md §9's "Per-job control loops".

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use agent_api::types::RegisterRequest;
use agent_api::ControlPlaneClient;
use agent_core::device::{enumerate_devices, UnavailableGpuBackend};
use agent_core::model::{JobManifest, RawManifest};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::api::{EngineConfig, EngineEvent, EngineHandle, JobOutcome, RunnerStage};

pub(crate) struct SupervisorInner {
    pub(crate) event_tx: broadcast::Sender<EngineEvent>,
    stop_requested: AtomicBool,
    notify: tokio::sync::Notify,
}

impl SupervisorInner {
    pub(crate) fn request_stop(&self) {
        if !self.stop_requested.swap(true, Ordering::SeqCst) {
            let _ = self.event_tx.send(EngineEvent::StopRequested);
            self.notify.notify_waiters();
        }
    }

    fn should_stop(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }
}

struct ActiveJob {
    handle: JoinHandle<()>,
}

struct Supervisor {
    client: Arc<ControlPlaneClient>,
    node_id: String,
    registered: HashMap<String, String>, // uuid -> assigned_id
    active: Arc<Mutex<HashMap<String, ActiveJob>>>,
    poll_interval: Duration,
    inner: Arc<SupervisorInner>,
}

impl Supervisor {
    fn emit(&self, event: EngineEvent) {
        let _ = self.inner.event_tx.send(event);
    }

    async fn active_job_count(&self) -> u32 {
        self.active.lock().await.len() as u32
    }

    fn gpu_ids(&self) -> Vec<String> {
        self.registered.values().cloned().collect()
    }

    /// Reject silently if the job has no id or is already active; otherwise
    /// ACK, build the manifest with defensive defaults, and spawn a Runner
    /// task (spec.md §4.5, "Admission").
    async fn admit(&self, raw: RawManifest) {
        let Some(job_id) = raw.job_id().map(str::to_string) else {
            warn!(target: "agent::supervisor", "dropping assignment with no job id");
            return;
        };

        {
            let active = self.active.lock().await;
            if active.contains_key(&job_id) {
                return; // already active: idempotent re-delivery, no-op.
            }
        }

        if let Err(err) = self.client.ack(&job_id).await {
            warn!(target: "agent::supervisor", %job_id, %err, "ack failed, abandoning admission");
            return;
        }

        let Some(manifest) = JobManifest::from_raw(raw) else {
            return;
        };

        self.emit(EngineEvent::JobAdmitted { job_id: job_id.clone() });

        let client = self.client.clone();
        let node_id = self.node_id.clone();
        let active = self.active.clone();
        let event_tx = self.inner.event_tx.clone();
        let job_id_for_task = job_id.clone();

        let handle = tokio::spawn(async move {
            let (outcome, stage) = crate::runner::run(manifest, node_id, client.clone()).await;
            let _ = event_tx.send(EngineEvent::JobStage {
                job_id: job_id_for_task.clone(),
                stage,
            });
            report_completion(&client, &outcome).await;
            let _ = event_tx.send(EngineEvent::JobFinished { outcome });
            active.lock().await.remove(&job_id_for_task);
        });

        self.active.lock().await.insert(job_id, ActiveJob { handle });
    }

    async fn poll_tick(&self) {
        match self.client.poll_assignments(&self.gpu_ids()).await {
            Ok(response) => {
                for raw in response.jobs {
                    self.admit(raw).await;
                }
            }
            Err(err) => {
                warn!(target: "agent::supervisor", %err, "assignment poll failed, will retry next tick");
            }
        }
    }

    async fn heartbeat_tick(&self) {
        let timestamp = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
        let active_jobs = self.active_job_count().await;
        if let Err(err) = self.client.heartbeat(active_jobs, &self.gpu_ids(), &timestamp).await {
            warn!(target: "agent::supervisor", %err, "heartbeat failed, swallowed");
        } else {
            self.emit(EngineEvent::Heartbeat { active_jobs });
        }
    }

    /// Join every active Runner with a 300s grace (spec.md §5,
    /// "Cancellation").
    async fn join_active_with_grace(&self) {
        const GRACE: Duration = Duration::from_secs(300);
        let handles: Vec<JoinHandle<()>> = {
            let mut active = self.active.lock().await;
            active.drain().map(|(_, job)| job.handle).collect()
        };
        let join_all = futures_join_all(handles);
        if tokio::time::timeout(GRACE, join_all).await.is_err() {
            warn!(target: "agent::supervisor", "shutdown grace period elapsed with runners still active");
        }
    }

    async fn run(self) -> anyhow::Result<()> {
        self.emit(EngineEvent::Started);

        let ticks_per_heartbeat = (60u64).div_ceil(self.poll_interval.as_secs().max(1)).max(1);
        let mut tick_count: u64 = 0;

        loop {
            if self.inner.should_stop() {
                break;
            }

            self.poll_tick().await;
            tick_count += 1;
            if tick_count % ticks_per_heartbeat == 0 {
                self.heartbeat_tick().await;
            }

            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                _ = self.inner.notify.notified() => {}
            }
        }

        self.join_active_with_grace().await;
        self.emit(EngineEvent::Stopped);
        Ok(())
    }
}

async fn futures_join_all(handles: Vec<JoinHandle<()>>) {
    for handle in handles {
        let _ = handle.await;
    }
}

async fn report_completion(client: &ControlPlaneClient, outcome: &JobOutcome) {
    if let Err(err) = client.report_completion(&outcome.job_id, &outcome.status, outcome.energy_kwh).await {
        warn!(target: "agent::supervisor", job_id = %outcome.job_id, %err, "completion report failed, best-effort only");
    }
}

/// Register every discovered device. Per-device failure is logged but does
/// not abort the batch (spec.md §4.5, "Startup").
async fn register_devices(client: &ControlPlaneClient, region: &str) -> HashMap<String, String> {
    let devices = enumerate_devices(&UnavailableGpuBackend).await;
    let mut registered = HashMap::new();

    for device in devices {
        let req = RegisterRequest {
            uuid: &device.uuid,
            name: &device.name,
            vram_gb: device.vram_gb,
            driver: &device.driver_version,
            cuda: device.cuda_version.as_deref(),
            region,
            provider_token: "", // the client already authenticates via bearer header.
        };
        match client.register(&req).await {
            Ok(res) => match res.assigned_id() {
                Some(assigned_id) => {
                    info!(target: "agent::supervisor", uuid = %device.uuid, assigned_id, "device registered");
                    registered.insert(device.uuid, assigned_id.to_string());
                }
                None => warn!(target: "agent::supervisor", uuid = %device.uuid, "register response carried no assigned id"),
            },
            Err(err) => warn!(target: "agent::supervisor", uuid = %device.uuid, %err, "device registration failed"),
        }
    }

    registered
}

/// Start a Supervisor: registers devices, then spawns its poll-loop task.
/// If startup registers zero devices, the returned task resolves with an
/// error immediately; the binary crate maps that to exit code 1 (spec.md
/// §4.5, "a node with no registered devices has no reason to run").
pub fn start_supervisor(config: EngineConfig) -> EngineHandle {
    let (event_tx, _) = broadcast::channel::<EngineEvent>(1024);
    let inner = Arc::new(SupervisorInner {
        event_tx,
        stop_requested: AtomicBool::new(false),
        notify: tokio::sync::Notify::new(),
    });

    let join = tokio::spawn(run_supervisor(inner.clone(), config));
    EngineHandle { inner, join }
}

async fn run_supervisor(inner: Arc<SupervisorInner>, config: EngineConfig) -> anyhow::Result<()> {
    let node_id = uuid::Uuid::new_v4().to_string();
    let client = Arc::new(ControlPlaneClient::new(&config.api_url, config.provider_token.clone(), node_id.clone())?);

    let registered = register_devices(&client, &config.region).await;
    for (uuid, assigned_id) in &registered {
        let _ = inner.event_tx.send(EngineEvent::DeviceRegistered {
            uuid: uuid.clone(),
            assigned_id: assigned_id.clone(),
        });
    }

    if registered.is_empty() {
        let message = "zero devices registered, nothing to run".to_string();
        let _ = inner.event_tx.send(EngineEvent::Error { message: message.clone() });
        return Err(anyhow::anyhow!(message));
    }

    let supervisor = Supervisor {
        client,
        node_id,
        registered,
        active: Arc::new(Mutex::new(HashMap::new())),
        poll_interval: config.poll_interval,
        inner,
    };

    supervisor.run().await
}

#[allow(dead_code)]
fn stage_is_terminal(stage: RunnerStage) -> bool {
    matches!(stage, RunnerStage::Reported | RunnerStage::Failed)
}
