//! The periodic per-Runner telemetry/kill loop (spec.md §4.4). Grounded on
//! `original_source`'s `telemetry.py::_watchdog_loop`; generalized from the
//! teacher's fixed-tick progress sampler (`engine.rs::sample_progress`) into
//! a standalone task that owns its own network-counter state per Runner.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use agent_api::ControlPlaneClient;
use agent_core::model::JobManifest;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::telemetry::{self, NetworkCounterState, SystemSignals};

const TICK: std::time::Duration = std::time::Duration::from_secs(10);

/// Shared state a Watchdog and its Runner both touch: the kill flag is
/// monotonic once set (spec.md §3, "Invariants"), and the energy
/// accumulator is monotonically non-decreasing.
pub struct WatchdogHandle {
    kill_requested: Arc<AtomicBool>,
    energy_joules: Arc<Mutex<f64>>,
    join: tokio::task::JoinHandle<()>,
}

impl WatchdogHandle {
    pub fn kill_requested(&self) -> bool {
        self.kill_requested.load(Ordering::SeqCst)
    }

    pub async fn energy_joules(&self) -> f64 {
        *self.energy_joules.lock().await
    }

    /// Join the watchdog task with a 5s grace (spec.md §4.3, phase 7).
    pub async fn join_with_grace(self) {
        const GRACE: std::time::Duration = std::time::Duration::from_secs(5);
        if tokio::time::timeout(GRACE, self.join).await.is_err() {
            warn!(target: "agent::watchdog", "watchdog task did not join within grace period");
        }
    }
}

/// Runs one Watchdog to completion. Ticks every 10s until `stop` fires or a
/// remote kill decision arrives; never exits early on a telemetry error
/// (spec.md §4.4, "a missed sample never kills the job").
pub async fn run(
    manifest: JobManifest,
    job_id: String,
    node_id: String,
    client: Arc<ControlPlaneClient>,
    mut signals: Box<dyn SystemSignals>,
    mut stop: tokio::sync::watch::Receiver<bool>,
) -> WatchdogHandle {
    let kill_requested = Arc::new(AtomicBool::new(false));
    let energy_joules = Arc::new(Mutex::new(0.0));

    let started_at = Instant::now();
    let mut net_state = NetworkCounterState::default();
    let mut interval = tokio::time::interval(TICK);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    let kill_requested_task = kill_requested.clone();
    let energy_joules_task = energy_joules.clone();
    let join = tokio::spawn(async move {
        let kill_requested = kill_requested_task;
        let energy_joules = energy_joules_task;
        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = stop.changed() => {
                    if *stop.borrow() {
                        return;
                    }
                    continue;
                }
            }
            if *stop.borrow() {
                return;
            }

            let gpu = signals.gpu_reading();
            let (rx, tx) = signals.network_counters();
            let conn_stats = signals.connection_stats();
            let process_names = signals.process_names();

            let energy_after = {
                let mut acc = energy_joules.lock().await;
                *acc = telemetry::accumulate_energy(*acc, gpu.power_watts);
                *acc
            };

            let sample = telemetry::build_sample(
                &manifest,
                &job_id,
                &node_id,
                started_at,
                energy_after,
                gpu,
                &mut net_state,
                rx,
                tx,
                conn_stats,
                &process_names,
            );

            match client.send_telemetry(sample).await {
                Ok(response) if response.should_kill() => {
                    info!(target: "agent::watchdog", job_id = %job_id, "remote kill received, killing container");
                    if let Err(err) = crate::container::kill_container(&manifest.container_name()).await {
                        warn!(target: "agent::watchdog", job_id = %job_id, %err, "kill command failed");
                    }
                    kill_requested.store(true, Ordering::SeqCst);
                    return;
                }
                Ok(_) => {}
                Err(err) => {
                    warn!(target: "agent::watchdog", job_id = %job_id, %err, "telemetry submission failed, continuing");
                }
            }
        }
    });

    WatchdogHandle {
        kill_requested,
        energy_joules,
        join,
    }
}
