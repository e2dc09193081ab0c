//! The per-job Runner: one object owning a container's lifecycle from image
//! verification to terminal status (spec.md §4.3). Grounded on
//! `original_source`'s `job_runner.py::JobRunner.run`; generalized from the
//! teacher's fixed worker-pool task (`worker.rs::run_job`) into an
//! independent task per job, per spec.md §9's "Per-job control loops".

use std::sync::Arc;

use agent_api::ControlPlaneClient;
use agent_core::env_sanitize::{sanitize_env, validate_digest};
use agent_core::model::JobManifest;
use tracing::{info, warn};

use crate::api::{JobOutcome, RunnerStage};
use crate::telemetry::HostSystemSignals;
use crate::{container, watchdog, workdir};

/// Run one job end to end. Never panics on job-level failure: every fatal
/// condition becomes a `FAILED` [`JobOutcome`] instead.
pub async fn run(manifest: JobManifest, node_id: String, client: Arc<ControlPlaneClient>) -> (JobOutcome, RunnerStage) {
    let job_id = manifest.job_id.clone();

    // Phase 1: image verification.
    let Some(digest) = validate_digest(&manifest.docker_image_sha256) else {
        warn!(target: "agent::runner", %job_id, "malformed image digest, rejecting before any container state is created");
        return (failed(&job_id, "MALFORMED_DIGEST"), RunnerStage::Failed);
    };

    if let Err(err) = container::pull_image(&manifest.docker_image, &digest).await {
        warn!(target: "agent::runner", %job_id, %err, "image pull failed");
        return (failed(&job_id, "IMAGE_PULL_FAILED"), RunnerStage::Failed);
    }

    // Phase 2: workdir scaffolding.
    let workdir = match workdir::JobWorkdir::new() {
        Ok(w) => w,
        Err(err) => {
            warn!(target: "agent::runner", %job_id, %err, "workdir scaffolding failed");
            return (failed(&job_id, "WORKDIR_SETUP_FAILED"), RunnerStage::Failed);
        }
    };

    // Phase 3: input staging, non-fatal.
    if let Some(url) = &manifest.input_data_url {
        workdir::stage_input(url, &workdir).await;
    }

    // Phase 4: telemetry collector construction (no I/O).
    // Phase 5: watchdog launch, before the container starts.
    let (stop_tx, stop_rx) = tokio::sync::watch::channel(false);
    let watchdog_handle = watchdog::run(
        manifest.clone(),
        job_id.clone(),
        node_id.clone(),
        client.clone(),
        Box::new(HostSystemSignals::new()),
        stop_rx,
    )
    .await;

    // Phase 6: container launch, synchronous.
    let sanitized_env = sanitize_env(&manifest.env);
    let args = container::build_run_args(&manifest, &digest, &sanitized_env, &workdir);
    let timeout_secs = manifest.duration_limit_secs();
    let run_outcome = container::run_container(&manifest, args, timeout_secs).await;

    // Phase 7: watchdog teardown.
    let _ = stop_tx.send(true);
    let energy_joules = watchdog_handle.energy_joules().await;
    let was_remote_killed = watchdog_handle.kill_requested();
    watchdog_handle.join_with_grace().await;

    let (exit_code, logs, stage) = match run_outcome {
        Ok(outcome) if outcome.timed_out => (outcome.exit_code, outcome.logs, RunnerStage::TimedOut),
        Ok(outcome) if was_remote_killed => (outcome.exit_code, outcome.logs, RunnerStage::Killed),
        Ok(outcome) => (outcome.exit_code, outcome.logs, RunnerStage::Exited),
        Err(err) => {
            warn!(target: "agent::runner", %job_id, %err, "container invocation failed");
            (-1, format!("CONTAINER_ERROR: {err}"), RunnerStage::Failed)
        }
    };

    // Phase 8: output upload, only on success, non-fatal.
    if exit_code == 0 {
        workdir::upload_output(&manifest.output_bucket, &workdir).await;
    }

    // Phase 9: return the result record.
    let status = if exit_code == 0 { "COMPLETE" } else { "FAILED" };
    info!(target: "agent::runner", %job_id, status, exit_code, "job run complete");

    let outcome = JobOutcome {
        job_id,
        status: status.to_string(),
        exit_code,
        energy_kwh: crate::telemetry::energy_kwh(energy_joules),
        logs,
    };
    (outcome, stage)
}

fn failed(job_id: &str, body: &str) -> JobOutcome {
    JobOutcome {
        job_id: job_id.to_string(),
        status: "FAILED".to_string(),
        exit_code: -1,
        energy_kwh: 0.0,
        logs: body.to_string(),
    }
}
