mod cli;
mod logging;
mod shutdown;

use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, warn};

use agent_core::config::{load_config_file, resolve, CliOverrides};
use agent_engine::{start_engine, EngineConfig, EngineEvent};
use tokio::sync::broadcast::error::RecvError;

use crate::cli::Cli;
use crate::shutdown::{spawn_signal_handler, ShutdownController, ShutdownEvent};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();

    let cli = Cli::parse();
    let overrides: CliOverrides = cli.into();

    let file_config = load_config_file()?;
    let config = resolve(file_config, overrides)?;

    info!(
        target: "agent",
        api_url = %config.api_url,
        region = %config.region,
        poll_interval_secs = config.poll_interval_secs,
        "starting gp4u provider agent"
    );

    let engine = start_engine(EngineConfig {
        api_url: config.api_url,
        provider_token: config.provider_token,
        region: config.region,
        poll_interval: std::time::Duration::from_secs(config.poll_interval_secs),
    });

    let mut events = engine.subscribe();
    let controller = engine.controller();

    let shutdown = Arc::new(ShutdownController::new());
    let (shutdown_tx, mut shutdown_rx) = tokio::sync::mpsc::unbounded_channel::<ShutdownEvent>();
    spawn_signal_handler(shutdown.clone(), shutdown_tx);

    // `engine.wait()` consumes the handle, so the supervisor's own join
    // future is pinned here and polled every loop iteration alongside the
    // shutdown and event streams. This is what lets the loop notice the
    // supervisor exiting on its own (zero devices registered, or a clean
    // stop after SIGTERM) instead of blocking on `events.recv()` forever.
    let supervisor_done = engine.wait();
    tokio::pin!(supervisor_done);

    let mut immediate_exit = false;

    loop {
        tokio::select! {
            ev_opt = shutdown_rx.recv() => {
                match ev_opt {
                    Some(ShutdownEvent::Graceful) => {
                        info!(target: "agent", "shutdown requested, finishing active jobs before exit");
                        controller.request_stop();
                    }
                    Some(ShutdownEvent::Immediate) => {
                        warn!(target: "agent", "shutdown requested again, exiting immediately");
                        immediate_exit = true;
                        break;
                    }
                    None => {}
                }
            }
            evt = events.recv() => {
                match evt {
                    Ok(v) => log_event(v),
                    Err(RecvError::Lagged(_)) => {}
                    Err(RecvError::Closed) => {}
                }
            }
            result = &mut supervisor_done => {
                if let Err(err) = result {
                    error!(target: "agent", %err, "agent exited with an error");
                    std::process::exit(1);
                }
                break;
            }
        }
    }

    if immediate_exit {
        std::process::exit(130);
    }

    Ok(())
}

fn log_event(evt: EngineEvent) {
    match evt {
        EngineEvent::Started => info!(target: "agent", "engine started"),
        EngineEvent::StopRequested => info!(target: "agent", "engine stop requested"),
        EngineEvent::DeviceRegistered { uuid, assigned_id } => {
            info!(target: "agent", %uuid, %assigned_id, "device registered")
        }
        EngineEvent::JobAdmitted { job_id } => info!(target: "agent", %job_id, "job admitted"),
        EngineEvent::JobStage { job_id, stage } => {
            info!(target: "agent", %job_id, stage = ?stage, "job stage transition")
        }
        EngineEvent::JobFinished { outcome } => {
            info!(target: "agent", job_id = %outcome.job_id, status = %outcome.status, exit_code = outcome.exit_code, "job finished")
        }
        EngineEvent::Heartbeat { active_jobs } => info!(target: "agent", active_jobs, "heartbeat sent"),
        EngineEvent::Warning { message } => warn!(target: "agent", %message),
        EngineEvent::Error { message } => error!(target: "agent", %message),
        EngineEvent::Stopped => info!(target: "agent", "engine stopped"),
    }
}
