#![forbid(unsafe_code)]
#![deny(unreachable_pub)]

//! Job execution engine for the GP4U provider agent: device registration,
//! the assignment poll loop, per-job Runners, and their watchdogs.

/// Public API for the engine crate.
pub mod api;

mod container;
mod runner;
mod supervisor;
mod telemetry;
mod watchdog;
mod workdir;

pub use api::{start_engine, EngineConfig, EngineController, EngineEvent, EngineHandle, JobOutcome, RunnerStage};
