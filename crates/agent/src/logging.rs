//! Structured logging setup (spec.md §7, "Logging"). `RUST_LOG` controls
//! verbosity; defaults to `info` for the agent's own targets and `warn`
//! for everything else so a noisy dependency doesn't drown the log.

use tracing_subscriber::EnvFilter;

pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn,agent=info,agent_engine=info,agent_api=info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}
