//! Command-line surface (spec.md §7, "Configuration precedence"). Every
//! flag has an `env` fallback so the agent can run unattended under a
//! process supervisor with no flags at all.

use clap::Parser;

use agent_core::config::CliOverrides;

#[derive(Debug, Clone, Parser)]
#[command(name = "gp4u-agent", version, about = "GP4U provider agent")]
pub struct Cli {
    /// Control-plane base URL.
    #[arg(long, env = "GP4U_API_URL")]
    pub api_url: Option<String>,

    /// Provider bearer token. Required, from here, the environment, or the
    /// on-disk config file.
    #[arg(long, env = "GP4U_PROVIDER_TOKEN")]
    pub token: Option<String>,

    /// Region tag reported at device registration.
    #[arg(long, env = "GP4U_REGION")]
    pub region: Option<String>,

    /// Assignment poll cadence, seconds.
    #[arg(long, env = "GP4U_POLL_INTERVAL_SECS")]
    pub poll: Option<u64>,
}

impl From<Cli> for CliOverrides {
    fn from(cli: Cli) -> Self {
        CliOverrides {
            api_url: cli.api_url,
            provider_token: cli.token,
            region: cli.region,
            poll_interval_secs: cli.poll,
        }
    }
}
