//! Sandbox server configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use stp_election::ElectionConfig;

/// Port the original sandbox listened on.
pub const DEFAULT_PORT: u16 = 8080;

/// Configuration for the sandbox server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SandboxConfig {
    /// HTTP port
    pub port: u16,
    /// Timings for every election the sandbox starts
    pub election: ElectionConfig,
    /// Tick budget for a blocking run to convergence
    pub max_ticks: u64,
    /// Events kept in the sandbox log; older ones are folded away
    pub max_log_events: usize,
    /// Wall-clock time between live ticks; `None` disables the live ticker
    #[serde(skip)]
    pub tick_pacing: Option<Duration>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        let election = ElectionConfig::default();
        let tick_pacing = Some(election.tick_interval);
        Self {
            port: DEFAULT_PORT,
            election,
            max_ticks: 1_000_000,
            max_log_events: 100_000,
            tick_pacing,
        }
    }
}

impl SandboxConfig {
    /// Build from command line arguments: `[port] [speed factor]`.
    ///
    /// Unparseable values fall back to the defaults.
    pub fn from_args(args: &[String]) -> Self {
        let mut config = Self::default();
        if let Some(port) = args.get(1).and_then(|s| s.parse().ok()) {
            config.port = port;
        }
        if let Some(factor) = args
            .get(2)
            .and_then(|s| s.parse::<f64>().ok())
            .filter(|f| f.is_finite() && *f > 0.0)
        {
            config.election = config.election.with_speed_factor(factor);
        }
        config
    }

    #[must_use]
    pub fn with_election(mut self, election: ElectionConfig) -> Self {
        self.election = election;
        self
    }

    #[must_use]
    pub fn with_tick_pacing(mut self, pacing: Option<Duration>) -> Self {
        self.tick_pacing = pacing;
        self
    }

    #[must_use]
    pub fn with_max_ticks(mut self, max_ticks: u64) -> Self {
        self.max_ticks = max_ticks;
        self
    }

    /// Cap the event log. At least one event is always kept.
    #[must_use]
    pub fn with_max_log_events(mut self, max_log_events: usize) -> Self {
        self.max_log_events = max_log_events.max(1);
        self
    }
}
