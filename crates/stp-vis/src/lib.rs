//! STP Sandbox Server
//!
//! Interactive sandbox for the spanning-tree root election.
//!
//! # Architecture
//!
//! - **Sandbox**: topology edits plus the current election; edits reach a
//!   running election without restarting it
//! - **Playback**: scrub through a recorded run in virtual time
//! - **WebSocket**: accepts the browser client's `initSTP` topology and
//!   streams election events as they happen
//! - **REST API**: edit the topology, start and run elections, control playback
//!
//! # Usage
//!
//! ```no_run
//! use stp_vis::{SandboxConfig, SandboxServer};
//!
//! # async fn run() -> Result<(), std::io::Error> {
//! let config = SandboxConfig::default();
//! let port = config.port;
//! SandboxServer::new(config).serve(port).await
//! # }
//! ```

mod config;
mod error;
mod playback;
mod sandbox;
mod server;

pub use config::{SandboxConfig, DEFAULT_PORT};
pub use error::{Error, Result};
pub use playback::{Playback, PlaybackState, PlaybackStatus};
pub use sandbox::{ImportLink, ImportNode, ImportPort, InitStp, Sandbox, SandboxStatus};
pub use server::{AppState, SandboxServer};

#[cfg(test)]
mod tests {
    use super::*;
    use stp_election::ElectionConfig;
    use stp_topology::NodeId;

    #[test]
    fn recorded_run_can_be_played_back() {
        let config = SandboxConfig::default().with_election(ElectionConfig::fast());
        let mut sandbox = Sandbox::new(config);
        for _ in 0..4 {
            sandbox.create_node(0.0, 0.0).unwrap();
        }
        for (a, b) in [(2, 3), (3, 4), (4, 5), (5, 2)] {
            sandbox.create_link(NodeId(a), NodeId(b)).unwrap();
        }
        sandbox.start_election().unwrap();
        sandbox.run_to_convergence().unwrap();

        let mut playback = Playback::default();
        playback.sync(sandbox.run(), sandbox.base(), sandbox.events());
        assert_eq!(playback.len(), sandbox.events().len());

        playback.seek(playback.len());
        assert_eq!(playback.snapshot().roots, vec![NodeId(2)]);
        playback.seek(0);
        assert_eq!(playback.snapshot().beliefs.len(), 0);
    }
}
