//! Error types for stp-election.

use thiserror::Error;

use crate::bpdu::MalformedBpdu;

/// Result type for election operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while running an election.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    /// A topology lookup or edit failed.
    #[error("topology error: {0}")]
    Topology(#[from] stp_topology::Error),

    /// The configuration cannot drive an election.
    #[error("invalid election config: {0}")]
    InvalidConfig(String),

    /// No election is running.
    #[error("election has not been started")]
    NotStarted,

    /// The run budget ran out before the topology went quiet.
    #[error("election did not converge within {ticks} ticks")]
    NotConverged { ticks: u64 },

    /// A BPDU failed validation at the boundary.
    #[error("malformed BPDU: {0}")]
    MalformedBpdu(#[from] MalformedBpdu),
}
