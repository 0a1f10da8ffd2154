//! Error types for the sandbox server.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Result type for sandbox operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced to sandbox clients.
#[derive(Debug, Error)]
pub enum Error {
    /// Topology edit failed
    #[error("{0}")]
    Topology(#[from] stp_topology::Error),

    /// Election could not start or run
    #[error("{0}")]
    Election(#[from] stp_election::Error),

    /// No election has been started yet
    #[error("no election has been started")]
    NoElection,

    /// Request body could not be used
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// HTTP status for this error.
    pub fn status(&self) -> StatusCode {
        use stp_topology::Error as Topo;
        match self {
            Error::Topology(Topo::NotFound(_) | Topo::PortNotFound { .. }) => StatusCode::NOT_FOUND,
            Error::Topology(Topo::DuplicateNode(_) | Topo::IdSpaceExhausted) => StatusCode::CONFLICT,
            Error::Topology(Topo::SelfLoop(_)) => StatusCode::BAD_REQUEST,
            Error::Election(stp_election::Error::Topology(_)) => StatusCode::NOT_FOUND,
            Error::Election(
                stp_election::Error::InvalidConfig(_) | stp_election::Error::MalformedBpdu(_),
            ) => StatusCode::BAD_REQUEST,
            Error::Election(stp_election::Error::NotStarted) | Error::NoElection => StatusCode::CONFLICT,
            Error::Election(stp_election::Error::NotConverged { .. }) => StatusCode::REQUEST_TIMEOUT,
            Error::InvalidRequest(_) | Error::Serialization(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        } else {
            tracing::debug!(error = %self, %status, "Request rejected");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stp_topology::NodeId;

    #[test]
    fn not_found_maps_to_404() {
        let err = Error::from(stp_topology::Error::NotFound(NodeId(9)));
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
        assert_eq!(err.into_response().status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn self_loop_is_bad_request() {
        let err = Error::from(stp_topology::Error::SelfLoop(NodeId(2)));
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn missing_election_is_conflict() {
        assert_eq!(Error::NoElection.status(), StatusCode::CONFLICT);
    }
}
