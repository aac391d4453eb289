//! Coordinator error types with HTTP status code mapping.
//!
//! [`HaError`] is the central error type for the coordinator. Adapter and
//! store failures are classified so the control loop can tell a transient
//! probe failure (retried next tick) from an assumption violation that must
//! be surfaced to the caller. Each variant also maps to a structured JSON
//! error response for the HTTP surface.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

/// Structured JSON error response body.
///
/// All error responses follow this shape:
/// ```json
/// {
///   "error": {
///     "code": 2001,
///     "message": "member not found: pg-2",
///     "details": null
///   }
/// }
/// ```
#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ErrorResponse {
    /// Structured error payload.
    pub error: ErrorBody,
}

/// Inner error body with numeric code and human-readable message.
#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ErrorBody {
    /// Numeric error code (see code ranges on [`HaError`]).
    pub code: u32,
    /// Human-readable error message.
    pub message: String,
    /// Optional additional details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Coordinator error enum with HTTP status code mapping.
///
/// # Error Code Ranges
///
/// | Range     | Category              | HTTP Status               |
/// |-----------|-----------------------|---------------------------|
/// | 1000–1999 | Malformed engine data | 422 Unprocessable Entity  |
/// | 2000–2999 | State / Not Found     | 404 Not Found / 409 Conflict |
/// | 3000–3999 | Server / Command      | 500 Internal Server Error |
/// | 5000–5999 | Reachability          | 503 / 504                 |
#[derive(Debug, thiserror::Error)]
pub enum HaError {
    /// A local or remote node could not be reached.
    #[error("connection to {target} failed: {reason}")]
    Connection {
        /// Member name or address that was probed.
        target: String,
        /// Underlying driver message.
        reason: String,
    },

    /// A query was issued against a node in the wrong role.
    #[error("role mismatch: {operation} requires {expected}, node is {actual}")]
    RoleMismatch {
        /// Operation that was attempted.
        operation: String,
        /// Role the operation requires.
        expected: String,
        /// Role the node reported.
        actual: String,
    },

    /// The engine returned text that is not a valid LSN.
    #[error("malformed lsn: {0:?}")]
    MalformedLsn(String),

    /// The synchronous standby specification could not be parsed.
    #[error("malformed synchronous standby spec {raw:?}: {reason}")]
    MalformedSyncSpec {
        /// Raw setting value.
        raw: String,
        /// Parser diagnostic.
        reason: String,
    },

    /// Two replication positions on different timelines were compared.
    #[error("positions on timelines {left} and {right} are not comparable")]
    IncomparableTimeline {
        /// Timeline of the reference position.
        left: u32,
        /// Timeline of the local position.
        right: u32,
    },

    /// Rewinding the local data directory failed.
    #[error("rewind failed: {0}")]
    RewindFailed(String),

    /// An engine control command exited unsuccessfully.
    #[error("command `{command}` failed: {stderr}")]
    CommandFailed {
        /// Command line that was executed.
        command: String,
        /// Captured standard error (or exit status).
        stderr: String,
    },

    /// A probe did not complete within its budget.
    #[error("{operation} timed out after {timeout_ms} ms")]
    Timeout {
        /// Operation that was attempted.
        operation: String,
        /// Budget in milliseconds.
        timeout_ms: u64,
    },

    /// The coordination store could not be read or written.
    #[error("coordination store error: {0}")]
    Store(String),

    /// A member with the given name is not part of the cluster.
    #[error("member not found: {0}")]
    MemberNotFound(String),

    /// The cluster has no leader lock holder.
    #[error("cluster has no leader")]
    NoLeader,

    /// Invalid configuration value.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Local filesystem failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl HaError {
    /// Builds a [`HaError::Connection`] for the given target.
    pub fn connection(target: impl Into<String>, reason: impl ToString) -> Self {
        Self::Connection {
            target: target.into(),
            reason: reason.to_string(),
        }
    }

    /// Returns the numeric error code for this variant.
    #[must_use]
    pub const fn error_code(&self) -> u32 {
        match self {
            Self::MalformedLsn(_) => 1001,
            Self::MalformedSyncSpec { .. } => 1002,
            Self::MemberNotFound(_) => 2001,
            Self::NoLeader => 2002,
            Self::RoleMismatch { .. } => 2003,
            Self::IncomparableTimeline { .. } => 2004,
            Self::Internal(_) => 3000,
            Self::CommandFailed { .. } => 3001,
            Self::RewindFailed(_) => 3002,
            Self::Io(_) => 3003,
            Self::Config(_) => 3004,
            Self::Connection { .. } => 5001,
            Self::Store(_) => 5002,
            Self::Timeout { .. } => 5003,
        }
    }

    /// Returns the HTTP status code for this variant.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::MalformedLsn(_) | Self::MalformedSyncSpec { .. } => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            Self::MemberNotFound(_) => StatusCode::NOT_FOUND,
            Self::NoLeader | Self::RoleMismatch { .. } | Self::IncomparableTimeline { .. } => {
                StatusCode::CONFLICT
            }
            Self::Internal(_)
            | Self::CommandFailed { .. }
            | Self::RewindFailed(_)
            | Self::Io(_)
            | Self::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Connection { .. } | Self::Store(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    /// Returns `true` for failures that are expected to clear on a later
    /// tick (unreachable nodes, slow probes, store hiccups).
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. } | Self::Timeout { .. } | Self::Store(_)
        )
    }
}

impl From<sqlx::Error> for HaError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Io(e) => Self::connection("database", e),
            sqlx::Error::PoolTimedOut => Self::connection("database", "pool timed out"),
            sqlx::Error::PoolClosed => Self::connection("database", "pool closed"),
            other => Self::Internal(format!("database query failed: {other}")),
        }
    }
}

impl IntoResponse for HaError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: ErrorBody {
                code: self.error_code(),
                message: self.to_string(),
                details: None,
            },
        };
        let mut response = axum::Json(body).into_response();
        *response.status_mut() = status;
        response
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(HaError::connection("pg-1", "refused").is_transient());
        assert!(
            HaError::Timeout {
                operation: "probe".to_string(),
                timeout_ms: 10,
            }
            .is_transient()
        );
        assert!(!HaError::RewindFailed("boom".to_string()).is_transient());
        assert!(!HaError::MalformedLsn("x".to_string()).is_transient());
    }

    #[test]
    fn status_codes_follow_ranges() {
        assert_eq!(
            HaError::MemberNotFound("m9".to_string()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            HaError::connection("m1", "down").status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(HaError::NoLeader.error_code(), 2002);
    }

    #[test]
    fn display_includes_context() {
        let err = HaError::RoleMismatch {
            operation: "current wal position".to_string(),
            expected: "primary".to_string(),
            actual: "secondary".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("current wal position"));
        assert!(msg.contains("secondary"));
    }
}
