//! Caller-facing error taxonomy

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{Diagnostics, StatusPair, status_codes, sub_status_codes};

/// Kind of failure surfaced to the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Replica lost the partition lease (410/1022)
    LeaseNotFound,
    /// Session token not yet visible in any viable region (404/1002)
    ReadSessionNotAvailable,
    /// Request timed out, e.g. after exhausting the write barrier budget (408)
    RequestTimeout,
    /// End-to-end timeout exceeded on the client (408/20008)
    OperationCancelled,
    /// Every candidate region was excluded (503/20100)
    NoViableRegion,
    /// Non-retryable service error passed through to the caller
    Service,
}

impl ErrorKind {
    /// Metric label of the kind
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LeaseNotFound => "lease_not_found",
            Self::ReadSessionNotAvailable => "read_session_not_available",
            Self::RequestTimeout => "request_timeout",
            Self::OperationCancelled => "operation_cancelled",
            Self::NoViableRegion => "no_viable_region",
            Self::Service => "service",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::LeaseNotFound => "Lease not found",
            Self::ReadSessionNotAvailable => "Read session not available",
            Self::RequestTimeout => "Request timeout",
            Self::OperationCancelled => "Operation cancelled",
            Self::NoViableRegion => "No viable region",
            Self::Service => "Service error",
        };
        f.write_str(name)
    }
}

/// Error returned by every client operation
#[derive(Debug, Clone, Error)]
#[error("{kind} ({status}): {message}")]
pub struct ClientError {
    pub kind: ErrorKind,
    pub status: StatusPair,
    pub message: String,
    /// Regions and replica-level sub-attempts behind this failure
    pub diagnostics: Box<Diagnostics>,
}

impl ClientError {
    pub fn new(kind: ErrorKind, status: StatusPair, message: impl Into<String>) -> Self {
        Self { kind, status, message: message.into(), diagnostics: Box::default() }
    }

    /// Create a 408 request timeout error with the given sub-status
    pub fn request_timeout(sub_status: u32, message: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::RequestTimeout,
            StatusPair::new(status_codes::REQUEST_TIMEOUT, sub_status),
            message,
        )
    }

    /// Create a 408/20008 end-to-end timeout error
    pub fn operation_cancelled(message: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::OperationCancelled,
            StatusPair::new(
                status_codes::REQUEST_TIMEOUT,
                sub_status_codes::CLIENT_OPERATION_TIMEOUT,
            ),
            message,
        )
    }

    /// Create a 503/20100 error for an operation with no region left to try
    pub fn no_viable_region(message: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::NoViableRegion,
            StatusPair::new(status_codes::SERVICE_UNAVAILABLE, sub_status_codes::NO_VIABLE_REGION),
            message,
        )
    }

    /// Classify a replica-level status into the taxonomy
    pub fn from_status(status: StatusPair, message: impl Into<String>) -> Self {
        let kind = if status.is_lease_not_found() {
            ErrorKind::LeaseNotFound
        } else if status.is_read_session_not_available() {
            ErrorKind::ReadSessionNotAvailable
        } else if status.status == status_codes::REQUEST_TIMEOUT {
            ErrorKind::RequestTimeout
        } else {
            ErrorKind::Service
        };
        Self::new(kind, status, message)
    }

    /// Attach the diagnostics snapshot of the failed operation
    pub fn with_diagnostics(mut self, diagnostics: Diagnostics) -> Self {
        self.diagnostics = Box::new(diagnostics);
        self
    }

    /// Whether a different attempt (region, replica) could plausibly succeed
    pub fn is_transient(&self) -> bool {
        match self.kind {
            ErrorKind::LeaseNotFound
            | ErrorKind::ReadSessionNotAvailable
            | ErrorKind::RequestTimeout => true,
            ErrorKind::OperationCancelled | ErrorKind::NoViableRegion => false,
            ErrorKind::Service => matches!(
                self.status.status,
                status_codes::GONE
                    | status_codes::TOO_MANY_REQUESTS
                    | status_codes::RETRY_WITH
                    | status_codes::SERVICE_UNAVAILABLE
            ),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn test_from_status_classification() {
        let lease = ClientError::from_status(
            StatusPair::new(status_codes::GONE, sub_status_codes::LEASE_NOT_FOUND),
            "lease",
        );
        assert_eq!(lease.kind, ErrorKind::LeaseNotFound);
        assert!(lease.is_transient());

        let session = ClientError::from_status(
            StatusPair::new(status_codes::NOT_FOUND, sub_status_codes::READ_SESSION_NOT_AVAILABLE),
            "session",
        );
        assert_eq!(session.kind, ErrorKind::ReadSessionNotAvailable);

        let not_found = ClientError::from_status(StatusPair::new(status_codes::NOT_FOUND, 0), "nf");
        assert_eq!(not_found.kind, ErrorKind::Service);
        assert!(!not_found.is_transient());

        let unavailable =
            ClientError::from_status(StatusPair::new(status_codes::SERVICE_UNAVAILABLE, 0), "503");
        assert!(unavailable.is_transient());
    }

    #[test]
    fn test_terminal_kinds() {
        let cancelled = ClientError::operation_cancelled("e2e");
        assert_eq!(cancelled.status.to_string(), "408/20008");
        assert!(!cancelled.is_transient());

        let none = ClientError::no_viable_region("all excluded");
        assert_eq!(none.kind, ErrorKind::NoViableRegion);
        assert!(!none.is_transient());
        assert!(none.to_string().contains("No viable region"));
    }
}
