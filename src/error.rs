//! Error types for gaze-grasper-core

use std::io;
use thiserror::Error;

/// Result type alias using LinkError
pub type Result<T> = std::result::Result<T, LinkError>;

/// Link error types
///
/// All errors that can occur in the connection core. Failures caught at the
/// transfer boundary are converted into these variants instead of crossing
/// task boundaries as panics.
#[derive(Debug, Error)]
pub enum LinkError {
    /// I/O error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Required platform permission is missing
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Initiating a connection failed
    #[error("Connection failed: {0}")]
    ConnectFailed(String),

    /// An inbound read raised an I/O error mid-stream
    #[error("Reading incoming data failed: {0}")]
    TransferFailed(String),

    /// An outbound write raised an I/O error
    #[error("Write failed: {0}")]
    WriteFailed(String),

    /// A link-state change referred to a device outside the bonded set
    #[error("Device not paired: {0}")]
    NotPaired(String),
}

impl LinkError {
    /// Create a PermissionDenied error
    pub fn permission(msg: impl Into<String>) -> Self {
        Self::PermissionDenied(msg.into())
    }

    /// Create a ConnectFailed error
    pub fn connect(msg: impl Into<String>) -> Self {
        Self::ConnectFailed(msg.into())
    }

    /// Create a TransferFailed error
    pub fn transfer(msg: impl Into<String>) -> Self {
        Self::TransferFailed(msg.into())
    }

    /// Create a WriteFailed error
    pub fn write(msg: impl Into<String>) -> Self {
        Self::WriteFailed(msg.into())
    }

    /// Create a NotPaired error
    pub fn not_paired(msg: impl Into<String>) -> Self {
        Self::NotPaired(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = LinkError::permission("scan");
        assert!(matches!(err, LinkError::PermissionDenied(_)));
    }

    #[test]
    fn test_error_display() {
        let err = LinkError::transfer("socket closed");
        assert_eq!(
            err.to_string(),
            "Reading incoming data failed: socket closed"
        );
    }
}
