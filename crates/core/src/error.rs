// SPDX-FileCopyrightText: © 2025 CommKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Structured error types for CommKit.
//!
//! This module provides a hierarchy of error types for better error handling
//! and programmatic error inspection. All errors implement `Display` and can
//! be converted to/from `String` for backward compatibility.

use thiserror::Error;

/// Main error type for CommKit operations.
///
/// This enum categorizes errors into distinct types to enable better error handling,
/// logging, and recovery strategies. Each variant includes a descriptive message.
#[derive(Debug, Error)]
pub enum CommKitError {
    /// Configuration or parameter validation error.
    ///
    /// Examples:
    /// - Invalid preference descriptor (missing key or type)
    /// - Malformed plugin manifest
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Runtime error during normal operation.
    ///
    /// Examples:
    /// - Subject bookkeeping failure
    /// - Handler lookup failure
    #[error("Runtime error: {0}")]
    Runtime(String),

    /// Plugin loading, initialization, or execution error.
    ///
    /// Examples:
    /// - Plugin file not found
    /// - ABI version mismatch
    /// - Plugin initialization returned no exit function
    #[error("Plugin error: {0}")]
    Plugin(String),

    /// Plugin package installation error.
    ///
    /// Examples:
    /// - Archive cannot be read
    /// - Extraction failure
    #[error("Install error: {0}")]
    Install(String),

    /// Serialization or deserialization error.
    ///
    /// Examples:
    /// - preferences.json is not a JSON array
    /// - Corrupt MessagePack value file
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// I/O error (file operations, directory access).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience type alias for Results using `CommKitError`.
pub type Result<T> = std::result::Result<T, CommKitError>;

// Backward compatibility: Allow conversion from CommKitError to String
impl From<CommKitError> for String {
    fn from(err: CommKitError) -> Self {
        err.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CommKitError::Configuration("Missing manifest name".to_string());
        assert_eq!(err.to_string(), "Configuration error: Missing manifest name");

        let err = CommKitError::Plugin("init failed".to_string());
        assert_eq!(err.to_string(), "Plugin error: init failed");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "File not found");
        let err: CommKitError = io_err.into();
        assert!(err.to_string().contains("I/O error"));
        assert!(err.to_string().contains("File not found"));
    }
}
