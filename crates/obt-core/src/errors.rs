//! Error types for onboarding operations
//!
//! Errors here are synchronous: they are returned before anything is sent to a
//! device and always leave registry and session state untouched. Failures that a
//! device reports after a request was accepted are `Outcome::Failed`, not errors.

use crate::effects::IssueError;
use crate::identifiers::DeviceId;
use crate::device::DeviceKind;
use thiserror::Error;

/// Result type for onboarding operations
pub type ObtResult<T> = std::result::Result<T, ObtError>;

/// Errors raised while preparing or issuing an onboarding request
#[derive(Debug, Error)]
pub enum ObtError {
    /// Operator supplied a malformed or out-of-range value
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Device is not present in the registry set the operation requires
    #[error("Device {device} is not a known {kind} device")]
    UnknownDevice {
        /// Device that was looked up
        device: DeviceId,
        /// Registry set that was searched
        kind: DeviceKind,
    },

    /// External collaborator refused the request synchronously
    #[error("Request could not be issued: {0}")]
    IssueFailed(#[from] IssueError),

    /// Access-control entry failed submission-time validation
    #[error("Invalid access control entry: {0}")]
    InvalidAce(String),

    /// Role credential chain is unusable
    #[error("Invalid role credential chain: {0}")]
    InvalidRoleChain(String),

    /// Collaborator or configuration could not be initialised
    #[error("Initialization failed: {0}")]
    Initialization(String),
}

impl ObtError {
    /// Create an operator input error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Create an unknown device error
    pub fn unknown_device(device: DeviceId, kind: DeviceKind) -> Self {
        Self::UnknownDevice { device, kind }
    }

    /// Create an ACE validation error
    pub fn invalid_ace(msg: impl Into<String>) -> Self {
        Self::InvalidAce(msg.into())
    }

    /// Create an initialization error
    pub fn initialization(msg: impl Into<String>) -> Self {
        Self::Initialization(msg.into())
    }

    /// Whether the error was caused by operator input rather than the collaborator
    pub fn is_operator_error(&self) -> bool {
        matches!(
            self,
            ObtError::InvalidInput(_)
                | ObtError::UnknownDevice { .. }
                | ObtError::InvalidAce(_)
                | ObtError::InvalidRoleChain(_)
        )
    }
}
