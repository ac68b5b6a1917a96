//! Contract with the external transport and security collaborator
//!
//! The collaborator owns every network round-trip and all cryptography. Each call
//! here returns as soon as the request is issued (or refused); the eventual result
//! arrives later, from whatever execution context the collaborator runs on,
//! through the [`Completion`] handed over with the request or through the
//! [`DiscoverySink`] for discovery.

use crate::ace::SecurityAce;
use crate::device::{DiscoveryFlow, DiscoveryReport, DiscoveryRequest};
use crate::identifiers::{DeviceId, RequestId};
use crate::otm::TransferCredential;
use crate::role::{RoleCredential, RoleCredentialChain};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::oneshot;

/// Terminal result of an accepted request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Device confirmed the operation
    Succeeded,
    /// Device or handshake reported failure
    Failed,
}

impl Outcome {
    /// Whether the request succeeded
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Succeeded)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Succeeded => f.write_str("succeeded"),
            Outcome::Failed => f.write_str("failed"),
        }
    }
}

/// Synchronous refusal to issue a request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IssueError {
    /// No usable transport
    #[error("transport unavailable")]
    TransportUnavailable,

    /// Collaborator rejected the parameters
    #[error("rejected: {0}")]
    Rejected(String),

    /// Collaborator has been shut down
    #[error("collaborator is shut down")]
    ShutDown,
}

/// Result of issuing a request
pub type IssueResult = Result<(), IssueError>;

/// One-shot completion handle for an issued request.
///
/// The collaborator calls [`Completion::complete`] exactly once. Dropping the
/// handle without completing is seen by the engine as an abandoned request.
pub struct Completion {
    request_id: RequestId,
    tx: oneshot::Sender<Outcome>,
}

impl Completion {
    /// Create a completion handle and the receiver the engine waits on
    pub fn channel(request_id: RequestId) -> (Self, oneshot::Receiver<Outcome>) {
        let (tx, rx) = oneshot::channel();
        (Self { request_id, tx }, rx)
    }

    /// Request this completion belongs to
    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    /// Deliver the outcome.
    ///
    /// Returns `false` when nobody is waiting any more, e.g. after a full reset
    /// discarded the session. That is not an error for the caller.
    pub fn complete(self, outcome: Outcome) -> bool {
        self.tx.send(outcome).is_ok()
    }
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion")
            .field("request_id", &self.request_id)
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

/// Receiver of discovery results.
pub trait DiscoverySink: Send + Sync {
    /// Called once per device the transport finds
    fn on_device(&self, report: DiscoveryReport) -> DiscoveryFlow;
}

/// Kind of provisioning request, for logs and events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProvisionKind {
    /// Pairwise symmetric credentials between two devices
    PairwiseCredentials,
    /// Operator-built ACE
    Ace,
    /// Wildcard ACE for authenticated clients
    AuthCryptWildcardAce,
    /// Wildcard ACE for a role
    RoleWildcardAce,
    /// Identity certificate
    IdentityCertificate,
    /// Role certificate
    RoleCertificate,
    /// Factory reset of an owned device
    HardReset,
}

impl fmt::Display for ProvisionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ProvisionKind::PairwiseCredentials => "pairwise credentials",
            ProvisionKind::Ace => "ACE",
            ProvisionKind::AuthCryptWildcardAce => "auth-crypt wildcard ACE",
            ProvisionKind::RoleWildcardAce => "role wildcard ACE",
            ProvisionKind::IdentityCertificate => "identity certificate",
            ProvisionKind::RoleCertificate => "role certificate",
            ProvisionKind::HardReset => "hard reset",
        };
        f.write_str(label)
    }
}

/// A post-ownership operation against owned devices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvisionRequest {
    /// Provision pairwise credentials between two owned devices
    PairwiseCredentials {
        /// First device
        first: DeviceId,
        /// Second device
        second: DeviceId,
    },
    /// Install an ACE on an owned device
    Ace {
        /// Device that stores the ACE
        owner: DeviceId,
        /// Validated entry
        ace: SecurityAce,
    },
    /// Install the auth-crypt wildcard ACE
    AuthCryptWildcardAce {
        /// Target device
        owner: DeviceId,
    },
    /// Install a role wildcard ACE
    RoleWildcardAce {
        /// Target device
        owner: DeviceId,
        /// Role granted access
        role: RoleCredential,
    },
    /// Issue an identity certificate
    IdentityCertificate {
        /// Target device
        owner: DeviceId,
    },
    /// Issue role certificates for a chain of roles
    RoleCertificate {
        /// Target device
        owner: DeviceId,
        /// Roles to certify
        chain: RoleCredentialChain,
    },
    /// Factory reset an owned device
    HardReset {
        /// Target device
        owner: DeviceId,
    },
}

impl ProvisionRequest {
    /// Request kind
    pub fn kind(&self) -> ProvisionKind {
        match self {
            ProvisionRequest::PairwiseCredentials { .. } => ProvisionKind::PairwiseCredentials,
            ProvisionRequest::Ace { .. } => ProvisionKind::Ace,
            ProvisionRequest::AuthCryptWildcardAce { .. } => ProvisionKind::AuthCryptWildcardAce,
            ProvisionRequest::RoleWildcardAce { .. } => ProvisionKind::RoleWildcardAce,
            ProvisionRequest::IdentityCertificate { .. } => ProvisionKind::IdentityCertificate,
            ProvisionRequest::RoleCertificate { .. } => ProvisionKind::RoleCertificate,
            ProvisionRequest::HardReset { .. } => ProvisionKind::HardReset,
        }
    }

    /// Devices the request touches
    pub fn targets(&self) -> Vec<DeviceId> {
        match self {
            ProvisionRequest::PairwiseCredentials { first, second } => vec![*first, *second],
            ProvisionRequest::Ace { owner, .. }
            | ProvisionRequest::AuthCryptWildcardAce { owner }
            | ProvisionRequest::RoleWildcardAce { owner, .. }
            | ProvisionRequest::IdentityCertificate { owner }
            | ProvisionRequest::RoleCertificate { owner, .. }
            | ProvisionRequest::HardReset { owner } => vec![*owner],
        }
    }

    /// The ACE the device ends up holding, for ACE-installing requests
    pub fn installed_ace(&self) -> Option<SecurityAce> {
        match self {
            ProvisionRequest::Ace { ace, .. } => Some(ace.clone()),
            ProvisionRequest::AuthCryptWildcardAce { .. } => Some(SecurityAce::auth_crypt_wildcard()),
            ProvisionRequest::RoleWildcardAce { role, .. } => {
                Some(SecurityAce::role_wildcard(role.clone()))
            }
            _ => None,
        }
    }
}

/// The transport/security collaborator.
///
/// Results may be delivered from any thread, including synchronously from
/// inside the issuing call: callers hold no locks across these methods.
pub trait OnboardingEffects: Send + Sync {
    /// Start a discovery request; results stream into `sink`
    fn discover(&self, request: DiscoveryRequest, sink: Arc<dyn DiscoverySink>) -> IssueResult;

    /// Ask an unowned device to generate and display a random PIN
    fn request_random_pin(&self, device: DeviceId, completion: Completion) -> IssueResult;

    /// Run an ownership transfer handshake
    fn transfer_ownership(
        &self,
        device: DeviceId,
        credential: TransferCredential,
        completion: Completion,
    ) -> IssueResult;

    /// Issue a provisioning request against owned devices
    fn provision(&self, request: ProvisionRequest, completion: Completion) -> IssueResult;

    /// Release collaborator resources; later calls fail with [`IssueError::ShutDown`]
    fn shutdown(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn completion_delivers_outcome() {
        let (completion, rx) = Completion::channel(RequestId(7));
        assert_eq!(completion.request_id(), RequestId(7));
        assert!(completion.complete(Outcome::Succeeded));
        assert_eq!(rx.await.ok(), Some(Outcome::Succeeded));
    }

    #[test]
    fn completion_after_receiver_dropped_is_harmless() {
        let (completion, rx) = Completion::channel(RequestId(8));
        drop(rx);
        assert!(!completion.complete(Outcome::Failed));
    }

    #[test]
    fn pairwise_request_targets_both_devices() {
        let request = ProvisionRequest::PairwiseCredentials {
            first: DeviceId::from_seed(1),
            second: DeviceId::from_seed(2),
        };
        assert_eq!(request.targets().len(), 2);
        assert_eq!(request.kind(), ProvisionKind::PairwiseCredentials);
        assert!(request.installed_ace().is_none());
    }
}
