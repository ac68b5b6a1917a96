//! Orchestrator
//!
//! Maps operator commands onto the engines and owns the reset and shutdown
//! lifecycle.
//!
//! # Full reset
//!
//! A full reset clears both registry sets and replaces the discovery
//! coordinator and both engines with fresh instances. It does not wait for
//! in-flight requests: the old engines drop their sessions and stop watching
//! for completions, so anything the collaborator reports for them later is
//! ignored. Requests are not fenced while the reset runs; the operator context
//! is the only caller and issues commands one at a time.

use crate::discovery::DiscoveryCoordinator;
use crate::events::{event_channel, EventReceiver, EventSender};
use crate::otm::{OtmSession, OwnershipTransferEngine};
use crate::provisioning::{ProvisioningEngine, ProvisioningSession};
use crate::session::Pending;
use obt_core::{
    DeviceId, DeviceKind, DeviceRegistry, DiscoveryScope, ObtError, ObtResult, OnboardingEffects,
    RoleCredentialChain, SecurityAce,
};
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::info;

/// One operator intent.
#[derive(Debug, Clone)]
pub enum Command {
    /// Discover devices of `kind` in `scope`
    Discover {
        /// Multicast scope
        scope: DiscoveryScope,
        /// Unowned or owned devices
        kind: DeviceKind,
    },
    /// Just Works ownership transfer
    JustWorks(DeviceId),
    /// Ask a device to display a random PIN
    RequestRandomPin(DeviceId),
    /// Random PIN ownership transfer with the PIN the device displayed
    RandomPinTransfer {
        /// Target device
        device: DeviceId,
        /// PIN as typed by the operator
        pin: String,
    },
    /// Manufacturer certificate ownership transfer
    CertificateBased(DeviceId),
    /// Pairwise credentials between two owned devices
    PairwiseCredentials(DeviceId, DeviceId),
    /// Install an operator-built ACE
    Ace {
        /// Device storing the ACE
        owner: DeviceId,
        /// Entry to install
        ace: SecurityAce,
    },
    /// Install the auth-crypt wildcard ACE
    AuthCryptWildcardAce(DeviceId),
    /// Install a role wildcard ACE
    RoleWildcardAce {
        /// Target device
        owner: DeviceId,
        /// Role name
        role: String,
        /// Optional issuing authority
        authority: Option<String>,
    },
    /// Issue an identity certificate
    IdentityCertificate(DeviceId),
    /// Issue role certificates
    RoleCertificate {
        /// Target device
        owner: DeviceId,
        /// Roles to certify
        chain: RoleCredentialChain,
    },
    /// Factory reset an owned device
    HardReset(DeviceId),
    /// Forget every device and in-flight request
    FullReset,
    /// Shut down and leave
    Exit,
}

/// Immediate result of executing a command.
#[derive(Debug)]
pub enum CommandOutcome {
    /// Request issued; results arrive on the event stream
    Issued,
    /// Request issued; the ticket resolves with its outcome
    Pending(Pending),
    /// Registry and engines were reset
    Reset,
    /// Orchestrator shut down; the caller should exit
    Exit,
}

/// Sequences operator commands against the engines.
pub struct Orchestrator {
    registry: DeviceRegistry,
    effects: Arc<dyn OnboardingEffects>,
    events: EventSender,
    runtime: Handle,
    discovery: DiscoveryCoordinator,
    otm: OwnershipTransferEngine,
    provisioning: ProvisioningEngine,
    shut_down: bool,
}

impl Orchestrator {
    /// Build an orchestrator whose completion watchers run on `runtime`.
    ///
    /// Returns the receiving end of the event stream alongside it.
    pub fn new(effects: Arc<dyn OnboardingEffects>, runtime: Handle) -> (Self, EventReceiver) {
        let (events, receiver) = event_channel();
        let registry = DeviceRegistry::new();
        let orchestrator = Self {
            discovery: DiscoveryCoordinator::new(registry.clone(), effects.clone(), events.clone()),
            otm: OwnershipTransferEngine::new(
                registry.clone(),
                effects.clone(),
                events.clone(),
                runtime.clone(),
            ),
            provisioning: ProvisioningEngine::new(
                registry.clone(),
                effects.clone(),
                events.clone(),
                runtime.clone(),
            ),
            registry,
            effects,
            events,
            runtime,
            shut_down: false,
        };
        (orchestrator, receiver)
    }

    /// Build an orchestrator on the tokio runtime the caller is running in
    pub fn from_current_runtime(
        effects: Arc<dyn OnboardingEffects>,
    ) -> ObtResult<(Self, EventReceiver)> {
        let runtime = Handle::try_current()
            .map_err(|e| ObtError::initialization(format!("no tokio runtime: {e}")))?;
        Ok(Self::new(effects, runtime))
    }

    /// Shared device registry
    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    /// Ownership transfer sessions in flight
    pub fn otm_sessions(&self) -> Vec<OtmSession> {
        self.otm.sessions()
    }

    /// Provisioning sessions in flight
    pub fn provisioning_sessions(&self) -> Vec<ProvisioningSession> {
        self.provisioning.sessions()
    }

    /// Total number of requests in flight
    pub fn in_flight(&self) -> usize {
        self.otm.in_flight() + self.provisioning.in_flight()
    }

    /// Whether [`Orchestrator::shutdown`] has run
    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }

    /// Execute one operator command
    pub fn execute(&mut self, command: Command) -> ObtResult<CommandOutcome> {
        if self.shut_down {
            return Err(ObtError::initialization("orchestrator is shut down"));
        }
        let pending = match command {
            Command::Discover { scope, kind } => {
                self.discovery.discover(scope, kind)?;
                return Ok(CommandOutcome::Issued);
            }
            Command::JustWorks(device) => self.otm.just_works(device)?,
            Command::RequestRandomPin(device) => self.otm.request_random_pin(device)?,
            Command::RandomPinTransfer { device, pin } => {
                self.otm.random_pin_transfer(device, &pin)?
            }
            Command::CertificateBased(device) => self.otm.certificate_based(device)?,
            Command::PairwiseCredentials(first, second) => self
                .provisioning
                .provision_pairwise_credentials(first, second)?,
            Command::Ace { owner, ace } => self.provisioning.provision_ace(owner, ace)?,
            Command::AuthCryptWildcardAce(owner) => {
                self.provisioning.provision_auth_crypt_wildcard_ace(owner)?
            }
            Command::RoleWildcardAce {
                owner,
                role,
                authority,
            } => self
                .provisioning
                .provision_role_wildcard_ace(owner, &role, authority.as_deref())?,
            Command::IdentityCertificate(owner) => {
                self.provisioning.provision_identity_certificate(owner)?
            }
            Command::RoleCertificate { owner, chain } => {
                self.provisioning.provision_role_certificate(chain, owner)?
            }
            Command::HardReset(owner) => self.provisioning.hard_reset(owner)?,
            Command::FullReset => {
                self.full_reset();
                return Ok(CommandOutcome::Reset);
            }
            Command::Exit => {
                self.shutdown();
                return Ok(CommandOutcome::Exit);
            }
        };
        Ok(CommandOutcome::Pending(pending))
    }

    /// Clear both registry sets and start over with fresh engines.
    pub fn full_reset(&mut self) {
        let discarded = self.in_flight();
        self.discovery.retire();
        self.otm.shutdown();
        self.provisioning.shutdown();
        self.registry.clear();

        self.discovery = DiscoveryCoordinator::new(
            self.registry.clone(),
            self.effects.clone(),
            self.events.clone(),
        );
        self.otm = OwnershipTransferEngine::new(
            self.registry.clone(),
            self.effects.clone(),
            self.events.clone(),
            self.runtime.clone(),
        );
        self.provisioning = ProvisioningEngine::new(
            self.registry.clone(),
            self.effects.clone(),
            self.events.clone(),
            self.runtime.clone(),
        );
        info!(discarded, "Full reset complete");
    }

    /// Release every session and shut the collaborator down. Idempotent.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.discovery.retire();
        self.otm.shutdown();
        self.provisioning.shutdown();
        self.effects.shutdown();
        self.shut_down = true;
        info!("Orchestrator shut down");
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use obt_core::IssueError;
    use obt_simulator::{CompletionMode, SimulatedDevice, SimulatedFleet};

    #[tokio::test]
    async fn discover_command_populates_registry() {
        let fleet = Arc::new(SimulatedFleet::new(CompletionMode::Immediate));
        fleet.add_device(SimulatedDevice::unowned("a"));
        fleet.add_device(SimulatedDevice::owned("b"));
        let (mut orchestrator, _events) = Orchestrator::new(fleet, Handle::current());

        let outcome = orchestrator
            .execute(Command::Discover {
                scope: DiscoveryScope::Global,
                kind: DeviceKind::Unowned,
            })
            .expect("discover");
        assert_matches!(outcome, CommandOutcome::Issued);
        assert_eq!(orchestrator.registry().len(DeviceKind::Unowned), 1);
        assert_eq!(orchestrator.registry().len(DeviceKind::Owned), 0);
    }

    #[tokio::test]
    async fn full_reset_empties_registry_and_sessions() {
        let fleet = Arc::new(SimulatedFleet::new(CompletionMode::Manual));
        let id = fleet.add_device(SimulatedDevice::unowned("a"));
        fleet.add_device(SimulatedDevice::unowned("b"));
        let (mut orchestrator, _events) = Orchestrator::new(fleet.clone(), Handle::current());
        orchestrator
            .execute(Command::Discover {
                scope: DiscoveryScope::Global,
                kind: DeviceKind::Unowned,
            })
            .expect("discover");
        orchestrator.execute(Command::JustWorks(id)).expect("issue");
        assert_eq!(orchestrator.in_flight(), 1);

        assert_matches!(
            orchestrator.execute(Command::FullReset),
            Ok(CommandOutcome::Reset)
        );
        assert!(orchestrator.registry().is_empty());
        assert_eq!(orchestrator.in_flight(), 0);
    }

    #[tokio::test]
    async fn exit_shuts_collaborator_down() {
        let fleet = Arc::new(SimulatedFleet::new(CompletionMode::Immediate));
        let (mut orchestrator, _events) = Orchestrator::new(fleet.clone(), Handle::current());

        assert_matches!(orchestrator.execute(Command::Exit), Ok(CommandOutcome::Exit));
        assert!(orchestrator.is_shut_down());
        assert!(fleet.is_shut_down());
        assert_matches!(
            orchestrator.execute(Command::FullReset),
            Err(ObtError::Initialization(_))
        );
    }

    #[tokio::test]
    async fn discovery_refusal_is_reported() {
        let fleet = Arc::new(SimulatedFleet::new(CompletionMode::Immediate));
        fleet.set_rejecting(true);
        let (mut orchestrator, _events) = Orchestrator::new(fleet, Handle::current());
        let err = orchestrator
            .execute(Command::Discover {
                scope: DiscoveryScope::SiteLocalIpv6,
                kind: DeviceKind::Owned,
            })
            .expect_err("refused");
        assert_matches!(err, ObtError::IssueFailed(IssueError::TransportUnavailable));
    }

    #[test]
    fn building_outside_a_runtime_fails() {
        let fleet = Arc::new(SimulatedFleet::new(CompletionMode::Immediate));
        let err = Orchestrator::from_current_runtime(fleet).err().expect("no runtime");
        assert_matches!(err, ObtError::Initialization(_));
    }
}
