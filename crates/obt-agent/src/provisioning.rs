//! Provisioning Engine
//!
//! Post-ownership operations against owned devices. Each call validates its
//! parameters, issues one request and returns a [`Pending`] ticket; the outcome
//! is logged and published on the event stream. Nothing is retried or rolled
//! back. The only registry side effect is a confirmed hard reset, which drops
//! the device from the owned set.

use crate::events::{EventSender, OnboardingEvent};
use crate::session::{track, Pending, SessionTable};
use crate::task_registry::TaskRegistry;
use obt_core::{
    Completion, DeviceId, DeviceKind, DeviceRegistry, ObtError, ObtResult, OnboardingEffects,
    Outcome, ProvisionKind, ProvisionRequest, RequestId, RoleCredential, RoleCredentialChain,
    SecurityAce,
};
use std::sync::Arc;
use std::time::Instant;
use tokio::runtime::Handle;
use tracing::{info, warn};

/// An issued provisioning request awaiting its completion.
#[derive(Debug, Clone)]
pub struct ProvisioningSession {
    /// Request that opened the session
    pub request_id: RequestId,
    /// What was requested
    pub kind: ProvisionKind,
    /// Devices involved
    pub targets: Vec<DeviceId>,
    /// When the request was issued
    pub started_at: Instant,
}

/// Issues provisioning requests against owned devices.
pub struct ProvisioningEngine {
    registry: DeviceRegistry,
    effects: Arc<dyn OnboardingEffects>,
    events: EventSender,
    sessions: SessionTable<ProvisioningSession>,
    tasks: TaskRegistry,
}

impl ProvisioningEngine {
    /// Create an engine whose completion watchers run on `runtime`
    pub fn new(
        registry: DeviceRegistry,
        effects: Arc<dyn OnboardingEffects>,
        events: EventSender,
        runtime: Handle,
    ) -> Self {
        Self {
            registry,
            effects,
            events,
            sessions: SessionTable::default(),
            tasks: TaskRegistry::new(runtime),
        }
    }

    /// Provision pairwise credentials between two distinct owned devices
    pub fn provision_pairwise_credentials(
        &self,
        first: DeviceId,
        second: DeviceId,
    ) -> ObtResult<Pending> {
        if first == second {
            return Err(ObtError::invalid_input(
                "pairwise credentials need two different devices",
            ));
        }
        self.submit(ProvisionRequest::PairwiseCredentials { first, second })
    }

    /// Install an operator-built ACE. The ACE is validated here, not while it is built.
    pub fn provision_ace(&self, owner: DeviceId, ace: SecurityAce) -> ObtResult<Pending> {
        ace.validate()?;
        self.submit(ProvisionRequest::Ace { owner, ace })
    }

    /// Install the wildcard ACE granting authenticated clients full access
    pub fn provision_auth_crypt_wildcard_ace(&self, owner: DeviceId) -> ObtResult<Pending> {
        self.submit(ProvisionRequest::AuthCryptWildcardAce { owner })
    }

    /// Install the wildcard ACE granting `role` full access
    pub fn provision_role_wildcard_ace(
        &self,
        owner: DeviceId,
        role: &str,
        authority: Option<&str>,
    ) -> ObtResult<Pending> {
        let role = RoleCredential::new(role, authority)?;
        self.submit(ProvisionRequest::RoleWildcardAce { owner, role })
    }

    /// Issue an identity certificate to `owner`
    pub fn provision_identity_certificate(&self, owner: DeviceId) -> ObtResult<Pending> {
        self.submit(ProvisionRequest::IdentityCertificate { owner })
    }

    /// Issue role certificates for every role in `chain`, as one request
    pub fn provision_role_certificate(
        &self,
        chain: RoleCredentialChain,
        owner: DeviceId,
    ) -> ObtResult<Pending> {
        chain.validate()?;
        self.submit(ProvisionRequest::RoleCertificate { owner, chain })
    }

    /// Factory reset an owned device.
    ///
    /// The device leaves the owned set only once the reset is confirmed.
    pub fn hard_reset(&self, owner: DeviceId) -> ObtResult<Pending> {
        self.submit(ProvisionRequest::HardReset { owner })
    }

    /// Requests still waiting for a completion
    pub fn sessions(&self) -> Vec<ProvisioningSession> {
        self.sessions.snapshot()
    }

    /// Number of requests in flight
    pub fn in_flight(&self) -> usize {
        self.sessions.len()
    }

    /// Discard every session and stop watching for completions
    pub fn shutdown(&self) {
        if self.tasks.is_shut_down() {
            return;
        }
        let discarded = self.sessions.len();
        let watchers = self.tasks.active();
        self.sessions.clear();
        self.tasks.shutdown();
        if discarded > 0 || watchers > 0 {
            info!(discarded, watchers, "Discarded in-flight provisioning sessions");
        }
    }

    fn submit(&self, request: ProvisionRequest) -> ObtResult<Pending> {
        let kind = request.kind();
        let targets = request.targets();
        for target in &targets {
            if !self.registry.contains(*target, DeviceKind::Owned) {
                return Err(ObtError::unknown_device(*target, DeviceKind::Owned));
            }
        }

        let request_id = RequestId::next();
        let (completion, completion_rx) = Completion::channel(request_id);
        self.sessions.insert(
            request_id,
            ProvisioningSession {
                request_id,
                kind,
                targets: targets.clone(),
                started_at: Instant::now(),
            },
        );

        if let Err(err) = self.effects.provision(request, completion) {
            self.sessions.remove(request_id);
            warn!(%kind, ?targets, error = %err, "Failed to issue provisioning request");
            return Err(err.into());
        }
        info!(%kind, ?targets, request_id = %request_id, "Issued provisioning request");

        let registry = self.registry.clone();
        let events = self.events.clone();
        Ok(track(
            &self.tasks,
            self.sessions.clone(),
            request_id,
            completion_rx,
            move |session: ProvisioningSession, outcome: Outcome| {
                let elapsed_ms = session.started_at.elapsed().as_millis() as u64;
                match outcome {
                    Outcome::Succeeded => {
                        info!(kind = %session.kind, targets = ?session.targets, elapsed_ms, "Provisioning succeeded");
                        if session.kind == ProvisionKind::HardReset {
                            for device in &session.targets {
                                registry.remove(*device, DeviceKind::Owned);
                            }
                        }
                    }
                    Outcome::Failed => {
                        warn!(kind = %session.kind, targets = ?session.targets, elapsed_ms, "Provisioning failed");
                    }
                }
                events.emit(OnboardingEvent::ProvisioningFinished {
                    request_id: session.request_id,
                    kind: session.kind,
                    targets: session.targets,
                    outcome,
                });
            },
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::event_channel;
    use assert_matches::assert_matches;
    use obt_core::{AceSubject, Permission, ResourceSpec, WildcardCategory};
    use obt_simulator::{CompletionMode, SimulatedDevice, SimulatedFleet};

    struct Fixture {
        fleet: Arc<SimulatedFleet>,
        registry: DeviceRegistry,
        engine: ProvisioningEngine,
    }

    fn fixture(mode: CompletionMode, devices: &[&str]) -> (Fixture, Vec<DeviceId>) {
        let fleet = Arc::new(SimulatedFleet::new(mode));
        let registry = DeviceRegistry::new();
        let ids = devices
            .iter()
            .map(|name| {
                let id = fleet.add_device(SimulatedDevice::owned(name));
                registry.record_owned(fleet.identity(id).expect("added"));
                id
            })
            .collect();
        let engine = ProvisioningEngine::new(
            registry.clone(),
            fleet.clone(),
            EventSender::disconnected(),
            Handle::current(),
        );
        (
            Fixture {
                fleet,
                registry,
                engine,
            },
            ids,
        )
    }

    #[tokio::test]
    async fn ace_without_permissions_is_rejected_before_issue() {
        let (fx, ids) = fixture(CompletionMode::Manual, &["owner"]);
        let mut ace = SecurityAce::new(AceSubject::Anonymous);
        ace.add_resource(ResourceSpec::href("/a/light")).expect("href");

        let err = fx.engine.provision_ace(ids[0], ace).expect_err("no permissions");
        assert_matches!(err, ObtError::InvalidAce(_));
        assert!(fx.fleet.held_requests().is_empty());
    }

    #[tokio::test]
    async fn valid_ace_is_installed() {
        let (fx, ids) = fixture(CompletionMode::Immediate, &["owner"]);
        let mut ace = SecurityAce::new(AceSubject::Authenticated);
        ace.add_resource(ResourceSpec::wildcard(WildcardCategory::AllWithSecuredEndpoint))
            .expect("wildcard");
        ace.add_permission(Permission::Retrieve)
            .add_permission(Permission::Notify);

        let pending = fx.engine.provision_ace(ids[0], ace.clone()).expect("issued");
        assert_eq!(pending.outcome().await, Some(Outcome::Succeeded));
        assert_eq!(fx.fleet.installed_aces(ids[0]), vec![ace]);
    }

    #[tokio::test]
    async fn pairwise_needs_two_distinct_owned_devices() {
        let (fx, ids) = fixture(CompletionMode::Manual, &["a", "b"]);

        let err = fx
            .engine
            .provision_pairwise_credentials(ids[0], ids[0])
            .expect_err("same device");
        assert_matches!(err, ObtError::InvalidInput(_));

        let stranger = DeviceId::from_seed(77);
        let err = fx
            .engine
            .provision_pairwise_credentials(ids[0], stranger)
            .expect_err("unknown");
        assert_matches!(err, ObtError::UnknownDevice { device, kind: DeviceKind::Owned } if device == stranger);

        fx.engine
            .provision_pairwise_credentials(ids[0], ids[1])
            .expect("issued");
        assert_eq!(fx.engine.in_flight(), 1);
    }

    #[tokio::test]
    async fn empty_role_chain_is_rejected() {
        let (fx, ids) = fixture(CompletionMode::Manual, &["owner"]);
        let err = fx
            .engine
            .provision_role_certificate(RoleCredentialChain::new(), ids[0])
            .expect_err("empty chain");
        assert_matches!(err, ObtError::InvalidRoleChain(_));
    }

    #[tokio::test]
    async fn confirmed_hard_reset_drops_device_from_owned() {
        let (fx, ids) = fixture(CompletionMode::Immediate, &["owner"]);
        let pending = fx.engine.hard_reset(ids[0]).expect("issued");
        assert_eq!(pending.outcome().await, Some(Outcome::Succeeded));
        assert!(!fx.registry.contains(ids[0], DeviceKind::Owned));
    }

    #[tokio::test]
    async fn failed_hard_reset_keeps_device() {
        let fleet = Arc::new(SimulatedFleet::new(CompletionMode::Immediate));
        let registry = DeviceRegistry::new();
        let id = fleet.add_device(SimulatedDevice::owned("stubborn").failing_provisioning());
        registry.record_owned(fleet.identity(id).expect("added"));
        let (events, mut rx) = event_channel();
        let engine = ProvisioningEngine::new(registry.clone(), fleet, events, Handle::current());

        let pending = engine.hard_reset(id).expect("issued");
        assert_eq!(pending.outcome().await, Some(Outcome::Failed));
        assert!(registry.contains(id, DeviceKind::Owned));
        assert_matches!(
            rx.recv().await,
            Some(OnboardingEvent::ProvisioningFinished {
                kind: ProvisionKind::HardReset,
                outcome: Outcome::Failed,
                ..
            })
        );
    }
}
