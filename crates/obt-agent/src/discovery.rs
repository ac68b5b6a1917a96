//! Discovery Coordinator
//!
//! Issues scoped discovery requests and records every reported device in the
//! registry set matching the ownership state the device reported. Discovery is
//! never cut short: the sink always asks the transport to continue.

use crate::events::{EventSender, OnboardingEvent};
use obt_core::{
    DeviceKind, DeviceRegistry, DiscoveryFlow, DiscoveryReport, DiscoveryRequest,
    DiscoveryScope, DiscoverySink, ObtResult, OnboardingEffects, RecordOutcome,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Issues discovery requests and routes results into the registry.
pub struct DiscoveryCoordinator {
    registry: DeviceRegistry,
    effects: Arc<dyn OnboardingEffects>,
    events: EventSender,
    live: Arc<AtomicBool>,
}

impl DiscoveryCoordinator {
    /// Create a coordinator feeding `registry`
    pub fn new(
        registry: DeviceRegistry,
        effects: Arc<dyn OnboardingEffects>,
        events: EventSender,
    ) -> Self {
        Self {
            registry,
            effects,
            events,
            live: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Discover `kind` devices in `scope`.
    ///
    /// Returns once the request is issued; devices arrive asynchronously.
    pub fn discover(&self, scope: DiscoveryScope, kind: DeviceKind) -> ObtResult<()> {
        let request = DiscoveryRequest::new(scope, kind);
        let sink = Arc::new(RegistrySink {
            registry: self.registry.clone(),
            events: self.events.clone(),
            requested: kind,
            live: Arc::clone(&self.live),
        });
        if let Err(err) = self.effects.discover(request, sink) {
            warn!(%scope, %kind, error = %err, "Failed to issue discovery request");
            return Err(err.into());
        }
        info!(%scope, %kind, "Issued discovery request");
        Ok(())
    }

    /// Stop recording results from requests issued by this coordinator.
    pub(crate) fn retire(&self) {
        self.live.store(false, Ordering::SeqCst);
    }
}

struct RegistrySink {
    registry: DeviceRegistry,
    events: EventSender,
    requested: DeviceKind,
    live: Arc<AtomicBool>,
}

impl DiscoverySink for RegistrySink {
    fn on_device(&self, report: DiscoveryReport) -> DiscoveryFlow {
        if !self.live.load(Ordering::SeqCst) {
            debug!(device = %report.device_id, "Ignoring discovery result from before reset");
            return DiscoveryFlow::Continue;
        }
        if report.kind != self.requested {
            debug!(
                device = %report.device_id,
                requested = %self.requested,
                reported = %report.kind,
                "Device reported a different ownership state than requested"
            );
        }
        debug!(
            device = %report.device_id,
            resource_types = ?report.resource_types,
            endpoints = report.endpoints.len(),
            "Discovery result"
        );

        let identity = report.identity();
        if self.registry.record(report.kind, identity.clone()) == RecordOutcome::Inserted {
            info!(device = %identity.id, name = %identity.name, kind = %report.kind, "Discovered device");
            self.events.emit(OnboardingEvent::DeviceDiscovered {
                device: identity,
                kind: report.kind,
            });
        }
        DiscoveryFlow::Continue
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::event_channel;
    use obt_core::{DeviceId, Endpoint, IssueError, IssueResult, ObtError};
    use obt_core::{Completion, ProvisionRequest, TransferCredential};
    use parking_lot::Mutex;
    use std::collections::BTreeSet;

    /// Collaborator that hands the sink back to the test.
    #[derive(Default)]
    struct CapturingEffects {
        sinks: Mutex<Vec<(DiscoveryRequest, Arc<dyn DiscoverySink>)>>,
        refuse: bool,
    }

    impl OnboardingEffects for CapturingEffects {
        fn discover(&self, request: DiscoveryRequest, sink: Arc<dyn DiscoverySink>) -> IssueResult {
            if self.refuse {
                return Err(IssueError::TransportUnavailable);
            }
            self.sinks.lock().push((request, sink));
            Ok(())
        }
        fn request_random_pin(&self, _: DeviceId, _: Completion) -> IssueResult {
            Err(IssueError::TransportUnavailable)
        }
        fn transfer_ownership(&self, _: DeviceId, _: TransferCredential, _: Completion) -> IssueResult {
            Err(IssueError::TransportUnavailable)
        }
        fn provision(&self, _: ProvisionRequest, _: Completion) -> IssueResult {
            Err(IssueError::TransportUnavailable)
        }
        fn shutdown(&self) {}
    }

    fn report(seed: u8, kind: DeviceKind) -> DiscoveryReport {
        DiscoveryReport {
            device_id: DeviceId::from_seed(seed),
            name: format!("dev-{seed}"),
            resource_types: BTreeSet::from(["oic.r.doxm".to_string()]),
            endpoints: vec![Endpoint::new("coaps://[fe80::1]:5684")],
            kind,
            supported_methods: Vec::new(),
        }
    }

    #[test]
    fn results_are_recorded_once_and_announced_once() {
        let effects = Arc::new(CapturingEffects::default());
        let registry = DeviceRegistry::new();
        let (events, mut rx) = event_channel();
        let coordinator = DiscoveryCoordinator::new(registry.clone(), effects.clone(), events);

        coordinator
            .discover(DiscoveryScope::RealmLocalIpv6, DeviceKind::Unowned)
            .expect("issue");
        let (request, sink) = effects.sinks.lock().pop().expect("sink");
        assert_eq!(request.scope, DiscoveryScope::RealmLocalIpv6);

        assert_eq!(sink.on_device(report(1, DeviceKind::Unowned)), DiscoveryFlow::Continue);
        assert_eq!(sink.on_device(report(1, DeviceKind::Unowned)), DiscoveryFlow::Continue);

        assert_eq!(registry.len(DeviceKind::Unowned), 1);
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn results_route_by_reported_kind() {
        let effects = Arc::new(CapturingEffects::default());
        let registry = DeviceRegistry::new();
        let coordinator =
            DiscoveryCoordinator::new(registry.clone(), effects.clone(), EventSender::disconnected());

        coordinator
            .discover(DiscoveryScope::Global, DeviceKind::Unowned)
            .expect("issue");
        let (_, sink) = effects.sinks.lock().pop().expect("sink");
        sink.on_device(report(2, DeviceKind::Owned));

        assert!(registry.contains(DeviceId::from_seed(2), DeviceKind::Owned));
    }

    #[test]
    fn refused_request_is_reported() {
        let effects = Arc::new(CapturingEffects {
            refuse: true,
            ..Default::default()
        });
        let coordinator = DiscoveryCoordinator::new(
            DeviceRegistry::new(),
            effects,
            EventSender::disconnected(),
        );
        let err = coordinator
            .discover(DiscoveryScope::Global, DeviceKind::Owned)
            .expect_err("refused");
        assert!(matches!(err, ObtError::IssueFailed(IssueError::TransportUnavailable)));
    }

    #[test]
    fn retired_coordinator_ignores_late_results() {
        let effects = Arc::new(CapturingEffects::default());
        let registry = DeviceRegistry::new();
        let coordinator =
            DiscoveryCoordinator::new(registry.clone(), effects.clone(), EventSender::disconnected());
        coordinator
            .discover(DiscoveryScope::Global, DeviceKind::Unowned)
            .expect("issue");
        let (_, sink) = effects.sinks.lock().pop().expect("sink");

        coordinator.retire();
        assert_eq!(sink.on_device(report(3, DeviceKind::Unowned)), DiscoveryFlow::Continue);
        assert!(registry.is_empty());
    }
}
