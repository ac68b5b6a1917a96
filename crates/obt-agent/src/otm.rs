//! Ownership Transfer Engine
//!
//! Drives one handshake session per request against an unowned device:
//!
//! ```text
//! Unowned --issue--> Requested --Succeeded--> owned (seen on next owned discovery)
//!                             --Failed-----> session discarded
//! ```
//!
//! Issuing a transfer takes the device out of the unowned set straight away and
//! nothing puts it back: after a failure the operator rediscovers it. The PIN
//! request phase of the random PIN method is the exception, since the device
//! must stay selectable for the transfer phase that follows.

use crate::events::{EventSender, OnboardingEvent};
use crate::session::{track, Pending, SessionTable};
use crate::task_registry::TaskRegistry;
use obt_core::{
    Completion, DeviceId, DeviceIdentity, DeviceKind, DeviceRegistry, HandshakeMethod,
    IssueResult, ObtError, ObtResult, OnboardingEffects, Outcome, RandomPin, RequestId,
    TransferCredential,
};
use std::sync::Arc;
use std::time::Instant;
use tokio::runtime::Handle;
use tracing::{info, warn};

/// An issued handshake awaiting its completion.
#[derive(Debug, Clone)]
pub struct OtmSession {
    /// Request that opened the session
    pub request_id: RequestId,
    /// Device record at the time of issue
    pub device: DeviceIdentity,
    /// Handshake step in flight
    pub method: HandshakeMethod,
    /// When the request was issued
    pub started_at: Instant,
}

/// Runs ownership transfer handshakes.
pub struct OwnershipTransferEngine {
    registry: DeviceRegistry,
    effects: Arc<dyn OnboardingEffects>,
    events: EventSender,
    sessions: SessionTable<OtmSession>,
    tasks: TaskRegistry,
}

impl OwnershipTransferEngine {
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

    /// Just Works transfer. No operator secret.
    pub fn just_works(&self, device: DeviceId) -> ObtResult<Pending> {
        self.start(device, HandshakeMethod::JustWorks, |effects, completion| {
            effects.transfer_ownership(device, TransferCredential::JustWorks, completion)
        })
    }

    /// First random PIN phase: ask the device to display a PIN.
    pub fn request_random_pin(&self, device: DeviceId) -> ObtResult<Pending> {
        self.start(device, HandshakeMethod::RandomPinRequest, |effects, completion| {
            effects.request_random_pin(device, completion)
        })
    }

    /// Second random PIN phase. `pin` is truncated to 24 characters.
    pub fn random_pin_transfer(&self, device: DeviceId, pin: &str) -> ObtResult<Pending> {
        let pin = RandomPin::parse(pin)?;
        self.start(device, HandshakeMethod::RandomPinTransfer, |effects, completion| {
            effects.transfer_ownership(device, TransferCredential::RandomPin(pin), completion)
        })
    }

    /// Manufacturer certificate transfer. No operator secret.
    pub fn certificate_based(&self, device: DeviceId) -> ObtResult<Pending> {
        self.start(device, HandshakeMethod::CertificateBased, |effects, completion| {
            effects.transfer_ownership(device, TransferCredential::ManufacturerCertificate, completion)
        })
    }

    /// Handshakes still waiting for a completion
    pub fn sessions(&self) -> Vec<OtmSession> {
        self.sessions.snapshot()
    }

    /// Number of handshakes in flight
    pub fn in_flight(&self) -> usize {
        self.sessions.len()
    }

    /// Discard every session and stop watching for completions.
    ///
    /// Completions arriving afterwards find no session and are dropped.
    pub fn shutdown(&self) {
        if self.tasks.is_shut_down() {
            return;
        }
        let discarded = self.sessions.len();
        let watchers = self.tasks.active();
        self.sessions.clear();
        self.tasks.shutdown();
        if discarded > 0 || watchers > 0 {
            info!(discarded, watchers, "Discarded in-flight ownership transfer sessions");
        }
    }

    fn start<F>(&self, device: DeviceId, method: HandshakeMethod, issue: F) -> ObtResult<Pending>
    where
        F: FnOnce(&dyn OnboardingEffects, Completion) -> IssueResult,
    {
        let identity = self
            .registry
            .get(device, DeviceKind::Unowned)
            .ok_or_else(|| ObtError::unknown_device(device, DeviceKind::Unowned))?;

        let otm = method.otm_method();
        if !identity.supports(otm) {
            return Err(ObtError::invalid_input(format!(
                "device {} does not offer {otm} ownership transfer",
                identity.id
            )));
        }

        let request_id = RequestId::next();
        let (completion, completion_rx) = Completion::channel(request_id);
        self.sessions.insert(
            request_id,
            OtmSession {
                request_id,
                device: identity.clone(),
                method,
                started_at: Instant::now(),
            },
        );

        if let Err(err) = issue(self.effects.as_ref(), completion) {
            self.sessions.remove(request_id);
            warn!(device = %device, %method, error = %err, "Failed to issue ownership transfer request");
            return Err(err.into());
        }

        if method.transfers_ownership() {
            self.registry.remove(device, DeviceKind::Unowned);
        }
        info!(device = %device, name = %identity.name, %method, request_id = %request_id, "Issued ownership transfer request");

        let events = self.events.clone();
        Ok(track(
            &self.tasks,
            self.sessions.clone(),
            request_id,
            completion_rx,
            move |session: OtmSession, outcome: Outcome| {
                let elapsed_ms = session.started_at.elapsed().as_millis() as u64;
                match outcome {
                    Outcome::Succeeded => info!(
                        device = %session.device.id,
                        method = %session.method,
                        elapsed_ms,
                        "Ownership transfer step succeeded"
                    ),
                    Outcome::Failed => warn!(
                        device = %session.device.id,
                        method = %session.method,
                        elapsed_ms,
                        "Ownership transfer step failed"
                    ),
                }
                events.emit(OnboardingEvent::HandshakeFinished {
                    request_id: session.request_id,
                    device: session.device.id,
                    name: session.device.name,
                    method: session.method,
                    outcome,
                });
            },
        ))
    }
}
