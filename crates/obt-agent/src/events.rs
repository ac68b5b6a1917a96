//! Asynchronous outcome notifications for the operator-facing side.

use obt_core::{
    DeviceId, DeviceIdentity, DeviceKind, HandshakeMethod, Outcome, ProvisionKind, RequestId,
};
use std::fmt;
use tokio::sync::mpsc;

/// Something that happened on a callback context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OnboardingEvent {
    /// Discovery added a device the registry did not hold yet
    DeviceDiscovered {
        /// Device record
        device: DeviceIdentity,
        /// Set it was recorded in
        kind: DeviceKind,
    },
    /// An ownership transfer handshake finished
    HandshakeFinished {
        /// Request
        request_id: RequestId,
        /// Target device
        device: DeviceId,
        /// Target display name
        name: String,
        /// Handshake step
        method: HandshakeMethod,
        /// Result
        outcome: Outcome,
    },
    /// A provisioning request finished
    ProvisioningFinished {
        /// Request
        request_id: RequestId,
        /// Request kind
        kind: ProvisionKind,
        /// Devices involved
        targets: Vec<DeviceId>,
        /// Result
        outcome: Outcome,
    },
}

impl fmt::Display for OnboardingEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OnboardingEvent::DeviceDiscovered { device, kind } => {
                write!(f, "Discovered {kind} device {device}")
            }
            OnboardingEvent::HandshakeFinished {
                device,
                name,
                method,
                outcome,
                ..
            } => write!(f, "{method} with {device} ({name}) {outcome}"),
            OnboardingEvent::ProvisioningFinished {
                kind,
                targets,
                outcome,
                ..
            } => {
                let targets: Vec<String> = targets.iter().map(ToString::to_string).collect();
                write!(f, "{kind} on {} {outcome}", targets.join(" + "))
            }
        }
    }
}

/// Sending half of the event stream. Events are dropped once the receiver is gone.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: Option<mpsc::UnboundedSender<OnboardingEvent>>,
}

/// Receiving half of the event stream.
pub type EventReceiver = mpsc::UnboundedReceiver<OnboardingEvent>;

impl EventSender {
    /// A sender that discards everything
    pub fn disconnected() -> Self {
        Self { tx: None }
    }

    pub(crate) fn emit(&self, event: OnboardingEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }
}

/// Create a connected event stream
pub fn event_channel() -> (EventSender, EventReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventSender { tx: Some(tx) }, rx)
}
