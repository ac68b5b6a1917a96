//! Onboarding Agent
//!
//! Engines that drive devices from discovery through ownership transfer and
//! provisioning on top of an [`obt_core::OnboardingEffects`] collaborator.
//!
//! # Architecture
//!
//! - [`DiscoveryCoordinator`] - scoped discovery feeding the device registry
//! - [`OwnershipTransferEngine`] - Just Works, random PIN and certificate handshakes
//! - [`ProvisioningEngine`] - credentials, ACEs, certificates and hard reset
//! - [`Orchestrator`] - operator command dispatch, full reset and shutdown
//!
//! Operator calls are synchronous and return as soon as a request is issued.
//! Each accepted request gets a completion watcher task on the runtime handed
//! to the orchestrator; outcomes come back through the returned [`Pending`]
//! ticket and the [`OnboardingEvent`] stream.

#![forbid(unsafe_code)]

pub mod discovery;
pub mod events;
pub mod orchestrator;
pub mod otm;
pub mod provisioning;
mod session;
mod task_registry;

pub use discovery::DiscoveryCoordinator;
pub use events::{event_channel, EventReceiver, EventSender, OnboardingEvent};
pub use orchestrator::{Command, CommandOutcome, Orchestrator};
pub use otm::{OtmSession, OwnershipTransferEngine};
pub use provisioning::{ProvisioningEngine, ProvisioningSession};
pub use session::Pending;
