//! Onboarding Simulator
//!
//! A fleet of virtual devices that stands in for the network and security
//! stack behind [`obt_core::OnboardingEffects`]. The CLI drives it as its
//! collaborator and the engine tests use its manual completion mode to control
//! exactly when and how each request finishes.

#![forbid(unsafe_code)]

pub mod config;
pub mod device;
pub mod fleet;

pub use config::{SimulatedDeviceConfig, SimulationConfig};
pub use device::SimulatedDevice;
pub use fleet::{CompletionMode, SimulatedFleet, PIN_DIGITS};
