//! Onboarding Core
//!
//! Shared vocabulary for bringing unowned devices into an administrative domain:
//! device identities and the registry that holds them, ownership transfer
//! method types, access-control entry and role-credential construction, and the
//! contract with the external transport/security collaborator.
//!
//! # Architecture
//!
//! - `registry` - concurrency-safe unowned/owned device sets
//! - `ace` / `role` - ACE and role-credential construction and validation
//! - `effects` - request/completion contract with the collaborator
//! - `device` / `otm` - discovery and ownership transfer types
//!
//! Nothing in this crate performs I/O; the engines in `obt-agent` drive it.

#![forbid(unsafe_code)]

pub mod ace;
pub mod device;
pub mod effects;
pub mod errors;
pub mod identifiers;
pub mod limits;
pub mod otm;
pub mod registry;
pub mod role;

pub use ace::{
    AceResource, AceSubject, Permission, Permissions, ResourceSpec, SecurityAce, WildcardCategory,
};
pub use device::{
    DeviceIdentity, DeviceKind, DiscoveryFlow, DiscoveryReport, DiscoveryRequest, DiscoveryScope,
    Endpoint,
};
pub use effects::{
    Completion, DiscoverySink, IssueError, IssueResult, OnboardingEffects, Outcome,
    ProvisionKind, ProvisionRequest,
};
pub use errors::{ObtError, ObtResult};
pub use identifiers::{DeviceId, RequestId};
pub use otm::{HandshakeMethod, OtmMethod, RandomPin, TransferCredential};
pub use registry::{DeviceRegistry, RecordOutcome};
pub use role::{RoleCredential, RoleCredentialChain};
