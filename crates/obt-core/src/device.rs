//! Discovered device descriptions and discovery request/report types.

use crate::identifiers::DeviceId;
use crate::limits::{truncate_chars, DEVICE_NAME_MAX_CHARS};
use crate::otm::OtmMethod;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

// =============================================================================
// CONSTANTS
// =============================================================================

/// IPv6 multicast scope nibble for realm-local discovery.
pub const IPV6_SCOPE_REALM_LOCAL: u8 = 0x3;

/// IPv6 multicast scope nibble for site-local discovery.
pub const IPV6_SCOPE_SITE_LOCAL: u8 = 0x5;

/// Resource type every onboardable device exposes.
pub const DOXM_RESOURCE_TYPE: &str = "oic.r.doxm";

// =============================================================================
// ENDPOINTS AND IDENTITY
// =============================================================================

/// A network endpoint a device answered from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    /// Endpoint URI, e.g. `coaps://[fe80::1%eth0]:5684`
    pub uri: String,
}

impl Endpoint {
    /// Create an endpoint from its URI
    pub fn new(uri: impl Into<String>) -> Self {
        Self { uri: uri.into() }
    }

    /// Whether the endpoint uses a secured (DTLS/TLS) scheme
    pub fn is_secured(&self) -> bool {
        self.uri.starts_with("coaps")
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.uri)
    }
}

/// A device as recorded in the registry.
///
/// Immutable once discovered; re-discovery replaces the whole record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceIdentity {
    /// Device UUID
    pub id: DeviceId,
    /// Human-readable name (at most 63 characters)
    pub name: String,
    /// Endpoints in the order the transport reported them
    pub endpoints: Vec<Endpoint>,
    /// Ownership transfer methods the device advertised; empty when unknown
    pub supported_methods: Vec<OtmMethod>,
}

impl DeviceIdentity {
    /// Create a device identity, truncating the display name to its limit
    pub fn new(id: DeviceId, name: &str, endpoints: Vec<Endpoint>) -> Self {
        Self {
            id,
            name: truncate_chars(name, DEVICE_NAME_MAX_CHARS),
            endpoints,
            supported_methods: Vec::new(),
        }
    }

    /// Attach the advertised ownership transfer methods
    pub fn with_supported_methods(mut self, methods: Vec<OtmMethod>) -> Self {
        self.supported_methods = methods;
        self
    }

    /// Whether the device accepts `method`. Devices that advertised nothing accept any method.
    pub fn supports(&self, method: OtmMethod) -> bool {
        self.supported_methods.is_empty() || self.supported_methods.contains(&method)
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {}", self.id, self.name)
    }
}

// =============================================================================
// DISCOVERY
// =============================================================================

/// Which registry set a device belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    /// Device has no owner and can be onboarded
    Unowned,
    /// Device is owned by this administrative domain
    Owned,
}

impl DeviceKind {
    /// `doxm` query selecting devices of this kind
    pub fn doxm_query(&self) -> &'static str {
        match self {
            DeviceKind::Unowned => "owned=FALSE",
            DeviceKind::Owned => "owned=TRUE",
        }
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceKind::Unowned => f.write_str("unowned"),
            DeviceKind::Owned => f.write_str("owned"),
        }
    }
}

/// Multicast scope of a discovery request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum DiscoveryScope {
    /// Every scope the transport supports
    #[default]
    Global,
    /// IPv6 realm-local multicast (ff03::)
    RealmLocalIpv6,
    /// IPv6 site-local multicast (ff05::)
    SiteLocalIpv6,
}

impl DiscoveryScope {
    /// IPv6 multicast scope nibble, or `None` for all scopes
    pub fn ipv6_scope(&self) -> Option<u8> {
        match self {
            DiscoveryScope::Global => None,
            DiscoveryScope::RealmLocalIpv6 => Some(IPV6_SCOPE_REALM_LOCAL),
            DiscoveryScope::SiteLocalIpv6 => Some(IPV6_SCOPE_SITE_LOCAL),
        }
    }
}

impl fmt::Display for DiscoveryScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiscoveryScope::Global => f.write_str("global"),
            DiscoveryScope::RealmLocalIpv6 => f.write_str("realm-local IPv6"),
            DiscoveryScope::SiteLocalIpv6 => f.write_str("site-local IPv6"),
        }
    }
}

/// Discovery request handed to the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryRequest {
    /// Multicast scope
    pub scope: DiscoveryScope,
    /// Kind of devices being looked for
    pub kind: DeviceKind,
    /// Resource-type query the transport attaches to the multicast request
    pub query: String,
}

impl DiscoveryRequest {
    /// Build the request for `kind` devices in `scope`
    pub fn new(scope: DiscoveryScope, kind: DeviceKind) -> Self {
        Self {
            scope,
            kind,
            query: format!("rt={DOXM_RESOURCE_TYPE}&{}", kind.doxm_query()),
        }
    }
}

/// One device reported by the transport during discovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryReport {
    /// Device UUID
    pub device_id: DeviceId,
    /// Display name
    pub name: String,
    /// Resource types the device listed
    pub resource_types: BTreeSet<String>,
    /// Endpoints, in transport order
    pub endpoints: Vec<Endpoint>,
    /// Ownership state reported by the device's `doxm`
    pub kind: DeviceKind,
    /// Ownership transfer methods from `doxm.oxms`
    pub supported_methods: Vec<OtmMethod>,
}

impl DiscoveryReport {
    /// Convert to the registry representation
    pub fn identity(&self) -> DeviceIdentity {
        DeviceIdentity::new(self.device_id, &self.name, self.endpoints.clone())
            .with_supported_methods(self.supported_methods.clone())
    }
}

/// Whether the transport should keep delivering results for a discovery request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryFlow {
    /// Keep reporting devices
    Continue,
    /// Stop the discovery request
    Stop,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn long_names_are_truncated() {
        let name = "x".repeat(100);
        let identity = DeviceIdentity::new(DeviceId::from_seed(1), &name, Vec::new());
        assert_eq!(identity.name.len(), DEVICE_NAME_MAX_CHARS);
    }

    #[test]
    fn devices_without_advertised_methods_accept_any() {
        let identity = DeviceIdentity::new(DeviceId::from_seed(1), "lamp", Vec::new());
        assert!(identity.supports(OtmMethod::ManufacturerCertificate));

        let identity = identity.with_supported_methods(vec![OtmMethod::JustWorks]);
        assert!(identity.supports(OtmMethod::JustWorks));
        assert!(!identity.supports(OtmMethod::RandomPin));
    }

    #[test]
    fn discovery_query_selects_ownership_state() {
        let request = DiscoveryRequest::new(DiscoveryScope::SiteLocalIpv6, DeviceKind::Owned);
        assert_eq!(request.query, "rt=oic.r.doxm&owned=TRUE");
        assert_eq!(request.scope.ipv6_scope(), Some(IPV6_SCOPE_SITE_LOCAL));
    }

    #[test]
    fn secured_endpoints_are_detected() {
        assert!(Endpoint::new("coaps://[fe80::1]:5684").is_secured());
        assert!(!Endpoint::new("coap://[fe80::1]:5683").is_secured());
    }
}
