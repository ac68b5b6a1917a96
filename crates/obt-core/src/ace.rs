//! Access-control entry construction
//!
//! An ACE is assembled incrementally from operator input and may sit in an
//! invalid intermediate state (no resources yet, no permissions yet). The
//! structural checks that make it submittable run in [`SecurityAce::validate`],
//! which the provisioning engine calls before anything is sent.
//!
//! # Invariants
//!
//! - Every resource is either an explicit href or a single wildcard category
//! - Hrefs are at most 63 characters; role names and authorities at most 64
//! - A submitted ACE has at least one resource and a non-empty permission set

use crate::device::DeviceKind;
use crate::errors::{ObtError, ObtResult};
use crate::identifiers::DeviceId;
use crate::limits::{truncate_chars, HREF_MAX_CHARS};
use crate::registry::DeviceRegistry;
use crate::role::RoleCredential;
use serde::{Deserialize, Serialize};
use std::fmt;

// =============================================================================
// PERMISSIONS
// =============================================================================

/// A single CRUDN permission flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    /// Create
    Create,
    /// Retrieve
    Retrieve,
    /// Update
    Update,
    /// Delete
    Delete,
    /// Notify (observe)
    Notify,
}

impl Permission {
    /// All flags in CRUDN order
    pub const ALL: [Permission; 5] = [
        Permission::Create,
        Permission::Retrieve,
        Permission::Update,
        Permission::Delete,
        Permission::Notify,
    ];

    /// Bit value in the `acl2` permission field
    pub fn bit(&self) -> u8 {
        match self {
            Permission::Create => 0x01,
            Permission::Retrieve => 0x02,
            Permission::Update => 0x04,
            Permission::Delete => 0x08,
            Permission::Notify => 0x10,
        }
    }

    fn letter(&self) -> char {
        match self {
            Permission::Create => 'C',
            Permission::Retrieve => 'R',
            Permission::Update => 'U',
            Permission::Delete => 'D',
            Permission::Notify => 'N',
        }
    }
}

/// Set of CRUDN permissions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Permissions(u8);

impl Permissions {
    /// No permissions
    pub fn empty() -> Self {
        Self(0)
    }

    /// Every permission
    pub fn all() -> Self {
        Permission::ALL
            .iter()
            .fold(Self::empty(), |acc, p| acc.with(*p))
    }

    /// Add a flag; adding a flag twice has no further effect
    pub fn insert(&mut self, permission: Permission) {
        self.0 |= permission.bit();
    }

    /// Builder-style [`Permissions::insert`]
    pub fn with(mut self, permission: Permission) -> Self {
        self.insert(permission);
        self
    }

    /// Whether `permission` is granted
    pub fn contains(&self, permission: Permission) -> bool {
        self.0 & permission.bit() != 0
    }

    /// Whether no permission is granted
    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Raw `acl2` bitmask
    pub fn bits(&self) -> u8 {
        self.0
    }
}

impl fmt::Display for Permissions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for permission in Permission::ALL {
            let c = if self.contains(permission) {
                permission.letter()
            } else {
                '-'
            };
            write!(f, "{c}")?;
        }
        Ok(())
    }
}

// =============================================================================
// RESOURCES
// =============================================================================

/// Wildcard resource-matching rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WildcardCategory {
    /// Every resource
    All,
    /// Every non-configuration resource with a secured endpoint
    AllWithSecuredEndpoint,
    /// Every non-configuration resource with an unsecured endpoint
    AllWithUnsecuredEndpoint,
}

impl WildcardCategory {
    /// `wc` value on the wire
    pub fn as_wire(&self) -> &'static str {
        match self {
            WildcardCategory::All => "*",
            WildcardCategory::AllWithSecuredEndpoint => "+",
            WildcardCategory::AllWithUnsecuredEndpoint => "-",
        }
    }
}

/// One resource an ACE applies to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AceResource {
    /// Explicit resource path
    Href(String),
    /// Wildcard category
    Wildcard(WildcardCategory),
}

impl fmt::Display for AceResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AceResource::Href(href) => f.write_str(href),
            AceResource::Wildcard(wc) => write!(f, "wc:{}", wc.as_wire()),
        }
    }
}

/// Operator-supplied resource description before it is checked.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceSpec {
    /// Explicit href, if given
    pub href: Option<String>,
    /// Wildcard category, if given
    pub wildcard: Option<WildcardCategory>,
}

impl ResourceSpec {
    /// Spec naming an explicit href
    pub fn href(href: impl Into<String>) -> Self {
        Self {
            href: Some(href.into()),
            wildcard: None,
        }
    }

    /// Spec naming a wildcard category
    pub fn wildcard(category: WildcardCategory) -> Self {
        Self {
            href: None,
            wildcard: Some(category),
        }
    }

    /// Resolve to a resource, rejecting specs that carry both or neither form
    pub fn into_resource(self) -> ObtResult<AceResource> {
        match (self.href, self.wildcard) {
            (Some(_), Some(_)) => Err(ObtError::invalid_ace(
                "a resource takes either an href or a wildcard, not both",
            )),
            (None, None) => Err(ObtError::invalid_ace(
                "a resource needs an href or a wildcard",
            )),
            (Some(href), None) => {
                let href = href.trim();
                if href.is_empty() {
                    return Err(ObtError::invalid_ace("resource href must not be empty"));
                }
                Ok(AceResource::Href(truncate_chars(href, HREF_MAX_CHARS)))
            }
            (None, Some(wc)) => Ok(AceResource::Wildcard(wc)),
        }
    }
}

// =============================================================================
// SUBJECT AND ENTRY
// =============================================================================

/// Who an ACE grants access to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AceSubject {
    /// Any client on an unauthenticated connection
    Anonymous,
    /// Any client on an authenticated, encrypted connection
    Authenticated,
    /// One specific device
    SpecificDevice(DeviceId),
    /// Holders of a role credential
    Role(RoleCredential),
}

impl AceSubject {
    /// Subject for a device, which must be an owned device in `registry`
    pub fn specific_device(device: DeviceId, registry: &DeviceRegistry) -> ObtResult<Self> {
        if !registry.contains(device, DeviceKind::Owned) {
            return Err(ObtError::unknown_device(device, DeviceKind::Owned));
        }
        Ok(AceSubject::SpecificDevice(device))
    }

    /// Subject for a role, with an optional issuing authority
    pub fn role(role: &str, authority: Option<&str>) -> ObtResult<Self> {
        Ok(AceSubject::Role(RoleCredential::new(role, authority)?))
    }
}

impl fmt::Display for AceSubject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AceSubject::Anonymous => f.write_str("anon-clear"),
            AceSubject::Authenticated => f.write_str("auth-crypt"),
            AceSubject::SpecificDevice(id) => write!(f, "uuid:{id}"),
            AceSubject::Role(role) => write!(f, "role:{role}"),
        }
    }
}

/// Access-control entry under construction or ready for submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityAce {
    subject: AceSubject,
    resources: Vec<AceResource>,
    permissions: Permissions,
}

impl SecurityAce {
    /// Start an ACE for `subject` with no resources and no permissions
    pub fn new(subject: AceSubject) -> Self {
        Self {
            subject,
            resources: Vec::new(),
            permissions: Permissions::empty(),
        }
    }

    /// ACE granting authenticated clients every permission on every resource
    pub fn auth_crypt_wildcard() -> Self {
        Self {
            subject: AceSubject::Authenticated,
            resources: vec![AceResource::Wildcard(WildcardCategory::All)],
            permissions: Permissions::all(),
        }
    }

    /// ACE granting a role every permission on every resource
    pub fn role_wildcard(role: RoleCredential) -> Self {
        Self {
            subject: AceSubject::Role(role),
            resources: vec![AceResource::Wildcard(WildcardCategory::All)],
            permissions: Permissions::all(),
        }
    }

    /// Append a resource, rejecting a spec with both or neither form
    pub fn add_resource(&mut self, spec: ResourceSpec) -> ObtResult<&mut Self> {
        let resource = spec.into_resource()?;
        self.resources.push(resource);
        Ok(self)
    }

    /// Grant a permission (idempotent)
    pub fn add_permission(&mut self, permission: Permission) -> &mut Self {
        self.permissions.insert(permission);
        self
    }

    /// ACE subject
    pub fn subject(&self) -> &AceSubject {
        &self.subject
    }

    /// Resources in insertion order
    pub fn resources(&self) -> &[AceResource] {
        &self.resources
    }

    /// Granted permissions
    pub fn permissions(&self) -> Permissions {
        self.permissions
    }

    /// Submission-time check: at least one resource and one permission, and
    /// every href non-empty and within [`HREF_MAX_CHARS`]
    pub fn validate(&self) -> ObtResult<()> {
        if self.resources.is_empty() {
            return Err(ObtError::invalid_ace("at least one resource is required"));
        }
        for resource in &self.resources {
            if let AceResource::Href(href) = resource {
                if href.trim().is_empty() {
                    return Err(ObtError::invalid_ace("resource href must not be empty"));
                }
                if href.chars().count() > HREF_MAX_CHARS {
                    return Err(ObtError::invalid_ace(format!(
                        "resource href exceeds {HREF_MAX_CHARS} characters"
                    )));
                }
            }
        }
        if self.permissions.is_empty() {
            return Err(ObtError::invalid_ace("at least one permission is required"));
        }
        Ok(())
    }
}

impl fmt::Display for SecurityAce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let resources: Vec<String> = self.resources.iter().map(ToString::to_string).collect();
        write!(
            f,
            "{} [{}] {}",
            self.subject,
            resources.join(", "),
            self.permissions
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceIdentity;
    use assert_matches::assert_matches;

    #[test]
    fn ace_without_resources_is_rejected() {
        let mut ace = SecurityAce::new(AceSubject::Anonymous);
        ace.add_permission(Permission::Retrieve);
        assert_matches!(ace.validate(), Err(ObtError::InvalidAce(_)));
    }

    #[test]
    fn ace_without_permissions_is_rejected() {
        let mut ace = SecurityAce::new(AceSubject::Authenticated);
        ace.add_resource(ResourceSpec::href("/a/light")).expect("resource");
        assert_matches!(ace.validate(), Err(ObtError::InvalidAce(_)));
    }

    #[test]
    fn complete_ace_is_accepted() {
        let mut ace = SecurityAce::new(AceSubject::Authenticated);
        ace.add_resource(ResourceSpec::wildcard(WildcardCategory::AllWithSecuredEndpoint))
            .expect("resource")
            .add_permission(Permission::Retrieve)
            .add_permission(Permission::Notify);
        assert!(ace.validate().is_ok());
        assert_eq!(ace.to_string(), "auth-crypt [wc:+] -R--N");
    }

    #[test]
    fn resource_with_href_and_wildcard_is_rejected() {
        let spec = ResourceSpec {
            href: Some("/a/light".to_string()),
            wildcard: Some(WildcardCategory::All),
        };
        assert_matches!(spec.into_resource(), Err(ObtError::InvalidAce(_)));
        assert_matches!(
            ResourceSpec::default().into_resource(),
            Err(ObtError::InvalidAce(_))
        );
    }

    #[test]
    fn failed_resource_does_not_modify_ace() {
        let mut ace = SecurityAce::new(AceSubject::Anonymous);
        assert!(ace.add_resource(ResourceSpec::default()).is_err());
        assert!(ace.resources().is_empty());
    }

    #[test]
    fn href_is_truncated_to_limit() {
        let href = format!("/{}", "a".repeat(100));
        let resource = ResourceSpec::href(href).into_resource().expect("resource");
        assert_matches!(resource, AceResource::Href(h) if h.chars().count() == HREF_MAX_CHARS);
    }

    #[test]
    fn validate_rechecks_hrefs_not_built_by_add_resource() {
        let mut ace = SecurityAce {
            subject: AceSubject::Authenticated,
            resources: vec![AceResource::Href(format!("/{}", "a".repeat(HREF_MAX_CHARS)))],
            permissions: Permissions::all(),
        };
        assert_matches!(ace.validate(), Err(ObtError::InvalidAce(_)));

        ace.resources = vec![AceResource::Href("  ".to_string())];
        assert_matches!(ace.validate(), Err(ObtError::InvalidAce(_)));

        ace.resources = vec![AceResource::Href("/a/light".to_string())];
        assert!(ace.validate().is_ok());
    }

    #[test]
    fn adding_a_permission_twice_is_idempotent() {
        let mut ace = SecurityAce::new(AceSubject::Anonymous);
        ace.add_permission(Permission::Update);
        let once = ace.permissions();
        ace.add_permission(Permission::Update);
        assert_eq!(ace.permissions(), once);
        assert_eq!(once.bits(), 0x04);
    }

    #[test]
    fn wildcard_aces_grant_everything() {
        let ace = SecurityAce::auth_crypt_wildcard();
        assert!(ace.validate().is_ok());
        assert_eq!(ace.permissions().bits(), 0x1f);

        let role = RoleCredential::new("admin", None).expect("role");
        let ace = SecurityAce::role_wildcard(role);
        assert_matches!(ace.subject(), AceSubject::Role(r) if r.role() == "admin");
    }

    #[test]
    fn specific_device_subject_requires_owned_device() {
        let registry = DeviceRegistry::new();
        let owned = DeviceId::from_seed(1);
        let unowned = DeviceId::from_seed(2);
        registry.record_owned(DeviceIdentity::new(owned, "owned", Vec::new()));
        registry.record_unowned(DeviceIdentity::new(unowned, "unowned", Vec::new()));

        assert!(AceSubject::specific_device(owned, &registry).is_ok());
        assert_matches!(
            AceSubject::specific_device(unowned, &registry),
            Err(ObtError::UnknownDevice { kind: DeviceKind::Owned, .. })
        );
    }

    #[test]
    fn role_subject_requires_name() {
        assert_matches!(AceSubject::role(" ", Some("ca")), Err(ObtError::InvalidInput(_)));
    }
}
