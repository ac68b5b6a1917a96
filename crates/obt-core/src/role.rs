//! Role credentials and role-certificate chains.

use crate::errors::{ObtError, ObtResult};
use crate::limits::{truncate_chars, ROLE_MAX_CHARS};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A role name optionally scoped by the authority that issues it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RoleCredential {
    role: String,
    authority: Option<String>,
}

impl RoleCredential {
    /// Create a role credential.
    ///
    /// Both strings are truncated to 64 characters. The role must not be empty;
    /// an empty authority is treated as absent.
    pub fn new(role: &str, authority: Option<&str>) -> ObtResult<Self> {
        let role = role.trim();
        if role.is_empty() {
            return Err(ObtError::invalid_input("role name must not be empty"));
        }
        let authority = authority
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .map(|a| truncate_chars(a, ROLE_MAX_CHARS));
        Ok(Self {
            role: truncate_chars(role, ROLE_MAX_CHARS),
            authority,
        })
    }

    /// Role name
    pub fn role(&self) -> &str {
        &self.role
    }

    /// Issuing authority, if any
    pub fn authority(&self) -> Option<&str> {
        self.authority.as_deref()
    }
}

impl fmt::Display for RoleCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.authority {
            Some(authority) => write!(f, "{}@{}", self.role, authority),
            None => f.write_str(&self.role),
        }
    }
}

/// Ordered role credentials submitted together as one role-certificate request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleCredentialChain {
    roles: Vec<RoleCredential>,
}

impl RoleCredentialChain {
    /// Create an empty chain
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a role to the chain
    pub fn push(&mut self, role: RoleCredential) -> &mut Self {
        self.roles.push(role);
        self
    }

    /// Parse and append a role in one step
    pub fn add_role(&mut self, role: &str, authority: Option<&str>) -> ObtResult<&mut Self> {
        let credential = RoleCredential::new(role, authority)?;
        Ok(self.push(credential))
    }

    /// Roles in insertion order
    pub fn roles(&self) -> &[RoleCredential] {
        &self.roles
    }

    /// Number of roles
    pub fn len(&self) -> usize {
        self.roles.len()
    }

    /// Whether the chain has no roles
    pub fn is_empty(&self) -> bool {
        self.roles.is_empty()
    }

    /// Check the chain can be submitted
    pub fn validate(&self) -> ObtResult<()> {
        if self.roles.is_empty() {
            return Err(ObtError::InvalidRoleChain(
                "at least one role is required".to_string(),
            ));
        }
        Ok(())
    }
}
