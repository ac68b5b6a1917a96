//! Field length limits imposed by the security resources on the device side.

/// Maximum length of an ACE resource href.
pub const HREF_MAX_CHARS: usize = 63;

/// Maximum length of a role name or role authority.
pub const ROLE_MAX_CHARS: usize = 64;

/// Maximum length of a random PIN accepted by the PIN transfer method.
pub const PIN_MAX_CHARS: usize = 24;

/// Maximum length of a discovered device's display name.
pub const DEVICE_NAME_MAX_CHARS: usize = 63;

/// Maximum number of resources the operator may list in one ACE.
pub const MAX_ACE_RESOURCES: usize = 100;

/// Truncate `value` to at most `max` characters.
///
/// Counts Unicode scalar values, so the result is always valid UTF-8.
pub fn truncate_chars(value: &str, max: usize) -> String {
    match value.char_indices().nth(max) {
        Some((byte_idx, _)) => value[..byte_idx].to_string(),
        None => value.to_string(),
    }
}
