//! Ownership transfer method types.

use crate::errors::{ObtError, ObtResult};
use crate::limits::{truncate_chars, PIN_MAX_CHARS};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Ownership transfer method as advertised in `doxm.oxms`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OtmMethod {
    /// Anonymous key exchange, no operator secret
    JustWorks,
    /// Device displays a PIN that the operator relays
    RandomPin,
    /// Device authenticates with a pre-provisioned manufacturer certificate
    ManufacturerCertificate,
}

impl OtmMethod {
    /// Numeric `oxm` code used on the wire
    pub fn oxm_code(&self) -> u8 {
        match self {
            OtmMethod::JustWorks => 0,
            OtmMethod::RandomPin => 1,
            OtmMethod::ManufacturerCertificate => 2,
        }
    }

    /// Decode a numeric `oxm` code
    pub fn from_oxm_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(OtmMethod::JustWorks),
            1 => Some(OtmMethod::RandomPin),
            2 => Some(OtmMethod::ManufacturerCertificate),
            _ => None,
        }
    }
}

impl fmt::Display for OtmMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OtmMethod::JustWorks => f.write_str("just-works"),
            OtmMethod::RandomPin => f.write_str("random-pin"),
            OtmMethod::ManufacturerCertificate => f.write_str("manufacturer-certificate"),
        }
    }
}

/// Handshake step an ownership-transfer session performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandshakeMethod {
    /// Single-step Just Works transfer
    JustWorks,
    /// First random PIN phase: ask the device to display a PIN
    RandomPinRequest,
    /// Second random PIN phase: transfer using the operator-entered PIN
    RandomPinTransfer,
    /// Single-step manufacturer certificate transfer
    CertificateBased,
}

impl HandshakeMethod {
    /// The `oxm` this handshake belongs to
    pub fn otm_method(&self) -> OtmMethod {
        match self {
            HandshakeMethod::JustWorks => OtmMethod::JustWorks,
            HandshakeMethod::RandomPinRequest | HandshakeMethod::RandomPinTransfer => {
                OtmMethod::RandomPin
            }
            HandshakeMethod::CertificateBased => OtmMethod::ManufacturerCertificate,
        }
    }

    /// Whether issuing this handshake puts the device in flight.
    ///
    /// Only the PIN request leaves the device selectable as unowned, since the
    /// operator still has to pick it for the transfer phase.
    pub fn transfers_ownership(&self) -> bool {
        !matches!(self, HandshakeMethod::RandomPinRequest)
    }
}

impl fmt::Display for HandshakeMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandshakeMethod::JustWorks => f.write_str("just-works"),
            HandshakeMethod::RandomPinRequest => f.write_str("random-pin request"),
            HandshakeMethod::RandomPinTransfer => f.write_str("random-pin transfer"),
            HandshakeMethod::CertificateBased => f.write_str("certificate-based"),
        }
    }
}

/// Operator-entered random PIN, at most 24 characters.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RandomPin(String);

impl RandomPin {
    /// Parse operator input. Longer PINs are truncated to 24 characters.
    pub fn parse(input: &str) -> ObtResult<Self> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(ObtError::invalid_input("random PIN must not be empty"));
        }
        Ok(Self(truncate_chars(trimmed, PIN_MAX_CHARS)))
    }

    /// PIN as entered
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for RandomPin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RandomPin(<{} chars>)", self.0.chars().count())
    }
}

/// Transfer request payload for the collaborator's ownership transfer call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferCredential {
    /// Just Works, no secret
    JustWorks,
    /// Random PIN transfer with the relayed PIN
    RandomPin(RandomPin),
    /// Manufacturer certificate, no operator secret
    ManufacturerCertificate,
}

impl TransferCredential {
    /// Handshake this credential drives
    pub fn handshake(&self) -> HandshakeMethod {
        match self {
            TransferCredential::JustWorks => HandshakeMethod::JustWorks,
            TransferCredential::RandomPin(_) => HandshakeMethod::RandomPinTransfer,
            TransferCredential::ManufacturerCertificate => HandshakeMethod::CertificateBased,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn pin_is_truncated_to_limit() {
        let pin = RandomPin::parse(&"9".repeat(40)).expect("pin");
        assert_eq!(pin.as_str().len(), PIN_MAX_CHARS);
    }

    #[test]
    fn empty_pin_is_rejected() {
        assert_matches!(RandomPin::parse("   "), Err(ObtError::InvalidInput(_)));
    }

    #[test]
    fn pin_debug_does_not_leak_digits() {
        let pin = RandomPin::parse("1234").expect("pin");
        assert!(!format!("{pin:?}").contains("1234"));
    }

    #[test]
    fn oxm_codes_round_trip() {
        for method in [
            OtmMethod::JustWorks,
            OtmMethod::RandomPin,
            OtmMethod::ManufacturerCertificate,
        ] {
            assert_eq!(OtmMethod::from_oxm_code(method.oxm_code()), Some(method));
        }
        assert_eq!(OtmMethod::from_oxm_code(4), None);
    }

    #[test]
    fn only_pin_request_keeps_device_selectable() {
        assert!(!HandshakeMethod::RandomPinRequest.transfers_ownership());
        assert!(HandshakeMethod::RandomPinTransfer.transfers_ownership());
        assert!(HandshakeMethod::JustWorks.transfers_ownership());
        assert!(HandshakeMethod::CertificateBased.transfers_ownership());
    }
}
