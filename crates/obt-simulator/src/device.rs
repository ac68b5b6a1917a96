//! Virtual devices.

use crate::config::SimulatedDeviceConfig;
use obt_core::{DeviceId, DeviceIdentity, DeviceKind, DiscoveryReport, Endpoint, OtmMethod};
use obt_core::{ProvisionKind, SecurityAce};
use std::collections::BTreeSet;

const RESOURCE_TYPES: [&str; 4] = ["oic.r.doxm", "oic.r.pstat", "oic.r.acl2", "oic.r.cred"];

/// A device on the simulated network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulatedDevice {
    /// Current UUID; replaced on hard reset
    pub id: DeviceId,
    /// Display name
    pub name: String,
    /// Whether the device has an owner
    pub owned: bool,
    /// Advertised transfer methods; empty advertises all of them
    pub supported_methods: Vec<OtmMethod>,
    /// Fail every ownership transfer
    pub fail_transfer: bool,
    /// Fail every provisioning request
    pub fail_provisioning: bool,
    /// Endpoints reported on discovery
    pub endpoints: Vec<Endpoint>,
}

impl SimulatedDevice {
    /// Unowned device with a random UUID
    pub fn unowned(name: &str) -> Self {
        Self {
            id: DeviceId::new_random(),
            name: name.to_string(),
            owned: false,
            supported_methods: Vec::new(),
            fail_transfer: false,
            fail_provisioning: false,
            endpoints: Vec::new(),
        }
    }

    /// Owned device with a random UUID
    pub fn owned(name: &str) -> Self {
        Self {
            owned: true,
            ..Self::unowned(name)
        }
    }

    /// Use a fixed UUID
    pub fn with_id(mut self, id: DeviceId) -> Self {
        self.id = id;
        self
    }

    /// Restrict the advertised transfer methods
    pub fn with_methods(mut self, methods: Vec<OtmMethod>) -> Self {
        self.supported_methods = methods;
        self
    }

    /// Make every ownership transfer fail
    pub fn failing_transfer(mut self) -> Self {
        self.fail_transfer = true;
        self
    }

    /// Make every provisioning request fail
    pub fn failing_provisioning(mut self) -> Self {
        self.fail_provisioning = true;
        self
    }

    /// Ownership state as the device reports it
    pub fn kind(&self) -> DeviceKind {
        if self.owned {
            DeviceKind::Owned
        } else {
            DeviceKind::Unowned
        }
    }

    /// Whether the device accepts `method`
    pub fn supports(&self, method: OtmMethod) -> bool {
        self.supported_methods.is_empty() || self.supported_methods.contains(&method)
    }

    /// What the device answers to a discovery request
    pub fn report(&self) -> DiscoveryReport {
        DiscoveryReport {
            device_id: self.id,
            name: self.name.clone(),
            resource_types: RESOURCE_TYPES.iter().map(|rt| rt.to_string()).collect::<BTreeSet<_>>(),
            endpoints: self.endpoints.clone(),
            kind: self.kind(),
            supported_methods: self.supported_methods.clone(),
        }
    }

    /// Registry record for this device
    pub fn identity(&self) -> DeviceIdentity {
        self.report().identity()
    }
}

impl From<&SimulatedDeviceConfig> for SimulatedDevice {
    fn from(config: &SimulatedDeviceConfig) -> Self {
        let mut device = SimulatedDevice::unowned(&config.name).with_methods(config.supported_methods.clone());
        if let Some(id) = config.uuid {
            device.id = id;
        }
        device.owned = config.owned;
        device.fail_transfer = config.fail_transfer;
        device.fail_provisioning = config.fail_provisioning;
        device
    }
}

/// Per-device state the fleet tracks beyond the device description.
#[derive(Debug, Clone)]
pub(crate) struct DeviceState {
    pub(crate) device: SimulatedDevice,
    pub(crate) displayed_pin: Option<String>,
    pub(crate) received_pin: Option<String>,
    pub(crate) aces: Vec<SecurityAce>,
    pub(crate) provisioned: Vec<ProvisionKind>,
}

impl DeviceState {
    pub(crate) fn new(device: SimulatedDevice) -> Self {
        Self {
            device,
            displayed_pin: None,
            received_pin: None,
            aces: Vec::new(),
            provisioned: Vec::new(),
        }
    }

    /// Forget the owner and everything provisioned, and take a new UUID
    pub(crate) fn factory_reset(&mut self) {
        self.device.owned = false;
        self.device.id = DeviceId::new_random();
        self.displayed_pin = None;
        self.received_pin = None;
        self.aces.clear();
        self.provisioned.clear();
    }
}
