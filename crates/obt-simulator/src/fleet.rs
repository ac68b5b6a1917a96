//! Simulated fleet implementing [`OnboardingEffects`].
//!
//! Devices answer discovery synchronously. Ownership transfer and provisioning
//! answers are delivered according to the [`CompletionMode`]:
//!
//! - `Immediate` completes inside the issuing call
//! - `Delayed` completes from a runtime task after the configured latency
//! - `Manual` holds every completion until the test resolves it
//!
//! A device's answer is decided when the completion is delivered, not when
//! the request is issued, so the device state at that moment is what counts.

use crate::config::SimulationConfig;
use crate::device::{DeviceState, SimulatedDevice};
use obt_core::{
    Completion, DeviceId, DeviceIdentity, DiscoveryFlow, DiscoveryRequest,
    DiscoverySink, Endpoint, IssueError, IssueResult, ObtError, ObtResult, OnboardingEffects,
    Outcome, ProvisionKind, ProvisionRequest, RequestId, SecurityAce, TransferCredential,
};
use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

/// Number of digits in a generated PIN
pub const PIN_DIGITS: usize = 8;

/// When the fleet delivers completions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionMode {
    /// Complete inside the issuing call
    Immediate,
    /// Complete from a runtime task after the given delay
    Delayed(Duration),
    /// Hold completions until [`SimulatedFleet::complete`] or [`SimulatedFleet::resolve`]
    Manual,
}

#[derive(Debug, Clone)]
enum Operation {
    RandomPin(DeviceId),
    Transfer(DeviceId, TransferCredential),
    Provision(ProvisionRequest),
}

struct HeldRequest {
    completion: Completion,
    operation: Operation,
}

struct FleetState {
    devices: Vec<DeviceState>,
    held: Vec<HeldRequest>,
    rng: ChaCha20Rng,
    rejecting: bool,
    shut_down: bool,
}

impl FleetState {
    fn find(&self, id: DeviceId) -> Option<&DeviceState> {
        self.devices.iter().find(|d| d.device.id == id)
    }

    fn find_mut(&mut self, id: DeviceId) -> Option<&mut DeviceState> {
        self.devices.iter_mut().find(|d| d.device.id == id)
    }

    fn check_issuable(&self) -> IssueResult {
        if self.shut_down {
            return Err(IssueError::ShutDown);
        }
        if self.rejecting {
            return Err(IssueError::TransportUnavailable);
        }
        Ok(())
    }

    /// The answer the device gives right now
    fn evaluate(&self, operation: &Operation) -> Outcome {
        let succeeded = match operation {
            Operation::RandomPin(id) => self.find(*id).is_some_and(|d| !d.device.owned),
            Operation::Transfer(id, credential) => self.find(*id).is_some_and(|d| {
                let pin_matches = match credential {
                    TransferCredential::RandomPin(pin) => {
                        d.displayed_pin.as_deref() == Some(pin.as_str())
                    }
                    _ => true,
                };
                !d.device.owned
                    && !d.device.fail_transfer
                    && d.device.supports(credential.handshake().otm_method())
                    && pin_matches
            }),
            Operation::Provision(request) => request.targets().iter().all(|id| {
                self.find(*id)
                    .is_some_and(|d| d.device.owned && !d.device.fail_provisioning)
            }),
        };
        if succeeded {
            Outcome::Succeeded
        } else {
            Outcome::Failed
        }
    }

    /// Apply what a successful operation does to the device
    fn apply(&mut self, operation: &Operation) {
        match operation {
            Operation::RandomPin(id) => {
                let pin: String = (0..PIN_DIGITS)
                    .map(|_| char::from(b'0' + self.rng.gen_range(0..10u8)))
                    .collect();
                if let Some(state) = self.find_mut(*id) {
                    info!(device = %id, name = %state.device.name, pin = %pin, "Device displays random PIN");
                    state.displayed_pin = Some(pin);
                }
            }
            Operation::Transfer(id, _) => {
                if let Some(state) = self.find_mut(*id) {
                    state.device.owned = true;
                    state.displayed_pin = None;
                    debug!(device = %id, "Device is now owned");
                }
            }
            Operation::Provision(request) => {
                let kind = request.kind();
                let installed = request.installed_ace();
                for id in request.targets() {
                    let Some(state) = self.find_mut(id) else {
                        continue;
                    };
                    if kind == ProvisionKind::HardReset {
                        state.factory_reset();
                        info!(old = %id, new = %state.device.id, "Device reset to factory state");
                        continue;
                    }
                    if let Some(ace) = &installed {
                        state.aces.push(ace.clone());
                    }
                    state.provisioned.push(kind);
                }
            }
        }
    }

    /// Decide the answer and apply it
    fn settle(&mut self, operation: &Operation) -> Outcome {
        let outcome = self.evaluate(operation);
        if outcome.is_success() {
            self.apply(operation);
        }
        outcome
    }
}

/// A fleet of virtual devices behind the onboarding collaborator contract.
///
/// Cloning yields another handle to the same fleet.
#[derive(Clone)]
pub struct SimulatedFleet {
    state: Arc<Mutex<FleetState>>,
    mode: CompletionMode,
}

impl SimulatedFleet {
    /// Empty fleet with a randomly seeded PIN generator
    pub fn new(mode: CompletionMode) -> Self {
        Self::with_rng(mode, ChaCha20Rng::from_entropy())
    }

    /// Empty fleet with a deterministic PIN generator
    pub fn with_seed(mode: CompletionMode, seed: u64) -> Self {
        Self::with_rng(mode, ChaCha20Rng::seed_from_u64(seed))
    }

    fn with_rng(mode: CompletionMode, rng: ChaCha20Rng) -> Self {
        Self {
            state: Arc::new(Mutex::new(FleetState {
                devices: Vec::new(),
                held: Vec::new(),
                rng,
                rejecting: false,
                shut_down: false,
            })),
            mode,
        }
    }

    /// Build the fleet described by a `[simulation]` table
    pub fn from_config(config: &SimulationConfig) -> ObtResult<Self> {
        let mode = match config.latency_ms {
            0 => CompletionMode::Immediate,
            _ => CompletionMode::Delayed(config.latency()),
        };
        let fleet = match config.seed {
            Some(seed) => Self::with_seed(mode, seed),
            None => Self::new(mode),
        };
        let mut seen = HashSet::new();
        for entry in &config.devices {
            let device = SimulatedDevice::from(entry);
            if !seen.insert(device.id) {
                return Err(ObtError::initialization(format!(
                    "simulated device {} uses duplicate UUID {}",
                    entry.name, device.id
                )));
            }
            fleet.add_device(device);
        }
        info!(devices = config.devices.len(), ?mode, "Simulated fleet ready");
        Ok(fleet)
    }

    /// Completion mode
    pub fn mode(&self) -> CompletionMode {
        self.mode
    }

    /// Put a device on the network. Devices without endpoints get a link-local pair.
    pub fn add_device(&self, mut device: SimulatedDevice) -> DeviceId {
        let mut state = self.state.lock();
        if device.endpoints.is_empty() {
            let host = state.devices.len() + 1;
            device.endpoints = vec![
                Endpoint::new(format!("coap://[fe80::{host:x}]:5683")),
                Endpoint::new(format!("coaps://[fe80::{host:x}]:5684")),
            ];
        }
        let id = device.id;
        state.devices.push(DeviceState::new(device));
        id
    }

    /// Every device, in the order they were added
    pub fn devices(&self) -> Vec<SimulatedDevice> {
        self.state.lock().devices.iter().map(|d| d.device.clone()).collect()
    }

    /// Current description of a device
    pub fn device(&self, id: DeviceId) -> Option<SimulatedDevice> {
        self.state.lock().find(id).map(|d| d.device.clone())
    }

    /// Look a device up by name; survives hard resets
    pub fn device_named(&self, name: &str) -> Option<SimulatedDevice> {
        self.state
            .lock()
            .devices
            .iter()
            .find(|d| d.device.name == name)
            .map(|d| d.device.clone())
    }

    /// Registry record the device would report
    pub fn identity(&self, id: DeviceId) -> Option<DeviceIdentity> {
        self.device(id).map(|d| d.identity())
    }

    /// Whether the device currently has an owner
    pub fn is_owned(&self, id: DeviceId) -> bool {
        self.device(id).is_some_and(|d| d.owned)
    }

    /// PIN the device is showing, if a PIN request succeeded
    pub fn displayed_pin(&self, id: DeviceId) -> Option<String> {
        self.state.lock().find(id).and_then(|d| d.displayed_pin.clone())
    }

    /// Last PIN a transfer request presented to the device
    pub fn received_pin(&self, id: DeviceId) -> Option<String> {
        self.state.lock().find(id).and_then(|d| d.received_pin.clone())
    }

    /// ACEs installed on the device
    pub fn installed_aces(&self, id: DeviceId) -> Vec<SecurityAce> {
        self.state.lock().find(id).map(|d| d.aces.clone()).unwrap_or_default()
    }

    /// Provisioning requests the device accepted
    pub fn provisioned(&self, id: DeviceId) -> Vec<ProvisionKind> {
        self.state
            .lock()
            .find(id)
            .map(|d| d.provisioned.clone())
            .unwrap_or_default()
    }

    /// Refuse every request as if the transport were down
    pub fn set_rejecting(&self, rejecting: bool) {
        self.state.lock().rejecting = rejecting;
    }

    /// Whether [`OnboardingEffects::shutdown`] has been called
    pub fn is_shut_down(&self) -> bool {
        self.state.lock().shut_down
    }

    /// Requests held in manual mode, oldest first
    pub fn held_requests(&self) -> Vec<RequestId> {
        self.state
            .lock()
            .held
            .iter()
            .map(|h| h.completion.request_id())
            .collect()
    }

    /// Deliver a held request with a forced outcome.
    ///
    /// A forced success applies the operation to the device. Returns `false`
    /// if no such request is held.
    pub fn complete(&self, request_id: RequestId, outcome: Outcome) -> bool {
        let held = {
            let mut state = self.state.lock();
            let Some(pos) = state
                .held
                .iter()
                .position(|h| h.completion.request_id() == request_id)
            else {
                return false;
            };
            let held = state.held.remove(pos);
            if outcome.is_success() {
                state.apply(&held.operation);
            }
            held
        };
        deliver(held.completion, outcome);
        true
    }

    /// Deliver a held request with the answer the device gives now
    pub fn resolve(&self, request_id: RequestId) -> Option<Outcome> {
        let (held, outcome) = {
            let mut state = self.state.lock();
            let pos = state
                .held
                .iter()
                .position(|h| h.completion.request_id() == request_id)?;
            let held = state.held.remove(pos);
            let outcome = state.settle(&held.operation);
            (held, outcome)
        };
        deliver(held.completion, outcome);
        Some(outcome)
    }

    /// Resolve every held request in issue order
    pub fn resolve_all(&self) -> usize {
        let mut resolved = 0;
        for request_id in self.held_requests() {
            if self.resolve(request_id).is_some() {
                resolved += 1;
            }
        }
        resolved
    }

    fn dispatch(&self, completion: Completion, operation: Operation) {
        match self.mode {
            CompletionMode::Immediate => {
                let outcome = self.state.lock().settle(&operation);
                deliver(completion, outcome);
            }
            CompletionMode::Delayed(delay) => match Handle::try_current() {
                Ok(runtime) => {
                    let state = Arc::clone(&self.state);
                    runtime.spawn(async move {
                        tokio::time::sleep(delay).await;
                        let outcome = {
                            let mut state = state.lock();
                            if state.shut_down {
                                return;
                            }
                            state.settle(&operation)
                        };
                        deliver(completion, outcome);
                    });
                }
                Err(_) => {
                    warn!("No runtime for delayed completion, answering immediately");
                    let outcome = self.state.lock().settle(&operation);
                    deliver(completion, outcome);
                }
            },
            CompletionMode::Manual => self.state.lock().held.push(HeldRequest {
                completion,
                operation,
            }),
        }
    }
}

fn deliver(completion: Completion, outcome: Outcome) {
    let request_id = completion.request_id();
    if !completion.complete(outcome) {
        debug!(request_id = %request_id, %outcome, "Nobody is waiting for this completion");
    }
}

impl std::fmt::Debug for SimulatedFleet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("SimulatedFleet")
            .field("mode", &self.mode)
            .field("devices", &state.devices.len())
            .field("held", &state.held.len())
            .finish()
    }
}

impl OnboardingEffects for SimulatedFleet {
    fn discover(&self, request: DiscoveryRequest, sink: Arc<dyn DiscoverySink>) -> IssueResult {
        let reports: Vec<_> = {
            let state = self.state.lock();
            state.check_issuable()?;
            state
                .devices
                .iter()
                .filter(|d| d.device.kind() == request.kind)
                .map(|d| d.device.report())
                .collect()
        };
        debug!(scope = %request.scope, query = %request.query, found = reports.len(), "Simulated discovery");
        for report in reports {
            if sink.on_device(report) == DiscoveryFlow::Stop {
                break;
            }
        }
        Ok(())
    }

    fn request_random_pin(&self, device: DeviceId, completion: Completion) -> IssueResult {
        {
            let state = self.state.lock();
            state.check_issuable()?;
            if state.find(device).is_none() {
                return Err(IssueError::Rejected(format!("no device {device}")));
            }
        }
        self.dispatch(completion, Operation::RandomPin(device));
        Ok(())
    }

    fn transfer_ownership(
        &self,
        device: DeviceId,
        credential: TransferCredential,
        completion: Completion,
    ) -> IssueResult {
        {
            let mut state = self.state.lock();
            state.check_issuable()?;
            let Some(target) = state.find_mut(device) else {
                return Err(IssueError::Rejected(format!("no device {device}")));
            };
            if let TransferCredential::RandomPin(pin) = &credential {
                target.received_pin = Some(pin.as_str().to_string());
            }
        }
        self.dispatch(completion, Operation::Transfer(device, credential));
        Ok(())
    }

    fn provision(&self, request: ProvisionRequest, completion: Completion) -> IssueResult {
        {
            let state = self.state.lock();
            state.check_issuable()?;
            if let Some(missing) = request.targets().into_iter().find(|id| state.find(*id).is_none()) {
                return Err(IssueError::Rejected(format!("no device {missing}")));
            }
        }
        self.dispatch(completion, Operation::Provision(request));
        Ok(())
    }

    fn shutdown(&self) {
        let mut state = self.state.lock();
        if state.shut_down {
            return;
        }
        state.shut_down = true;
        let dropped = state.held.len();
        state.held.clear();
        info!(dropped, "Simulated fleet shut down");
    }
}
