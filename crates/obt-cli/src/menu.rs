//! Numbered operator menu
//!
//! Reads one selection at a time, prompts for whatever the command needs and
//! hands a [`Command`] to the orchestrator. Devices are listed from a registry
//! snapshot and picked by index, but the index is turned into a UUID right
//! away so later registry changes cannot redirect the command.

use anyhow::{Context, Result};
use obt_agent::{Command, CommandOutcome, EventReceiver, Orchestrator};
use obt_core::limits::MAX_ACE_RESOURCES;
use obt_core::{
    AceSubject, DeviceId, DeviceKind, DiscoveryScope, ObtError, Permission, ResourceSpec,
    RoleCredentialChain, SecurityAce, WildcardCategory,
};
use std::io::{BufRead, Write};
use tracing::debug;

/// Menu entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuItem {
    /// Print the menu again
    Help,
    /// Discover devices
    Discover(Option<DiscoveryScope>, DeviceKind),
    /// Just Works transfer
    JustWorks,
    /// Random PIN request
    RequestRandomPin,
    /// Random PIN transfer
    RandomPinTransfer,
    /// Certificate transfer
    CertificateBased,
    /// Pairwise credentials
    PairwiseCredentials,
    /// Custom ACE
    Ace,
    /// Auth-crypt wildcard ACE
    AuthCryptWildcardAce,
    /// Role wildcard ACE
    RoleWildcardAce,
    /// Identity certificate
    IdentityCertificate,
    /// Role certificate
    RoleCertificate,
    /// Hard reset one device
    HardReset,
    /// Registry and session listing
    Status,
    /// Full reset
    FullReset,
    /// Exit
    Exit,
}

impl MenuItem {
    /// Map a menu number to its entry
    pub fn from_selection(selection: u32) -> Option<Self> {
        use DeviceKind::{Owned, Unowned};
        use DiscoveryScope::{RealmLocalIpv6, SiteLocalIpv6};
        Some(match selection {
            0 => MenuItem::Help,
            1 => MenuItem::Discover(None, Unowned),
            2 => MenuItem::Discover(Some(RealmLocalIpv6), Unowned),
            3 => MenuItem::Discover(Some(SiteLocalIpv6), Unowned),
            4 => MenuItem::Discover(None, Owned),
            5 => MenuItem::Discover(Some(RealmLocalIpv6), Owned),
            6 => MenuItem::Discover(Some(SiteLocalIpv6), Owned),
            7 => MenuItem::JustWorks,
            8 => MenuItem::RequestRandomPin,
            9 => MenuItem::RandomPinTransfer,
            10 => MenuItem::CertificateBased,
            11 => MenuItem::PairwiseCredentials,
            12 => MenuItem::Ace,
            13 => MenuItem::AuthCryptWildcardAce,
            14 => MenuItem::RoleWildcardAce,
            15 => MenuItem::IdentityCertificate,
            16 => MenuItem::RoleCertificate,
            20 => MenuItem::Status,
            97 => MenuItem::HardReset,
            98 => MenuItem::FullReset,
            99 => MenuItem::Exit,
            _ => return None,
        })
    }
}

const MENU: &str = "\
################################################
Onboarding Tool
################################################
[0] Display this menu
------------------------------------------------
[1] Discover un-owned devices
[2] Discover un-owned devices in the realm-local IPv6 scope
[3] Discover un-owned devices in the site-local IPv6 scope
[4] Discover owned devices
[5] Discover owned devices in the realm-local IPv6 scope
[6] Discover owned devices in the site-local IPv6 scope
------------------------------------------------
[7] Just-Works ownership transfer
[8] Request random PIN from device
[9] Random PIN ownership transfer
[10] Manufacturer certificate ownership transfer
------------------------------------------------
[11] Provision pairwise credentials
[12] Provision ACE2
[13] Provision auth-crypt wildcard ACE
[14] Provision role wildcard ACE
[15] Provision identity certificate
[16] Provision role certificate
------------------------------------------------
[20] List devices and pending requests
------------------------------------------------
[97] Hard reset a device
[98] Reset the onboarding tool
[99] Exit
################################################";

/// Interactive session over an input and an output stream.
pub struct Menu<R, W> {
    orchestrator: Orchestrator,
    events: EventReceiver,
    input: R,
    output: W,
    default_scope: DiscoveryScope,
}

impl<R: BufRead, W: Write> Menu<R, W> {
    /// Create a session
    pub fn new(
        orchestrator: Orchestrator,
        events: EventReceiver,
        input: R,
        output: W,
        default_scope: DiscoveryScope,
    ) -> Self {
        Self {
            orchestrator,
            events,
            input,
            output,
            default_scope,
        }
    }

    /// Orchestrator driven by this menu
    #[cfg(test)]
    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    /// Run until the operator exits or input ends
    pub fn run(&mut self) -> Result<()> {
        writeln!(self.output, "{MENU}")?;
        loop {
            self.drain_events()?;
            let Some(line) = self.prompt("\nSelect option: ")? else {
                debug!("Input closed, shutting down");
                self.orchestrator.shutdown();
                return Ok(());
            };
            if line.is_empty() {
                continue;
            }
            let item = match line.parse::<u32>().ok().and_then(MenuItem::from_selection) {
                Some(item) => item,
                None => {
                    writeln!(self.output, "ERROR: Invalid selection {line:?}")?;
                    continue;
                }
            };
            match self.handle(item) {
                Ok(true) => {}
                Ok(false) => {
                    writeln!(self.output, "Exiting...")?;
                    return Ok(());
                }
                Err(err) => match err.downcast_ref::<ObtError>() {
                    Some(obt) if obt.is_operator_error() => {
                        writeln!(self.output, "ERROR: {obt}")?;
                    }
                    Some(obt) => writeln!(self.output, "FAILED: {obt}")?,
                    None => return Err(err),
                },
            }
        }
    }

    /// Carry out one entry. Returns `false` once the session should end.
    fn handle(&mut self, item: MenuItem) -> Result<bool> {
        let command = match item {
            MenuItem::Help => {
                writeln!(self.output, "{MENU}")?;
                return Ok(true);
            }
            MenuItem::Status => {
                self.print_status()?;
                return Ok(true);
            }
            MenuItem::Discover(scope, kind) => Command::Discover {
                scope: scope.unwrap_or(self.default_scope),
                kind,
            },
            MenuItem::JustWorks => Command::JustWorks(self.select_device(DeviceKind::Unowned)?),
            MenuItem::RequestRandomPin => {
                Command::RequestRandomPin(self.select_device(DeviceKind::Unowned)?)
            }
            MenuItem::RandomPinTransfer => {
                let device = self.select_device(DeviceKind::Unowned)?;
                let pin = self.require("Enter the random PIN shown on the device: ")?;
                Command::RandomPinTransfer { device, pin }
            }
            MenuItem::CertificateBased => {
                Command::CertificateBased(self.select_device(DeviceKind::Unowned)?)
            }
            MenuItem::PairwiseCredentials => {
                let first = self.select_device(DeviceKind::Owned)?;
                let second = self.select_device(DeviceKind::Owned)?;
                Command::PairwiseCredentials(first, second)
            }
            MenuItem::Ace => {
                let owner = self.select_device(DeviceKind::Owned)?;
                let ace = self.build_ace()?;
                Command::Ace { owner, ace }
            }
            MenuItem::AuthCryptWildcardAce => {
                Command::AuthCryptWildcardAce(self.select_device(DeviceKind::Owned)?)
            }
            MenuItem::RoleWildcardAce => {
                let owner = self.select_device(DeviceKind::Owned)?;
                let role = self.require("Enter the role: ")?;
                let authority = self.optional("Enter the authority (empty for none): ")?;
                Command::RoleWildcardAce {
                    owner,
                    role,
                    authority,
                }
            }
            MenuItem::IdentityCertificate => {
                Command::IdentityCertificate(self.select_device(DeviceKind::Owned)?)
            }
            MenuItem::RoleCertificate => {
                let owner = self.select_device(DeviceKind::Owned)?;
                let chain = self.build_role_chain()?;
                Command::RoleCertificate { owner, chain }
            }
            MenuItem::HardReset => Command::HardReset(self.select_device(DeviceKind::Owned)?),
            MenuItem::FullReset => Command::FullReset,
            MenuItem::Exit => Command::Exit,
        };

        match self.orchestrator.execute(command)? {
            CommandOutcome::Issued => writeln!(self.output, "Request issued")?,
            CommandOutcome::Pending(pending) => {
                writeln!(self.output, "Request {} issued", pending.request_id())?;
            }
            CommandOutcome::Reset => writeln!(self.output, "Onboarding tool reset")?,
            CommandOutcome::Exit => return Ok(false),
        }
        Ok(true)
    }

    fn drain_events(&mut self) -> Result<()> {
        while let Ok(event) = self.events.try_recv() {
            writeln!(self.output, "* {event}")?;
        }
        Ok(())
    }

    fn print_status(&mut self) -> Result<()> {
        for kind in [DeviceKind::Unowned, DeviceKind::Owned] {
            let devices = self.orchestrator.registry().snapshot(kind);
            writeln!(self.output, "{} {kind} device(s)", devices.len())?;
            for device in devices {
                writeln!(self.output, "  {device}")?;
            }
        }
        for session in self.orchestrator.otm_sessions() {
            writeln!(
                self.output,
                "  pending {} {} on {}",
                session.request_id, session.method, session.device
            )?;
        }
        for session in self.orchestrator.provisioning_sessions() {
            writeln!(
                self.output,
                "  pending {} {} on {} device(s)",
                session.request_id,
                session.kind,
                session.targets.len()
            )?;
        }
        Ok(())
    }

    /// Read one trimmed line. `None` at end of input.
    fn prompt(&mut self, label: &str) -> Result<Option<String>> {
        write!(self.output, "{label}")?;
        self.output.flush()?;
        let mut line = String::new();
        let read = self
            .input
            .read_line(&mut line)
            .context("Failed to read operator input")?;
        if read == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim().to_string()))
    }

    fn require(&mut self, label: &str) -> Result<String> {
        match self.prompt(label)? {
            Some(value) if !value.is_empty() => Ok(value),
            _ => Err(ObtError::invalid_input("a value is required").into()),
        }
    }

    fn optional(&mut self, label: &str) -> Result<Option<String>> {
        Ok(self.prompt(label)?.filter(|v| !v.is_empty()))
    }

    fn number(&mut self, label: &str) -> Result<usize> {
        let raw = self.require(label)?;
        raw.parse::<usize>()
            .map_err(|_| ObtError::invalid_input(format!("{raw:?} is not a number")).into())
    }

    fn confirm(&mut self, label: &str) -> Result<bool> {
        Ok(matches!(
            self.optional(label)?.as_deref(),
            Some("y") | Some("Y") | Some("yes")
        ))
    }

    fn select_device(&mut self, kind: DeviceKind) -> Result<DeviceId> {
        let devices = self.orchestrator.registry().snapshot(kind);
        if devices.is_empty() {
            return Err(ObtError::invalid_input(format!(
                "no {kind} devices known; run discovery first"
            ))
            .into());
        }
        writeln!(self.output, "\n{kind} devices:")?;
        for (index, device) in devices.iter().enumerate() {
            writeln!(self.output, "[{index}]: {device}")?;
        }
        let index = self.number("\nSelect device: ")?;
        devices
            .get(index)
            .map(|device| device.id)
            .ok_or_else(|| ObtError::invalid_input(format!("no device at index {index}")).into())
    }

    fn build_ace(&mut self) -> Result<SecurityAce> {
        writeln!(
            self.output,
            "Subject:\n[0]: anon-clear\n[1]: auth-crypt\n[2]: specific device\n[3]: role"
        )?;
        let subject = match self.number("Select subject: ")? {
            0 => AceSubject::Anonymous,
            1 => AceSubject::Authenticated,
            2 => {
                let device = self.select_device(DeviceKind::Owned)?;
                AceSubject::specific_device(device, self.orchestrator.registry())?
            }
            3 => {
                let role = self.require("Enter the role: ")?;
                let authority = self.optional("Enter the authority (empty for none): ")?;
                AceSubject::role(&role, authority.as_deref())?
            }
            other => {
                return Err(ObtError::invalid_input(format!("no subject {other}")).into());
            }
        };

        let mut ace = SecurityAce::new(subject);
        let resources = self.number("Number of resources in this ACE: ")?;
        if !(1..=MAX_ACE_RESOURCES).contains(&resources) {
            return Err(ObtError::invalid_input(format!(
                "an ACE takes between 1 and {MAX_ACE_RESOURCES} resources, got {resources}"
            ))
            .into());
        }
        for n in 0..resources {
            match self.optional(&format!("Resource {n} href (empty for a wildcard): "))? {
                Some(href) => {
                    ace.add_resource(ResourceSpec::href(href))?;
                }
                None => {
                    writeln!(
                        self.output,
                        "[0]: all resources\n[1]: all with a secured endpoint\n[2]: all with an unsecured endpoint"
                    )?;
                    let category = match self.number("Select wildcard: ")? {
                        0 => WildcardCategory::All,
                        1 => WildcardCategory::AllWithSecuredEndpoint,
                        2 => WildcardCategory::AllWithUnsecuredEndpoint,
                        other => {
                            return Err(
                                ObtError::invalid_input(format!("no wildcard {other}")).into()
                            );
                        }
                    };
                    ace.add_resource(ResourceSpec::wildcard(category))?;
                }
            }
        }

        for permission in Permission::ALL {
            if self.confirm(&format!("Grant {permission:?} permission? (y/n): "))? {
                ace.add_permission(permission);
            }
        }
        Ok(ace)
    }

    fn build_role_chain(&mut self) -> Result<RoleCredentialChain> {
        let mut chain = RoleCredentialChain::new();
        while let Some(role) = self.optional("Enter a role (empty to finish): ")? {
            let authority = self.optional("Enter the authority (empty for none): ")?;
            chain.add_role(&role, authority.as_deref())?;
        }
        Ok(chain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use obt_simulator::{CompletionMode, SimulatedDevice, SimulatedFleet};
    use std::io::Cursor;
    use std::sync::Arc;
    use tokio::runtime::Handle;

    fn session(
        script: &str,
        devices: Vec<SimulatedDevice>,
    ) -> (Arc<SimulatedFleet>, Menu<Cursor<Vec<u8>>, Vec<u8>>) {
        let fleet = Arc::new(SimulatedFleet::new(CompletionMode::Immediate));
        for device in devices {
            fleet.add_device(device);
        }
        let (orchestrator, events) = Orchestrator::new(fleet.clone(), Handle::current());
        let menu = Menu::new(
            orchestrator,
            events,
            Cursor::new(script.as_bytes().to_vec()),
            Vec::new(),
            DiscoveryScope::Global,
        );
        (fleet, menu)
    }

    fn transcript(menu: &Menu<Cursor<Vec<u8>>, Vec<u8>>) -> String {
        String::from_utf8_lossy(&menu.output).into_owned()
    }

    #[test]
    fn selections_map_to_entries() {
        assert_eq!(
            MenuItem::from_selection(2),
            Some(MenuItem::Discover(
                Some(DiscoveryScope::RealmLocalIpv6),
                DeviceKind::Unowned
            ))
        );
        assert_eq!(MenuItem::from_selection(7), Some(MenuItem::JustWorks));
        assert_eq!(MenuItem::from_selection(16), Some(MenuItem::RoleCertificate));
        assert_eq!(MenuItem::from_selection(20), Some(MenuItem::Status));
        assert_eq!(MenuItem::from_selection(97), Some(MenuItem::HardReset));
        assert_eq!(MenuItem::from_selection(99), Some(MenuItem::Exit));
        assert_eq!(MenuItem::from_selection(17), None);
    }

    #[tokio::test]
    async fn discover_and_onboard_by_index() {
        let (fleet, mut menu) = session("1\n7\n0\n99\n", vec![SimulatedDevice::unowned("lamp")]);
        menu.run().unwrap();

        let lamp = fleet.device_named("lamp").unwrap();
        assert!(fleet.is_owned(lamp.id));
        assert!(menu.orchestrator().is_shut_down());
        assert!(transcript(&menu).contains("Exiting..."));
    }

    #[tokio::test]
    async fn out_of_range_index_is_reported() {
        let (fleet, mut menu) = session("1\n7\n5\n99\n", vec![SimulatedDevice::unowned("lamp")]);
        menu.run().unwrap();

        let lamp = fleet.device_named("lamp").unwrap();
        assert!(!fleet.is_owned(lamp.id));
        assert!(transcript(&menu).contains("ERROR: Invalid input: no device at index 5"));
        assert!(menu
            .orchestrator()
            .registry()
            .contains(lamp.id, DeviceKind::Unowned));
    }

    #[tokio::test]
    async fn ace_is_built_from_prompts() {
        let script = "4\n12\n0\n1\n1\n/a/light\n\ny\nn\ny\nn\n99\n";
        let (fleet, mut menu) = session(script, vec![SimulatedDevice::owned("hub")]);
        menu.run().unwrap();

        let hub = fleet.device_named("hub").unwrap();
        let aces = fleet.installed_aces(hub.id);
        assert_eq!(aces.len(), 1);
        assert_eq!(aces[0].subject(), &AceSubject::Authenticated);
        assert!(aces[0].permissions().contains(Permission::Retrieve));
        assert!(aces[0].permissions().contains(Permission::Delete));
        assert!(!aces[0].permissions().contains(Permission::Create));
    }

    #[tokio::test]
    async fn ace_without_permissions_is_refused() {
        let script = "4\n12\n0\n0\n1\n/a/light\n\n\n\n\n\n99\n";
        let (fleet, mut menu) = session(script, vec![SimulatedDevice::owned("hub")]);
        menu.run().unwrap();

        let hub = fleet.device_named("hub").unwrap();
        assert!(fleet.installed_aces(hub.id).is_empty());
        assert!(transcript(&menu).contains("ERROR: Invalid access control entry"));
    }

    #[tokio::test]
    async fn ace_resource_count_is_bounded() {
        let script = "4\n12\n0\n1\n0\n12\n0\n1\n101\n99\n";
        let (fleet, mut menu) = session(script, vec![SimulatedDevice::owned("hub")]);
        menu.run().unwrap();

        let hub = fleet.device_named("hub").unwrap();
        assert!(fleet.installed_aces(hub.id).is_empty());
        let output = transcript(&menu);
        assert!(output.contains("between 1 and 100 resources, got 0"));
        assert!(output.contains("between 1 and 100 resources, got 101"));
        assert!(!output.contains("Resource 0 href"));
        assert!(output.contains("Exiting..."));
    }

    #[tokio::test]
    async fn role_certificate_asks_for_the_device_first() {
        let (fleet, mut menu) = session("16\nadmin\n\n99\n", Vec::new());
        menu.run().unwrap();

        let output = transcript(&menu);
        assert!(output.contains("ERROR: Invalid input: no owned devices known"));
        assert!(!output.contains("Enter a role"));
        assert!(fleet.held_requests().is_empty());
    }

    #[tokio::test]
    async fn role_certificate_is_provisioned() {
        let script = "4\n16\n0\nadmin\nacme\n\n99\n";
        let (fleet, mut menu) = session(script, vec![SimulatedDevice::owned("hub")]);
        menu.run().unwrap();

        let hub = fleet.device_named("hub").unwrap();
        assert_eq!(fleet.provisioned(hub.id), vec![obt_core::ProvisionKind::RoleCertificate]);
    }

    #[tokio::test]
    async fn end_of_input_shuts_down() {
        let (fleet, mut menu) = session("20\n", Vec::new());
        menu.run().unwrap();
        assert!(fleet.is_shut_down());
        assert!(transcript(&menu).contains("0 unowned device(s)"));
    }
}
