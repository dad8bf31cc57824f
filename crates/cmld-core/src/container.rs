//! Container collaborator interface.
//!
//! Per-container services never own the container they serve. They hold a
//! `Weak<dyn Container>` and call into it from reactor callbacks. All
//! methods take `&self`: the container provides its own interior
//! mutability, and because everything runs on one thread no locking is
//! involved.
//!
//! Observers registered with [`Container::register_observer`] may be
//! invoked synchronously from inside other container calls, so
//! implementations must not hold internal borrows while notifying.

use std::fmt;

use uuid::Uuid;

use crate::error::Result;

/// Container lifecycle states.
///
/// ```text
/// Stopped -> Starting -> Booting -> Running -> ShuttingDown -> Stopped
///                                      \-> Freezing -> Frozen
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContainerState {
    Stopped,
    Starting,
    Booting,
    Running,
    Freezing,
    Frozen,
    Zombie,
    ShuttingDown,
    Setup,
    Rebooting,
}

impl ContainerState {
    /// Check if the container is on its way down or already down.
    pub fn is_stopping(&self) -> bool {
        matches!(self, ContainerState::ShuttingDown | ContainerState::Stopped)
    }
}

impl fmt::Display for ContainerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ContainerState::Stopped => "stopped",
            ContainerState::Starting => "starting",
            ContainerState::Booting => "booting",
            ContainerState::Running => "running",
            ContainerState::Freezing => "freezing",
            ContainerState::Frozen => "frozen",
            ContainerState::Zombie => "zombie",
            ContainerState::ShuttingDown => "shutting_down",
            ContainerState::Setup => "setup",
            ContainerState::Rebooting => "rebooting",
        };
        f.write_str(name)
    }
}

/// Network reachability of a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Connectivity {
    #[default]
    Offline,
    MobileOnly,
    WifiOnly,
    MobileAndWifi,
}

impl Connectivity {
    /// Check if any uplink is available.
    pub fn is_online(&self) -> bool {
        !matches!(self, Connectivity::Offline)
    }

    /// Check if a mobile uplink is available.
    pub fn has_mobile(&self) -> bool {
        matches!(self, Connectivity::MobileOnly | Connectivity::MobileAndWifi)
    }

    /// Check if a WiFi uplink is available.
    pub fn has_wifi(&self) -> bool {
        matches!(self, Connectivity::WifiOnly | Connectivity::MobileAndWifi)
    }

    /// Parse a connectivity name as used on the command line.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "offline" => Some(Connectivity::Offline),
            "mobile" => Some(Connectivity::MobileOnly),
            "wifi" => Some(Connectivity::WifiOnly),
            "mobile+wifi" => Some(Connectivity::MobileAndWifi),
            _ => None,
        }
    }
}

impl fmt::Display for Connectivity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Connectivity::Offline => "offline",
            Connectivity::MobileOnly => "mobile",
            Connectivity::WifiOnly => "wifi",
            Connectivity::MobileAndWifi => "mobile+wifi",
        };
        f.write_str(name)
    }
}

/// Identity attributes reported by the companion agent.
///
/// Each field is independent; only present fields are applied.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentityUpdate {
    pub imei: Option<String>,
    pub mac: Option<String>,
    pub phone_number: Option<String>,
}

impl IdentityUpdate {
    /// Check if no field is set.
    pub fn is_empty(&self) -> bool {
        self.imei.is_none() && self.mac.is_none() && self.phone_number.is_none()
    }

    /// Apply every present field to the container.
    pub fn apply_to(&self, container: &dyn Container) {
        if let Some(imei) = &self.imei {
            container.set_imei(imei);
        }
        if let Some(mac) = &self.mac {
            container.set_mac_address(mac);
        }
        if let Some(number) = &self.phone_number {
            container.set_phone_number(number);
        }
    }
}

/// Subscription token returned by [`Container::register_observer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(pub u64);

/// Callback invoked on container connectivity notifications.
pub type ContainerObserver = Box<dyn Fn(&dyn Container)>;

/// The container object as seen by per-container services.
pub trait Container {
    /// Container UUID.
    fn uuid(&self) -> Uuid;

    /// Configured container name.
    fn name(&self) -> String;

    /// Human-readable description used in log lines.
    fn description(&self) -> String;

    /// DNS server handed to the container, if one is configured.
    fn dns_server(&self) -> Option<String>;

    /// Current lifecycle state.
    fn state(&self) -> ContainerState;

    /// Set the lifecycle state.
    fn set_state(&self, state: ContainerState);

    /// Whether the container's screen is on.
    fn screen_on(&self) -> bool;

    /// Set the screen-on flag.
    fn set_screen_on(&self, on: bool);

    /// Authoritative connectivity.
    fn connectivity(&self) -> Connectivity;

    /// Set the authoritative connectivity and notify observers.
    fn set_connectivity(&self, connectivity: Connectivity);

    /// Set the IMEI.
    fn set_imei(&self, imei: &str);

    /// Set the MAC address.
    fn set_mac_address(&self, mac: &str);

    /// Set the phone number.
    fn set_phone_number(&self, number: &str);

    /// Stop the container. Escalates to a forced kill internally when a
    /// graceful stop is not possible.
    fn stop(&self) -> Result<()>;

    /// Wipe the container's data.
    fn wipe(&self) -> Result<()>;

    /// Execute `argv` with the capability to set the system time.
    fn exec_cap_systime(&self, argv: &[String]) -> Result<()>;

    /// Hand an audit acknowledgement from the agent to the audit subsystem.
    fn audit_process_ack(&self, ack: &[u8]) -> Result<()>;

    /// Subscribe to connectivity notifications.
    fn register_observer(&self, observer: ContainerObserver) -> Result<ObserverId>;

    /// Remove a subscription. Unknown ids are ignored.
    fn unregister_observer(&self, id: ObserverId);
}
