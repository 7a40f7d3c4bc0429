//! Network device interface.

use crate::ProviderResult;
use std::collections::BTreeMap;
use switchd_types::MacAddress;

/// Link duplex mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Duplex {
    Half,
    Full,
}

impl Duplex {
    pub fn as_str(&self) -> &'static str {
        match self {
            Duplex::Half => "half",
            Duplex::Full => "full",
        }
    }
}

/// Device counters. A counter the device does not maintain reads `None`
/// and must not be reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NetdevStats {
    pub rx_packets: Option<u64>,
    pub tx_packets: Option<u64>,
    pub rx_bytes: Option<u64>,
    pub tx_bytes: Option<u64>,
    pub rx_dropped: Option<u64>,
    pub tx_dropped: Option<u64>,
    pub rx_errors: Option<u64>,
    pub tx_errors: Option<u64>,
    pub rx_frame_errors: Option<u64>,
    pub rx_over_errors: Option<u64>,
    pub rx_crc_errors: Option<u64>,
    pub collisions: Option<u64>,
}

/// Operational state of a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetdevStatus {
    pub admin_up: bool,
    pub link_up: bool,
    pub duplex: Option<Duplex>,
    pub speed_mbps: Option<u64>,
    pub mtu: Option<u32>,
    pub mac_in_use: Option<MacAddress>,
    pub link_resets: u64,
}

/// An open network device.
///
/// Returned by [`crate::SwitchProvider::open_netdev`]; the handle stays
/// valid until dropped, independent of switch-instance membership.
pub trait Netdev: Send + Sync {
    /// Device name.
    fn name(&self) -> &str;

    /// Returns the device's Ethernet address.
    fn etheraddr(&self) -> ProviderResult<MacAddress>;

    /// Sets the device's Ethernet address.
    fn set_etheraddr(&self, mac: MacAddress) -> ProviderResult<()>;

    /// Applies device-type-specific configuration.
    fn set_config(&self, config: &BTreeMap<String, String>) -> ProviderResult<()>;

    /// Reads current counters.
    fn stats(&self) -> ProviderResult<NetdevStats>;

    /// Reads current operational state.
    fn status(&self) -> ProviderResult<NetdevStatus>;

    /// Change sequence; unchanged between reads means the status did not
    /// move and a refresh can be suppressed.
    fn change_seq(&self) -> u64;
}
