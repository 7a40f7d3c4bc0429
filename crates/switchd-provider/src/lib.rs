//! Forwarding-plane provider interface for switchd.
//!
//! The reconciliation engine programs the forwarding plane exclusively
//! through the [`SwitchProvider`] capability trait: switch-instance
//! lifecycle, port membership, port bundles (VLAN/bond/LACP/IP settings),
//! datapath identifiers, L3 host entries, routes with per-next-hop results,
//! and global ECMP policy. Network devices opened through the provider are
//! driven through the [`Netdev`] trait.
//!
//! [`SimProvider`] is the built-in software datapath: a complete in-memory
//! implementation that records every mutating call and can be scripted to
//! fail, which is what the engine's tests run against.

pub mod error;
pub mod netdev;
pub mod sim;
pub mod types;

pub use error::{ProviderError, ProviderResult};
pub use netdev::{Duplex, Netdev, NetdevStats, NetdevStatus};
pub use sim::{ProviderCall, SimOp, SimProvider};
pub use types::{
    BondHandle, BondMode, BondSettings, BundleSettings, EcmpHashField, EgressId, IpSettings,
    LacpMode,
    NexthopOutcome, NexthopTarget, PortNumber, ProviderPort, RouteNexthop, RouteOp, RouteSpec,
    VlanMode,
};

use std::net::IpAddr;
use switchd_types::{DatapathId, MacAddress, VlanId};

/// Capability interface to the hardware/software forwarding plane.
///
/// Implementations use interior mutability: the engine calls through a
/// shared reference from its single loop. Calls are synchronous and not
/// cancellable.
pub trait SwitchProvider: Send + Sync {
    /// Datapath types this provider can instantiate.
    fn datapath_types(&self) -> Vec<String>;

    /// Creates a switch instance.
    fn create_switch(&self, name: &str, dp_type: &str) -> ProviderResult<()>;

    /// Deletes a switch instance and everything programmed on it.
    fn delete_switch(&self, name: &str) -> ProviderResult<()>;

    /// Enumerates existing switch instances as (name, datapath type).
    fn switches(&self) -> Vec<(String, String)>;

    /// Opens a network device by name.
    fn open_netdev(&self, name: &str, kind: &str) -> ProviderResult<Box<dyn Netdev>>;

    /// Attaches a device to a switch instance, returning its port number.
    fn port_add(&self, switch: &str, netdev: &str) -> ProviderResult<PortNumber>;

    /// Detaches one port from a switch instance.
    fn port_del(&self, switch: &str, port: PortNumber) -> ProviderResult<()>;

    /// Detaches a batch of ports in one call.
    fn port_del_batch(&self, switch: &str, ports: &[PortNumber]) -> ProviderResult<()>;

    /// Enumerates the ports of a switch instance.
    fn ports(&self, switch: &str) -> Vec<ProviderPort>;

    /// Registers or updates the bundle for a named port key.
    ///
    /// Returns the hardware bond handle when the bundle carries bond
    /// settings, `None` otherwise (any previously allocated bond for the
    /// key is released).
    fn bundle_register(
        &self,
        switch: &str,
        key: &str,
        settings: &BundleSettings,
    ) -> ProviderResult<Option<BondHandle>>;

    /// Removes the bundle for a named port key.
    fn bundle_unregister(&self, switch: &str, key: &str) -> ProviderResult<()>;

    /// Enables or disables forwarding on a VLAN.
    fn set_vlan(&self, switch: &str, vid: VlanId, enable: bool) -> ProviderResult<()>;

    /// Sets the 64-bit datapath identifier of a switch instance.
    fn set_datapath_id(&self, switch: &str, dpid: DatapathId) -> ProviderResult<()>;

    /// Returns the datapath version string, when the instance reports one.
    fn datapath_version(&self, switch: &str) -> Option<String>;

    /// Programs an L3 host entry, returning its egress identifier.
    fn add_l3_host(
        &self,
        switch: &str,
        ip: IpAddr,
        mac: MacAddress,
        port: &str,
    ) -> ProviderResult<EgressId>;

    /// Removes an L3 host entry.
    fn delete_l3_host(&self, switch: &str, ip: IpAddr) -> ProviderResult<()>;

    /// Queries the hardware hit bit of an L3 host entry.
    fn l3_host_hit(&self, switch: &str, ip: IpAddr) -> ProviderResult<bool>;

    /// Adds, deletes or updates a route with an explicit next-hop list.
    ///
    /// Success and failure are reported per next-hop; the outer result is
    /// an error only when the operation as a whole could not be attempted.
    fn route_action(
        &self,
        switch: &str,
        op: RouteOp,
        route: &RouteSpec,
    ) -> ProviderResult<Vec<NexthopOutcome>>;

    /// Sets the global ECMP enable.
    fn set_ecmp_enabled(&self, enabled: bool) -> ProviderResult<()>;

    /// Sets one global ECMP hash toggle.
    fn set_ecmp_hash(&self, field: EcmpHashField, enabled: bool) -> ProviderResult<()>;

    /// Global connectivity sequence number; bumps whenever any device's
    /// operational state changes.
    fn connectivity_seq(&self) -> u64;

    /// Reports memory usage as (category, kilobytes) pairs.
    fn memory_usage(&self) -> Vec<(String, u64)>;
}
