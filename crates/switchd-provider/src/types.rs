//! Value types shared across the provider interface.

use crate::ProviderError;
use std::fmt;
use std::net::IpAddr;
use switchd_types::{IpPrefix, VlanId};

/// Forwarding-plane port number, assigned by the provider on attach.
pub type PortNumber = u32;

/// Opaque handle identifying a programmed L3 forwarding destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EgressId(pub u64);

impl fmt::Display for EgressId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque handle identifying a hardware bond.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BondHandle(pub i64);

impl fmt::Display for BondHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One port as seen by the forwarding plane.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderPort {
    pub number: PortNumber,
    pub name: String,
    pub kind: String,
}

/// LACP activation mode for a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LacpMode {
    #[default]
    Off,
    Active,
    Passive,
}

impl LacpMode {
    /// True unless LACP is off.
    pub fn is_enabled(&self) -> bool {
        !matches!(self, LacpMode::Off)
    }
}

/// VLAN handling mode of a port bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VlanMode {
    Access,
    Trunk,
    NativeTagged,
    NativeUntagged,
}

/// Member selection policy of a hardware bond.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BondMode {
    #[default]
    ActiveBackup,
    BalanceSlb,
    BalanceTcp,
}

/// Hardware bond parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BondSettings {
    /// Allocate the bond handle without attaching members yet; used while a
    /// bond-qualified port has no eligible member.
    pub alloc_only: bool,
    pub mode: BondMode,
    /// Rebalance interval in milliseconds.
    pub rebalance_ms: u64,
    /// Link monitoring interval in milliseconds; zero disables monitoring.
    pub miimon_ms: u64,
}

impl Default for BondSettings {
    fn default() -> Self {
        BondSettings {
            alloc_only: false,
            mode: BondMode::default(),
            rebalance_ms: 10_000,
            miimon_ms: 0,
        }
    }
}

/// L3 address state of a bundle, with change flags computed against the
/// previous push so the provider only reprograms what moved.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IpSettings {
    pub primary_v4: Option<IpPrefix>,
    pub secondary_v4: Vec<IpPrefix>,
    pub primary_v6: Option<IpPrefix>,
    pub secondary_v6: Vec<IpPrefix>,
    pub primary_v4_changed: bool,
    pub secondary_v4_changed: bool,
    pub primary_v6_changed: bool,
    pub secondary_v6_changed: bool,
}

impl IpSettings {
    /// True if any address change flag is set.
    pub fn any_changed(&self) -> bool {
        self.primary_v4_changed
            || self.secondary_v4_changed
            || self.primary_v6_changed
            || self.secondary_v6_changed
    }
}

/// Complete forwarding-plane description of one port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleSettings {
    /// Member port numbers, enabled members only.
    pub members: Vec<PortNumber>,
    pub vlan_mode: VlanMode,
    /// Access/native VLAN; forced to `None` in trunk mode.
    pub tag: Option<VlanId>,
    pub trunks: Vec<VlanId>,
    pub lacp: LacpMode,
    /// Present when the port qualifies for a hardware bond.
    pub bond: Option<BondSettings>,
    pub ip: IpSettings,
    /// Administrative enable from hardware config.
    pub enabled: bool,
}

/// A route's forwarding target: an IP address requiring resolution, or a
/// directly attached port. Never both.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum NexthopTarget {
    Ip(IpAddr),
    Port(String),
}

impl fmt::Display for NexthopTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NexthopTarget::Ip(ip) => write!(f, "{}", ip),
            NexthopTarget::Port(name) => write!(f, "{}", name),
        }
    }
}

/// One next-hop in a route programming request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteNexthop {
    pub target: NexthopTarget,
    /// True if the next-hop resolves to a programmed L3 host entry.
    pub resolved: bool,
    pub egress: Option<EgressId>,
}

/// Route programming operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOp {
    /// Install the route, or extend it with the given next-hops.
    Add,
    /// Remove the route and all given next-hops.
    Delete,
    /// Remove only the given next-hops, keeping the route.
    DeleteNexthops,
    /// Update resolution state of the given next-hops in place.
    Update,
}

/// A route programming request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteSpec {
    pub prefix: IpPrefix,
    pub nexthops: Vec<RouteNexthop>,
}

/// Per-next-hop result of a route operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NexthopOutcome {
    pub target: NexthopTarget,
    pub error: Option<ProviderError>,
}

impl NexthopOutcome {
    pub fn ok(target: NexthopTarget) -> Self {
        NexthopOutcome {
            target,
            error: None,
        }
    }

    pub fn failed(target: NexthopTarget, error: ProviderError) -> Self {
        NexthopOutcome {
            target,
            error: Some(error),
        }
    }
}

/// Global ECMP hash toggles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum EcmpHashField {
    SrcIp,
    DstIp,
    SrcPort,
    DstPort,
    Resilient,
}

impl fmt::Display for EcmpHashField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EcmpHashField::SrcIp => "src-ip",
            EcmpHashField::DstIp => "dst-ip",
            EcmpHashField::SrcPort => "src-port",
            EcmpHashField::DstPort => "dst-port",
            EcmpHashField::Resilient => "resilient",
        };
        write!(f, "{}", s)
    }
}
