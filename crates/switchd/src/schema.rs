//! Configuration table names.
//!
//! Column names appear inline at their point of use; map columns are
//! flattened as `column:key` fields.

pub const SYSTEM: &str = "System";
pub const BRIDGE: &str = "Bridge";
pub const VRF: &str = "VRF";
pub const PORT: &str = "Port";
pub const INTERFACE: &str = "Interface";
pub const VLAN: &str = "VLAN";
pub const ROUTE: &str = "Route";
pub const NEXTHOP: &str = "NextHop";
pub const NEIGHBOR: &str = "Neighbor";
