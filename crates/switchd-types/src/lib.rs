//! Common value types for the switchd control plane.
//!
//! This crate provides type-safe representations of the network primitives
//! shared by the reconciliation engine, the configuration store and the
//! forwarding-plane provider:
//!
//! - [`MacAddress`]: 48-bit Ethernet MAC addresses
//! - [`IpPrefix`]: IP network prefixes (CIDR notation)
//! - [`VlanId`]: IEEE 802.1Q VLAN identifiers
//! - [`DatapathId`]: 64-bit forwarding-plane datapath identifiers

mod dpid;
mod ip;
mod mac;
mod vlan;

pub use dpid::DatapathId;
pub use ip::IpPrefix;
pub use mac::MacAddress;
pub use vlan::VlanId;

/// Common error type for parsing failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("invalid MAC address format: {0}")]
    InvalidMacAddress(String),

    #[error("invalid IP address format: {0}")]
    InvalidIpAddress(String),

    #[error("invalid IP prefix format: {0}")]
    InvalidIpPrefix(String),

    #[error("invalid VLAN ID: {0} (must be 1-4094)")]
    InvalidVlanId(u16),

    #[error("invalid datapath ID: {0}")]
    InvalidDatapathId(String),
}
