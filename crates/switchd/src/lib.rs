//! Switch configuration reconciliation engine.
//!
//! The engine keeps the forwarding plane in sync with the configuration
//! store: bridges and VRFs map to provider switch instances, ports to
//! bundles, interfaces to attached network devices, and VRFs additionally
//! carry neighbors, routes and next-hops. All reconciliation runs on one
//! logical thread; operational state flows back into the store through
//! transactions, at most one outstanding per subsystem.

pub mod blocks;
pub mod bridge;
pub mod daemon;
pub mod ecmp;
pub mod iface;
pub mod neighbor;
pub mod port;
pub mod route;
pub mod schema;
pub mod state;
pub mod stats;
pub mod status;
pub mod vlan;
pub mod vrf;

pub use bridge::{reconfigure, Bridge, ReconcileCtx};
pub use daemon::{Daemon, DaemonConfig, DaemonError};
pub use state::State;
pub use vrf::Vrf;
