//! Stats module - Capability interfaces over the OS usage accounting
//!
//! Everything that touches platform counters or the package database lives
//! behind the traits in [`base`], so polling and aggregation can run against
//! in-memory fixtures.

mod base;
mod memory;
mod proc_net;

pub use base::*;
pub use memory::{MemoryStatsSource, StaticPackageResolver};
pub use proc_net::{
    classify_interface, parse_proc_net_dev, InterfaceCounters, ProcNetDevSource, DEVICE_UID,
    PROC_NET_DEV,
};
