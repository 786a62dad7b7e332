//! Core firewall management functionality
//!
//! This module contains the configuration model and the logic that turns it
//! into per-host iptables rules. It provides:
//!
//! - [`model`]: Hosts, networks, host groups, services and rules
//! - [`flatten`]: Host group expansion and loop detection
//! - [`compiler`]: Rule compilation into per-host chains
//! - [`diff`]: Restore file rendering and compiled versus live comparison
//! - [`ifaces`]: Declared versus observed interface checks
//! - [`tables`]: CSV-backed configuration tables
//! - [`vcs`]: Version control of the configuration repository
//! - [`remote`]: Firewall connector traits and the simulated fleet
//! - [`fireset`]: The store and the check/deploy orchestration
//! - [`error`]: Error types for all of the above

pub mod compiler;
pub mod diff;
pub mod error;
pub mod fireset;
pub mod flatten;
pub mod ifaces;
pub mod model;
pub mod remote;
pub mod tables;
pub mod vcs;

#[cfg(test)]
pub mod test_helpers;
