//! Firelet - distributed firewall management
//!
//! Compiles a central description of hosts, networks, host groups, services
//! and rules into per-host iptables rulesets, compares them with the live
//! firewalls and deploys them with an automatic rollback safety net.
//!
//! # Architecture
//!
//! - [`core`] - Configuration model, rule compiler, differ and deployment
//! - [`audit`] - Audit logging for configuration and deployment operations
//! - [`edit`] - Table editing commands of the command line
//! - [`validators`] - Input validation and sanitization
//! - [`config`] - Application settings persistence
//! - [`utils`] - Utility functions (XDG directories, etc.)
//!
//! # Safety Features
//!
//! - Configuration must be committed before check or deploy
//! - Interfaces are verified against the hosts table before deployment
//! - Remote auto-rollback armed before new rules are applied
//! - Optimistic row tokens against concurrent edits
//! - Atomic file operations with secure permissions

// Allow pedantic clippy warnings that are not worth fixing for this codebase
#![allow(clippy::must_use_candidate)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::needless_lifetimes)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::missing_errors_doc)]

pub mod audit;
pub mod config;
pub mod core;
pub mod edit;
pub mod utils;
pub mod validators;

// Re-export commonly used types
pub use core::compiler::{CompileOptions, CompiledRules, compile_rules};
pub use core::error::{Error, Result};
pub use core::fireset::{DeployReport, FireSet, StoreOptions, TableName};
pub use core::model::{Host, HostGroup, Network, Protocol, Rule, Service};
