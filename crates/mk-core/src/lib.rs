//! mk-core: Core types and persistent state for mkube
//!
//! This crate provides the domain types shared by the tunnel reconciler
//! and the CLI, the configuration files, the process-liveness probe and
//! the on-disk tunnel registry.

pub mod config;
pub mod error;
pub mod process;
pub mod registry;
pub mod types;

pub use error::MkError;
pub use process::{ProcessProbe, SystemProbe};
pub use registry::TunnelRegistry;
pub use types::{HostState, Route, TunnelId, TunnelStatus};
