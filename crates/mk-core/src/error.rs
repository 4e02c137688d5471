//! Core error types for mkube

use std::path::PathBuf;
use thiserror::Error;

use crate::types::{Route, TunnelId};

/// Top-level error type for the mkube ecosystem
#[derive(Error, Debug)]
pub enum MkError {
    /// Route table error
    #[error("Route error: {0}")]
    Route(#[from] RouteError),

    /// Tunnel registry error
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Cluster inspection error
    #[error("Inspection error: {0}")]
    Inspect(#[from] InspectError),

    /// Load balancer patch error
    #[error("Patch error: {0}")]
    Patch(#[from] PatchError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from the host routing table
#[derive(Error, Debug)]
pub enum RouteError {
    /// The destination CIDR is already routed through another gateway
    #[error("conflicting route: {line}")]
    Conflict { line: String },

    /// The route command ran but its output did not look like success
    #[error("{command} failed: {output}")]
    CommandFailed { command: String, output: String },

    /// The route command could not be started
    #[error("failed to run {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

/// Tunnel registry errors
#[derive(Error, Debug)]
pub enum RegistryError {
    /// Tried to register an identity without a route
    #[error("tunnel route is empty")]
    EmptyRoute,

    /// No entry for the given route
    #[error("no tunnel registered for route {0}")]
    NotFound(Route),

    /// Another live process already owns the route
    #[error("tunnel already exists: {0}")]
    AlreadyExists(TunnelId),

    /// The registry lock could not be acquired in time
    #[error("registry is locked: {0}")]
    Locked(PathBuf),

    /// The registry file is not valid JSON
    #[error("malformed registry {path}: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// I/O error
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The background task touching the registry did not finish
    #[error("registry task failed: {0}")]
    Task(String),
}

/// Errors while resolving machine state and the service route
#[derive(Error, Debug)]
pub enum InspectError {
    /// The machine could not be loaded or queried
    #[error("error loading machine {name}: {message}")]
    Machine { name: String, message: String },

    /// The cluster profile could not be loaded
    #[error("error loading cluster profile {name}: {message}")]
    Profile { name: String, message: String },

    /// The service CIDR in the cluster profile is not a valid IPv4 CIDR
    #[error("error parsing service CIDR {value:?}: {message}")]
    ParseCidr { value: String, message: String },

    /// The driver reported an address that is not a valid IPv4 address
    #[error("error parsing driver IP {value:?}: {message}")]
    ParseIp { value: String, message: String },

    /// The machine is running but its driver did not report an IP
    #[error("machine {0} has no IP address")]
    NoIp(String),
}

/// Errors from the Kubernetes service API
#[derive(Error, Debug)]
pub enum PatchError {
    /// Listing services failed
    #[error("error listing services: {0}")]
    List(String),

    /// Patching a single service failed
    #[error("error patching service {service}: {message}")]
    Patch { service: String, message: String },

    /// The cluster API could not be reached
    #[error("error connecting to cluster: {0}")]
    Connect(String),
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Reading or writing a configuration file failed
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialize error
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// JSON profile parse error
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
}
