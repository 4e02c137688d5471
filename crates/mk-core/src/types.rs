//! Core domain types

use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;

use crate::error::InspectError;

/// A destination CIDR routed through a gateway.
///
/// Two routes are equal when the network address, the prefix length and
/// the gateway all match. The destination is always stored truncated to
/// its network address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Route {
    #[serde(rename = "Gateway")]
    pub gateway: Ipv4Addr,
    #[serde(rename = "DestCIDR")]
    pub dest_cidr: Ipv4Net,
}

impl Route {
    /// Create a route, truncating the destination to its network address
    pub fn new(dest_cidr: Ipv4Net, gateway: Ipv4Addr) -> Self {
        Self {
            gateway,
            dest_cidr: dest_cidr.trunc(),
        }
    }

    /// Parse a route from its textual CIDR and gateway
    pub fn parse(cidr: &str, gateway: &str) -> Result<Self, InspectError> {
        let dest_cidr: Ipv4Net = cidr.trim().parse().map_err(|e: ipnet::AddrParseError| {
            InspectError::ParseCidr {
                value: cidr.to_string(),
                message: e.to_string(),
            }
        })?;
        let gateway: Ipv4Addr =
            gateway
                .trim()
                .parse()
                .map_err(|e: std::net::AddrParseError| InspectError::ParseIp {
                    value: gateway.to_string(),
                    message: e.to_string(),
                })?;
        Ok(Self::new(dest_cidr, gateway))
    }

    /// A route with an unspecified gateway and a zero-length prefix
    pub fn empty() -> Self {
        Self {
            gateway: Ipv4Addr::UNSPECIFIED,
            dest_cidr: Ipv4Net::default(),
        }
    }

    /// Whether this route carries no destination at all
    pub fn is_empty(&self) -> bool {
        self.gateway.is_unspecified() && self.dest_cidr.prefix_len() == 0
    }

    /// Whether the two destinations overlap without being identical
    pub fn overlaps(&self, other: &Route) -> bool {
        if self.dest_cidr == other.dest_cidr {
            return false;
        }
        self.dest_cidr.contains(&other.dest_cidr.network())
            || other.dest_cidr.contains(&self.dest_cidr.network())
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.dest_cidr, self.gateway)
    }
}

/// State of the machine hosting the cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum HostState {
    /// Not yet determined, or the driver could not tell
    #[default]
    Unknown,
    /// Machine is running
    Running,
    /// Machine is stopped
    Stopped,
}

impl fmt::Display for HostState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostState::Unknown => write!(f, "Unknown"),
            HostState::Running => write!(f, "Running"),
            HostState::Stopped => write!(f, "Stopped"),
        }
    }
}

/// Identity of a tunnel: which process owns which route for which machine
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TunnelId {
    #[serde(rename = "Route")]
    pub route: Route,
    #[serde(rename = "MachineName")]
    pub machine_name: String,
    #[serde(rename = "Pid")]
    pub pid: u32,
}

impl TunnelId {
    /// Create a tunnel identity owned by the current process
    pub fn current(route: Route, machine_name: impl Into<String>) -> Self {
        Self {
            route,
            machine_name: machine_name.into(),
            pid: std::process::id(),
        }
    }
}

impl fmt::Display for TunnelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Tunnel{{ Route: {}, machine: {}, pid: {} }}",
            self.route, self.machine_name, self.pid
        )
    }
}

/// Snapshot of the tunnel emitted on every reconciliation tick.
///
/// Errors are kept as strings so that snapshots compare by value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelStatus {
    pub tunnel_id: TunnelId,
    pub host_state: HostState,
    pub inspect_error: Option<String>,
    pub route_error: Option<String>,
    pub load_balancer_error: Option<String>,
    pub patched_services: Vec<String>,
}

impl TunnelStatus {
    /// Fresh snapshot for the given identity with no errors recorded
    pub fn new(tunnel_id: TunnelId, host_state: HostState) -> Self {
        Self {
            tunnel_id,
            host_state,
            inspect_error: None,
            route_error: None,
            load_balancer_error: None,
            patched_services: Vec::new(),
        }
    }

    /// Whether any subsystem reported an error
    pub fn has_errors(&self) -> bool {
        self.inspect_error.is_some()
            || self.route_error.is_some()
            || self.load_balancer_error.is_some()
    }
}

fn or_no_errors(err: &Option<String>) -> &str {
    err.as_deref().unwrap_or("no errors")
}

impl fmt::Display for TunnelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Status:")?;
        writeln!(f, "\tmachine: {}", self.tunnel_id.machine_name)?;
        writeln!(f, "\tpid: {}", self.tunnel_id.pid)?;
        writeln!(f, "\troute: {}", self.tunnel_id.route)?;
        writeln!(f, "\tstate: {}", self.host_state)?;
        writeln!(f, "\tservices: [{}]", self.patched_services.join(", "))?;
        writeln!(f, "\terrors:")?;
        writeln!(f, "\t\tmachine: {}", or_no_errors(&self.inspect_error))?;
        writeln!(f, "\t\trouter: {}", or_no_errors(&self.route_error))?;
        writeln!(
            f,
            "\t\tloadbalancer emulator: {}",
            or_no_errors(&self.load_balancer_error)
        )
    }
}
