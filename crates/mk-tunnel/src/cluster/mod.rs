//! Cluster inspection
//!
//! Resolves the machine's state and the route that makes the cluster
//! service CIDR reachable. The machine driver and the cluster profile
//! store are collaborators behind traits; the inspector itself holds no
//! state between calls.

mod docker;
mod profile;

pub use docker::DockerDriver;
pub use profile::{FileProfileStore, ProfileStore};

use std::sync::Arc;

use async_trait::async_trait;
use mk_core::error::InspectError;
use mk_core::{HostState, Route};
use tracing::instrument;

/// Where the machine's SSH daemon is reachable from the host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshEndpoint {
    pub host: String,
    pub port: u16,
}

/// Starts, stops and describes the machine running the cluster node
#[async_trait]
pub trait MachineDriver: Send + Sync {
    /// Current state of the named machine
    async fn state(&self, name: &str) -> Result<HostState, InspectError>;

    /// IPv4 address of the machine, as text
    async fn ip(&self, name: &str) -> Result<String, InspectError>;

    /// Host side of the machine's SSH port
    async fn ssh_endpoint(&self, name: &str) -> Result<SshEndpoint, InspectError>;
}

/// A loaded machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Host {
    pub name: String,
    pub state: HostState,
}

/// Result of a successful inspection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inspection {
    pub state: HostState,
    /// Only resolved while the machine is running
    pub route: Option<Route>,
}

/// Combines the machine driver and the cluster profile into (state, route)
pub struct ClusterInspector {
    name: String,
    driver: Arc<dyn MachineDriver>,
    profiles: Arc<dyn ProfileStore>,
}

impl ClusterInspector {
    pub fn new(
        name: impl Into<String>,
        driver: Arc<dyn MachineDriver>,
        profiles: Arc<dyn ProfileStore>,
    ) -> Self {
        Self {
            name: name.into(),
            driver,
            profiles,
        }
    }

    /// Name of the machine being inspected
    pub fn machine_name(&self) -> &str {
        &self.name
    }

    /// Load the machine and its state. An error means the state is Unknown.
    #[instrument(skip(self), fields(machine = %self.name))]
    pub async fn state_and_host(&self) -> Result<Host, InspectError> {
        let state = self.driver.state(&self.name).await?;
        Ok(Host {
            name: self.name.clone(),
            state,
        })
    }

    /// Machine state and, when running, the route from the service CIDR
    /// to the machine's IP
    #[instrument(skip(self), fields(machine = %self.name))]
    pub async fn state_and_route(&self) -> Result<Inspection, InspectError> {
        let host = self.state_and_host().await?;
        if host.state != HostState::Running {
            return Ok(Inspection {
                state: host.state,
                route: None,
            });
        }

        let profile = self.profiles.load(&self.name)?;
        let ip = self.driver.ip(&self.name).await?;
        if ip.trim().is_empty() {
            return Err(InspectError::NoIp(self.name.clone()));
        }

        let route = Route::parse(&profile.kubernetes_config.service_cidr, &ip)?;
        tracing::trace!("Machine {} is running, route {}", self.name, route);

        Ok(Inspection {
            state: host.state,
            route: Some(route),
        })
    }

    pub async fn ssh_endpoint(&self) -> Result<SshEndpoint, InspectError> {
        self.driver.ssh_endpoint(&self.name).await
    }
}
