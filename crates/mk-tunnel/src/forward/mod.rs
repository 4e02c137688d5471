//! Per-service port forwarders
//!
//! Each load-balancer service gets one child process forwarding its ports
//! from the host to the service's cluster IP inside the machine. The
//! manager keeps a single map from service key to forwarder and
//! converges it against the latest service list with a mark-and-sweep
//! pass.

mod ssh;

pub use ssh::SshSpawner;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Service;

use crate::cluster::SshEndpoint;
use crate::loadbalancer::service;

/// What to forward for one service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardSpec {
    /// Changes whenever the name, cluster IP or ports change
    pub key: String,
    pub service: String,
    pub cluster_ip: String,
    pub ports: Vec<u16>,
}

impl ForwardSpec {
    /// Spec for a service, `None` while it has no cluster IP
    pub fn from_service(svc: &Service) -> Option<Self> {
        let name = service::name(svc).to_string();
        let cluster_ip = service::cluster_ip(svc)?.to_string();
        let ports = service::ports(svc);

        let mut key = format!("{}{}", name, cluster_ip);
        for port in &ports {
            key.push_str(&port.to_string());
        }

        Some(Self {
            key,
            service: name,
            cluster_ip,
            ports,
        })
    }
}

/// A running forwarder. Dropping it kills the child.
#[async_trait]
pub trait ForwardProcess: Send {
    /// Describe the exit if the process has exited
    fn try_exited(&mut self) -> Option<String>;

    /// Kill the process and reap it
    async fn stop(self: Box<Self>);
}

/// Starts forwarder processes
pub trait ForwarderSpawner: Send + Sync {
    fn spawn(
        &self,
        endpoint: &SshEndpoint,
        spec: &ForwardSpec,
    ) -> std::io::Result<Box<dyn ForwardProcess>>;
}

struct Forwarder {
    spec: ForwardSpec,
    process: Box<dyn ForwardProcess>,
}

/// Owns the forwarders, keyed by [`ForwardSpec::key`]
pub struct ForwarderManager {
    spawner: Arc<dyn ForwarderSpawner>,
    forwarders: HashMap<String, Forwarder>,
}

impl ForwarderManager {
    pub fn new(spawner: Arc<dyn ForwarderSpawner>) -> Self {
        Self {
            spawner,
            forwarders: HashMap::new(),
        }
    }

    /// Names of services with a running forwarder, sorted
    pub fn services(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .forwarders
            .values()
            .map(|f| f.spec.service.clone())
            .collect();
        names.sort();
        names
    }

    /// Whether a forwarder for exactly this service is running
    pub fn is_forwarding(&self, svc: &Service) -> bool {
        ForwardSpec::from_service(svc).map_or(false, |spec| self.forwarders.contains_key(&spec.key))
    }

    pub fn len(&self) -> usize {
        self.forwarders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.forwarders.is_empty()
    }

    /// Converge the forwarders on the load-balancer services in
    /// `services`. Returns the services a forwarder was started for.
    pub async fn converge<'a>(
        &mut self,
        endpoint: &SshEndpoint,
        services: &'a [Service],
    ) -> Vec<&'a Service> {
        self.reap_exited();

        let mut to_stop: HashSet<String> = self.forwarders.keys().cloned().collect();
        let mut started = Vec::new();

        for svc in services.iter().filter(|svc| service::is_load_balancer(svc)) {
            let Some(spec) = ForwardSpec::from_service(svc) else {
                continue;
            };
            if to_stop.remove(&spec.key) {
                continue;
            }
            if self.forwarders.contains_key(&spec.key) {
                // duplicate key in the same list
                continue;
            }

            match self.spawner.spawn(endpoint, &spec) {
                Ok(process) => {
                    tracing::info!(
                        "Started forwarder for {} ({} ports {:?})",
                        spec.service,
                        spec.cluster_ip,
                        spec.ports
                    );
                    self.forwarders
                        .insert(spec.key.clone(), Forwarder { spec, process });
                    started.push(svc);
                }
                Err(e) => {
                    tracing::warn!("Failed to start forwarder for {}: {}", spec.service, e);
                }
            }
        }

        for key in to_stop {
            if let Some(forwarder) = self.forwarders.remove(&key) {
                tracing::info!("Stopping forwarder for {}", forwarder.spec.service);
                forwarder.process.stop().await;
            }
        }

        started
    }

    /// Stop every forwarder
    pub async fn stop_all(&mut self) {
        for (_, forwarder) in self.forwarders.drain() {
            tracing::info!("Stopping forwarder for {}", forwarder.spec.service);
            forwarder.process.stop().await;
        }
    }

    /// Drop forwarders whose process exited. Returns how many there were.
    pub fn reap_exited(&mut self) -> usize {
        let before = self.forwarders.len();
        self.forwarders.retain(|_, forwarder| {
            match forwarder.process.try_exited() {
                Some(exit) => {
                    tracing::warn!(
                        "Forwarder for {} exited: {}",
                        forwarder.spec.service,
                        exit
                    );
                    false
                }
                None => true,
            }
        });
        before - self.forwarders.len()
    }
}
