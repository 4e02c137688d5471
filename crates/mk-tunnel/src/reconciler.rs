//! Tunnel reconciler
//!
//! Drives the inspector, the route adapter, the load-balancer patcher and
//! the forwarder manager on a fixed cadence.
//!
//! # Tick
//!
//! Each tick runs inspect, ensure-route, patch-services,
//! converge-forwarders and report, in that order. Errors from any step end
//! up in the tick's [`TunnelStatus`] and never stop the loop. The loop ends
//! on cancellation, when the machine stops, when another live process
//! already owns the route, or after too many failed inspections in a row.
//!
//! # Shutdown
//!
//! Forwarders are stopped, ingress addresses are cleared, and the route is
//! removed and deregistered if this process is still its registered owner.

use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::core::v1::Service;
use mk_core::config::TunnelConfig;
use mk_core::error::{InspectError, RegistryError, RouteError};
use mk_core::{HostState, Route, TunnelId, TunnelRegistry, TunnelStatus};
use thiserror::Error;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::cluster::{ClusterInspector, SshEndpoint};
use crate::forward::ForwarderManager;
use crate::loadbalancer::LoadBalancerPatcher;
use crate::registry::with_registry;
use crate::report::Reporter;
use crate::route::Router;

/// Ingress stamped on forwarded services when no route is installed
pub const LOOPBACK_INGRESS: &str = "127.0.0.1";

/// Behaviour switches of a [`Reconciler`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcilerOptions {
    pub tick_interval: Duration,
    /// Consecutive failed or Unknown inspections before giving up
    pub max_inspect_failures: u32,
    /// Install the service CIDR route and stamp cluster IPs
    pub route: bool,
    /// Run SSH forwarders for load-balancer services
    pub forward: bool,
}

impl Default for ReconcilerOptions {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(1),
            max_inspect_failures: 60,
            route: true,
            forward: true,
        }
    }
}

/// Shortest accepted tick; a zero period would spin
const MIN_TICK_INTERVAL: Duration = Duration::from_secs(1);

impl From<&TunnelConfig> for ReconcilerOptions {
    fn from(config: &TunnelConfig) -> Self {
        Self {
            tick_interval: config.tick_interval.max(MIN_TICK_INTERVAL),
            max_inspect_failures: config.max_inspect_failures.max(1),
            route: config.route,
            forward: config.forward,
        }
    }
}

/// Why a reconciler stopped without error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelExit {
    /// Cancelled by the caller
    Cancelled,
    /// The machine stopped
    MachineStopped,
    /// Another live process owns the route
    AlreadyExists,
}

/// Fatal reconciler errors
#[derive(Error, Debug)]
pub enum TunnelError {
    /// The machine could not be inspected at startup
    #[error("error inspecting machine: {0}")]
    Init(#[source] InspectError),

    /// The machine was not running at startup
    #[error("machine {name} is not running (state: {state})")]
    NotRunning { name: String, state: HostState },

    /// The tunnel registry is unusable
    #[error("tunnel registry: {0}")]
    Registry(#[from] RegistryError),

    /// Inspection kept failing
    #[error("giving up after {0} consecutive failed inspections")]
    InspectFailures(u32),
}

enum Step {
    Continue,
    Done(Result<TunnelExit, TunnelError>),
}

/// Keeps one machine's services reachable until stopped
pub struct Reconciler {
    inspector: ClusterInspector,
    router: Arc<dyn Router>,
    registry: TunnelRegistry,
    patcher: LoadBalancerPatcher,
    forwarders: ForwarderManager,
    reporter: Box<dyn Reporter>,
    options: ReconcilerOptions,

    tunnel_id: TunnelId,
    host_state: HostState,
    registered: bool,
    endpoint: Option<SshEndpoint>,
    inspect_failures: u32,
}

impl Reconciler {
    pub fn new(
        inspector: ClusterInspector,
        router: Arc<dyn Router>,
        registry: TunnelRegistry,
        patcher: LoadBalancerPatcher,
        forwarders: ForwarderManager,
        reporter: Box<dyn Reporter>,
        options: ReconcilerOptions,
    ) -> Self {
        let tunnel_id = TunnelId::current(Route::empty(), inspector.machine_name());
        Self {
            inspector,
            router,
            registry,
            patcher,
            forwarders,
            reporter,
            options,
            tunnel_id,
            host_state: HostState::Unknown,
            registered: false,
            endpoint: None,
            inspect_failures: 0,
        }
    }

    /// Identity this reconciler registers under
    pub fn tunnel_id(&self) -> &TunnelId {
        &self.tunnel_id
    }

    #[cfg(test)]
    fn with_pid(mut self, pid: u32) -> Self {
        self.tunnel_id.pid = pid;
        self
    }

    /// Inspect the machine once and fix the tunnel's route.
    ///
    /// Fails if the machine cannot be inspected, is not running, or the
    /// registry cannot be read.
    pub async fn start(&mut self) -> Result<(), TunnelError> {
        let inspection = self
            .inspector
            .state_and_route()
            .await
            .map_err(TunnelError::Init)?;

        let route = match (inspection.state, inspection.route) {
            (HostState::Running, Some(route)) => route,
            (state, _) => {
                return Err(TunnelError::NotRunning {
                    name: self.tunnel_id.machine_name.clone(),
                    state,
                })
            }
        };

        with_registry(&self.registry, |r| r.list()).await?;
        self.tunnel_id.route = route;
        self.host_state = HostState::Running;
        tracing::info!("Starting tunnel {}", self.tunnel_id);
        Ok(())
    }

    /// Start, then tick until the tunnel ends.
    ///
    /// Shutdown runs once when cancelled, when the machine stops and when
    /// inspection gives up. Losing the route to another live tunnel exits
    /// without touching anything.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<TunnelExit, TunnelError> {
        self.start().await?;

        let mut interval = tokio::time::interval(self.options.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::info!("Tunnel cancelled, shutting down");
                    let mut status = self.status(self.host_state);
                    self.shutdown(&mut status).await;
                    self.reporter.report(&status);
                    return Ok(TunnelExit::Cancelled);
                }
                _ = interval.tick() => {
                    if let Step::Done(result) = self.tick().await {
                        return result;
                    }
                }
            }
        }
    }

    fn status(&self, state: HostState) -> TunnelStatus {
        TunnelStatus::new(self.tunnel_id.clone(), state)
    }

    async fn tick(&mut self) -> Step {
        let inspection = self.inspector.state_and_route().await;

        let (state, route) = match inspection {
            Ok(inspection) => (inspection.state, inspection.route),
            Err(e) => {
                self.host_state = HostState::Unknown;
                let mut status = self.status(HostState::Unknown);
                status.inspect_error = Some(e.to_string());
                return self.inspect_failed(status).await;
            }
        };

        self.host_state = state;
        match (state, route) {
            (HostState::Running, Some(route)) => {
                self.inspect_failures = 0;
                if route != self.tunnel_id.route {
                    self.retarget(route).await;
                }
                let mut status = self.status(HostState::Running);
                let step = self.running_tick(&mut status).await;
                self.reporter.report(&status);
                step
            }
            (HostState::Stopped, _) => {
                tracing::info!("Machine {} stopped, shutting down", self.tunnel_id.machine_name);
                let mut status = self.status(HostState::Stopped);
                self.shutdown(&mut status).await;
                self.reporter.report(&status);
                Step::Done(Ok(TunnelExit::MachineStopped))
            }
            (state, _) => {
                let status = self.status(state);
                self.inspect_failed(status).await
            }
        }
    }

    async fn inspect_failed(&mut self, mut status: TunnelStatus) -> Step {
        self.inspect_failures += 1;
        tracing::debug!(
            "Inspection failed ({}/{})",
            self.inspect_failures,
            self.options.max_inspect_failures
        );

        if self.inspect_failures < self.options.max_inspect_failures {
            self.reporter.report(&status);
            return Step::Continue;
        }

        tracing::error!(
            "Machine {} could not be inspected {} times in a row",
            self.tunnel_id.machine_name,
            self.inspect_failures
        );
        self.shutdown(&mut status).await;
        self.reporter.report(&status);
        Step::Done(Err(TunnelError::InspectFailures(self.inspect_failures)))
    }

    async fn running_tick(&mut self, status: &mut TunnelStatus) -> Step {
        let route = self.tunnel_id.route;

        let services = if self.options.route {
            if !self.registered {
                if let Some(step) = self.claim(route, status).await {
                    return step;
                }
                if !self.registered {
                    return Step::Continue;
                }
            }

            if let Err(e) = self.router.ensure_added(&route).await {
                tracing::warn!("{}", e);
                status.route_error = Some(e.to_string());
            }

            let report = self.patcher.patch_services().await;
            status.patched_services = report.services;
            status.load_balancer_error = report.error.map(|e| e.to_string());
            report.load_balancers
        } else {
            match self.patcher.load_balancers().await {
                Ok(services) => services,
                Err(e) => {
                    tracing::warn!("{}", e);
                    status.load_balancer_error = Some(e.to_string());
                    Vec::new()
                }
            }
        };

        if self.options.forward {
            self.forward(&services, status).await;
        }

        Step::Continue
    }

    /// Register the route unless another route already holds its CIDR.
    ///
    /// Returns a step only when the tunnel has to end.
    async fn claim(&mut self, route: Route, status: &mut TunnelStatus) -> Option<Step> {
        match self.router.inspect(&route).await {
            Ok(inspection) => {
                if let Some(line) = inspection.conflict {
                    let e = RouteError::Conflict {
                        line: line.trim().to_string(),
                    };
                    tracing::warn!("{}", e);
                    status.route_error = Some(e.to_string());
                    return None;
                }
            }
            Err(e) => {
                tracing::warn!("{}", e);
                status.route_error = Some(e.to_string());
                return None;
            }
        }

        let id = self.tunnel_id.clone();
        match with_registry(&self.registry, move |r| r.register(&id)).await {
            Ok(()) => {
                tracing::info!("Registered tunnel {}", self.tunnel_id);
                self.registered = true;
                None
            }
            Err(e @ RegistryError::AlreadyExists(_)) => {
                tracing::error!("{}", e);
                status.route_error = Some(e.to_string());
                Some(Step::Done(Ok(TunnelExit::AlreadyExists)))
            }
            Err(e) => {
                tracing::warn!("{}", e);
                status.route_error = Some(e.to_string());
                None
            }
        }
    }

    async fn forward(&mut self, services: &[Service], status: &mut TunnelStatus) {
        // a dead forwarder may mean the machine's SSH port moved
        if self.forwarders.reap_exited() > 0 {
            self.endpoint = None;
        }
        if self.endpoint.is_none() {
            match self.inspector.ssh_endpoint().await {
                Ok(endpoint) => self.endpoint = Some(endpoint),
                Err(e) => {
                    tracing::warn!("{}", e);
                    status.inspect_error = Some(e.to_string());
                    return;
                }
            }
        }
        let Some(endpoint) = self.endpoint.clone() else {
            return;
        };

        let started = self.forwarders.converge(&endpoint, services).await;
        if !started.is_empty() {
            tracing::debug!("Started {} forwarders", started.len());
        }

        if self.options.route {
            return;
        }

        let mut patched = Vec::new();
        for svc in services.iter().filter(|svc| self.forwarders.is_forwarding(svc)) {
            let name = crate::loadbalancer::service::name(svc).to_string();
            match self.patcher.set_ingress_ip(svc, LOOPBACK_INGRESS).await {
                Ok(()) => patched.push(name),
                Err(e) => {
                    tracing::warn!("{}", e);
                    if status.load_balancer_error.is_none() {
                        status.load_balancer_error = Some(e.to_string());
                    }
                }
            }
        }
        status.patched_services = patched;
    }

    /// Move the tunnel to a recomputed route, releasing the old one
    async fn retarget(&mut self, route: Route) {
        tracing::info!("Route changed from {} to {}", self.tunnel_id.route, route);
        // the machine restarted, so its SSH endpoint is stale too
        self.forwarders.stop_all().await;
        self.endpoint = None;
        if self.registered {
            if let Err(e) = self.release_route().await {
                tracing::warn!("Old route {} left in place: {}", self.tunnel_id.route, e);
            }
        }
        self.tunnel_id.route = route;
    }

    async fn shutdown(&mut self, status: &mut TunnelStatus) {
        self.forwarders.stop_all().await;

        if self.registered || !self.options.route {
            let report = self.patcher.cleanup().await;
            if let Some(e) = report.error {
                tracing::warn!("Failed to clear load balancer ingress: {}", e);
                status.load_balancer_error = Some(e.to_string());
            }
        }

        if self.registered {
            if let Err(e) = self.release_route().await {
                status.route_error = Some(e);
            }
        }
        status.patched_services.clear();
    }

    /// Remove the route and its registry entry if this process still owns it
    async fn release_route(&mut self) -> Result<(), String> {
        self.registered = false;
        let route = self.tunnel_id.route;

        match with_registry(&self.registry, move |r| r.owner_of(&route)).await {
            Ok(Some(owner)) if owner == self.tunnel_id => {}
            Ok(owner) => {
                tracing::warn!(
                    "Not removing route {}: registered owner is {:?}",
                    route,
                    owner.map(|o| o.pid)
                );
                return Ok(());
            }
            Err(e) => {
                tracing::warn!("{}", e);
                return Err(e.to_string());
            }
        }

        if let Err(e) = self.router.cleanup(&route).await {
            tracing::warn!("Failed to remove route {}: {}", route, e);
            if !matches!(e, RouteError::Conflict { .. }) {
                return Err(e.to_string());
            }
        }

        match with_registry(&self.registry, move |r| r.remove(&route)).await {
            Ok(_) | Err(RegistryError::NotFound(_)) => {
                tracing::info!("Removed tunnel {}", self.tunnel_id);
                Ok(())
            }
            Err(e) => {
                tracing::warn!("{}", e);
                Err(e.to_string())
            }
        }
    }
}
