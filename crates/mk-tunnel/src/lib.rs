//! mk-tunnel: Service tunnel for mkube clusters
//!
//! Keeps cluster services of type LoadBalancer reachable from the host
//! while the cluster machine runs. On every tick the reconciler inspects
//! the machine, installs a host route to the service CIDR, stamps an
//! ingress address on each load-balancer service, and runs one SSH port
//! forwarder per service. On shutdown it undoes all of it.

pub mod cleanup;
pub mod cluster;
pub mod command;
pub mod forward;
pub mod loadbalancer;
pub mod reconciler;
mod registry;
pub mod report;
pub mod route;

#[cfg(test)]
pub(crate) mod testing;

pub use cleanup::cleanup_stale_tunnels;
pub use cluster::{ClusterInspector, DockerDriver, FileProfileStore, Inspection};
pub use command::{CommandOutput, CommandRunner, SystemRunner};
pub use forward::{ForwarderManager, SshSpawner};
pub use loadbalancer::{KubeServiceClient, LoadBalancerPatcher};
pub use reconciler::{Reconciler, ReconcilerOptions, TunnelError, TunnelExit};
pub use report::{Reporter, WriterReporter};
pub use route::{platform_router, Router};
