//! Tunnel command implementation

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

use mk_core::config::TunnelConfig;
use mk_core::{ProcessProbe, SystemProbe, TunnelRegistry};
use mk_tunnel::forward::ForwarderSpawner;
use mk_tunnel::loadbalancer::ServiceClient;
use mk_tunnel::{
    cleanup_stale_tunnels, platform_router, ClusterInspector, CommandRunner, DockerDriver,
    FileProfileStore, ForwarderManager, KubeServiceClient, LoadBalancerPatcher, Reconciler,
    ReconcilerOptions, Router, SshSpawner, SystemRunner, TunnelExit, WriterReporter,
};

use crate::output::{print_info, print_success, print_warning};

/// Remove tunnels left behind by processes that are gone
async fn remove_stale(
    registry: &TunnelRegistry,
    router: &dyn Router,
    probe: &dyn ProcessProbe,
) -> Result<usize> {
    let removed = cleanup_stale_tunnels(registry, router, probe)
        .await
        .with_context(|| format!("Failed to clean up stale tunnels in {:?}", registry.path()))?;
    for id in &removed {
        print_info(&format!("Removed stale tunnel {}", id));
    }
    Ok(removed.len())
}

/// Execute `tunnel --cleanup`
pub async fn cleanup_command(config: &TunnelConfig) -> Result<()> {
    let runner: Arc<dyn CommandRunner> = Arc::new(SystemRunner);
    let router = platform_router(runner);
    let probe: Arc<dyn ProcessProbe> = Arc::new(SystemProbe);
    let registry = TunnelRegistry::new(&config.registry_path, Arc::clone(&probe));

    let removed = remove_stale(&registry, router.as_ref(), probe.as_ref()).await?;
    if removed == 0 {
        print_success("No stale tunnels");
    }
    Ok(())
}

/// Execute `tunnel`: run the reconciler until cancelled or the machine stops
pub async fn tunnel_command(
    config: &TunnelConfig,
    cancel: CancellationToken,
) -> Result<TunnelExit> {
    let runner: Arc<dyn CommandRunner> = Arc::new(SystemRunner);
    let router = platform_router(Arc::clone(&runner));
    let probe: Arc<dyn ProcessProbe> = Arc::new(SystemProbe);
    let registry = TunnelRegistry::new(&config.registry_path, Arc::clone(&probe));

    remove_stale(&registry, router.as_ref(), probe.as_ref()).await?;

    let client: Arc<dyn ServiceClient> = Arc::new(
        KubeServiceClient::new()
            .await
            .context("Failed to connect to the cluster")?,
    );
    let inspector = ClusterInspector::new(
        config.profile.clone(),
        Arc::new(DockerDriver::new(runner)),
        Arc::new(FileProfileStore::new(&config.profiles_dir)),
    );
    let spawner: Arc<dyn ForwarderSpawner> = Arc::new(SshSpawner::new(
        config.ssh_user.clone(),
        config.ssh_key_path(),
        config.bind_address.clone(),
    ));

    let reconciler = Reconciler::new(
        inspector,
        router,
        registry,
        LoadBalancerPatcher::new(client),
        ForwarderManager::new(spawner),
        Box::new(WriterReporter::stdout()),
        ReconcilerOptions::from(config),
    );

    let exit = reconciler
        .run(cancel)
        .await
        .with_context(|| format!("Tunnel for {} failed", config.profile))?;

    match exit {
        TunnelExit::Cancelled => print_success("Tunnel stopped"),
        TunnelExit::MachineStopped => {
            print_success(&format!("Machine {} stopped, tunnel closed", config.profile))
        }
        TunnelExit::AlreadyExists => print_warning("Another tunnel already serves this cluster"),
    }
    Ok(exit)
}
