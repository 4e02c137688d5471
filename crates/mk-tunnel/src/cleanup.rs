//! Startup cleanup of tunnels left behind by dead processes

use mk_core::error::{RegistryError, RouteError};
use mk_core::{ProcessProbe, TunnelId, TunnelRegistry};

use crate::registry::with_registry;
use crate::route::Router;

/// Remove every registry entry whose owner is dead, along with its route.
///
/// An entry stays when its route could not be removed, so a later pass
/// can retry. Returns the entries that were removed.
pub async fn cleanup_stale_tunnels(
    registry: &TunnelRegistry,
    router: &dyn Router,
    probe: &dyn ProcessProbe,
) -> Result<Vec<TunnelId>, RegistryError> {
    let mut removed = Vec::new();

    for id in with_registry(registry, |r| r.list()).await? {
        if probe.is_alive(id.pid) {
            continue;
        }

        tracing::info!("Cleaning up stale tunnel {}", id);
        match router.cleanup(&id.route).await {
            Ok(()) => {}
            Err(RouteError::Conflict { line }) => {
                tracing::warn!(
                    "Route of stale tunnel {} was replaced by another route: {}",
                    id,
                    line
                );
            }
            Err(e) => {
                tracing::warn!("Failed to remove route of stale tunnel {}: {}", id, e);
                continue;
            }
        }

        let route = id.route;
        match with_registry(registry, move |r| r.remove(&route)).await {
            Ok(_) | Err(RegistryError::NotFound(_)) => removed.push(id),
            Err(e) => return Err(e),
        }
    }

    Ok(removed)
}
