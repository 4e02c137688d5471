//! Tunnel registry access from async code
//!
//! Registry writers wait for the lock file with blocking sleeps, so every
//! call made from the reconciler runs on the blocking thread pool.

use mk_core::error::RegistryError;
use mk_core::TunnelRegistry;

/// Run `f` against the registry on the blocking pool
pub(crate) async fn with_registry<T, F>(registry: &TunnelRegistry, f: F) -> Result<T, RegistryError>
where
    F: FnOnce(&TunnelRegistry) -> Result<T, RegistryError> + Send + 'static,
    T: Send + 'static,
{
    let registry = registry.clone();
    tokio::task::spawn_blocking(move || f(&registry))
        .await
        .map_err(|e| RegistryError::Task(e.to_string()))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::AliveSet;
    use mk_core::{Route, TunnelId};
    use std::sync::Arc;
    use std::time::{Duration, Instant};
    use tempfile::TempDir;

    fn registry(dir: &TempDir) -> TunnelRegistry {
        TunnelRegistry::new(
            dir.path().join("tunnels.json"),
            Arc::new(AliveSet::new(&[std::process::id()])),
        )
    }

    #[tokio::test]
    async fn test_runs_registry_calls() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir);
        let id = TunnelId::current(Route::parse("10.96.0.0/12", "192.168.1.25").unwrap(), "mkube");

        let registered = id.clone();
        with_registry(&registry, move |r| r.register(&registered))
            .await
            .unwrap();

        let listed = with_registry(&registry, |r| r.list()).await.unwrap();
        assert_eq!(listed, vec![id]);
    }

    #[tokio::test]
    async fn test_held_lock_does_not_stall_other_tasks() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir);
        std::fs::write(dir.path().join("tunnels.json.lock"), "1").unwrap();
        let id = TunnelId::current(Route::parse("10.96.0.0/12", "192.168.1.25").unwrap(), "mkube");

        let begin = Instant::now();
        let timer = tokio::spawn(async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Instant::now()
        });

        let result = with_registry(&registry, move |r| r.register(&id)).await;
        assert!(matches!(result, Err(RegistryError::Locked(_))));

        // the timer fired while the register call was still waiting
        let fired = timer.await.unwrap();
        assert!(fired.duration_since(begin) < Duration::from_secs(1));
    }
}
