//! On-disk registry of tunnels running on this host
//!
//! Every tunnel process records its identity in a single JSON file so
//! that concurrent tunnels can see who owns which route, and so that a
//! later invocation can clean up after one that was killed. Writers hold
//! a short-lived lock file and rewrite the whole array.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use crate::error::RegistryError;
use crate::process::ProcessProbe;
use crate::types::{Route, TunnelId};

/// How long a writer waits for the lock before giving up
const LOCK_TIMEOUT: Duration = Duration::from_secs(2);

/// Delay between lock attempts
const LOCK_RETRY: Duration = Duration::from_millis(20);

/// A lock file older than this is left over from a crashed writer
const STALE_LOCK_AGE: Duration = Duration::from_secs(10);

/// Persistent set of tunnel identities keyed by route
#[derive(Clone)]
pub struct TunnelRegistry {
    path: PathBuf,
    probe: Arc<dyn ProcessProbe>,
}

impl TunnelRegistry {
    /// Open the registry at `path`; the file is created on first write
    pub fn new(path: impl Into<PathBuf>, probe: Arc<dyn ProcessProbe>) -> Self {
        Self {
            path: path.into(),
            probe,
        }
    }

    /// Location of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record `id` as the owner of its route.
    ///
    /// Registering the same identity twice is a no-op. An entry for the same
    /// route whose owner is dead is replaced; one whose owner is alive makes
    /// this fail with `AlreadyExists`.
    pub fn register(&self, id: &TunnelId) -> Result<(), RegistryError> {
        if id.route.is_empty() {
            return Err(RegistryError::EmptyRoute);
        }

        let _lock = RegistryLock::acquire(&self.path)?;
        let mut tunnels = self.read()?;

        if let Some(pos) = tunnels.iter().position(|t| t.route == id.route) {
            let existing = &tunnels[pos];
            if existing == id {
                return Ok(());
            }
            if existing.pid != id.pid && self.probe.is_alive(existing.pid) {
                return Err(RegistryError::AlreadyExists(existing.clone()));
            }
            tracing::info!("Replacing stale registry entry {}", existing);
            tunnels.remove(pos);
        }

        tracing::debug!("Registering {}", id);
        tunnels.push(id.clone());
        self.write(&tunnels)
    }

    /// Remove the entry for `route`, returning it
    pub fn remove(&self, route: &Route) -> Result<TunnelId, RegistryError> {
        let _lock = RegistryLock::acquire(&self.path)?;
        let mut tunnels = self.read()?;

        let pos = tunnels
            .iter()
            .position(|t| &t.route == route)
            .ok_or(RegistryError::NotFound(*route))?;
        let removed = tunnels.remove(pos);

        tracing::debug!("Removing {}", removed);
        self.write(&tunnels)?;
        Ok(removed)
    }

    /// All registered tunnels. A missing file is an empty registry.
    pub fn list(&self) -> Result<Vec<TunnelId>, RegistryError> {
        self.read()
    }

    /// The identity currently registered for `route`, if any
    pub fn owner_of(&self, route: &Route) -> Result<Option<TunnelId>, RegistryError> {
        Ok(self.read()?.into_iter().find(|t| &t.route == route))
    }

    fn read(&self) -> Result<Vec<TunnelId>, RegistryError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(RegistryError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        if content.trim().is_empty() {
            return Ok(Vec::new());
        }

        serde_json::from_str(&content).map_err(|source| RegistryError::Malformed {
            path: self.path.clone(),
            source,
        })
    }

    fn write(&self, tunnels: &[TunnelId]) -> Result<(), RegistryError> {
        let io_err = |source| RegistryError::Io {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }

        let json = serde_json::to_vec(tunnels).map_err(|source| RegistryError::Malformed {
            path: self.path.clone(),
            source,
        })?;

        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.path)
            .map_err(io_err)?;
        file.write_all(&json).map_err(io_err)?;
        file.sync_all().map_err(io_err)
    }
}

/// Exclusive lock on the registry, held as a sibling `.lock` file.
///
/// Removed when dropped.
struct RegistryLock {
    path: PathBuf,
}

impl RegistryLock {
    fn acquire(registry: &Path) -> Result<Self, RegistryError> {
        let mut name = registry.as_os_str().to_owned();
        name.push(".lock");
        let path = PathBuf::from(name);

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| RegistryError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let deadline = SystemTime::now() + LOCK_TIMEOUT;
        loop {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    let _ = writeln!(file, "{}", std::process::id());
                    return Ok(Self { path });
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    if Self::is_stale(&path) {
                        tracing::warn!("Breaking stale registry lock {:?}", path);
                        let _ = fs::remove_file(&path);
                        continue;
                    }
                    if SystemTime::now() >= deadline {
                        return Err(RegistryError::Locked(path));
                    }
                    std::thread::sleep(LOCK_RETRY);
                }
                Err(source) => return Err(RegistryError::Io { path, source }),
            }
        }
    }

    fn is_stale(path: &Path) -> bool {
        fs::metadata(path)
            .and_then(|m| m.modified())
            .ok()
            .and_then(|modified| modified.elapsed().ok())
            .map(|age| age > STALE_LOCK_AGE)
            .unwrap_or(false)
    }
}

impl Drop for RegistryLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            tracing::warn!("Failed to remove registry lock {:?}: {}", self.path, e);
        }
    }
}
