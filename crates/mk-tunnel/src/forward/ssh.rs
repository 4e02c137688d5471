//! SSH forwarders

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::{Child, Command};

use super::{ForwardProcess, ForwardSpec, ForwarderSpawner};
use crate::cluster::SshEndpoint;

/// Spawns `ssh -N` with one `-L` per service port
#[derive(Debug, Clone)]
pub struct SshSpawner {
    user: String,
    key_path: PathBuf,
    bind_address: String,
}

impl SshSpawner {
    pub fn new(
        user: impl Into<String>,
        key_path: impl Into<PathBuf>,
        bind_address: impl Into<String>,
    ) -> Self {
        Self {
            user: user.into(),
            key_path: key_path.into(),
            bind_address: bind_address.into(),
        }
    }

    /// Arguments passed to `ssh`
    pub fn args(&self, endpoint: &SshEndpoint, spec: &ForwardSpec) -> Vec<String> {
        let mut args = vec![
            "-o".to_string(),
            "StrictHostKeyChecking=no".to_string(),
            "-o".to_string(),
            "UserKnownHostsFile=/dev/null".to_string(),
            // a port that cannot be bound must end the process so it is respawned
            "-o".to_string(),
            "ExitOnForwardFailure=yes".to_string(),
            "-N".to_string(),
            format!("{}@{}", self.user, endpoint.host),
            "-p".to_string(),
            endpoint.port.to_string(),
            "-i".to_string(),
            self.key_path.display().to_string(),
        ];
        for port in &spec.ports {
            args.push("-L".to_string());
            args.push(format!(
                "{}:{}:{}:{}",
                self.bind_address, port, spec.cluster_ip, port
            ));
        }
        args
    }
}

impl ForwarderSpawner for SshSpawner {
    fn spawn(
        &self,
        endpoint: &SshEndpoint,
        spec: &ForwardSpec,
    ) -> std::io::Result<Box<dyn ForwardProcess>> {
        let args = self.args(endpoint, spec);
        tracing::debug!("Running ssh {}", args.join(" "));

        let child = Command::new("ssh")
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;

        Ok(Box::new(SshProcess { child }))
    }
}

struct SshProcess {
    child: Child,
}

#[async_trait]
impl ForwardProcess for SshProcess {
    fn try_exited(&mut self) -> Option<String> {
        match self.child.try_wait() {
            Ok(Some(status)) => Some(status.to_string()),
            Ok(None) => None,
            Err(e) => Some(e.to_string()),
        }
    }

    async fn stop(self: Box<Self>) {
        let mut this = self;
        if let Err(e) = this.child.kill().await {
            tracing::debug!("Failed to kill forwarder: {}", e);
        }
    }
}
