//! Docker machine driver
//!
//! The node is a privileged container named after the profile. Its SSH
//! port 22 is published on the host loopback.

use std::sync::Arc;

use async_trait::async_trait;
use mk_core::error::InspectError;
use mk_core::HostState;

use super::{MachineDriver, SshEndpoint};
use crate::command::{CommandOutput, CommandRunner};

pub struct DockerDriver {
    runner: Arc<dyn CommandRunner>,
}

impl DockerDriver {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    async fn docker(&self, name: &str, args: &[&str]) -> Result<String, InspectError> {
        let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
        let output = self
            .runner
            .run("docker", &args)
            .await
            .map_err(|e| InspectError::Machine {
                name: name.to_string(),
                message: format!("failed to run docker: {}", e),
            })?;

        if !output.success() {
            return Err(machine_error(name, &output));
        }
        Ok(output.stdout)
    }
}

fn machine_error(name: &str, output: &CommandOutput) -> InspectError {
    InspectError::Machine {
        name: name.to_string(),
        message: output.combined().trim().to_string(),
    }
}

/// Map `.State.Status` of a container to a host state
pub(crate) fn parse_state(status: &str) -> HostState {
    match status.trim() {
        "running" => HostState::Running,
        "exited" | "dead" | "paused" | "created" => HostState::Stopped,
        _ => HostState::Unknown,
    }
}

/// First published address in `docker port` output, e.g. `0.0.0.0:32772`
pub(crate) fn parse_port(output: &str) -> Option<u16> {
    output
        .lines()
        .filter_map(|line| line.trim().rsplit_once(':'))
        .find_map(|(_, port)| port.parse().ok())
}

#[async_trait]
impl MachineDriver for DockerDriver {
    async fn state(&self, name: &str) -> Result<HostState, InspectError> {
        let out = self
            .docker(name, &["container", "inspect", "-f", "{{.State.Status}}", name])
            .await?;
        Ok(parse_state(&out))
    }

    async fn ip(&self, name: &str) -> Result<String, InspectError> {
        let out = self
            .docker(
                name,
                &[
                    "container",
                    "inspect",
                    "-f",
                    "{{range .NetworkSettings.Networks}}{{.IPAddress}},{{end}}",
                    name,
                ],
            )
            .await?;

        Ok(out
            .trim()
            .split(',')
            .find(|ip| !ip.is_empty())
            .unwrap_or_default()
            .to_string())
    }

    async fn ssh_endpoint(&self, name: &str) -> Result<SshEndpoint, InspectError> {
        let out = self.docker(name, &["port", name, "22"]).await?;
        let port = parse_port(&out).ok_or_else(|| InspectError::Machine {
            name: name.to_string(),
            message: format!("no published SSH port in {:?}", out.trim()),
        })?;

        Ok(SshEndpoint {
            host: "127.0.0.1".to_string(),
            port,
        })
    }
}
