//! Host routing table management
//!
//! The tunnel makes the cluster service CIDR reachable by routing it
//! through the machine's IP. Each OS has its own tool and output format,
//! captured by a [`RouteDialect`]; [`OsRouter`] implements the shared
//! inspect / ensure / cleanup logic on top of any dialect.
//!
//! Only rows matching the tunnel's own route are ever touched.
//! Overlapping rows are logged and otherwise left alone.

mod darwin;
mod linux;
mod table;
mod windows;

pub use darwin::DarwinRoutes;
pub use linux::LinuxRoutes;
pub use table::{classify, RouteInspection, RouteTableLine};
pub use windows::WindowsRoutes;

use std::sync::Arc;

use async_trait::async_trait;
use mk_core::error::RouteError;
use mk_core::Route;
use tracing::instrument;

use crate::command::{display_command, CommandOutput, CommandRunner};

/// Add, remove and inspect a route in the host routing table
#[async_trait]
pub trait Router: Send + Sync {
    /// Compare the routing table against `route`
    async fn inspect(&self, route: &Route) -> Result<RouteInspection, RouteError>;

    /// Install `route` unless it is already present.
    ///
    /// Fails with [`RouteError::Conflict`] if the CIDR is routed elsewhere.
    async fn ensure_added(&self, route: &Route) -> Result<(), RouteError>;

    /// Remove `route` if it is present
    async fn cleanup(&self, route: &Route) -> Result<(), RouteError>;
}

/// A program invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteCommand {
    pub program: &'static str,
    pub args: Vec<String>,
}

impl RouteCommand {
    pub fn new(program: &'static str, args: &[&str]) -> Self {
        Self {
            program,
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }
}

impl std::fmt::Display for RouteCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&display_command(self.program, &self.args))
    }
}

/// The route tool and output format of one operating system
pub trait RouteDialect: Send + Sync {
    /// Read-only command printing the IPv4 routing table
    fn table_command(&self) -> RouteCommand;

    /// Parse the table command's output, skipping lines that are not routes
    fn parse_table(&self, output: &str) -> Vec<RouteTableLine>;

    fn add_command(&self, route: &Route) -> RouteCommand;

    /// Whether the add command's output reports success
    fn added(&self, route: &Route, output: &CommandOutput) -> bool;

    fn delete_command(&self, route: &Route) -> RouteCommand;

    /// Whether the delete command's output reports success
    fn deleted(&self, route: &Route, output: &CommandOutput) -> bool;
}

/// [`Router`] for one OS dialect
pub struct OsRouter<D> {
    dialect: D,
    runner: Arc<dyn CommandRunner>,
}

impl<D: RouteDialect> OsRouter<D> {
    pub fn new(dialect: D, runner: Arc<dyn CommandRunner>) -> Self {
        Self { dialect, runner }
    }

    async fn run(&self, command: &RouteCommand) -> Result<CommandOutput, RouteError> {
        self.runner
            .run(command.program, &command.args)
            .await
            .map_err(|source| RouteError::Spawn {
                command: command.to_string(),
                source,
            })
    }
}

#[async_trait]
impl<D: RouteDialect> Router for OsRouter<D> {
    #[instrument(skip_all, fields(route = %route))]
    async fn inspect(&self, route: &Route) -> Result<RouteInspection, RouteError> {
        let command = self.dialect.table_command();
        let output = self.run(&command).await?;
        if !output.success() {
            return Err(RouteError::CommandFailed {
                command: command.to_string(),
                output: output.combined(),
            });
        }

        let table = self.dialect.parse_table(&output.stdout);
        Ok(classify(&table, route))
    }

    #[instrument(skip_all, fields(route = %route))]
    async fn ensure_added(&self, route: &Route) -> Result<(), RouteError> {
        let inspection = self.inspect(route).await?;
        for line in &inspection.overlaps {
            tracing::warn!("Route {} overlaps with existing route: {}", route, line.trim());
        }

        if inspection.exists {
            tracing::debug!("Route {} already present", route);
            return Ok(());
        }
        if let Some(line) = inspection.conflict {
            return Err(RouteError::Conflict {
                line: line.trim().to_string(),
            });
        }

        let command = self.dialect.add_command(route);
        let output = self.run(&command).await?;
        if !self.dialect.added(route, &output) {
            return Err(RouteError::CommandFailed {
                command: command.to_string(),
                output: output.combined(),
            });
        }

        tracing::info!("Added route {}", route);
        Ok(())
    }

    #[instrument(skip_all, fields(route = %route))]
    async fn cleanup(&self, route: &Route) -> Result<(), RouteError> {
        let inspection = self.inspect(route).await?;

        if !inspection.exists {
            if let Some(line) = inspection.conflict {
                return Err(RouteError::Conflict {
                    line: line.trim().to_string(),
                });
            }
            tracing::debug!("Route {} already absent", route);
            return Ok(());
        }

        let command = self.dialect.delete_command(route);
        let output = self.run(&command).await?;
        if !self.dialect.deleted(route, &output) {
            return Err(RouteError::CommandFailed {
                command: command.to_string(),
                output: output.combined(),
            });
        }

        tracing::info!("Removed route {}", route);
        Ok(())
    }
}

/// Router for the OS this binary was built for
pub fn platform_router(runner: Arc<dyn CommandRunner>) -> Arc<dyn Router> {
    #[cfg(windows)]
    {
        Arc::new(OsRouter::new(WindowsRoutes::new(), runner))
    }

    #[cfg(any(
        target_os = "macos",
        target_os = "freebsd",
        target_os = "openbsd",
        target_os = "netbsd"
    ))]
    {
        Arc::new(OsRouter::new(DarwinRoutes::new(), runner))
    }

    #[cfg(not(any(
        windows,
        target_os = "macos",
        target_os = "freebsd",
        target_os = "openbsd",
        target_os = "netbsd"
    )))]
    {
        Arc::new(OsRouter::new(LinuxRoutes::new(), runner))
    }
}
