//! Windows `route` dialect

use std::net::Ipv4Addr;

use ipnet::Ipv4Net;
use mk_core::Route;
use regex::Regex;

use super::{RouteCommand, RouteDialect, RouteTableLine};
use crate::command::CommandOutput;

/// `route ADD` and `route delete` both answer ` OK!` on success
pub struct WindowsRoutes {
    ok: Regex,
}

impl WindowsRoutes {
    pub fn new() -> Self {
        Self {
            ok: Regex::new(r"(?m)^\s*OK!\s*$").expect("static pattern"),
        }
    }
}

impl Default for WindowsRoutes {
    fn default() -> Self {
        Self::new()
    }
}

impl RouteDialect for WindowsRoutes {
    fn table_command(&self) -> RouteCommand {
        RouteCommand::new("route", &["print", "-4"])
    }

    fn parse_table(&self, output: &str) -> Vec<RouteTableLine> {
        output.lines().filter_map(parse_line).collect()
    }

    fn add_command(&self, route: &Route) -> RouteCommand {
        RouteCommand::new(
            "route",
            &[
                "ADD",
                &route.dest_cidr.network().to_string(),
                "MASK",
                &route.dest_cidr.netmask().to_string(),
                &route.gateway.to_string(),
            ],
        )
    }

    fn added(&self, _route: &Route, output: &CommandOutput) -> bool {
        self.ok.is_match(&output.combined())
    }

    fn delete_command(&self, route: &Route) -> RouteCommand {
        RouteCommand::new("route", &["delete", &route.dest_cidr.network().to_string()])
    }

    fn deleted(&self, _route: &Route, output: &CommandOutput) -> bool {
        self.ok.is_match(&output.combined())
    }
}

/// Parse one active-route row: destination, netmask, gateway, interface, metric.
///
/// On-link routes and everything outside the active routes table are
/// skipped.
fn parse_line(line: &str) -> Option<RouteTableLine> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() != 5 {
        return None;
    }

    let (dest, mask, gateway) = match (
        fields[0].parse::<Ipv4Addr>(),
        fields[1].parse::<Ipv4Addr>(),
        fields[2].parse::<Ipv4Addr>(),
    ) {
        (Ok(dest), Ok(mask), Ok(gateway)) => (dest, mask, gateway),
        _ => {
            tracing::debug!("Skipping unparseable route line: {}", line);
            return None;
        }
    };
    if dest.is_unspecified() {
        return None;
    }

    let prefix = match ipnet::ipv4_mask_to_prefix(mask) {
        Ok(prefix) => prefix,
        Err(_) => {
            tracing::debug!("Skipping route line with invalid netmask: {}", line);
            return None;
        }
    };
    let dest_cidr = Ipv4Net::new(dest, prefix).ok()?;

    Some(RouteTableLine::new(Route::new(dest_cidr, gateway), line))
}
