//! `ip route` dialect

use std::net::Ipv4Addr;

use ipnet::Ipv4Net;
use mk_core::Route;
use regex::Regex;

use super::{RouteCommand, RouteDialect, RouteTableLine};
use crate::command::CommandOutput;

/// Linux iproute2. `ip route add` and `ip route delete` print nothing on success.
pub struct LinuxRoutes {
    success: Regex,
}

impl LinuxRoutes {
    pub fn new() -> Self {
        Self {
            success: Regex::new(r"^\s*$").expect("static pattern"),
        }
    }

    fn quiet_success(&self, output: &CommandOutput) -> bool {
        output.success() && self.success.is_match(&output.combined())
    }
}

impl Default for LinuxRoutes {
    fn default() -> Self {
        Self::new()
    }
}

impl RouteDialect for LinuxRoutes {
    fn table_command(&self) -> RouteCommand {
        RouteCommand::new("ip", &["r"])
    }

    fn parse_table(&self, output: &str) -> Vec<RouteTableLine> {
        output.lines().filter_map(parse_line).collect()
    }

    fn add_command(&self, route: &Route) -> RouteCommand {
        RouteCommand::new(
            "sudo",
            &[
                "ip",
                "route",
                "add",
                &route.dest_cidr.to_string(),
                "via",
                &route.gateway.to_string(),
            ],
        )
    }

    fn added(&self, _route: &Route, output: &CommandOutput) -> bool {
        self.quiet_success(output)
    }

    fn delete_command(&self, route: &Route) -> RouteCommand {
        RouteCommand::new(
            "sudo",
            &["ip", "route", "delete", &route.dest_cidr.to_string()],
        )
    }

    fn deleted(&self, _route: &Route, output: &CommandOutput) -> bool {
        self.quiet_success(output)
    }
}

/// Parse one `ip r` line, e.g. `10.96.0.0/12 via 192.168.39.2 dev virbr1`.
///
/// Directly connected routes (`... dev docker0 scope link`) get an
/// unspecified gateway.
fn parse_line(line: &str) -> Option<RouteTableLine> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    let dest = *fields.first()?;
    if dest == "default" {
        return None;
    }

    let dest_cidr = match parse_dest(dest) {
        Some(cidr) => cidr,
        None => {
            tracing::debug!("Skipping unparseable route line: {}", line);
            return None;
        }
    };
    if dest_cidr.network().is_unspecified() && dest_cidr.prefix_len() == 0 {
        return None;
    }

    let gateway = match fields.iter().position(|f| *f == "via") {
        Some(i) => match fields.get(i + 1).and_then(|gw| gw.parse::<Ipv4Addr>().ok()) {
            Some(gw) => gw,
            None => {
                tracing::debug!("Skipping route line with unparseable gateway: {}", line);
                return None;
            }
        },
        None => Ipv4Addr::UNSPECIFIED,
    };

    Some(RouteTableLine::new(Route::new(dest_cidr, gateway), line))
}

fn parse_dest(dest: &str) -> Option<Ipv4Net> {
    if dest.contains('/') {
        dest.parse().ok()
    } else {
        let addr: Ipv4Addr = dest.parse().ok()?;
        Ipv4Net::new(addr, 32).ok()
    }
}
