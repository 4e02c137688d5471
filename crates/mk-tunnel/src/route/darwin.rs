//! BSD / macOS `route` and `netstat` dialect

use std::net::Ipv4Addr;

use ipnet::Ipv4Net;
use mk_core::Route;
use regex::Regex;

use super::{RouteCommand, RouteDialect, RouteTableLine};
use crate::command::CommandOutput;

pub struct DarwinRoutes {
    deleted: Regex,
}

impl DarwinRoutes {
    pub fn new() -> Self {
        Self {
            deleted: Regex::new(r"delete net ([^:\s]*)").expect("static pattern"),
        }
    }
}

impl Default for DarwinRoutes {
    fn default() -> Self {
        Self::new()
    }
}

impl RouteDialect for DarwinRoutes {
    fn table_command(&self) -> RouteCommand {
        RouteCommand::new("netstat", &["-nr", "-f", "inet"])
    }

    fn parse_table(&self, output: &str) -> Vec<RouteTableLine> {
        output.lines().filter_map(parse_line).collect()
    }

    fn add_command(&self, route: &Route) -> RouteCommand {
        RouteCommand::new(
            "sudo",
            &[
                "route",
                "-n",
                "add",
                &route.dest_cidr.to_string(),
                &route.gateway.to_string(),
            ],
        )
    }

    /// `route -n add` prints `add net 10.96.0.0: gateway 192.168.64.2`
    fn added(&self, route: &Route, output: &CommandOutput) -> bool {
        let pattern = format!(
            r"add net (.*): gateway {}",
            regex::escape(&route.gateway.to_string())
        );
        Regex::new(&pattern)
            .map(|re| re.is_match(&output.combined()))
            .unwrap_or(false)
    }

    fn delete_command(&self, route: &Route) -> RouteCommand {
        RouteCommand::new(
            "sudo",
            &["route", "-n", "delete", &route.dest_cidr.to_string()],
        )
    }

    fn deleted(&self, _route: &Route, output: &CommandOutput) -> bool {
        self.deleted.is_match(&output.combined())
    }
}

/// Parse one `netstat -nr` line, e.g. `10.96/12  192.168.64.2  UGSc  bridge100`.
///
/// Headers and link-layer gateways (`link#6`, MAC addresses) are skipped.
fn parse_line(line: &str) -> Option<RouteTableLine> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() <= 2 {
        return None;
    }

    let dest = fields[0];
    if dest == "default" || dest == "Destination" {
        return None;
    }

    let dest_cidr: Ipv4Net = match pad_cidr(dest).parse() {
        Ok(cidr) => cidr,
        Err(_) => {
            tracing::debug!("Skipping unparseable route line: {}", line);
            return None;
        }
    };
    let gateway: Ipv4Addr = match fields[1].parse() {
        Ok(gw) => gw,
        Err(_) => {
            tracing::debug!("Skipping route line without IP gateway: {}", line);
            return None;
        }
    };
    if dest_cidr.network().is_unspecified() && dest_cidr.prefix_len() == 0 {
        return None;
    }

    Some(RouteTableLine::new(Route::new(dest_cidr, gateway), line))
}

/// Expand netstat's shorthand destinations to canonical CIDR notation.
///
/// `10` becomes `10.0.0.0/8`, `10.96/12` becomes `10.96.0.0/12` and a
/// full address without a mask becomes a /32.
pub(crate) fn pad_cidr(dest: &str) -> String {
    let (addr, bits) = match dest.split_once('/') {
        Some((addr, bits)) => (addr, Some(bits)),
        None => (dest, None),
    };

    let mut octets: Vec<&str> = addr.split('.').collect();
    let given = octets.len();
    while octets.len() < 4 {
        octets.push("0");
    }

    let bits = bits
        .map(str::to_string)
        .unwrap_or_else(|| (8 * given.min(4)).to_string());
    format!("{}/{}", octets.join("."), bits)
}
