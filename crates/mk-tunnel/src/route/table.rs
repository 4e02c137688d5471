//! Parsed routing table and classification against a candidate route

use mk_core::Route;

/// One parsed line of the host routing table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteTableLine {
    pub route: Route,
    /// The line as printed by the OS, kept for error messages
    pub line: String,
}

impl RouteTableLine {
    pub fn new(route: Route, line: impl Into<String>) -> Self {
        Self {
            route,
            line: line.into(),
        }
    }
}

/// How the routing table relates to a candidate route
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteInspection {
    /// The exact route is already installed
    pub exists: bool,
    /// A line routing the same CIDR through another gateway
    pub conflict: Option<String>,
    /// Lines whose CIDR contains, or is contained in, the candidate's
    pub overlaps: Vec<String>,
}

/// Classify every table line relative to `route`
pub fn classify(table: &[RouteTableLine], route: &Route) -> RouteInspection {
    let mut inspection = RouteInspection::default();

    for entry in table {
        if entry.route == *route {
            inspection.exists = true;
        } else if entry.route.dest_cidr == route.dest_cidr {
            if inspection.conflict.is_none() {
                inspection.conflict = Some(entry.line.clone());
            }
        } else if entry.route.overlaps(route) {
            inspection.overlaps.push(entry.line.clone());
        }
    }

    inspection
}
