//! Output formatting utilities for the CLI
//!
//! Tables for the tunnel registry and colored status messages. Tunnel
//! status snapshots are rendered by the reconciler's reporter.

use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};
use tabled::{settings::Style, Table, Tabled};

use mk_core::{ProcessProbe, TunnelId};

/// Format registered tunnels as an ASCII table
///
/// Each row shows whether the owning process is still alive; dead rows
/// are what `mkube tunnel --cleanup` removes.
pub fn format_tunnels(tunnels: &[TunnelId], probe: &dyn ProcessProbe) -> String {
    if tunnels.is_empty() {
        return "No tunnels registered".to_string();
    }

    #[derive(Tabled)]
    struct TunnelRow {
        #[tabled(rename = "MACHINE")]
        machine: String,
        #[tabled(rename = "SERVICE CIDR")]
        cidr: String,
        #[tabled(rename = "GATEWAY")]
        gateway: String,
        #[tabled(rename = "PID")]
        pid: u32,
        #[tabled(rename = "STATUS")]
        status: String,
    }

    let rows: Vec<TunnelRow> = tunnels
        .iter()
        .map(|t| TunnelRow {
            machine: t.machine_name.clone(),
            cidr: t.route.dest_cidr.to_string(),
            gateway: t.route.gateway.to_string(),
            pid: t.pid,
            status: if probe.is_alive(t.pid) {
                "running".to_string()
            } else {
                "stale".to_string()
            },
        })
        .collect();

    Table::new(rows).with(Style::rounded()).to_string()
}

fn print_marked(out: &mut impl std::io::Write, color: Color, mark: &str, msg: &str) {
    let _ = crossterm::execute!(
        out,
        SetForegroundColor(color),
        Print(mark),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print a success message in green with a checkmark prefix
pub fn print_success(msg: &str) {
    print_marked(&mut std::io::stdout(), Color::Green, "✓ ", msg);
}

/// Print an error message in red to stderr
pub fn print_error(msg: &str) {
    print_marked(&mut std::io::stderr(), Color::Red, "✗ ", msg);
}

/// Print a warning message in yellow to stderr
pub fn print_warning(msg: &str) {
    print_marked(&mut std::io::stderr(), Color::Yellow, "⚠ ", msg);
}

pub fn print_info(msg: &str) {
    print_marked(&mut std::io::stdout(), Color::Cyan, "ℹ ", msg);
}
