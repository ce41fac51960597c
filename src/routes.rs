use std::process::Command;

use ipnet::Ipv6Net;
use slog_scope::info;

use crate::error::{AppError, Result};

/// Install a `local`-type host route for every prefix on the egress
/// interface, so the kernel accepts bind() of any in-prefix address.
/// Routes are only ever added; earlier routes stay installed until cleaned
/// up manually.
pub fn apply_local_routes(prefixes: &[Ipv6Net], interface: &str) -> Result<()> {
    for prefix in prefixes {
        add_local_route(&prefix.to_string(), interface)?;
    }
    Ok(())
}

fn add_local_route(cidr: &str, interface: &str) -> Result<()> {
    let output = Command::new("ip")
        .args(["-6", "route", "add", "local", cidr, "dev", interface])
        .output()?;
    if output.status.success() || route_already_exists(&output.stderr) {
        info!("route_added"; "prefix" => cidr, "dev" => interface);
        return Ok(());
    }
    Err(AppError::Route(format!(
        "failed to add local route for {} on {}: {}",
        cidr,
        interface,
        String::from_utf8_lossy(&output.stderr).trim()
    )))
}

fn route_already_exists(stderr: &[u8]) -> bool {
    String::from_utf8_lossy(stderr).contains("File exists")
}
