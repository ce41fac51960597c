use std::net::{IpAddr, Ipv6Addr};
use std::sync::Arc;

use anyhow::Context;
use hickory_resolver::TokioAsyncResolver;
use slog_scope::warn;

pub type DnsResolver = Arc<TokioAsyncResolver>;

/// Async resolver built from the system configuration. Falls back to `None`
/// when /etc/resolv.conf cannot be read; lookups then go through the OS via
/// `tokio::net::lookup_host`.
pub fn system_resolver() -> Option<DnsResolver> {
    match TokioAsyncResolver::tokio_from_system_conf() {
        Ok(resolver) => Some(Arc::new(resolver)),
        Err(e) => {
            warn!("system_resolver_unavailable"; "error" => e.to_string());
            None
        }
    }
}

/// Resolve a hostname to its first IPv6 address in resolver order. IPv4
/// answers are ignored; a name with no AAAA records is an error. No caching,
/// the resolver is authoritative.
pub async fn resolve_ipv6(host: &str, resolver: Option<&DnsResolver>) -> anyhow::Result<Ipv6Addr> {
    let host = host.trim().trim_matches('[').trim_matches(']');
    if host.is_empty() {
        anyhow::bail!("empty host");
    }
    if let Ok(ip) = host.parse::<Ipv6Addr>() {
        return Ok(ip);
    }

    let addrs: Vec<IpAddr> = if let Some(resolver) = resolver {
        resolver
            .lookup_ip(host)
            .await
            .with_context(|| format!("DNS lookup failed: {}", host))?
            .iter()
            .collect()
    } else {
        tokio::net::lookup_host((host, 0))
            .await
            .with_context(|| format!("DNS lookup failed: {}", host))?
            .map(|addr| addr.ip())
            .collect()
    };

    select_first_ipv6(addrs.into_iter())
        .ok_or_else(|| anyhow::anyhow!("no AAAA records for {}", host))
}

fn select_first_ipv6(mut addrs: impl Iterator<Item = IpAddr>) -> Option<Ipv6Addr> {
    addrs.find_map(|ip| match ip {
        IpAddr::V6(v6) => Some(v6),
        IpAddr::V4(_) => None,
    })
}
