//! Upstream resolver selection: explicit address, resolv.conf discovery, or none.

use crate::error::{DnsError, ProxyError};
use std::fs;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4};
use std::path::Path;
use tracing::{info, warn};

/// Standard DNS port
pub const DNS_PORT: u16 = 53;

/// Read the first IPv4 `nameserver` from a resolv.conf-format file.
///
/// IPv6 nameservers are skipped; if they are the only ones present the
/// result is `Ok(None)` and forwarding stays disabled.
pub fn discover_upstream(path: &Path) -> Result<Option<SocketAddrV4>, DnsError> {
    let content = fs::read_to_string(path)
        .map_err(|e| DnsError::Discovery(format!("{}: {}", path.display(), e)))?;
    Ok(parse_resolv_conf(&content))
}

fn parse_resolv_conf(content: &str) -> Option<SocketAddrV4> {
    let mut saw_ipv6 = false;

    for line in content.lines() {
        let mut fields = line.split_whitespace();
        if fields.next() != Some("nameserver") {
            continue;
        }
        let Some(value) = fields.next() else {
            continue;
        };

        // Strip an IPv6 zone id ("fe80::1%eth0") before parsing
        match value.split('%').next().unwrap_or(value).parse::<IpAddr>() {
            Ok(IpAddr::V4(ip)) => return Some(SocketAddrV4::new(ip, DNS_PORT)),
            Ok(IpAddr::V6(_)) => saw_ipv6 = true,
            Err(_) => continue,
        }
    }

    if saw_ipv6 {
        warn!("IPv6 DNS not supported - forwarding disabled");
    }
    None
}

/// Parse an explicit upstream, `a.b.c.d` or `a.b.c.d:port`
pub fn parse_upstream(text: &str) -> Result<SocketAddrV4, ProxyError> {
    let text = text.trim();
    if let Ok(ip) = text.parse::<Ipv4Addr>() {
        return Ok(SocketAddrV4::new(ip, DNS_PORT));
    }
    match text.parse::<SocketAddr>() {
        Ok(SocketAddr::V4(addr)) => Ok(addr),
        Ok(SocketAddr::V6(_)) => Err(ProxyError::Config(format!(
            "upstream {} is IPv6; only IPv4 upstreams are supported",
            text
        ))),
        Err(_) => Err(ProxyError::Config(format!("invalid upstream address: {}", text))),
    }
}

/// Turn the configured `dns.upstream` setting into the upstream to use.
///
/// `auto` (or an empty setting) runs discovery; `none` or an unset value
/// disables forwarding. A failed discovery is not fatal: the proxy runs with
/// local records only.
pub fn resolve_upstream(
    setting: Option<&str>,
    resolv_conf: &Path,
) -> Result<Option<SocketAddrV4>, ProxyError> {
    let Some(setting) = setting.map(str::trim) else {
        return Ok(None);
    };

    match setting.to_ascii_lowercase().as_str() {
        "none" | "off" | "disabled" => Ok(None),
        "auto" | "" => match discover_upstream(resolv_conf) {
            Ok(Some(addr)) => {
                info!(upstream = %addr, source = %resolv_conf.display(), "Using upstream DNS");
                Ok(Some(addr))
            }
            Ok(None) => {
                warn!(source = %resolv_conf.display(), "No IPv4 nameserver found - forwarding disabled");
                Ok(None)
            }
            Err(e) => {
                warn!(error = %e, "Could not discover upstream DNS - forwarding disabled");
                Ok(None)
            }
        },
        _ => parse_upstream(setting).map(Some),
    }
}
