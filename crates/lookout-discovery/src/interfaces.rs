//! Network interface resolution for multicast I/O.

use std::net::{Ipv4Addr, SocketAddrV4};

use nix::ifaddrs::getifaddrs;

use lookout_core::config::ConfigError;

/// Turn configured interface names or IPv4 addresses into the addresses
/// multicast sockets are bound to.
///
/// An empty list means the system default interface, represented as
/// `0.0.0.0`.
pub fn resolve_interfaces(configured: &[String]) -> Result<Vec<Ipv4Addr>, ConfigError> {
    if configured.is_empty() {
        return Ok(vec![Ipv4Addr::UNSPECIFIED]);
    }

    let mut out = Vec::with_capacity(configured.len());
    for entry in configured {
        let addr = match entry.parse::<Ipv4Addr>() {
            Ok(addr) => addr,
            Err(_) => by_name(entry)?,
        };
        if !out.contains(&addr) {
            out.push(addr);
        }
    }
    Ok(out)
}

/// First IPv4 address assigned to the named interface.
fn by_name(name: &str) -> Result<Ipv4Addr, ConfigError> {
    let addrs = getifaddrs().map_err(|e| ConfigError::Invalid {
        field: "multicast.interfaces",
        reason: format!("getifaddrs failed: {e}"),
    })?;

    addrs
        .filter(|ifa| ifa.interface_name == name)
        .filter_map(|ifa| ifa.address)
        .find_map(|storage| storage.as_sockaddr_in().map(|sin| *SocketAddrV4::from(*sin).ip()))
        .ok_or_else(|| ConfigError::Invalid {
            field: "multicast.interfaces",
            reason: format!("interface {name:?} not found or has no IPv4 address"),
        })
}
