//! Client IP extraction and a minimal IPv4/IPv6 CIDR matcher for the IP
//! filter middleware. Hand-rolled rather than pulled from a crate: this is a
//! small, self-contained algorithm, not an ambient concern like logging or
//! serialization where the corpus reaches for a dedicated crate.

use std::net::{IpAddr, SocketAddr};

use axum::extract::ConnectInfo;
use axum::http::HeaderMap;

/// `X-Forwarded-For[0]`, then `X-Real-IP`, then the TCP peer address.
pub fn client_ip(headers: &HeaderMap, peer: Option<ConnectInfo<SocketAddr>>) -> Option<IpAddr> {
    if let Some(xff) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        if let Some(first) = xff.split(',').next() {
            if let Ok(ip) = first.trim().parse::<IpAddr>() {
                return Some(ip);
            }
        }
    }
    if let Some(xri) = headers.get("x-real-ip").and_then(|v| v.to_str().ok()) {
        if let Ok(ip) = xri.trim().parse::<IpAddr>() {
            return Some(ip);
        }
    }
    peer.map(|ConnectInfo(addr)| addr.ip())
}

/// Parses `"a.b.c.d/n"` or a bare address (implicit `/32` or `/128`) and
/// reports whether `ip` falls within it.
pub fn cidr_contains(cidr: &str, ip: &IpAddr) -> bool {
    let (base, bits) = match cidr.split_once('/') {
        Some((b, n)) => (b, n.parse::<u32>().ok()),
        None => (cidr, None),
    };
    let Ok(base_ip) = base.trim().parse::<IpAddr>() else {
        return false;
    };

    match (base_ip, ip) {
        (IpAddr::V4(b), IpAddr::V4(a)) => {
            let prefix = bits.unwrap_or(32).min(32);
            let mask = if prefix == 0 { 0 } else { u32::MAX << (32 - prefix) };
            (u32::from(b) & mask) == (u32::from(*a) & mask)
        }
        (IpAddr::V6(b), IpAddr::V6(a)) => {
            let prefix = bits.unwrap_or(128).min(128);
            let mask = if prefix == 0 { 0 } else { u128::MAX << (128 - prefix) };
            (u128::from(b) & mask) == (u128::from(*a) & mask)
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_exact_v4() {
        let ip: IpAddr = "10.0.0.5".parse().unwrap();
        assert!(cidr_contains("10.0.0.5", &ip));
        assert!(!cidr_contains("10.0.0.6", &ip));
    }

    #[test]
    fn matches_v4_prefix() {
        let ip: IpAddr = "192.168.1.42".parse().unwrap();
        assert!(cidr_contains("192.168.1.0/24", &ip));
        assert!(!cidr_contains("192.168.2.0/24", &ip));
    }
}
