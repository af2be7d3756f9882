//! SSRF (Server-Side Request Forgery) protection.
//!
//! Validates that operator-supplied target URLs and their resolved IP
//! addresses are not pointing to private, internal, or reserved addresses.
use std::net::IpAddr;

/// Error type for SSRF validation failures.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SsrfError {
    #[error("missing host in {0}")]
    MissingHost(String),

    #[error("blocked IP: {0} (private/reserved)")]
    BlockedIp(IpAddr),

    #[error("DNS resolution failed: {0}")]
    DnsError(String),
}

/// Check if an IP address is private, reserved, or otherwise blocked.
///
/// This covers:
/// - Loopback addresses (127.0.0.0/8, ::1)
/// - RFC 1918 private ranges (10/8, 172.16/12, 192.168/16)
/// - Link-local addresses (169.254/16, fe80::/10)
/// - Multicast addresses (224/4, ff00::/8)
/// - Unspecified addresses (0.0.0.0/8, ::)
/// - IPv6 unique local (fc00::/7)
/// - Carrier-grade NAT (100.64/10) and IPv4-mapped IPv6 forms of the above
pub fn is_private_or_reserved(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_multicast()
                || v4.is_broadcast()
                || v4.is_unspecified()
                || v4.octets()[0] == 0
                || (v4.octets()[0] == 100 && (v4.octets()[1] & 0xc0) == 64)
        }
        IpAddr::V6(v6) => {
            v6.is_loopback()
                || v6.is_multicast()
                || v6.is_unspecified()
                || (v6.segments()[0] & 0xfe00) == 0xfc00
                || (v6.segments()[0] & 0xffc0) == 0xfe80
                || v6.to_ipv4_mapped().is_some_and(|v4| is_private_or_reserved(IpAddr::V4(v4)))
        }
    }
}

/// Validate that an IP address is not private or reserved.
///
/// Returns an error if the IP is blocked.
pub fn validate_ip(ip: IpAddr) -> Result<(), SsrfError> {
    if is_private_or_reserved(ip) { Err(SsrfError::BlockedIp(ip)) } else { Ok(()) }
}

/// Resolve the host of `url` and require every answer to be public.
///
/// IP literals are checked directly; names are resolved with the system
/// resolver and all A/AAAA answers validated.
pub async fn ensure_public_host(url: &url::Url) -> Result<(), SsrfError> {
    let host = match url.host() {
        Some(url::Host::Ipv4(v4)) => return validate_ip(IpAddr::V4(v4)),
        Some(url::Host::Ipv6(v6)) => return validate_ip(IpAddr::V6(v6)),
        Some(url::Host::Domain(domain)) => domain.to_string(),
        None => return Err(SsrfError::MissingHost(url.to_string())),
    };
    let port = url.port_or_known_default().unwrap_or(443);

    let addrs = tokio::net::lookup_host((host.as_str(), port))
        .await
        .map_err(|e| SsrfError::DnsError(format!("{host}: {e}")))?;

    let mut resolved = false;
    for addr in addrs {
        validate_ip(addr.ip())?;
        resolved = true;
    }
    if !resolved {
        return Err(SsrfError::DnsError(format!("{host}: no addresses")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::net::{Ipv4Addr, Ipv6Addr};

    #[test]
    fn test_blocks_private_and_reserved_v4() {
        for ip in [
            Ipv4Addr::new(127, 0, 0, 1),
            Ipv4Addr::new(10, 1, 2, 3),
            Ipv4Addr::new(172, 20, 0, 1),
            Ipv4Addr::new(192, 168, 1, 1),
            Ipv4Addr::new(169, 254, 169, 254),
            Ipv4Addr::new(224, 0, 0, 251),
            Ipv4Addr::new(0, 0, 0, 1),
            Ipv4Addr::BROADCAST,
            Ipv4Addr::new(100, 64, 0, 1),
        ] {
            assert!(is_private_or_reserved(IpAddr::V4(ip)), "{ip} should be blocked");
        }
    }

    #[test]
    fn test_blocks_private_and_reserved_v6() {
        for ip in [
            Ipv6Addr::LOCALHOST,
            Ipv6Addr::UNSPECIFIED,
            Ipv6Addr::new(0xfd12, 0, 0, 0, 0, 0, 0, 1),
            Ipv6Addr::new(0xfe80, 0, 0, 0, 0, 0, 0, 1),
            Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 0, 1),
            Ipv4Addr::new(192, 168, 0, 10).to_ipv6_mapped(),
        ] {
            assert!(is_private_or_reserved(IpAddr::V6(ip)), "{ip} should be blocked");
        }
    }

    #[test]
    fn test_allows_public_addresses() {
        assert!(validate_ip(IpAddr::V4(Ipv4Addr::new(1, 1, 1, 1))).is_ok());
        assert!(validate_ip(IpAddr::V6(Ipv6Addr::new(0x2606, 0x4700, 0, 0, 0, 0, 0, 0x1111))).is_ok());
    }

    #[tokio::test]
    async fn test_ensure_public_host_ip_literals() {
        let loopback = url::Url::parse("http://127.0.0.1:8080/").unwrap();
        assert!(matches!(ensure_public_host(&loopback).await, Err(SsrfError::BlockedIp(_))));

        let v6 = url::Url::parse("http://[::1]/").unwrap();
        assert!(ensure_public_host(&v6).await.is_err());

        let public = url::Url::parse("https://93.184.216.34/").unwrap();
        assert!(ensure_public_host(&public).await.is_ok());
    }

    #[tokio::test]
    async fn test_ensure_public_host_localhost_name() {
        let url = url::Url::parse("http://localhost/").unwrap();
        assert!(ensure_public_host(&url).await.is_err());
    }
}
