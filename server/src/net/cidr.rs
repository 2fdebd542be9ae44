use std::net::IpAddr;

/// IPv4 CIDR allow-list matching.
///
/// An empty list admits every client. IPv6 peers are admitted only when the
/// list is empty or carries "::/0".
pub fn is_allowed(peer: IpAddr, allow_cidrs: &[String]) -> bool {
    if allow_cidrs.is_empty() {
        return true;
    }
    match peer {
        IpAddr::V4(addr) => {
            let peer_bits = u32::from(addr);
            allow_cidrs.iter().any(|cidr| match parse_v4_cidr(cidr) {
                Some((network, prefix)) => {
                    let mask = if prefix == 0 { 0 } else { u32::MAX << (32 - prefix) };
                    (peer_bits & mask) == (network & mask)
                }
                None => false,
            })
        }
        IpAddr::V6(_) => allow_cidrs.iter().any(|cidr| cidr == "::/0"),
    }
}

/// Parses "a.b.c.d/len" or a bare "a.b.c.d" (/32).
fn parse_v4_cidr(cidr: &str) -> Option<(u32, u8)> {
    let (address, prefix) = match cidr.split_once('/') {
        Some((address, prefix)) => (address, prefix.parse::<u8>().ok()?),
        None => (cidr, 32),
    };
    if prefix > 32 {
        return None;
    }
    let parsed: std::net::Ipv4Addr = address.parse().ok()?;
    Some((u32::from(parsed), prefix))
}
