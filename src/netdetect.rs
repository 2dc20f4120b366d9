use anyhow::{Context, Result};
use if_addrs::{get_if_addrs, IfAddr};
use ipnet::Ipv4Net;
use std::collections::BTreeSet;
use std::net::Ipv4Addr;

use crate::range::AddressRange;

/// Detect local non-loopback IPv4 addresses and convert each to a default /24 range.
///
/// For example, an interface IP `192.168.1.42` becomes `192.168.1.0/24`.
/// Duplicates are removed and the result is sorted by network address.
pub fn detect_local_ranges() -> Result<Vec<AddressRange>> {
    let mut set = BTreeSet::<(u32, u8)>::new();
    for iface in get_if_addrs().context("failed to enumerate network interfaces")? {
        if let IfAddr::V4(v4) = iface.addr {
            let ip = v4.ip;
            if ip.is_loopback() || ip.is_link_local() {
                continue;
            }
            let cidr = ipv4_to_default_cidr(ip);
            set.insert((u32::from(cidr.network()), cidr.prefix_len()));
        }
    }
    Ok(set
        .into_iter()
        .filter_map(|(net, len)| Ipv4Net::new(Ipv4Addr::from(net), len).ok())
        .map(AddressRange::from_net)
        .collect())
}

/// First detected local range, used when no CIDR was given.
pub fn default_range() -> Result<AddressRange> {
    detect_local_ranges()?
        .into_iter()
        .next()
        .context("no non-loopback IPv4 interface found; pass a CIDR explicitly")
}

/// Helper: convert an IPv4 address into its default /24 network.
pub fn ipv4_to_default_cidr(ip: Ipv4Addr) -> Ipv4Net {
    let o = ip.octets();
    let net = Ipv4Addr::new(o[0], o[1], o[2], 0);
    Ipv4Net::new(net, 24).expect("/24 is always valid")
}
