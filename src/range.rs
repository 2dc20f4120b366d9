use ipnet::Ipv4Net;
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use crate::error::ReconError;

/// A contiguous block of IPv4 addresses described by a CIDR prefix.
///
/// The range covers `[network, network | !mask]` inclusive, so the network and
/// broadcast addresses are part of it. Host bits in the parsed spec are
/// dropped: `10.0.0.7/30` covers `10.0.0.4..=10.0.0.7`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AddressRange {
    net: Ipv4Net,
}

impl AddressRange {
    /// Parse an IPv4 CIDR such as `192.168.1.0/24`.
    ///
    /// Bare addresses and IPv6 prefixes are rejected.
    pub fn parse(spec: &str) -> Result<Self, ReconError> {
        let trimmed = spec.trim();
        if !trimmed.contains('/') {
            return Err(ReconError::invalid_range(spec, "missing prefix length"));
        }
        let net = trimmed
            .parse::<Ipv4Net>()
            .map_err(|e| ReconError::invalid_range(spec, e))?;
        Ok(Self::from_net(net))
    }

    pub fn from_net(net: Ipv4Net) -> Self {
        Self { net: net.trunc() }
    }

    pub fn prefix_len(&self) -> u8 {
        self.net.prefix_len()
    }

    pub fn first(&self) -> Ipv4Addr {
        self.net.network()
    }

    pub fn last(&self) -> Ipv4Addr {
        let start = u32::from(self.first());
        let mask = u32::from(self.net.netmask());
        Ipv4Addr::from(start | !mask)
    }

    /// Number of addresses covered, `2^(32 - prefix)`.
    pub fn len(&self) -> u64 {
        1u64 << (32 - u32::from(self.prefix_len()))
    }

    /// Addresses in strictly ascending numeric order.
    ///
    /// Lazy, so a /8 or wider never has to be materialised.
    pub fn iter(&self) -> impl Iterator<Item = Ipv4Addr> + Send + 'static {
        (u32::from(self.first())..=u32::from(self.last())).map(Ipv4Addr::from)
    }
}

impl FromStr for AddressRange {
    type Err = ReconError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for AddressRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.net)
    }
}

/// Expand a CIDR string into every address it covers, ascending.
pub fn expand_cidr(spec: &str) -> Result<Vec<Ipv4Addr>, ReconError> {
    Ok(AddressRange::parse(spec)?.iter().collect())
}
