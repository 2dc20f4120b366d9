use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::ReconError;

/// An inclusive, contiguous range of TCP ports.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PortRange {
    start: u16,
    end: u16,
}

impl PortRange {
    pub fn new(start: u16, end: u16) -> Result<Self, ReconError> {
        if start > end {
            return Err(ReconError::InvalidPortRange { start, end });
        }
        Ok(Self { start, end })
    }

    pub fn single(port: u16) -> Self {
        Self {
            start: port,
            end: port,
        }
    }

    pub fn start(&self) -> u16 {
        self.start
    }

    pub fn end(&self) -> u16 {
        self.end
    }

    /// Number of ports covered, `end - start + 1`.
    pub fn len(&self) -> u64 {
        u64::from(self.end) - u64::from(self.start) + 1
    }

    pub fn contains(&self, port: u16) -> bool {
        (self.start..=self.end).contains(&port)
    }

    pub fn iter(&self) -> impl Iterator<Item = u16> + Send + 'static {
        self.start..=self.end
    }
}

/// Parse `8000-8010` or a single `80` into a [`PortRange`].
///
/// Whitespace around either bound is ignored. Port 0 is accepted; it will
/// simply never connect.
pub fn parse_port_range(s: &str) -> Result<PortRange> {
    let s = s.trim();
    if let Some((a, b)) = s.split_once('-') {
        let start =
            parse_port_str(a.trim()).with_context(|| format!("invalid start in range: {a}"))?;
        let end = parse_port_str(b.trim()).with_context(|| format!("invalid end in range: {b}"))?;
        return Ok(PortRange::new(start, end)?);
    }
    let port = parse_port_str(s).with_context(|| format!("invalid port value: {s}"))?;
    Ok(PortRange::single(port))
}

fn parse_port_str(s: &str) -> Result<u16> {
    let val: u32 = s.parse::<u32>().map_err(|e| anyhow::anyhow!(e))?;
    if val > 65535 {
        bail!("port out of range: {val}");
    }
    Ok(val as u16)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_single_port() {
        let r = parse_port_range("  443 ").unwrap();
        assert_eq!((r.start(), r.end()), (443, 443));
        assert_eq!(r.len(), 1);
    }

    #[test]
    fn parse_inclusive_range() {
        let r = parse_port_range("8000 - 8002").unwrap();
        assert_eq!(r.iter().collect::<Vec<_>>(), vec![8000, 8001, 8002]);
    }

    #[test]
    fn full_range_length() {
        let r = PortRange::new(0, 65535).unwrap();
        assert_eq!(r.len(), 65536);
    }

    #[test]
    fn reversed_range_is_rejected() {
        let err = PortRange::new(10, 9).unwrap_err();
        assert!(matches!(err, ReconError::InvalidPortRange { start: 10, end: 9 }));
        assert!(parse_port_range("100-1").is_err());
    }

    #[test]
    fn invalid_values_error() {
        assert!(parse_port_range("70000").is_err());
        assert!(parse_port_range("http").is_err());
        assert!(parse_port_range("1-").is_err());
    }
}
