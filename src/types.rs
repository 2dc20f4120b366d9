use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ports::PortRange;

/// Hostname used when reverse DNS has nothing to offer.
pub const UNKNOWN_HOSTNAME: &str = "unknown";

/// Outcome of a single connect attempt. Refused, timed out and unreachable
/// all collapse into `Closed`.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum PortState {
    Open,
    Closed,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
}

impl fmt::Display for PortState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortState::Open => f.pad("Open"),
            PortState::Closed => f.pad("Closed"),
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Tcp => f.pad("tcp"),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PortProbeResult {
    pub port: u16,
    pub state: PortState,
    pub protocol: Protocol,
}

impl PortProbeResult {
    pub fn tcp(port: u16, state: PortState) -> Self {
        Self {
            port,
            state,
            protocol: Protocol::Tcp,
        }
    }

    pub fn is_open(&self) -> bool {
        self.state == PortState::Open
    }
}

/// Only responsive hosts are ever recorded, so `Up` is the sole state.
/// A host missing from the output did not answer its echo.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum HostState {
    Up,
}

impl fmt::Display for HostState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad("Up")
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct HostRecord {
    pub address: Ipv4Addr,
    pub state: HostState,
    pub hostnames: Vec<String>,
    #[serde(rename = "response_time_ms", with = "millis")]
    pub response_time: Duration,
}

impl HostRecord {
    pub fn up(address: Ipv4Addr, hostnames: Vec<String>, response_time: Duration) -> Self {
        Self {
            address,
            state: HostState::Up,
            hostnames,
            response_time,
        }
    }

    pub fn has_unknown_hostname(&self) -> bool {
        self.hostnames.len() == 1 && self.hostnames[0] == UNKNOWN_HOSTNAME
    }
}

/// Terminal signals of a discovery run.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Lifecycle {
    /// The sweep window elapsed.
    Idle,
    /// The caller cancelled the run.
    Terminate,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ScanReport {
    pub host: String,
    pub address: IpAddr,
    pub range: PortRange,
    pub started_at: String,
    /// Highest number of simultaneous connect attempts seen during the run.
    pub peak_in_flight: usize,
    /// One entry per port in `range`, ascending.
    pub results: Vec<PortProbeResult>,
}

impl ScanReport {
    pub fn open(&self) -> impl Iterator<Item = &PortProbeResult> {
        self.results.iter().filter(|r| r.is_open())
    }

    pub fn open_count(&self) -> usize {
        self.open().count()
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct DiscoveryReport {
    pub cidr: String,
    pub started_at: String,
    pub candidates: u64,
    pub probed: u64,
    pub ended_by: Lifecycle,
    /// In arrival order.
    pub hosts: Vec<HostRecord>,
}

pub(crate) fn now_rfc3339() -> String {
    use time::{format_description::well_known, OffsetDateTime};
    OffsetDateTime::now_utc()
        .format(&well_known::Rfc3339)
        .unwrap_or_else(|_| String::from("1970-01-01T00:00:00Z"))
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_nanos() as f64 / 1_000_000.0)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let ms = f64::deserialize(d)?;
        Ok(Duration::from_nanos((ms.max(0.0) * 1_000_000.0) as u64))
    }
}
