use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use async_trait::async_trait;
use surge_ping::{Client, Config, PingIdentifier, PingSequence, ICMP};
use tracing::{debug, trace};

use crate::error::ReconError;

const PAYLOAD: [u8; 56] = [0; 56];

/// Sends one ICMP echo and waits for the matching reply.
#[async_trait]
pub trait EchoProber: Send + Sync + 'static {
    /// Round-trip time if `addr` answered within `timeout`, `None` otherwise.
    /// Send failures count as silence.
    async fn probe(&self, addr: Ipv4Addr, timeout: Duration) -> Option<Duration>;
}

/// ICMPv4 echo over a single shared socket.
pub struct IcmpProber {
    client: Client,
    identifier: u16,
}

impl IcmpProber {
    /// Open the ICMP socket. Must be called from within a tokio runtime.
    ///
    /// Fails with [`ReconError::IcmpUnavailable`] when the process may not
    /// open raw or datagram ICMP sockets.
    pub fn open() -> Result<Self, ReconError> {
        let config = Config::builder().kind(ICMP::V4).build();
        let client = Client::new(&config).map_err(ReconError::IcmpUnavailable)?;
        let identifier = rand::random::<u16>();
        debug!(identifier, "opened ICMP socket");
        Ok(Self { client, identifier })
    }
}

#[async_trait]
impl EchoProber for IcmpProber {
    async fn probe(&self, addr: Ipv4Addr, timeout: Duration) -> Option<Duration> {
        let mut pinger = self
            .client
            .pinger(IpAddr::V4(addr), PingIdentifier(self.identifier))
            .await;
        pinger.timeout(timeout);
        match pinger.ping(PingSequence(0), &PAYLOAD).await {
            Ok((_packet, rtt)) => Some(rtt),
            Err(e) => {
                trace!(%addr, error = %e, "no echo reply");
                None
            }
        }
    }
}
