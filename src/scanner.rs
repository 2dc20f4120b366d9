use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::ScanConfig;
use crate::error::ReconError;
use crate::pool::WorkerPool;
use crate::ports::PortRange;
use crate::types::{now_rfc3339, PortProbeResult, PortState, ScanReport};

/// One connect attempt against one socket address.
#[async_trait]
pub trait Dialer: Send + Sync + 'static {
    async fn dial(&self, addr: SocketAddr, timeout: Duration) -> io::Result<()>;
}

/// Plain TCP handshake, dropped as soon as it completes.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpDialer;

#[async_trait]
impl Dialer for TcpDialer {
    async fn dial(&self, addr: SocketAddr, timeout: Duration) -> io::Result<()> {
        match time::timeout(timeout, TcpStream::connect(addr)).await {
            Ok(Ok(_stream)) => Ok(()),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "connect timed out")),
        }
    }
}

/// Bounded-concurrency TCP connect scanner for one host.
pub struct PortScanner<D = TcpDialer> {
    config: ScanConfig,
    dialer: Arc<D>,
}

impl PortScanner<TcpDialer> {
    pub fn new(config: ScanConfig) -> Self {
        Self::with_dialer(config, TcpDialer)
    }
}

impl<D: Dialer> PortScanner<D> {
    pub fn with_dialer(config: ScanConfig, dialer: D) -> Self {
        Self {
            config,
            dialer: Arc::new(dialer),
        }
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    /// Probe every port in `start..=end` on `host` exactly once.
    ///
    /// Returns one result per port, sorted ascending by port.
    pub async fn scan(
        &self,
        host: &str,
        start: u16,
        end: u16,
    ) -> Result<Vec<PortProbeResult>, ReconError> {
        let range = PortRange::new(start, end)?;
        let report = self
            .scan_with_cancel(host, range, CancellationToken::new())
            .await?;
        Ok(report.results)
    }

    /// Like [`scan`](Self::scan) but stoppable through `cancel`.
    ///
    /// A cancelled scan yields [`ReconError::Cancelled`]; a partial batch is
    /// never returned.
    pub async fn scan_with_cancel(
        &self,
        host: &str,
        range: PortRange,
        cancel: CancellationToken,
    ) -> Result<ScanReport, ReconError> {
        let ip = resolve_host(host).await?;
        let mut report = self.scan_addr(ip, range, cancel).await?;
        report.host = host.to_string();
        Ok(report)
    }

    pub async fn scan_addr(
        &self,
        ip: IpAddr,
        range: PortRange,
        cancel: CancellationToken,
    ) -> Result<ScanReport, ReconError> {
        let started_at = now_rfc3339();
        let expected = range.len();
        let timeout = self.config.dial_timeout();
        let pool = WorkerPool::new(self.config.concurrency_cap, cancel);
        info!(
            %ip,
            start = range.start(),
            end = range.end(),
            cap = pool.gate().capacity(),
            "starting TCP connect scan"
        );

        let (tx, rx) = mpsc::channel(pool.gate().capacity());
        let collector = tokio::spawn(collect_results(rx, expected));

        let dialer = self.dialer.clone();
        let dispatched = pool
            .run(
                range.iter(),
                move |port| {
                    let dialer = dialer.clone();
                    async move { probe_port(dialer.as_ref(), SocketAddr::new(ip, port), timeout).await }
                },
                tx,
            )
            .await;

        let mut results = collector.await??;
        results.sort_by_key(|r| r.port);
        debug!(dispatched, peak = pool.gate().peak(), "scan complete");

        let report = ScanReport {
            host: ip.to_string(),
            address: ip,
            range,
            started_at,
            peak_in_flight: pool.gate().peak(),
            results,
        };
        info!(%ip, open = report.open_count(), total = expected, "scan finished");
        Ok(report)
    }
}

async fn probe_port<D: Dialer + ?Sized>(
    dialer: &D,
    addr: SocketAddr,
    timeout: Duration,
) -> PortProbeResult {
    let state = match dialer.dial(addr, timeout).await {
        Ok(()) => PortState::Open,
        Err(e) => {
            debug!(%addr, error = %e, "connect failed");
            PortState::Closed
        }
    };
    PortProbeResult::tcp(addr.port(), state)
}

/// Wait for exactly `expected` results. The queue closing early means the
/// run was cancelled.
async fn collect_results(
    mut rx: mpsc::Receiver<PortProbeResult>,
    expected: u64,
) -> Result<Vec<PortProbeResult>, ReconError> {
    let mut results = Vec::with_capacity(expected as usize);
    while (results.len() as u64) < expected {
        match rx.recv().await {
            Some(result) => results.push(result),
            None => {
                return Err(ReconError::Cancelled {
                    completed: results.len() as u64,
                    expected,
                })
            }
        }
    }
    Ok(results)
}

/// Resolve `host` to one address, preferring IPv4.
pub async fn resolve_host(host: &str) -> Result<IpAddr, ReconError> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(ip);
    }
    let addrs: Vec<IpAddr> = tokio::net::lookup_host((host, 0))
        .await
        .map_err(|_| ReconError::UnresolvableHost(host.to_string()))?
        .map(|sa| sa.ip())
        .collect();
    addrs
        .iter()
        .find(|ip| ip.is_ipv4())
        .or_else(|| addrs.first())
        .copied()
        .ok_or_else(|| ReconError::UnresolvableHost(host.to_string()))
}
