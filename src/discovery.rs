//! ICMP host discovery sweep.
//!
//! A run has three cooperating tasks:
//!
//! - the **sender** expands the CIDR, pushes one echo per address through a
//!   [`WorkerPool`] and, when the sweep window closes, raises exactly one
//!   [`Lifecycle`] signal;
//! - the **aggregator** turns each reply into a [`HostRecord`] (reverse DNS
//!   runs alongside, falling back to `"unknown"`) and streams it out until the
//!   lifecycle signal arrives;
//! - an optional [`ProgressReporter`](crate::progress::ProgressReporter),
//!   started by the caller, which has no say in either.
//!
//! Every address in the range is sent an echo before the window closes: each
//! echo waits at most [`echo_wait`], which is sized so that all
//! `ceil(candidates / cap)` rounds of the pool fit inside the window.
//! Hosts that stay silent are never reported, so absence from the output is the
//! only "down" signal.
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::config::DiscoveryConfig;
use crate::dns::ReverseResolver;
use crate::error::ReconError;
use crate::icmp::EchoProber;
use crate::pool::WorkerPool;
use crate::range::AddressRange;
use crate::types::{now_rfc3339, DiscoveryReport, HostRecord, Lifecycle, UNKNOWN_HOSTNAME};

const EVENT_QUEUE: usize = 256;
/// Share of the sweep window that echo dispatch may use, in quarters.
/// The rest absorbs timer granularity and scheduling jitter.
const DISPATCH_QUARTERS: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EchoReply {
    pub address: Ipv4Addr,
    pub rtt: Duration,
}

/// Messages from the sender to the aggregator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepEvent {
    Reply(EchoReply),
    Silent(Ipv4Addr),
    Lifecycle(Lifecycle),
}

/// Aggregator state. `Done` is terminal: once entered, nothing leaves it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepPhase {
    Sending,
    Emitting,
    Done(Lifecycle),
}

impl SweepPhase {
    pub fn on_reply(self) -> Self {
        match self {
            SweepPhase::Done(_) => self,
            _ => SweepPhase::Emitting,
        }
    }

    pub fn on_signal(self, signal: Lifecycle) -> Self {
        match self {
            SweepPhase::Done(_) => self,
            _ => SweepPhase::Done(signal),
        }
    }

    pub fn finished(self) -> Option<Lifecycle> {
        match self {
            SweepPhase::Done(signal) => Some(signal),
            _ => None,
        }
    }
}

/// Summary of a streaming run; the records themselves went to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepSummary {
    pub candidates: u64,
    pub probed: u64,
    pub emitted: usize,
    pub ended_by: Lifecycle,
}

pub struct HostDiscovery<P, R> {
    config: DiscoveryConfig,
    prober: Arc<P>,
    resolver: Arc<R>,
}

impl<P: EchoProber, R: ReverseResolver> HostDiscovery<P, R> {
    pub fn new(config: DiscoveryConfig, prober: P, resolver: R) -> Self {
        Self {
            config,
            prober: Arc::new(prober),
            resolver: Arc::new(resolver),
        }
    }

    pub fn config(&self) -> &DiscoveryConfig {
        &self.config
    }

    /// Sweep `cidr` for `sweep` and return every host that answered.
    pub async fn discover(&self, cidr: &str, sweep: Duration) -> Result<Vec<HostRecord>, ReconError> {
        let report = self
            .discover_with_cancel(cidr, sweep, CancellationToken::new())
            .await?;
        Ok(report.hosts)
    }

    pub async fn discover_with_cancel(
        &self,
        cidr: &str,
        sweep: Duration,
        cancel: CancellationToken,
    ) -> Result<DiscoveryReport, ReconError> {
        let started_at = now_rfc3339();
        let (tx, mut rx) = mpsc::channel(EVENT_QUEUE);
        let collect = async move {
            let mut hosts = Vec::new();
            while let Some(host) = rx.recv().await {
                hosts.push(host);
            }
            hosts
        };
        let (summary, hosts) = tokio::join!(self.discover_streaming(cidr, sweep, cancel, tx), collect);
        let summary = summary?;
        Ok(DiscoveryReport {
            cidr: cidr.trim().to_string(),
            started_at,
            candidates: summary.candidates,
            probed: summary.probed,
            ended_by: summary.ended_by,
            hosts,
        })
    }

    /// Stream records into `out` as replies arrive.
    ///
    /// Returns after the lifecycle signal once every pending lookup has
    /// resolved; `out` is dropped at that point.
    pub async fn discover_streaming(
        &self,
        cidr: &str,
        sweep: Duration,
        cancel: CancellationToken,
        out: mpsc::Sender<HostRecord>,
    ) -> Result<SweepSummary, ReconError> {
        let range = AddressRange::parse(cidr)?;
        let deadline = Instant::now().checked_add(sweep).ok_or_else(|| {
            ReconError::InvalidConfig(format!("sweep duration {sweep:?} is out of range"))
        })?;
        let cap = self.config.concurrency_cap;
        let wait = echo_wait(sweep, range.len(), cap, self.config.echo_timeout());
        info!(
            cidr = %range,
            candidates = range.len(),
            sweep_secs = sweep.as_secs_f64(),
            cap,
            echo_wait_ms = wait.as_secs_f64() * 1e3,
            "starting host discovery"
        );
        if wait < self.config.echo_timeout() {
            warn!(
                echo_wait_ms = wait.as_secs_f64() * 1e3,
                "range is large for the sweep window, echo waits shortened"
            );
        }

        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE);
        let sender = tokio::spawn(run_sender(
            range,
            self.prober.clone(),
            cap,
            deadline,
            wait,
            cancel.clone(),
            events_tx,
        ));
        let aggregator = tokio::spawn(run_aggregator(
            events_rx,
            self.resolver.clone(),
            self.config.dns_timeout(),
            cancel,
            out,
        ));

        let probed = sender.await?;
        let (ended_by, emitted) = aggregator.await?;
        if probed < range.len() {
            warn!(
                probed,
                candidates = range.len(),
                "sweep window closed before every address was sent an echo"
            );
        }
        info!(hosts_up = emitted, ?ended_by, "host discovery finished");

        Ok(SweepSummary {
            candidates: range.len(),
            probed,
            emitted,
            ended_by,
        })
    }
}

async fn run_sender<P: EchoProber>(
    range: AddressRange,
    prober: Arc<P>,
    cap: usize,
    deadline: Instant,
    wait: Duration,
    cancel: CancellationToken,
    events: mpsc::Sender<SweepEvent>,
) -> u64 {
    let window = cancel.child_token();
    let pool = WorkerPool::new(cap, window.clone());

    let close_window = {
        let window = window.clone();
        async move {
            tokio::select! {
                _ = time::sleep_until(deadline) => {}
                _ = window.cancelled() => {}
            }
            window.cancel();
        }
    };

    let probes = pool.run(
        range.iter().take_while(move |_| Instant::now() < deadline),
        move |addr| {
            let prober = prober.clone();
            async move {
                let remaining = deadline.saturating_duration_since(Instant::now());
                match prober.probe(addr, wait.min(remaining)).await {
                    Some(rtt) => SweepEvent::Reply(EchoReply { address: addr, rtt }),
                    None => SweepEvent::Silent(addr),
                }
            }
        },
        events.clone(),
    );

    let (probed, ()) = tokio::join!(probes, close_window);

    let signal = if cancel.is_cancelled() {
        Lifecycle::Terminate
    } else {
        Lifecycle::Idle
    };
    debug!(probed, ?signal, "sender done");
    let _ = events.send(SweepEvent::Lifecycle(signal)).await;
    probed
}

/// Longest an echo may hold its pool slot so that every address in a range of
/// `candidates` is dispatched within the first three quarters of `sweep`.
pub fn echo_wait(sweep: Duration, candidates: u64, cap: usize, echo_timeout: Duration) -> Duration {
    let cap = cap.max(1) as u64;
    let rounds = candidates.div_ceil(cap).max(1);
    let budget = sweep / 4 * DISPATCH_QUARTERS;
    let per_round = Duration::from_nanos((budget.as_nanos() / u128::from(rounds)) as u64);
    echo_timeout.min(per_round)
}

async fn run_aggregator<R: ReverseResolver>(
    mut events: mpsc::Receiver<SweepEvent>,
    resolver: Arc<R>,
    dns_timeout: Duration,
    cancel: CancellationToken,
    out: mpsc::Sender<HostRecord>,
) -> (Lifecycle, usize) {
    let mut phase = SweepPhase::Sending;
    let mut lookups: JoinSet<HostRecord> = JoinSet::new();
    let mut emitted = 0usize;

    let ended_by = loop {
        if let Some(signal) = phase.finished() {
            break signal;
        }
        tokio::select! {
            Some(done) = lookups.join_next(), if !lookups.is_empty() => {
                if let Ok(record) = done {
                    emit(&out, record, &mut emitted).await;
                }
            }
            event = events.recv() => match event {
                Some(SweepEvent::Reply(reply)) => {
                    debug!(addr = %reply.address, rtt_ms = reply.rtt.as_secs_f64() * 1e3, "echo reply");
                    phase = phase.on_reply();
                    lookups.spawn(enrich(resolver.clone(), reply, dns_timeout, cancel.clone()));
                }
                Some(SweepEvent::Silent(addr)) => trace!(%addr, "silent"),
                Some(SweepEvent::Lifecycle(signal)) => phase = phase.on_signal(signal),
                // Sender gone without a signal; treat as an abort.
                None => phase = phase.on_signal(Lifecycle::Terminate),
            }
        }
    };

    while let Some(done) = lookups.join_next().await {
        if let Ok(record) = done {
            emit(&out, record, &mut emitted).await;
        }
    }
    (ended_by, emitted)
}

async fn emit(out: &mpsc::Sender<HostRecord>, record: HostRecord, emitted: &mut usize) {
    info!(addr = %record.address, hostnames = ?record.hostnames, "host up");
    if out.send(record).await.is_ok() {
        *emitted += 1;
    }
}

async fn enrich<R: ReverseResolver>(
    resolver: Arc<R>,
    reply: EchoReply,
    dns_timeout: Duration,
    cancel: CancellationToken,
) -> HostRecord {
    let lookup = time::timeout(dns_timeout, resolver.reverse(IpAddr::V4(reply.address)));
    let names = tokio::select! {
        _ = cancel.cancelled() => None,
        res = lookup => match res {
            Ok(Ok(names)) if !names.is_empty() => Some(names),
            Ok(Ok(_)) => None,
            Ok(Err(e)) => {
                debug!(addr = %reply.address, error = %e, "reverse lookup failed");
                None
            }
            Err(_) => {
                debug!(addr = %reply.address, "reverse lookup timed out");
                None
            }
        },
    };
    let hostnames = names.unwrap_or_else(|| vec![UNKNOWN_HOSTNAME.to_string()]);
    HostRecord::up(reply.address, hostnames, reply.rtt)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replies_move_sending_to_emitting() {
        let phase = SweepPhase::Sending.on_reply();
        assert_eq!(phase, SweepPhase::Emitting);
        assert_eq!(phase.on_reply(), SweepPhase::Emitting);
        assert_eq!(phase.finished(), None);
    }

    #[test]
    fn terminal_phase_is_sticky() {
        let done = SweepPhase::Emitting.on_signal(Lifecycle::Idle);
        assert_eq!(done.finished(), Some(Lifecycle::Idle));
        assert_eq!(done.on_reply(), done);
        assert_eq!(done.on_signal(Lifecycle::Terminate), done);
    }

    #[test]
    fn echo_wait_uses_the_timeout_when_one_round_fits() {
        let wait = echo_wait(Duration::from_secs(10), 256, 256, Duration::from_secs(1));
        assert_eq!(wait, Duration::from_secs(1));
    }

    #[test]
    fn echo_wait_shrinks_so_every_round_fits() {
        // 1024 addresses at 256 per round: four rounds in 1.5 s.
        let wait = echo_wait(Duration::from_secs(2), 1024, 256, Duration::from_secs(1));
        assert_eq!(wait, Duration::from_millis(375));
        assert!(wait * 4 < Duration::from_secs(2));

        let wait = echo_wait(Duration::from_secs(10), 1 << 16, 256, Duration::from_secs(1));
        assert!(wait * 256 <= Duration::from_millis(7_500));
        assert!(wait > Duration::ZERO);
    }

    #[test]
    fn idle_without_any_reply() {
        let done = SweepPhase::Sending.on_signal(Lifecycle::Idle);
        assert_eq!(done, SweepPhase::Done(Lifecycle::Idle));
    }
}
