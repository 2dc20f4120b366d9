use std::fs::File;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use lan_recon_rs::config::ReconConfig;
use lan_recon_rs::discovery::HostDiscovery;
use lan_recon_rs::dns::SystemResolver;
use lan_recon_rs::icmp::IcmpProber;
use lan_recon_rs::listener::{self, ReplyMode};
use lan_recon_rs::ports::PortRange;
use lan_recon_rs::progress::ProgressReporter;
use lan_recon_rs::range::AddressRange;
use lan_recon_rs::scanner::PortScanner;
use lan_recon_rs::types::{DiscoveryReport, ScanReport};
use lan_recon_rs::{logging, netdetect, server, ReconError};

/// lan-recon-rs — bounded TCP connect scanner and ICMP host discovery for local networks.
#[derive(Debug, Parser)]
#[command(name = "lan-recon-rs", version, about, long_about = None)]
struct Cli {
    /// JSON config file; flags override its values.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines.
    #[arg(long = "json-logs", global = true, default_value_t = false)]
    json_logs: bool,

    /// Write the full report as pretty JSON to this path.
    #[arg(long, global = true)]
    output: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// TCP connect scan of a port range on one host.
    Scan {
        #[arg(short = 'H', long, default_value = "localhost")]
        hostname: String,

        #[arg(short, long = "start-port", default_value_t = 1)]
        start_port: u16,

        #[arg(short, long = "end-port", default_value_t = 1024)]
        end_port: u16,

        /// Max concurrent TCP connect attempts.
        #[arg(long)]
        concurrency: Option<usize>,

        /// Per-port connect timeout in milliseconds.
        #[arg(long = "timeout-ms")]
        timeout_ms: Option<u64>,
    },
    /// ICMP echo sweep of a CIDR with reverse DNS on responders.
    Discover {
        /// CIDR to sweep. If omitted, the first local /24 is used.
        #[arg(short, long)]
        cidr: Option<String>,

        /// How long to wait for echo replies, in seconds.
        #[arg(short = 't', long = "sweep-secs")]
        sweep_secs: Option<u64>,

        #[arg(long = "no-progress", default_value_t = false)]
        no_progress: bool,
    },
    /// Line-oriented TCP server that echoes or answers with a fixed reply.
    Listen {
        #[arg(short, long, default_value_t = 5000)]
        port: u16,

        /// Reply message; `ECHO` echoes each line back.
        #[arg(short, long, default_value = "ECHO")]
        reply: String,
    },
    /// HTTP JSON API for scan and discovery jobs.
    Serve {
        #[arg(long, default_value = "127.0.0.1:8080")]
        bind: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.json_logs)?;

    let mut config = match cli.config.as_deref() {
        Some(path) => ReconConfig::load(path)?,
        None => ReconConfig::default(),
    };

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, stopping");
            ctrl_c.cancel();
        }
    });

    match cli.command {
        Command::Scan {
            hostname,
            start_port,
            end_port,
            concurrency,
            timeout_ms,
        } => {
            if let Some(c) = concurrency {
                config.scan.concurrency_cap = c;
            }
            if let Some(t) = timeout_ms {
                config.scan.timeout_ms = t;
            }
            config.validate()?;
            let range = PortRange::new(start_port, end_port)?;
            let scanner = PortScanner::new(config.scan);
            let report = scanner.scan_with_cancel(&hostname, range, cancel).await?;
            print_scan_table(&report);
            write_output(cli.output.as_deref(), &report);
        }
        Command::Discover {
            cidr,
            sweep_secs,
            no_progress,
        } => {
            if let Some(s) = sweep_secs {
                config.discovery.sweep_secs = s;
            }
            if no_progress {
                config.discovery.progress = false;
            }
            config.validate()?;
            let range = match cidr {
                Some(c) => AddressRange::parse(&c)?,
                None => {
                    let detected = netdetect::default_range()?;
                    info!(cidr = %detected, "no CIDR given, using local network");
                    detected
                }
            };
            let report = run_discovery(config, range, cancel).await?;
            print_discovery_table(&report);
            write_output(cli.output.as_deref(), &report);
        }
        Command::Listen { port, reply } => {
            let listener = listener::bind(port).await?;
            listener::serve(listener, ReplyMode::from_arg(&reply), cancel).await?;
        }
        Command::Serve { bind } => {
            config.validate()?;
            tokio::select! {
                res = server::spawn_server(&bind, config) => res?,
                _ = cancel.cancelled() => {}
            }
        }
    }

    Ok(())
}

async fn run_discovery(
    config: ReconConfig,
    range: AddressRange,
    cancel: CancellationToken,
) -> Result<DiscoveryReport, ReconError> {
    let prober = IcmpProber::open()?;
    let sweep = config.discovery.sweep_duration();
    let show_progress = config.discovery.progress;
    let engine = HostDiscovery::new(config.discovery, prober, SystemResolver::new());

    eprintln!(
        "This scan will run for {} seconds to find LAN peers.",
        sweep.as_secs()
    );
    let stop = cancel.child_token();
    let progress = show_progress.then(|| ProgressReporter::new(sweep.as_secs()).spawn(stop.clone()));

    let report = engine
        .discover_with_cancel(&range.to_string(), sweep, cancel)
        .await;
    stop.cancel();
    if let Some(handle) = progress {
        let _ = handle.await;
    }
    report
}

fn print_scan_table(report: &ScanReport) {
    println!(
        "\n{} ({}): {} open of {} scanned",
        report.host,
        report.address,
        report.open_count(),
        report.results.len()
    );
    println!("{:>6}  {:<6}  {:<8}", "port", "state", "protocol");
    println!("{:->6}  {:-<6}  {:-<8}", "", "", "");
    for r in report.open() {
        println!("{:>6}  {:<6}  {:<8}", r.port, r.state, r.protocol);
    }
}

fn print_discovery_table(report: &DiscoveryReport) {
    let mut ip_w = "address".len();
    for h in &report.hosts {
        ip_w = ip_w.max(h.address.to_string().len());
    }
    println!(
        "\n{}: {} hosts up ({} of {} addresses probed)",
        report.cidr,
        report.hosts.len(),
        report.probed,
        report.candidates
    );
    println!(
        "{:<ip_w$}  {:<5}  {:>10}  {}",
        "address",
        "state",
        "rtt_ms",
        "hostnames",
        ip_w = ip_w
    );
    println!("{:-<ip_w$}  {:-<5}  {:->10}  {:-<9}", "", "", "", "", ip_w = ip_w);
    for h in &report.hosts {
        println!(
            "{:<ip_w$}  {:<5}  {:>10.2}  {}",
            h.address.to_string(),
            h.state,
            h.response_time.as_secs_f64() * 1_000.0,
            h.hostnames.join(", "),
            ip_w = ip_w
        );
    }
}

fn write_output<T: Serialize>(path: Option<&Path>, report: &T) {
    let Some(path) = path else { return };
    match write_results_json(path, report) {
        Ok(()) => info!(path = %path.display(), "wrote JSON report"),
        Err(e) => warn!(path = %path.display(), error = %e, "failed to write JSON report"),
    }
}

fn write_results_json<T: Serialize>(path: &Path, report: &T) -> Result<()> {
    let file = File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    serde_json::to_writer_pretty(file, report)?;
    Ok(())
}
