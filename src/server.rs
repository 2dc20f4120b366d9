use std::sync::Arc;

use anyhow::Result;
use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::{
    config::ReconConfig,
    discovery::HostDiscovery,
    dns::SystemResolver,
    error::ReconError,
    icmp::IcmpProber,
    ports,
    range::AddressRange,
    scanner::{self, PortScanner},
    types::{DiscoveryReport, Lifecycle, ScanReport},
};

#[derive(Clone)]
pub struct AppState {
    inner: Arc<RwLock<ServerState>>,
    config: Arc<ReconConfig>,
}

impl AppState {
    pub fn new(config: ReconConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(ServerState::default())),
            config: Arc::new(config),
        }
    }
}

#[derive(Debug, Default)]
struct ServerState {
    job_id: u64,
    status: Status,
    results: Option<Report>,
    cancel: Option<CancellationToken>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    #[default]
    Idle,
    Running,
    Done,
    Cancelled,
    Failed,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Scan,
    Discover,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Status {
    pub kind: Option<JobKind>,
    pub state: JobState,
    /// Ports or addresses the job covers.
    pub total: u64,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Report {
    Scan(ScanReport),
    Discovery(DiscoveryReport),
}

#[derive(Debug, Deserialize)]
pub struct ScanRequest {
    pub host: String,
    /// `start-end` or a single port.
    #[serde(default = "default_ports")]
    pub ports: String,
    #[serde(default)]
    pub concurrency: Option<usize>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

fn default_ports() -> String {
    "1-1024".to_string()
}

#[derive(Debug, Deserialize)]
pub struct DiscoverRequest {
    pub cidr: String,
    #[serde(default)]
    pub sweep_secs: Option<u64>,
}

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/status", get(get_status))
        .route("/results", get(get_results))
        .route("/scan", post(post_scan))
        .route("/discover", post(post_discover))
        .route("/cancel", post(post_cancel))
        .with_state(state);

    Router::new()
        .nest("/api", api)
        .layer(TraceLayer::new_for_http())
}

pub async fn spawn_server(bind: &str, config: ReconConfig) -> Result<()> {
    let app = router(AppState::new(config));
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(bind, "serving API on http://{bind}/api");
    axum::serve(listener, app).await?;
    Ok(())
}

async fn get_status(State(app): State<AppState>) -> impl IntoResponse {
    let s = app.inner.read().await;
    (StatusCode::OK, Json(s.status.clone()))
}

async fn get_results(State(app): State<AppState>) -> impl IntoResponse {
    let s = app.inner.read().await;
    if let Some(res) = s.results.as_ref() {
        (StatusCode::OK, Json(res.clone())).into_response()
    } else {
        StatusCode::NO_CONTENT.into_response()
    }
}

async fn post_cancel(State(app): State<AppState>) -> impl IntoResponse {
    let s = app.inner.read().await;
    match (&s.cancel, s.status.state) {
        (Some(cancel), JobState::Running) => {
            cancel.cancel();
            (StatusCode::ACCEPTED, Json(s.status.clone())).into_response()
        }
        _ => (StatusCode::CONFLICT, "no job running").into_response(),
    }
}

async fn post_scan(State(app): State<AppState>, Json(req): Json<ScanRequest>) -> impl IntoResponse {
    let range = match ports::parse_port_range(&req.ports) {
        Ok(r) => r,
        Err(e) => return (StatusCode::BAD_REQUEST, format!("invalid ports: {e:#}")).into_response(),
    };

    let mut config = app.config.scan.clone();
    if let Some(c) = req.concurrency {
        config.concurrency_cap = c;
    }
    if let Some(t) = req.timeout_ms {
        config.timeout_ms = t;
    }
    let check = ReconConfig {
        scan: config.clone(),
        discovery: app.config.discovery.clone(),
    };
    if let Err(e) = check.validate() {
        return (StatusCode::BAD_REQUEST, e.to_string()).into_response();
    }

    let ip = match scanner::resolve_host(&req.host).await {
        Ok(ip) => ip,
        Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    };

    let (job_id, cancel, status) = begin_job(&app, JobKind::Scan, range.len()).await;
    let host = req.host;
    let app2 = app.clone();
    tokio::spawn(async move {
        let scanner = PortScanner::new(config);
        let outcome = scanner.scan_addr(ip, range, cancel).await.map(|mut report| {
            report.host = host;
            Report::Scan(report)
        });
        finish_job(&app2, job_id, outcome).await;
    });

    (StatusCode::ACCEPTED, Json(status)).into_response()
}

async fn post_discover(
    State(app): State<AppState>,
    Json(req): Json<DiscoverRequest>,
) -> impl IntoResponse {
    let range = match AddressRange::parse(&req.cidr) {
        Ok(r) => r,
        Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    };
    let mut config = app.config.discovery.clone();
    if let Some(s) = req.sweep_secs {
        config.sweep_secs = s;
    }
    let check = ReconConfig {
        scan: app.config.scan.clone(),
        discovery: config.clone(),
    };
    if let Err(e) = check.validate() {
        return (StatusCode::BAD_REQUEST, e.to_string()).into_response();
    }
    let sweep = config.sweep_duration();

    let prober = match IcmpProber::open() {
        Ok(p) => p,
        Err(e) => return (StatusCode::SERVICE_UNAVAILABLE, e.to_string()).into_response(),
    };

    let (job_id, cancel, status) = begin_job(&app, JobKind::Discover, range.len()).await;
    let cidr = req.cidr;
    let app2 = app.clone();
    tokio::spawn(async move {
        let engine = HostDiscovery::new(config, prober, SystemResolver::new());
        let outcome = engine
            .discover_with_cancel(&cidr, sweep, cancel)
            .await
            .map(Report::Discovery);
        finish_job(&app2, job_id, outcome).await;
    });

    (StatusCode::ACCEPTED, Json(status)).into_response()
}

/// Register a new job, cancelling whatever was running before it.
async fn begin_job(app: &AppState, kind: JobKind, total: u64) -> (u64, CancellationToken, Status) {
    let cancel = CancellationToken::new();
    let mut s = app.inner.write().await;
    if let Some(previous) = s.cancel.take() {
        previous.cancel();
    }
    s.job_id += 1;
    s.status = Status {
        kind: Some(kind),
        state: JobState::Running,
        total,
        error: None,
    };
    s.results = None;
    s.cancel = Some(cancel.clone());
    (s.job_id, cancel, s.status.clone())
}

async fn finish_job(app: &AppState, job_id: u64, outcome: Result<Report, ReconError>) {
    let mut s = app.inner.write().await;
    if s.job_id != job_id {
        // Superseded by a newer job.
        return;
    }
    s.cancel = None;
    match outcome {
        Ok(report) => {
            s.status.state = match &report {
                Report::Discovery(r) if r.ended_by == Lifecycle::Terminate => JobState::Cancelled,
                _ => JobState::Done,
            };
            s.results = Some(report);
        }
        Err(ReconError::Cancelled { .. }) => {
            s.status.state = JobState::Cancelled;
        }
        Err(e) => {
            warn!(error = %e, "job failed");
            s.status.state = JobState::Failed;
            s.status.error = Some(e.to_string());
        }
    }
}
