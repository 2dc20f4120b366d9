use thiserror::Error;

/// Errors surfaced by the reconnaissance engines.
///
/// Everything here is fatal for the run that produced it. Per-target failures
/// (a refused connect, a silent host, a missing PTR record) are ordinary
/// values in the result set and never show up as a `ReconError`.
#[derive(Debug, Error)]
pub enum ReconError {
    #[error("invalid range spec `{spec}`: {reason}")]
    InvalidRangeSpec { spec: String, reason: String },

    #[error("invalid port range {start}-{end}: start is greater than end")]
    InvalidPortRange { start: u16, end: u16 },

    #[error("could not resolve host `{0}`")]
    UnresolvableHost(String),

    #[error("ICMP transport unavailable (raw socket privileges?): {0}")]
    IcmpUnavailable(#[source] std::io::Error),

    #[error("run cancelled after {completed} of {expected} probes")]
    Cancelled { completed: u64, expected: u64 },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl ReconError {
    pub(crate) fn invalid_range(spec: &str, reason: impl ToString) -> Self {
        Self::InvalidRangeSpec {
            spec: spec.to_string(),
            reason: reason.to_string(),
        }
    }
}
