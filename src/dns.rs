use std::net::IpAddr;

use anyhow::{Context, Result};
use async_trait::async_trait;
use hickory_resolver::name_server::TokioConnectionProvider;
use hickory_resolver::TokioResolver;
use tracing::warn;

/// Best-effort PTR lookup.
#[async_trait]
pub trait ReverseResolver: Send + Sync + 'static {
    async fn reverse(&self, addr: IpAddr) -> Result<Vec<String>>;
}

/// Reverse lookups through the system's configured name servers.
pub struct SystemResolver {
    resolver: Option<TokioResolver>,
}

impl SystemResolver {
    /// Never fails: without a usable system configuration every lookup
    /// errors and callers fall back to the unknown hostname.
    pub fn new() -> Self {
        let resolver = match TokioResolver::builder(TokioConnectionProvider::default()) {
            Ok(builder) => Some(builder.build()),
            Err(e) => {
                warn!(error = %e, "system resolver unavailable, hostnames will be unknown");
                None
            }
        };
        Self { resolver }
    }
}

impl Default for SystemResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ReverseResolver for SystemResolver {
    async fn reverse(&self, addr: IpAddr) -> Result<Vec<String>> {
        let resolver = self
            .resolver
            .as_ref()
            .context("no system resolver configured")?;
        let lookup = resolver
            .reverse_lookup(addr)
            .await
            .with_context(|| format!("reverse lookup failed for {addr}"))?;
        Ok(host_names(lookup.iter().map(|name| name.to_string())))
    }
}

/// Strip the root label from PTR answers and drop anything left empty.
fn host_names<I: IntoIterator<Item = String>>(answers: I) -> Vec<String> {
    answers
        .into_iter()
        .map(|name| name.trim_end_matches('.').to_string())
        .filter(|name| !name.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trailing_dots_are_trimmed() {
        let names = host_names(vec!["printer.lan.".to_string(), "nas.home.arpa".to_string()]);
        assert_eq!(names, vec!["printer.lan", "nas.home.arpa"]);
    }

    #[test]
    fn empty_answers_yield_no_names() {
        assert!(host_names(Vec::new()).is_empty());
        assert!(host_names(vec![".".to_string()]).is_empty());
    }
}
