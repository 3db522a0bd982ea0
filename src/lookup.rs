//! Discovery service addressing and queries
//!
//! Discovery sources are plain HTTP services returning the current producer
//! set for a topic. Addresses from configuration are normalized here once, at
//! construction, so every later poll and every warning event refers to the
//! same canonical base URL.

use serde::Deserialize;
use url::Url;

use crate::endpoint::Endpoint;
use crate::error::{ClientError, Result};

/// One configured discovery-service address, normalized at construction
#[derive(Debug, Clone)]
pub(crate) struct DiscoverySource {
    /// Parsed base URL used to build query URLs
    pub url: Url,
    /// Canonical string form (no trailing slash) carried in warn events
    pub display: String,
}

/// Normalize a configured lookup address into a [`DiscoverySource`].
///
/// Bare `host:port` pairs are assumed to be HTTP; full URIs with a scheme
/// other than `http`/`https` (e.g. a queue-specific lookup scheme) are
/// rewritten to plain HTTP.
pub(crate) fn normalize_lookup_addr(addr: &str) -> Result<DiscoverySource> {
    let candidate = match addr.split_once("://") {
        None => format!("http://{}", addr),
        Some(("http" | "https", _)) => addr.to_string(),
        Some((_, rest)) => format!("http://{}", rest),
    };

    let url = Url::parse(&candidate).map_err(|e| ClientError::InvalidLookupAddress {
        addr: addr.to_string(),
        reason: e.to_string(),
    })?;

    if url.host_str().is_none() {
        return Err(ClientError::InvalidLookupAddress {
            addr: addr.to_string(),
            reason: "missing host".to_string(),
        });
    }

    let display = url.as_str().trim_end_matches('/').to_string();
    Ok(DiscoverySource { url, display })
}

/// Response shape of a discovery query. Extra fields are ignored; a missing
/// `producers` list counts as a malformed response.
#[derive(Debug, Deserialize)]
struct LookupResponse {
    producers: Vec<ProducerRecord>,
}

#[derive(Debug, Deserialize)]
struct ProducerRecord {
    broadcast_address: String,
    tcp_port: u16,
}

/// Query one discovery source for the producers of `topic`.
///
/// Any failure — transport, non-2xx status, or a body that does not parse as
/// the expected structure — comes back as [`ClientError::LookupFailed`] so
/// the caller can treat this source's contribution as empty for the cycle.
pub(crate) async fn fetch_producers(
    http: &reqwest::Client,
    source: &DiscoverySource,
    topic: &str,
) -> Result<Vec<Endpoint>> {
    let mut url = source.url.clone();
    url.set_path("/lookup");
    url.query_pairs_mut().clear().append_pair("topic", topic);

    let failed = |reason: String| ClientError::LookupFailed {
        host: source.display.clone(),
        reason,
    };

    let response = http
        .get(url)
        .send()
        .await
        .map_err(|e| failed(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        return Err(failed(format!("unexpected status {}", status)));
    }

    let body: LookupResponse = response.json().await.map_err(|e| failed(e.to_string()))?;

    Ok(body
        .producers
        .into_iter()
        .map(|p| Endpoint::new(p.broadcast_address, p.tcp_port))
        .collect())
}
