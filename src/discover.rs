//! Periodic topology discovery and registry reconciliation
//!
//! Every poll queries all configured discovery sources concurrently, unions
//! the producers they report, and diffs that set against the connection
//! registry: unknown producers get a new connection, producers no longer
//! advertised get torn down. A failing source only loses its own
//! contribution for the cycle — it is warned about and retried on the next
//! poll, forever.

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::future::join_all;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::config::SubscriberConfig;
use crate::connection::ConnectionSpawner;
use crate::endpoint::Endpoint;
use crate::error::Result;
use crate::events::{SubscriberEvent, WarnCode};
use crate::lookup::{fetch_producers, normalize_lookup_addr, DiscoverySource};
use crate::registry::ConnectionRegistry;

pub(crate) struct Discoverer {
    sources: Vec<DiscoverySource>,
    topic: String,
    http: reqwest::Client,
    registry: Arc<ConnectionRegistry>,
    spawner: ConnectionSpawner,
    events: broadcast::Sender<SubscriberEvent>,
}

impl Discoverer {
    pub fn new(
        cfg: &SubscriberConfig,
        registry: Arc<ConnectionRegistry>,
        spawner: ConnectionSpawner,
        events: broadcast::Sender<SubscriberEvent>,
    ) -> Result<Self> {
        let sources = cfg
            .lookup
            .iter()
            .map(|addr| normalize_lookup_addr(addr))
            .collect::<Result<Vec<_>>>()?;
        let http = reqwest::Client::builder().timeout(cfg.timeout).build()?;

        Ok(Self {
            sources,
            topic: cfg.topic.clone(),
            http,
            registry,
            spawner,
            events,
        })
    }

    /// Run one poll cycle: query, union, reconcile.
    ///
    /// Returns the keys removed from the registry so the coordinator can
    /// update its ready list and rerun credit distribution.
    pub async fn poll(&self) -> Vec<String> {
        debug!(
            "Polling {} discovery sources for topic {}",
            self.sources.len(),
            self.topic
        );

        let fetches = self.sources.iter().map(|source| async move {
            (
                source,
                fetch_producers(&self.http, source, &self.topic).await,
            )
        });

        let mut producers: HashMap<String, Endpoint> = HashMap::new();
        for (source, result) in join_all(fetches).await {
            match result {
                Ok(endpoints) => {
                    for endpoint in endpoints {
                        producers.entry(endpoint.key()).or_insert(endpoint);
                    }
                }
                Err(e) => {
                    warn!("Discovery source {} failed: {}", source.display, e);
                    let _ = self.events.send(SubscriberEvent::Warn {
                        code: WarnCode::LookupError,
                        host: source.display.clone(),
                    });
                }
            }
        }

        let removed = self.reconcile(producers).await;
        let _ = self.events.send(SubscriberEvent::PollComplete);
        removed
    }

    async fn reconcile(&self, producers: HashMap<String, Endpoint>) -> Vec<String> {
        for (key, endpoint) in &producers {
            if !self.registry.contains(key) {
                info!("Discovered new producer {}", key);
                self.registry.insert(self.spawner.spawn(endpoint.clone()));
            }
        }

        let mut removed = Vec::new();
        for key in self.registry.keys() {
            if producers.contains_key(&key) {
                continue;
            }
            if let Some(handle) = self.registry.remove(&key) {
                info!("Producer {} no longer advertised, removing", key);
                let endpoint = handle.endpoint().clone();
                handle.teardown().await;
                let _ = self.events.send(SubscriberEvent::Removed {
                    host: endpoint.host,
                    port: endpoint.port,
                });
                removed.push(key);
            }
        }
        removed
    }
}
