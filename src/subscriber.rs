//! Subscriber facade and its per-instance coordinator task
//!
//! ## Purpose
//!
//! The subscriber wires discovery, the connection registry, and credit
//! distribution together behind one event stream. All mutable coordination
//! state — the registry contents, the ready list, the rotation cursor — is
//! owned by a single coordinator task, so reconciliation, distribution, and
//! close can never interleave.
//!
//! ## Architecture Role
//!
//! ```text
//! discovery sources ──poll──▶ Discoverer ──reconcile──▶ ConnectionRegistry
//!                                 │                          │ handles
//!                                 ▼                          ▼
//!                          coordinator task ◀──signals── connection tasks
//!                                 │
//!                                 ├── Distributor (credit passes)
//!                                 └── broadcast event stream ──▶ caller
//! ```
//!
//! The coordinator serializes everything through one `select!` loop: poll
//! timer ticks (coalesced if a poll is still in flight), connection lifecycle
//! signals, and the close request. Close is biased ahead of the timer so no
//! new poll starts once shutdown is requested, and because polls are awaited
//! inside the loop, a close issued mid-poll waits for that poll's
//! reconciliation before tearing anything down.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config::SubscriberConfig;
use crate::connection::{ConnSignal, ConnectionSpawner};
use crate::discover::Discoverer;
use crate::distribute::Distributor;
use crate::endpoint::Endpoint;
use crate::error::Result;
use crate::events::SubscriberEvent;
use crate::registry::ConnectionRegistry;

/// Capacity of the broadcast event stream; slow receivers observe a lag
/// error rather than blocking the coordinator.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Consumer-side handle to a topic/channel subscription.
///
/// Starts in static mode (direct `host`/`port`, one connection, no
/// discovery) or discovery mode (one or more lookup addresses, periodic
/// polling), depending on the configuration.
pub struct Subscriber {
    config: Arc<SubscriberConfig>,
    registry: Arc<ConnectionRegistry>,
    events_tx: broadcast::Sender<SubscriberEvent>,
    /// Receiver subscribed before the coordinator starts, so the first
    /// caller of `events()` cannot miss startup events
    initial_rx: std::sync::Mutex<Option<broadcast::Receiver<SubscriberEvent>>>,
    close_tx: mpsc::Sender<oneshot::Sender<()>>,
}

impl Subscriber {
    /// Validate the configuration and start the subscriber.
    ///
    /// In discovery mode the first poll runs immediately; in static mode the
    /// single connection starts its handshake immediately. Either way this
    /// returns without waiting for any connection to become ready — observe
    /// [`SubscriberEvent::Ready`] on [`events`](Self::events) for that.
    pub async fn connect(config: SubscriberConfig) -> Result<Self> {
        config.validate()?;
        let config = Arc::new(config);
        let registry = Arc::new(ConnectionRegistry::new());

        let (events_tx, initial_rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let (close_tx, close_rx) = mpsc::channel(1);

        let spawner = ConnectionSpawner {
            cfg: Arc::clone(&config),
            signal_tx,
            events: events_tx.clone(),
        };

        let discoverer = if config.discovery_mode() {
            Some(Discoverer::new(
                &config,
                Arc::clone(&registry),
                spawner.clone(),
                events_tx.clone(),
            )?)
        } else {
            None
        };

        let coordinator = Coordinator {
            cfg: Arc::clone(&config),
            registry: Arc::clone(&registry),
            events: events_tx.clone(),
            signal_rx,
            close_rx,
            discoverer,
            spawner,
            distributor: Distributor::new(config.concurrency),
            ready_order: Vec::new(),
        };
        tokio::spawn(coordinator.run());

        Ok(Self {
            config,
            registry,
            events_tx,
            initial_rx: std::sync::Mutex::new(Some(initial_rx)),
            close_tx,
        })
    }

    /// Subscribe to the event stream.
    ///
    /// The first call returns a receiver that has been subscribed since
    /// before the subscriber started; later calls observe events from the
    /// moment they subscribe.
    pub fn events(&self) -> broadcast::Receiver<SubscriberEvent> {
        self.initial_rx
            .lock()
            .expect("event receiver mutex poisoned")
            .take()
            .unwrap_or_else(|| self.events_tx.subscribe())
    }

    /// Read-only view of the live connection registry
    pub fn connections(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Number of live connections
    pub fn connection_count(&self) -> usize {
        self.registry.len()
    }

    /// The configuration this subscriber was started with
    pub fn config(&self) -> &SubscriberConfig {
        &self.config
    }

    /// Close the subscriber.
    ///
    /// Safe to call at any time, including while a discovery poll is in
    /// flight: the poll finishes its reconciliation first, then every
    /// remaining connection is torn down (each emitting
    /// [`SubscriberEvent::Removed`]) before [`SubscriberEvent::Close`].
    /// Resolves once every connection has reported closed. Subsequent calls
    /// return immediately.
    pub async fn close(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.close_tx.send(ack_tx).await.is_err() {
            return;
        }
        let _ = ack_rx.await;
    }
}

/// Single owner of all per-subscriber coordination state
struct Coordinator {
    cfg: Arc<SubscriberConfig>,
    registry: Arc<ConnectionRegistry>,
    events: broadcast::Sender<SubscriberEvent>,
    signal_rx: mpsc::UnboundedReceiver<ConnSignal>,
    close_rx: mpsc::Receiver<oneshot::Sender<()>>,
    discoverer: Option<Discoverer>,
    spawner: ConnectionSpawner,
    distributor: Distributor,
    /// Ready connections in the order they became ready
    ready_order: Vec<String>,
}

impl Coordinator {
    async fn run(mut self) {
        if self.discoverer.is_some() {
            let removed = self
                .discoverer
                .as_ref()
                .expect("guarded by discovery mode")
                .poll()
                .await;
            self.after_removals(removed);
        } else {
            match (self.cfg.host.clone(), self.cfg.port) {
                (Some(host), Some(port)) => {
                    let endpoint = Endpoint::new(host, port);
                    info!("Starting static subscriber for producer {}", endpoint);
                    self.registry.insert(self.spawner.spawn(endpoint));
                }
                _ => {
                    // Unreachable past validation; bail rather than idle
                    warn!("Subscriber started without host/port or lookup addresses");
                    let _ = self.events.send(SubscriberEvent::Close);
                    return;
                }
            }
        }

        let mut interval = tokio::time::interval(self.cfg.discover_frequency);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The immediate first tick is the poll that already happened
        interval.tick().await;

        loop {
            tokio::select! {
                biased;
                close = self.close_rx.recv() => {
                    self.shutdown().await;
                    if let Some(ack) = close {
                        let _ = ack.send(());
                    }
                    return;
                }
                Some(signal) = self.signal_rx.recv() => self.handle_signal(signal),
                _ = interval.tick(), if self.discoverer.is_some() => {
                    let removed = self
                        .discoverer
                        .as_ref()
                        .expect("guarded by discovery mode")
                        .poll()
                        .await;
                    self.after_removals(removed);
                }
            }
        }
    }

    fn handle_signal(&mut self, signal: ConnSignal) {
        match signal {
            ConnSignal::Ready(endpoint) => {
                let key = endpoint.key();
                if !self.registry.contains(&key) {
                    // Raced with a reconciliation removal
                    debug!("Ready signal for unregistered producer {}", key);
                    return;
                }

                let _ = self.events.send(SubscriberEvent::Ready {
                    host: endpoint.host,
                    port: endpoint.port,
                });

                if self.ready_order.iter().any(|k| *k == key) {
                    // Duplicate ready for a tracked connection; just rerun
                    self.run_pass();
                } else {
                    let before = self.ready_order.len();
                    self.ready_order.push(key);
                    if self.distributor.pass_needed_on_ready(before) {
                        self.run_pass();
                    }
                }
            }
            ConnSignal::Lost(endpoint) => {
                let key = endpoint.key();
                debug!("Connection {} dropped, awaiting reconnect", key);
                if self.remove_from_ready(&key) {
                    // Reclaim the dropped session's credit so the next pass
                    // can hand the full budget to a live connection.
                    self.registry.set_credit(&key, 0);
                    self.run_pass();
                }
            }
            ConnSignal::CreditExhausted(endpoint) => {
                debug!("Credit exhausted on {}", endpoint);
                self.run_pass();
            }
            ConnSignal::Closed(endpoint) => {
                debug!("Connection {} reported closed", endpoint);
            }
            ConnSignal::Failed(endpoint) => {
                let key = endpoint.key();
                warn!("Producer connection {} permanently failed, dropping", key);
                self.registry.remove(&key);
                let was_ready = self.remove_from_ready(&key);
                let _ = self.events.send(SubscriberEvent::Removed {
                    host: endpoint.host,
                    port: endpoint.port,
                });
                if was_ready {
                    self.run_pass();
                }
            }
        }
    }

    /// Drop reconciliation-removed keys from the ready list and redistribute
    /// if the ready set actually changed
    fn after_removals(&mut self, removed: Vec<String>) {
        let mut changed = false;
        for key in &removed {
            changed |= self.remove_from_ready(key);
        }
        if changed {
            self.run_pass();
        }
    }

    fn remove_from_ready(&mut self, key: &str) -> bool {
        if !self.ready_order.iter().any(|k| k == key) {
            return false;
        }
        self.distributor.on_removed(key, &self.ready_order);
        self.ready_order.retain(|k| k != key);
        true
    }

    fn run_pass(&mut self) {
        self.distributor.distribute(&self.ready_order, &self.registry);
        let _ = self.events.send(SubscriberEvent::DistributeComplete);
    }

    /// Tear down every remaining connection, then announce close
    async fn shutdown(&mut self) {
        info!(
            "Closing subscriber, tearing down {} connections",
            self.registry.len()
        );

        let mut keys = self.registry.keys();
        keys.sort();
        for key in keys {
            if let Some(handle) = self.registry.remove(&key) {
                let endpoint = handle.endpoint().clone();
                handle.teardown().await;
                let _ = self.events.send(SubscriberEvent::Removed {
                    host: endpoint.host,
                    port: endpoint.port,
                });
            }
        }
        self.ready_order.clear();

        let _ = self.events.send(SubscriberEvent::Close);
    }
}
