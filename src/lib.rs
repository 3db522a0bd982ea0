//! # Burrow Client — Subscriber Side
//!
//! ## Purpose
//!
//! Consumer-side client library for the Burrow distributed topic/channel
//! message queue. Producers register themselves with one or more discovery
//! services; this crate finds them, opens one connection per producer, keeps
//! the connection set current as producers join or leave, and shares a
//! bounded flow-control credit budget fairly across the pool.
//!
//! ## Integration Points
//!
//! - **Input**: HTTP discovery services (`/lookup?topic=...`) and framed-TCP
//!   producer connections
//! - **Output**: a single broadcast event stream (`Ready`, `Removed`, `Warn`,
//!   `PollComplete`, `DistributeComplete`, `Message`, `Close`) plus a
//!   read-only registry view with per-connection credit
//! - **Recovery**: per-connection reconnect with capped backoff; per-source
//!   discovery failures are warnings, retried every cycle indefinitely
//! - **Shutdown**: cooperative — a close issued mid-poll waits for that
//!   poll's reconciliation, then tears down every connection
//!
//! ## Usage
//!
//! ```no_run
//! use burrow_client::{Subscriber, SubscriberConfig, SubscriberEvent};
//!
//! # async fn run() -> burrow_client::Result<()> {
//! let subscriber = Subscriber::connect(SubscriberConfig {
//!     topic: "events".to_string(),
//!     channel: "workers".to_string(),
//!     lookup: vec!["127.0.0.1:4161".to_string()],
//!     ..SubscriberConfig::default()
//! })
//! .await?;
//!
//! let mut events = subscriber.events();
//! while let Ok(event) = events.recv().await {
//!     if let SubscriberEvent::Message(msg) = event {
//!         println!("got {} bytes", msg.body.len());
//!     }
//! }
//!
//! subscriber.close().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod connection;
mod discover;
mod distribute;
pub mod endpoint;
pub mod error;
pub mod events;
mod lookup;
pub mod registry;
pub mod subscriber;

pub use config::SubscriberConfig;
pub use connection::{ConnState, ConnectionHandle};
pub use endpoint::Endpoint;
pub use error::{ClientError, Result};
pub use events::{Message, SubscriberEvent, WarnCode};
pub use registry::{ConnectionInfo, ConnectionRegistry};
pub use subscriber::Subscriber;
