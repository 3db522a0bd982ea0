//! Subscriber event stream types
//!
//! Every internal signal — connection handshakes, reconciliation deltas,
//! discovery warnings, credit passes — is republished on a single broadcast
//! stream so callers observe one consistent ordering per receiver.

use std::fmt;

use bytes::Bytes;

/// Warning codes carried by [`SubscriberEvent::Warn`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarnCode {
    /// A discovery source could not be queried or returned a malformed body
    LookupError,
}

impl WarnCode {
    /// Stable string form of the code
    pub fn as_str(&self) -> &'static str {
        match self {
            WarnCode::LookupError => "ELOOKUPERROR",
        }
    }
}

impl fmt::Display for WarnCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One message delivered by a producer connection.
///
/// Payload semantics are opaque to the client; the body is surfaced as raw
/// bytes and the message is acknowledged automatically on delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Producer-assigned message id
    pub id: String,
    /// Delivery attempt count reported by the producer
    pub attempts: u16,
    /// Producer-side timestamp, nanoseconds since epoch
    pub timestamp: i64,
    /// Raw message body
    pub body: Bytes,
}

/// Events observable on the subscriber's broadcast stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriberEvent {
    /// A connection completed its handshake and can receive credit
    Ready {
        /// Producer host
        host: String,
        /// Producer port
        port: u16,
    },
    /// A connection was removed from the registry
    Removed {
        /// Producer host
        host: String,
        /// Producer port
        port: u16,
    },
    /// A non-fatal problem, e.g. an unreachable discovery source
    Warn {
        /// What went wrong
        code: WarnCode,
        /// Normalized base URL of the affected discovery source
        host: String,
    },
    /// One discovery poll cycle finished, including reconciliation
    PollComplete,
    /// One credit distribution pass finished
    DistributeComplete,
    /// A message arrived on one of the pool's connections
    Message(Message),
    /// The subscriber finished closing; no further events follow
    Close,
}
