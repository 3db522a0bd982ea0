//! Producer connection management with automatic reconnection
//!
//! Each connection is one stateful session to one producer endpoint, running
//! as its own task. It performs the wire handshake, answers heartbeats,
//! delivers messages while it holds flow-control credit, and reconnects with
//! capped backoff when the transport drops. The coordinator only ever sees
//! its lifecycle signals and its two commands: `set_credit` and `teardown`.

pub(crate) mod wire;

use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::BufReader;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::config::SubscriberConfig;
use crate::endpoint::Endpoint;
use crate::error::{ClientError, Result};
use crate::events::SubscriberEvent;
use wire::{Frame, Identify};

/// Connection lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnState {
    /// Attempting the initial connect and handshake
    Connecting = 0,
    /// Handshake complete, eligible for credit
    Ready = 1,
    /// Graceful close in progress
    Closing = 2,
    /// Fully closed, task has exited
    Closed = 3,
    /// Waiting out the backoff delay after a failure
    Reconnecting = 4,
}

impl ConnState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => ConnState::Ready,
            2 => ConnState::Closing,
            3 => ConnState::Closed,
            4 => ConnState::Reconnecting,
            _ => ConnState::Connecting,
        }
    }
}

/// Lifecycle signals a connection reports to the coordinator
#[derive(Debug)]
pub(crate) enum ConnSignal {
    /// Handshake completed; the connection can receive credit
    Ready(Endpoint),
    /// Established session dropped; the task is entering reconnect backoff
    Lost(Endpoint),
    /// Assigned credit fully consumed by delivered messages
    CreditExhausted(Endpoint),
    /// Graceful close finished
    Closed(Endpoint),
    /// Consecutive connect attempts exhausted; drop the registry entry
    Failed(Endpoint),
}

enum ConnCommand {
    SetCredit(u64),
    Teardown(oneshot::Sender<()>),
}

/// Owning handle to a connection task, kept in the registry.
///
/// The handle is the only way to influence a running connection; the task
/// owns the socket and all protocol state.
#[derive(Debug)]
pub struct ConnectionHandle {
    endpoint: Endpoint,
    cmd_tx: mpsc::UnboundedSender<ConnCommand>,
    credit: Arc<AtomicU64>,
    state: Arc<AtomicU8>,
    created_at: Instant,
}

impl ConnectionHandle {
    /// The producer endpoint this connection is bound to
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Last assigned flow-control credit
    pub fn credit(&self) -> u64 {
        self.credit.load(Ordering::Relaxed)
    }

    /// Current lifecycle state
    pub fn state(&self) -> ConnState {
        ConnState::from_u8(self.state.load(Ordering::Relaxed))
    }

    /// When this connection was created
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Assign flow-control credit. Idempotent, last-write-wins; a command to
    /// an already-exited task is silently dropped.
    pub(crate) fn set_credit(&self, count: u64) {
        self.credit.store(count, Ordering::Relaxed);
        let _ = self.cmd_tx.send(ConnCommand::SetCredit(count));
    }

    /// Gracefully close the connection; resolves once it is fully closed.
    pub(crate) async fn teardown(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.cmd_tx.send(ConnCommand::Teardown(ack_tx)).is_ok() {
            let _ = ack_rx.await;
        }
    }
}

#[cfg(test)]
impl ConnectionHandle {
    /// Handle with no backing task, for exercising registry and credit logic
    pub(crate) fn detached(endpoint: Endpoint) -> Self {
        let (cmd_tx, _cmd_rx) = mpsc::unbounded_channel();
        Self {
            endpoint,
            cmd_tx,
            credit: Arc::new(AtomicU64::new(0)),
            state: Arc::new(AtomicU8::new(ConnState::Ready as u8)),
            created_at: Instant::now(),
        }
    }
}

/// Everything needed to spawn connection tasks: shared configuration plus the
/// coordinator's signal channel and the subscriber's event stream.
#[derive(Clone)]
pub(crate) struct ConnectionSpawner {
    pub cfg: Arc<SubscriberConfig>,
    pub signal_tx: mpsc::UnboundedSender<ConnSignal>,
    pub events: broadcast::Sender<SubscriberEvent>,
}

impl ConnectionSpawner {
    /// Spawn a connection task for `endpoint` and return its handle
    pub fn spawn(&self, endpoint: Endpoint) -> ConnectionHandle {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let credit = Arc::new(AtomicU64::new(0));
        let state = Arc::new(AtomicU8::new(ConnState::Connecting as u8));

        let task = ConnectionTask {
            endpoint: endpoint.clone(),
            cfg: Arc::clone(&self.cfg),
            cmd_rx,
            signal_tx: self.signal_tx.clone(),
            events: self.events.clone(),
            state: Arc::clone(&state),
            remaining: 0,
        };
        tokio::spawn(task.run());

        ConnectionHandle {
            endpoint,
            cmd_tx,
            credit,
            state,
            created_at: Instant::now(),
        }
    }
}

/// Reconnect delay for the given attempt: `factor × attempt`, capped
fn reconnect_delay(cfg: &SubscriberConfig, attempt: u32) -> Duration {
    cfg.reconnect_delay_factor
        .saturating_mul(attempt)
        .min(cfg.max_reconnect_delay)
}

type FrameReader = BufReader<OwnedReadHalf>;

enum ServeExit {
    Teardown(oneshot::Sender<()>),
    HandleDropped,
    Disconnected(ClientError),
}

struct ConnectionTask {
    endpoint: Endpoint,
    cfg: Arc<SubscriberConfig>,
    cmd_rx: mpsc::UnboundedReceiver<ConnCommand>,
    signal_tx: mpsc::UnboundedSender<ConnSignal>,
    events: broadcast::Sender<SubscriberEvent>,
    state: Arc<AtomicU8>,
    /// Credit left before the next exhaustion signal
    remaining: u64,
}

impl ConnectionTask {
    fn set_state(&self, state: ConnState) {
        self.state.store(state as u8, Ordering::Relaxed);
    }

    fn signal(&self, signal: ConnSignal) {
        let _ = self.signal_tx.send(signal);
    }

    async fn run(mut self) {
        let mut attempt: u32 = 0;

        loop {
            self.set_state(ConnState::Connecting);

            match self.establish().await {
                Ok((reader, writer)) => {
                    attempt = 0;
                    self.set_state(ConnState::Ready);
                    info!("Connected to producer {}", self.endpoint);
                    self.signal(ConnSignal::Ready(self.endpoint.clone()));

                    match self.serve(reader, writer).await {
                        ServeExit::Teardown(ack) => {
                            self.set_state(ConnState::Closed);
                            debug!("Connection to {} closed", self.endpoint);
                            self.signal(ConnSignal::Closed(self.endpoint.clone()));
                            let _ = ack.send(());
                            return;
                        }
                        ServeExit::HandleDropped => {
                            self.set_state(ConnState::Closed);
                            self.signal(ConnSignal::Closed(self.endpoint.clone()));
                            return;
                        }
                        ServeExit::Disconnected(e) => {
                            warn!("Connection to {} lost: {}", self.endpoint, e);
                            self.signal(ConnSignal::Lost(self.endpoint.clone()));
                        }
                    }
                }
                Err(e) => {
                    warn!("Connection attempt to {} failed: {}", self.endpoint, e);
                }
            }

            attempt += 1;
            if attempt >= self.cfg.max_connect_attempts {
                let err = ClientError::MaxReconnectAttemptsExceeded {
                    endpoint: self.endpoint.clone(),
                    max_attempts: self.cfg.max_connect_attempts,
                };
                error!("{}", err);
                self.set_state(ConnState::Closed);
                self.signal(ConnSignal::Failed(self.endpoint.clone()));
                return;
            }

            self.set_state(ConnState::Reconnecting);
            let delay = reconnect_delay(&self.cfg, attempt);
            info!(
                "Will reconnect to {} in {}ms (attempt {})",
                self.endpoint,
                delay.as_millis(),
                attempt
            );

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(ConnCommand::SetCredit(count)) => {
                        // Applied once the handshake completes again
                        self.remaining = count;
                    }
                    Some(ConnCommand::Teardown(ack)) => {
                        self.set_state(ConnState::Closed);
                        self.signal(ConnSignal::Closed(self.endpoint.clone()));
                        let _ = ack.send(());
                        return;
                    }
                    None => {
                        self.set_state(ConnState::Closed);
                        self.signal(ConnSignal::Closed(self.endpoint.clone()));
                        return;
                    }
                },
            }
        }
    }

    /// Connect and run the handshake under the configured timeout
    async fn establish(&self) -> Result<(FrameReader, OwnedWriteHalf)> {
        let timeout_ms = self.cfg.timeout.as_millis() as u64;
        let heartbeat_ms = self
            .cfg
            .timeout
            .saturating_sub(self.cfg.keepalive_offset)
            .as_millis() as u64;
        let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string());

        let handshake = async {
            let stream = TcpStream::connect((self.endpoint.host.as_str(), self.endpoint.port))
                .await
                .map_err(|e| ClientError::ConnectionFailed {
                    endpoint: self.endpoint.clone(),
                    reason: e.to_string(),
                })?;
            stream.set_nodelay(true).ok();
            let (read_half, mut writer) = stream.into_split();
            let mut reader = BufReader::new(read_half);

            wire::send_magic(&mut writer).await?;
            wire::send_identify(
                &mut writer,
                &Identify {
                    client_id: &self.cfg.channel,
                    hostname: &hostname,
                    feature_negotiation: false,
                    msg_timeout: timeout_ms,
                    heartbeat_interval: heartbeat_ms,
                },
            )
            .await?;
            expect_ok(&mut reader, "IDENTIFY").await?;

            wire::send_sub(&mut writer, &self.cfg.topic, &self.cfg.channel).await?;
            expect_ok(&mut reader, "SUB").await?;

            Ok((reader, writer))
        };

        match timeout(self.cfg.timeout, handshake).await {
            Ok(result) => result,
            Err(_) => Err(ClientError::ConnectionTimeout {
                endpoint: self.endpoint.clone(),
                timeout_ms,
            }),
        }
    }

    /// Serve an established connection until teardown or disconnect
    async fn serve(&mut self, reader: FrameReader, mut writer: OwnedWriteHalf) -> ServeExit {
        // Reads happen on their own task so a command arriving mid-frame can
        // never truncate a partially-read frame.
        let (frame_tx, mut frame_rx) = mpsc::channel::<Result<Frame>>(16);
        let reader_task = tokio::spawn(read_loop(reader, frame_tx));

        // The producer forgets credit across reconnects
        if self.remaining > 0 {
            if let Err(e) = wire::send_rdy(&mut writer, self.remaining).await {
                reader_task.abort();
                return ServeExit::Disconnected(e);
            }
        }

        let exit = loop {
            tokio::select! {
                biased;
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(ConnCommand::SetCredit(count)) => {
                        self.remaining = count;
                        if let Err(e) = wire::send_rdy(&mut writer, count).await {
                            break ServeExit::Disconnected(e);
                        }
                    }
                    Some(ConnCommand::Teardown(ack)) => {
                        self.set_state(ConnState::Closing);
                        self.graceful_close(&mut writer, &mut frame_rx).await;
                        break ServeExit::Teardown(ack);
                    }
                    None => break ServeExit::HandleDropped,
                },
                frame = frame_rx.recv() => match frame {
                    Some(Ok(frame)) => {
                        if let Err(e) = self.handle_frame(frame, &mut writer).await {
                            break ServeExit::Disconnected(e);
                        }
                    }
                    Some(Err(e)) => break ServeExit::Disconnected(e),
                    None => {
                        break ServeExit::Disconnected(ClientError::Protocol(
                            "producer closed the stream".to_string(),
                        ));
                    }
                },
            }
        };

        reader_task.abort();
        exit
    }

    async fn handle_frame(&mut self, frame: Frame, writer: &mut OwnedWriteHalf) -> Result<()> {
        match frame {
            Frame::Response(body) if &body[..] == b"_heartbeat_" => {
                wire::send_nop(writer).await?;
            }
            Frame::Response(body) => {
                debug!(
                    "Unexpected response from {}: {}",
                    self.endpoint,
                    String::from_utf8_lossy(&body)
                );
            }
            Frame::Error(body) => {
                warn!(
                    "Producer {} reported error: {}",
                    self.endpoint,
                    String::from_utf8_lossy(&body)
                );
            }
            Frame::Message(message) => {
                if self.remaining == 0 {
                    // Stale delivery after credit was reassigned; acknowledge
                    // so the producer does not redeliver it later.
                    debug!("Message from {} with no outstanding credit", self.endpoint);
                    wire::send_fin(writer, &message.id).await?;
                    return Ok(());
                }

                self.remaining -= 1;
                let id = message.id.clone();
                let _ = self.events.send(SubscriberEvent::Message(message));
                wire::send_fin(writer, &id).await?;

                if self.remaining == 0 {
                    self.signal(ConnSignal::CreditExhausted(self.endpoint.clone()));
                }
            }
        }
        Ok(())
    }

    /// Best-effort graceful close: announce, give the producer a moment to
    /// confirm, then drop the socket either way.
    async fn graceful_close(
        &self,
        writer: &mut OwnedWriteHalf,
        frame_rx: &mut mpsc::Receiver<Result<Frame>>,
    ) {
        if wire::send_cls(writer).await.is_err() {
            return;
        }

        let confirmed = timeout(Duration::from_secs(1), async {
            while let Some(frame) = frame_rx.recv().await {
                if let Ok(Frame::Response(body)) = frame {
                    if &body[..] == b"CLOSE_WAIT" {
                        return true;
                    }
                }
            }
            false
        })
        .await;

        if !matches!(confirmed, Ok(true)) {
            debug!("Producer {} did not confirm close", self.endpoint);
        }
    }
}

async fn read_loop(mut reader: FrameReader, frame_tx: mpsc::Sender<Result<Frame>>) {
    loop {
        let frame = wire::read_frame(&mut reader).await;
        let is_err = frame.is_err();
        if frame_tx.send(frame).await.is_err() || is_err {
            return;
        }
    }
}

/// Drain handshake responses until `OK`, skipping heartbeats
async fn expect_ok(reader: &mut FrameReader, phase: &str) -> Result<()> {
    loop {
        match wire::read_frame(reader).await? {
            Frame::Response(body) if &body[..] == b"OK" => return Ok(()),
            Frame::Response(body) if &body[..] == b"_heartbeat_" => continue,
            Frame::Error(body) => {
                return Err(ClientError::Producer(format!(
                    "{} rejected: {}",
                    phase,
                    String::from_utf8_lossy(&body)
                )));
            }
            other => {
                return Err(ClientError::Protocol(format!(
                    "unexpected frame during {}: {:?}",
                    phase, other
                )));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> SubscriberConfig {
        SubscriberConfig {
            reconnect_delay_factor: Duration::from_millis(1000),
            max_reconnect_delay: Duration::from_millis(3500),
            ..SubscriberConfig::default()
        }
    }

    #[test]
    fn reconnect_delay_grows_linearly_then_caps() {
        let cfg = cfg();
        assert_eq!(reconnect_delay(&cfg, 1), Duration::from_millis(1000));
        assert_eq!(reconnect_delay(&cfg, 2), Duration::from_millis(2000));
        assert_eq!(reconnect_delay(&cfg, 3), Duration::from_millis(3000));
        assert_eq!(reconnect_delay(&cfg, 4), Duration::from_millis(3500));
        assert_eq!(reconnect_delay(&cfg, 100), Duration::from_millis(3500));
    }

    #[test]
    fn state_round_trips_through_u8() {
        for state in [
            ConnState::Connecting,
            ConnState::Ready,
            ConnState::Closing,
            ConnState::Closed,
            ConnState::Reconnecting,
        ] {
            assert_eq!(ConnState::from_u8(state as u8), state);
        }
    }
}
