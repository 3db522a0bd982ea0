//! Shared helpers for integration tests: an in-process fake producer that
//! speaks the framed wire protocol, plus event-stream utilities.

use std::net::SocketAddr;
use std::time::Duration;

use burrow_client::SubscriberEvent;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::timeout;

const FRAME_TYPE_RESPONSE: i32 = 0;
const FRAME_TYPE_MESSAGE: i32 = 2;

/// How a fake producer reacts to receiving credit
#[derive(Debug, Clone, Copy)]
pub struct ProducerBehavior {
    /// Messages to deliver for each positive `RDY` received
    pub messages_per_rdy: u64,
    /// Delay before each delivery, so tests can observe credit between passes
    pub delivery_delay: Duration,
    /// Serve exactly one session, drop it after this long, then refuse
    /// further connections
    pub drop_session_after: Option<Duration>,
}

impl ProducerBehavior {
    pub fn silent() -> Self {
        Self {
            messages_per_rdy: 0,
            delivery_delay: Duration::ZERO,
            drop_session_after: None,
        }
    }

    pub fn one_message_per_credit(delay: Duration) -> Self {
        Self {
            messages_per_rdy: 1,
            delivery_delay: delay,
            drop_session_after: None,
        }
    }

    pub fn single_session_dropped_after(delay: Duration) -> Self {
        Self {
            drop_session_after: Some(delay),
            ..Self::silent()
        }
    }
}

/// Minimal in-process producer: accepts connections, answers the handshake,
/// and optionally delivers messages when credited.
pub struct FakeProducer {
    pub addr: SocketAddr,
    accept_task: JoinHandle<()>,
}

impl FakeProducer {
    pub async fn spawn(behavior: ProducerBehavior) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind fake producer");
        let addr = listener.local_addr().expect("local addr");

        let accept_task = tokio::spawn(async move {
            if let Some(after) = behavior.drop_session_after {
                // One session only; dropping the listener afterwards makes
                // reconnect attempts fail with connection refused
                if let Ok((stream, _)) = listener.accept().await {
                    let _ = serve_connection(stream, behavior, Some(after)).await;
                }
                return;
            }

            loop {
                match listener.accept().await {
                    Ok((stream, _)) => {
                        tokio::spawn(async move {
                            let _ = serve_connection(stream, behavior, None).await;
                        });
                    }
                    Err(_) => return,
                }
            }
        });

        Self { addr, accept_task }
    }

    pub fn host(&self) -> String {
        self.addr.ip().to_string()
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn key(&self) -> String {
        format!("{}:{}", self.host(), self.port())
    }
}

impl Drop for FakeProducer {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

async fn serve_connection(
    stream: TcpStream,
    behavior: ProducerBehavior,
    drop_after: Option<Duration>,
) -> std::io::Result<()> {
    let (read_half, mut writer) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic).await?;
    assert_eq!(&magic, b"  V2", "client must lead with the protocol magic");

    let session = async move {
        let mut next_message_id: u64 = 0;
        loop {
            let mut line = String::new();
            if reader.read_line(&mut line).await? == 0 {
                return Ok(());
            }
            let line = line.trim_end();

            if line == "IDENTIFY" {
                let len = reader.read_u32().await?;
                let mut body = vec![0u8; len as usize];
                reader.read_exact(&mut body).await?;
                serde_json::from_slice::<serde_json::Value>(&body).expect("IDENTIFY body is JSON");
                write_response(&mut writer, b"OK").await?;
            } else if line.starts_with("SUB ") {
                write_response(&mut writer, b"OK").await?;
            } else if let Some(count) = line.strip_prefix("RDY ") {
                let credit: u64 = count.parse().expect("RDY count");
                let deliveries = credit.min(behavior.messages_per_rdy);
                for _ in 0..deliveries {
                    if !behavior.delivery_delay.is_zero() {
                        tokio::time::sleep(behavior.delivery_delay).await;
                    }
                    write_message(&mut writer, next_message_id, b"payload").await?;
                    next_message_id += 1;
                }
            } else if line.starts_with("FIN ") || line == "NOP" {
                // acknowledged deliveries and heartbeat replies need no answer
            } else if line == "CLS" {
                write_response(&mut writer, b"CLOSE_WAIT").await?;
                return Ok(());
            } else {
                panic!("fake producer got unexpected command: {:?}", line);
            }
        }
    };

    match drop_after {
        // Dropping the socket halfway through a session looks like a
        // producer crash to the client
        Some(after) => match timeout(after, session).await {
            Ok(result) => result,
            Err(_) => Ok(()),
        },
        None => session.await,
    }
}

async fn write_frame(
    writer: &mut OwnedWriteHalf,
    frame_type: i32,
    data: &[u8],
) -> std::io::Result<()> {
    writer.write_u32(data.len() as u32 + 4).await?;
    writer.write_i32(frame_type).await?;
    writer.write_all(data).await?;
    writer.flush().await
}

async fn write_response(writer: &mut OwnedWriteHalf, body: &[u8]) -> std::io::Result<()> {
    write_frame(writer, FRAME_TYPE_RESPONSE, body).await
}

async fn write_message(
    writer: &mut OwnedWriteHalf,
    id: u64,
    body: &[u8],
) -> std::io::Result<()> {
    let mut data = Vec::new();
    data.extend_from_slice(&1_700_000_000_000_000_000_i64.to_be_bytes());
    data.extend_from_slice(&1_u16.to_be_bytes());
    data.extend_from_slice(format!("{:016}", id).as_bytes());
    data.extend_from_slice(body);
    write_frame(writer, FRAME_TYPE_MESSAGE, &data).await
}

/// Receive events until one matches, panicking after five seconds
pub async fn wait_for_event<F>(
    events: &mut broadcast::Receiver<SubscriberEvent>,
    description: &str,
    mut predicate: F,
) -> SubscriberEvent
where
    F: FnMut(&SubscriberEvent) -> bool,
{
    timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await {
                Ok(event) if predicate(&event) => return event,
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => {
                    panic!("event stream closed while waiting for {}", description)
                }
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {}", description))
}

/// Collect every event until `Close` (inclusive), panicking after five seconds
pub async fn collect_until_close(
    events: &mut broadcast::Receiver<SubscriberEvent>,
) -> Vec<SubscriberEvent> {
    timeout(Duration::from_secs(5), async {
        let mut seen = Vec::new();
        loop {
            match events.recv().await {
                Ok(event) => {
                    let done = event == SubscriberEvent::Close;
                    seen.push(event);
                    if done {
                        return seen;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return seen,
            }
        }
    })
    .await
    .expect("timed out collecting events until close")
}

/// Lookup response body advertising the given producers
pub fn lookup_body(producers: &[(&str, u16)]) -> String {
    let producers: Vec<serde_json::Value> = producers
        .iter()
        .map(|(host, port)| {
            serde_json::json!({
                "broadcast_address": host,
                "tcp_port": port,
            })
        })
        .collect();
    serde_json::json!({ "topics": [], "producers": producers }).to_string()
}
