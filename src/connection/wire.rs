//! Frame codec for the producer wire protocol
//!
//! The protocol is a thin framed layer over TCP: the client sends a 4-byte
//! protocol magic followed by newline-terminated text commands (`IDENTIFY`
//! additionally carries a length-prefixed JSON body), and the producer
//! responds with binary frames of the form `[u32 size][i32 type][data]`
//! where `size` counts the type word plus the data.

use bytes::Bytes;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{ClientError, Result};
use crate::events::Message;

/// Protocol magic sent once per connection, before any command
pub(crate) const MAGIC: &[u8; 4] = b"  V2";

/// Upper bound on a single frame; anything larger is a protocol violation
const MAX_FRAME_SIZE: u32 = 16 * 1024 * 1024;

/// Frame type words used by the producer
const FRAME_TYPE_RESPONSE: i32 = 0;
const FRAME_TYPE_ERROR: i32 = 1;
const FRAME_TYPE_MESSAGE: i32 = 2;

/// Message frame header: i64 timestamp + u16 attempts + 16-byte id
const MESSAGE_HEADER_LEN: usize = 8 + 2 + 16;

/// One decoded frame from the producer
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Frame {
    /// Control response, e.g. `OK`, `CLOSE_WAIT`, or `_heartbeat_`
    Response(Bytes),
    /// Producer-reported error
    Error(Bytes),
    /// A delivered message
    Message(Message),
}

/// Feature payload sent with `IDENTIFY` during the handshake
#[derive(Debug, Serialize)]
pub(crate) struct Identify<'a> {
    pub client_id: &'a str,
    pub hostname: &'a str,
    pub feature_negotiation: bool,
    pub msg_timeout: u64,
    pub heartbeat_interval: u64,
}

/// Read and decode one frame
pub(crate) async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Frame> {
    let size = reader.read_u32().await?;
    if size < 4 || size > MAX_FRAME_SIZE {
        return Err(ClientError::Protocol(format!("invalid frame size {}", size)));
    }

    let frame_type = reader.read_i32().await?;
    let mut data = vec![0u8; size as usize - 4];
    reader.read_exact(&mut data).await?;

    match frame_type {
        FRAME_TYPE_RESPONSE => Ok(Frame::Response(Bytes::from(data))),
        FRAME_TYPE_ERROR => Ok(Frame::Error(Bytes::from(data))),
        FRAME_TYPE_MESSAGE => decode_message(data).map(Frame::Message),
        other => Err(ClientError::Protocol(format!(
            "unknown frame type {}",
            other
        ))),
    }
}

fn decode_message(data: Vec<u8>) -> Result<Message> {
    if data.len() < MESSAGE_HEADER_LEN {
        return Err(ClientError::Protocol(format!(
            "message frame too short: {} bytes",
            data.len()
        )));
    }

    let timestamp = i64::from_be_bytes(data[0..8].try_into().expect("sliced 8 bytes"));
    let attempts = u16::from_be_bytes(data[8..10].try_into().expect("sliced 2 bytes"));
    let id = String::from_utf8_lossy(&data[10..26]).into_owned();
    let body = Bytes::copy_from_slice(&data[MESSAGE_HEADER_LEN..]);

    Ok(Message {
        id,
        attempts,
        timestamp,
        body,
    })
}

pub(crate) async fn send_magic<W: AsyncWrite + Unpin>(writer: &mut W) -> Result<()> {
    writer.write_all(MAGIC).await?;
    Ok(())
}

pub(crate) async fn send_identify<W: AsyncWrite + Unpin>(
    writer: &mut W,
    identify: &Identify<'_>,
) -> Result<()> {
    let body = serde_json::to_vec(identify)?;
    writer.write_all(b"IDENTIFY\n").await?;
    writer.write_u32(body.len() as u32).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;
    Ok(())
}

pub(crate) async fn send_sub<W: AsyncWrite + Unpin>(
    writer: &mut W,
    topic: &str,
    channel: &str,
) -> Result<()> {
    writer
        .write_all(format!("SUB {} {}\n", topic, channel).as_bytes())
        .await?;
    writer.flush().await?;
    Ok(())
}

pub(crate) async fn send_rdy<W: AsyncWrite + Unpin>(writer: &mut W, count: u64) -> Result<()> {
    writer
        .write_all(format!("RDY {}\n", count).as_bytes())
        .await?;
    writer.flush().await?;
    Ok(())
}

pub(crate) async fn send_fin<W: AsyncWrite + Unpin>(writer: &mut W, id: &str) -> Result<()> {
    writer.write_all(format!("FIN {}\n", id).as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

pub(crate) async fn send_nop<W: AsyncWrite + Unpin>(writer: &mut W) -> Result<()> {
    writer.write_all(b"NOP\n").await?;
    writer.flush().await?;
    Ok(())
}

pub(crate) async fn send_cls<W: AsyncWrite + Unpin>(writer: &mut W) -> Result<()> {
    writer.write_all(b"CLS\n").await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_bytes(frame_type: i32, data: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&(data.len() as u32 + 4).to_be_bytes());
        out.extend_from_slice(&frame_type.to_be_bytes());
        out.extend_from_slice(data);
        out
    }

    #[tokio::test]
    async fn decodes_response_frame() {
        let bytes = frame_bytes(FRAME_TYPE_RESPONSE, b"OK");
        let frame = read_frame(&mut bytes.as_slice()).await.unwrap();
        assert_eq!(frame, Frame::Response(Bytes::from_static(b"OK")));
    }

    #[tokio::test]
    async fn decodes_message_frame() {
        let mut data = Vec::new();
        data.extend_from_slice(&1_700_000_000_000_000_000_i64.to_be_bytes());
        data.extend_from_slice(&3_u16.to_be_bytes());
        data.extend_from_slice(b"0123456789abcdef");
        data.extend_from_slice(b"hello");

        let bytes = frame_bytes(FRAME_TYPE_MESSAGE, &data);
        let frame = read_frame(&mut bytes.as_slice()).await.unwrap();
        match frame {
            Frame::Message(msg) => {
                assert_eq!(msg.id, "0123456789abcdef");
                assert_eq!(msg.attempts, 3);
                assert_eq!(msg.timestamp, 1_700_000_000_000_000_000);
                assert_eq!(&msg.body[..], b"hello");
            }
            other => panic!("expected message frame, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn rejects_short_message_frame() {
        let bytes = frame_bytes(FRAME_TYPE_MESSAGE, b"short");
        assert!(matches!(
            read_frame(&mut bytes.as_slice()).await,
            Err(ClientError::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn rejects_unknown_frame_type() {
        let bytes = frame_bytes(7, b"data");
        assert!(matches!(
            read_frame(&mut bytes.as_slice()).await,
            Err(ClientError::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn rejects_oversized_frame() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&(MAX_FRAME_SIZE + 1).to_be_bytes());
        bytes.extend_from_slice(&FRAME_TYPE_RESPONSE.to_be_bytes());
        assert!(matches!(
            read_frame(&mut bytes.as_slice()).await,
            Err(ClientError::Protocol(_))
        ));
    }
}
