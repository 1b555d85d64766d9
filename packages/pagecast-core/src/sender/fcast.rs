//! FCast wire protocol client.
//!
//! Packets are a 4-byte little-endian length (opcode byte included),
//! one opcode byte, then an optional JSON body. Play and stop are
//! fire-and-forget: connect, send, shut the stream down.

use std::time::Duration;

use async_trait::async_trait;
use bytes::{BufMut, BytesMut};
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

use crate::protocol_constants::{FCAST_OP_PLAY, FCAST_OP_STOP, HLS_CONTAINER_MIME};

/// Timeout for connecting to a receiver.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors produced by the FCast transport.
#[derive(Debug, thiserror::Error)]
pub enum SenderError {
    /// Could not reach the receiver.
    #[error("Failed to connect to receiver {addr}: {source}")]
    Connect {
        /// The `host:port` address that was dialed.
        addr: String,
        /// Underlying IO error.
        source: std::io::Error,
    },

    /// The connection was established but the command could not be sent.
    #[error("Failed to send command to {addr}: {source}")]
    Send {
        /// The `host:port` address that was dialed.
        addr: String,
        /// Underlying IO error.
        source: std::io::Error,
    },

    /// The command body could not be serialized.
    #[error("Failed to encode command: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Body of a play command.
#[derive(Debug, Serialize)]
pub struct PlayMessage<'a> {
    /// MIME type of the media; receivers use it to pick a player.
    pub container: &'a str,
    /// The media URL to fetch.
    pub url: &'a str,
    /// Start offset in seconds.
    pub time: u64,
    /// Display title.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<&'a str>,
}

/// Frames an FCast packet: LE length (body + opcode byte), opcode, body.
fn encode_packet(opcode: u8, body: &[u8]) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(4 + 1 + body.len());
    buf.put_u32_le(body.len() as u32 + 1);
    buf.put_u8(opcode);
    buf.put_slice(body);
    buf.to_vec()
}

/// Abstraction over the receiver command channel.
///
/// The production implementation dials TCP; tests substitute a recorder.
#[async_trait]
pub trait CastTransport: Send + Sync {
    /// Sends a play command for `media_url` to the receiver at `addr`.
    async fn play(&self, addr: &str, media_url: &str, title: &str) -> Result<(), SenderError>;

    /// Sends a stop command to the receiver at `addr`.
    async fn stop(&self, addr: &str) -> Result<(), SenderError>;
}

/// TCP transport speaking the FCast protocol.
#[derive(Debug, Clone, Default)]
pub struct FcastTcpTransport;

impl FcastTcpTransport {
    /// Creates a new transport.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    async fn send_packet(&self, addr: &str, packet: &[u8]) -> Result<(), SenderError> {
        let connect = TcpStream::connect(addr);
        let mut stream = tokio::time::timeout(CONNECT_TIMEOUT, connect)
            .await
            .map_err(|_| SenderError::Connect {
                addr: addr.to_string(),
                source: std::io::Error::new(std::io::ErrorKind::TimedOut, "connect timed out"),
            })?
            .map_err(|e| SenderError::Connect {
                addr: addr.to_string(),
                source: e,
            })?;

        stream
            .write_all(packet)
            .await
            .map_err(|e| SenderError::Send {
                addr: addr.to_string(),
                source: e,
            })?;
        let _ = stream.shutdown().await;
        Ok(())
    }
}

#[async_trait]
impl CastTransport for FcastTcpTransport {
    async fn play(&self, addr: &str, media_url: &str, title: &str) -> Result<(), SenderError> {
        let message = PlayMessage {
            container: HLS_CONTAINER_MIME,
            url: media_url,
            time: 0,
            title: Some(title),
        };
        let body = serde_json::to_vec(&message)?;
        self.send_packet(addr, &encode_packet(FCAST_OP_PLAY, &body))
            .await
    }

    async fn stop(&self, addr: &str) -> Result<(), SenderError> {
        self.send_packet(addr, &encode_packet(FCAST_OP_STOP, &[]))
            .await
    }
}
