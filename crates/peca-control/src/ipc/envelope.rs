//! Envelope types and framing for the local engine link.
//!
//! Every frame is a 4-byte big-endian length prefix followed by a UTF-8 JSON
//! document.
//!
//! ```text
//! [u32 BE: len][UTF-8 JSON bytes of len]
//! ```
//!
//! Client to engine, the document is an [`Envelope`]. Engine to client, it is a
//! [`Delivery`]: an envelope addressed to a reply address the client minted
//! earlier.

use crate::config::IpcConfig;
use crate::{ControlError, Result};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Envelope opcodes.
pub struct Opcode;

impl Opcode {
    /// JSON-RPC request; `reply_to` carries the one-shot reply address.
    pub const RPC_CALL: u32 = 0x100;
    /// JSON-RPC response delivered to the caller's reply address.
    pub const RPC_REPLY: u32 = 0x101;
    /// Register `reply_to` as the notification address of this link.
    pub const REGISTER_NOTIFY: u32 = 0x200;
    pub const UNREGISTER_NOTIFY: u32 = 0x201;
    /// Log message push; `arg` is the category bitmask, payload the text.
    pub const NOTIFY_MESSAGE: u32 = 0x210;
    /// Channel lifecycle push; `arg` is the event ordinal.
    pub const NOTIFY_CHANNEL: u32 = 0x211;
}

/// A one-shot (or, for notifications, long-lived) destination on the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReplyAddress(pub u64);

impl std::fmt::Display for ReplyAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Point-to-point message unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub opcode: u32,
    #[serde(default)]
    pub arg: i32,
    #[serde(default)]
    pub payload: String,
    #[serde(default, rename = "replyTo", skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<ReplyAddress>,
}

impl Envelope {
    pub fn new(opcode: u32, payload: impl Into<String>) -> Self {
        Self {
            opcode,
            arg: 0,
            payload: payload.into(),
            reply_to: None,
        }
    }

    pub fn with_arg(mut self, arg: i32) -> Self {
        self.arg = arg;
        self
    }

    pub fn with_reply_to(mut self, address: ReplyAddress) -> Self {
        self.reply_to = Some(address);
        self
    }
}

/// An envelope routed to a client-side reply address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delivery {
    pub address: ReplyAddress,
    pub envelope: Envelope,
}

/// Serialize a frame document and write it with its length prefix.
pub async fn write_message<W, T>(writer: &mut W, message: &T) -> Result<()>
where
    W: AsyncWriteExt + Unpin,
    T: Serialize,
{
    let bytes = serde_json::to_vec(message)?;
    write_frame(writer, &bytes).await
}

/// Read one frame and decode it. Returns `None` on clean EOF.
pub async fn read_message<R, T>(reader: &mut R) -> Result<Option<T>>
where
    R: AsyncReadExt + Unpin,
    T: for<'de> Deserialize<'de>,
{
    match read_frame(reader).await? {
        Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        None => Ok(None),
    }
}

/// Read a length-prefixed frame from an async reader.
///
/// Returns `None` on clean EOF (peer closed connection).
pub async fn read_frame<R: AsyncReadExt + Unpin>(reader: &mut R) -> Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    check_frame_size(len)?;

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;

    Ok(Some(payload))
}

pub fn check_frame_size(len: usize) -> Result<()> {
    if len > IpcConfig::MAX_FRAME_SIZE {
        return Err(ControlError::decode(format!(
            "frame size {} exceeds maximum {}",
            len,
            IpcConfig::MAX_FRAME_SIZE
        )));
    }
    Ok(())
}

/// Write a length-prefixed frame to an async writer.
pub async fn write_frame<W: AsyncWriteExt + Unpin>(writer: &mut W, payload: &[u8]) -> Result<()> {
    check_frame_size(payload.len())?;
    let len = payload.len() as u32;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_wire_shape() {
        let env = Envelope::new(Opcode::RPC_CALL, r#"{"method":"getStatus"}"#)
            .with_reply_to(ReplyAddress(7));
        let json = serde_json::to_value(&env).unwrap();

        assert_eq!(json["opcode"], 0x100);
        assert_eq!(json["replyTo"], 7);
        assert_eq!(json["arg"], 0);
    }

    #[test]
    fn test_envelope_without_reply_omits_field() {
        let env = Envelope::new(Opcode::NOTIFY_MESSAGE, "hello").with_arg(0x2);
        let json = serde_json::to_string(&env).unwrap();
        assert!(!json.contains("replyTo"));

        let parsed: Envelope = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.arg, 0x2);
        assert_eq!(parsed.reply_to, None);
    }

    #[tokio::test]
    async fn test_delivery_frame_read_write() {
        let delivery = Delivery {
            address: ReplyAddress(42),
            envelope: Envelope::new(Opcode::RPC_REPLY, r#"{"result":true}"#),
        };
        let mut buf = Vec::new();
        write_message(&mut buf, &delivery).await.unwrap();

        let mut cursor = std::io::Cursor::new(buf);
        let read_back: Option<Delivery> = read_message(&mut cursor).await.unwrap();
        assert_eq!(read_back, Some(delivery));
    }

    #[tokio::test]
    async fn test_frame_read_empty_stream_returns_none() {
        let mut cursor = std::io::Cursor::new(Vec::<u8>::new());
        let result = read_frame(&mut cursor).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_frame_read_oversized_returns_decode_error() {
        let huge_len: u32 = (IpcConfig::MAX_FRAME_SIZE + 1) as u32;
        let mut buf = Vec::new();
        buf.extend_from_slice(&huge_len.to_be_bytes());
        buf.extend_from_slice(&[0u8; 8]);

        let mut cursor = std::io::Cursor::new(buf);
        let result = read_frame(&mut cursor).await;
        assert!(matches!(result, Err(ControlError::ProtocolDecode { .. })));
    }

    #[tokio::test]
    async fn test_truncated_frame_is_transport_error() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&10u32.to_be_bytes());
        buf.extend_from_slice(b"abc");

        let mut cursor = std::io::Cursor::new(buf);
        let err = read_frame(&mut cursor).await.unwrap_err();
        assert!(err.transport_failure().is_some());
    }
}
