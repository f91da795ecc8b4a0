//! Tag-prefixed binary framing for the gossip protocol.
//!
//! Frame format: [tag u8][body]
//! - Inv:     [count u16 LE][count x 36-byte outpoint]
//! - GetData: [36-byte outpoint]
//! - Data:    [len u32 LE][len bytes of encoded message]

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::network::message::{
    handshake_bytes, NetworkMessage, HANDSHAKE_MAGIC, HANDSHAKE_SIZE, PROTOCOL_VERSION, TAG_DATA,
    TAG_GET_DATA, TAG_INV,
};
use crate::types::{Outpoint, OUTPOINT_SIZE};

/// Framing failures. Every variant is fatal to the connection.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unknown frame tag 0x{0:02x}")]
    UnknownTag(u8),

    #[error("invalid data length {len} (max {max})")]
    InvalidDataLength { len: u32, max: usize },

    #[error("bad handshake magic {0:02x?}")]
    BadMagic([u8; 4]),

    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(u8),

    #[error("handshake timed out")]
    HandshakeTimeout,

    #[error("frame body of {0} items does not fit its length field")]
    FrameTooLarge(usize),
}

/// Encodes a frame into a single buffer so it can be written with one call.
pub fn serialize_frame(message: &NetworkMessage) -> Result<Vec<u8>, WireError> {
    let mut frame = Vec::new();
    frame.push(message.tag());
    match message {
        NetworkMessage::Inv(outpoints) => {
            let count = u16::try_from(outpoints.len())
                .map_err(|_| WireError::FrameTooLarge(outpoints.len()))?;
            frame.reserve(2 + outpoints.len() * OUTPOINT_SIZE);
            frame.extend_from_slice(&count.to_le_bytes());
            for outpoint in outpoints {
                frame.extend_from_slice(outpoint.as_bytes());
            }
        }
        NetworkMessage::GetData(outpoint) => frame.extend_from_slice(outpoint.as_bytes()),
        NetworkMessage::Data(bytes) => {
            let len =
                u32::try_from(bytes.len()).map_err(|_| WireError::FrameTooLarge(bytes.len()))?;
            frame.reserve(4 + bytes.len());
            frame.extend_from_slice(&len.to_le_bytes());
            frame.extend_from_slice(bytes);
        }
    }
    Ok(frame)
}

pub async fn write_message<W: AsyncWrite + Unpin>(
    writer: &mut W,
    message: &NetworkMessage,
) -> Result<(), WireError> {
    let frame = serialize_frame(message)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

async fn read_outpoint<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Outpoint, WireError> {
    let mut buf = [0u8; OUTPOINT_SIZE];
    reader.read_exact(&mut buf).await?;
    Ok(Outpoint::from_bytes(buf))
}

/// Reads one frame. Returns Ok(None) on clean EOF at a frame boundary.
pub async fn read_message<R: AsyncRead + Unpin>(
    reader: &mut R,
    max_message_size: usize,
) -> Result<Option<NetworkMessage>, WireError> {
    let mut tag = [0u8; 1];
    match reader.read_exact(&mut tag).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let message = match tag[0] {
        TAG_INV => {
            let count = reader.read_u16_le().await? as usize;
            let mut outpoints = Vec::with_capacity(count);
            for _ in 0..count {
                outpoints.push(read_outpoint(reader).await?);
            }
            NetworkMessage::Inv(outpoints)
        }
        TAG_GET_DATA => NetworkMessage::GetData(read_outpoint(reader).await?),
        TAG_DATA => {
            let len = reader.read_u32_le().await?;
            if len == 0 || len as usize > max_message_size {
                return Err(WireError::InvalidDataLength {
                    len,
                    max: max_message_size,
                });
            }
            let mut body = vec![0u8; len as usize];
            reader.read_exact(&mut body).await?;
            NetworkMessage::Data(body)
        }
        other => return Err(WireError::UnknownTag(other)),
    };

    Ok(Some(message))
}

/// Sends our magic and version, then reads and checks the remote's, all
/// within `timeout`.
pub async fn exchange_handshake<S: AsyncRead + AsyncWrite + Unpin>(
    stream: &mut S,
    timeout: Duration,
) -> Result<(), WireError> {
    let exchange = async {
        stream.write_all(&handshake_bytes()).await?;
        stream.flush().await?;

        let mut remote = [0u8; HANDSHAKE_SIZE];
        stream.read_exact(&mut remote).await?;

        let mut magic = [0u8; 4];
        magic.copy_from_slice(&remote[..4]);
        if magic != HANDSHAKE_MAGIC {
            return Err(WireError::BadMagic(magic));
        }
        if remote[4] != PROTOCOL_VERSION {
            return Err(WireError::UnsupportedVersion(remote[4]));
        }
        Ok(())
    };

    tokio::time::timeout(timeout, exchange)
        .await
        .map_err(|_| WireError::HandshakeTimeout)?
}
