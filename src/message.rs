//! Fixed-layout binary codec for chat messages.
//!
//! Layout: [outpoint 36B][signature 64B][length u16 LE][payload]
//! The length field is derived from the payload and never stored on its own.

use crate::types::{Outpoint, OUTPOINT_SIZE};

pub const SIGNATURE_SIZE: usize = 64;
pub const LENGTH_SIZE: usize = 2;
pub const HEADER_SIZE: usize = OUTPOINT_SIZE + SIGNATURE_SIZE + LENGTH_SIZE;
pub const MAX_PAYLOAD_SIZE: usize = 65_434;
pub const MAX_MESSAGE_SIZE: usize = HEADER_SIZE + MAX_PAYLOAD_SIZE;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MessageError {
    #[error("invalid message header: need {expected} bytes, got {0}", expected = HEADER_SIZE)]
    InvalidHeader(usize),

    #[error(
        "message exceeds maximum size: payload of {declared} bytes, {available} available (max {max})",
        max = MAX_PAYLOAD_SIZE
    )]
    MessageTooLarge { declared: usize, available: usize },
}

#[derive(Clone, PartialEq, Eq)]
pub struct Message {
    outpoint: Outpoint,
    signature: [u8; SIGNATURE_SIZE],
    payload: Vec<u8>,
}

impl Message {
    pub fn new(
        outpoint: Outpoint,
        signature: [u8; SIGNATURE_SIZE],
        payload: Vec<u8>,
    ) -> Result<Self, MessageError> {
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(MessageError::MessageTooLarge {
                declared: payload.len(),
                available: payload.len(),
            });
        }
        Ok(Self {
            outpoint,
            signature,
            payload,
        })
    }

    pub fn outpoint(&self) -> &Outpoint {
        &self.outpoint
    }

    pub fn signature(&self) -> &[u8; SIGNATURE_SIZE] {
        &self.signature
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn length(&self) -> u16 {
        // Bounded by MAX_PAYLOAD_SIZE at construction.
        self.payload.len() as u16
    }

    pub fn encoded_len(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        buf.extend_from_slice(self.outpoint.as_bytes());
        buf.extend_from_slice(&self.signature);
        buf.extend_from_slice(&self.length().to_le_bytes());
        buf.extend_from_slice(&self.payload);
        buf
    }

    pub fn decode(data: &[u8]) -> Result<Self, MessageError> {
        if data.len() < HEADER_SIZE {
            return Err(MessageError::InvalidHeader(data.len()));
        }

        let mut outpoint = [0u8; OUTPOINT_SIZE];
        outpoint.copy_from_slice(&data[..OUTPOINT_SIZE]);

        let mut signature = [0u8; SIGNATURE_SIZE];
        signature.copy_from_slice(&data[OUTPOINT_SIZE..OUTPOINT_SIZE + SIGNATURE_SIZE]);

        let length = u16::from_le_bytes([data[HEADER_SIZE - 2], data[HEADER_SIZE - 1]]) as usize;
        let available = data.len() - HEADER_SIZE;
        if length > MAX_PAYLOAD_SIZE || available < length {
            return Err(MessageError::MessageTooLarge {
                declared: length,
                available,
            });
        }

        Ok(Self {
            outpoint: Outpoint::from_bytes(outpoint),
            signature,
            payload: data[HEADER_SIZE..HEADER_SIZE + length].to_vec(),
        })
    }
}

impl std::fmt::Debug for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Message")
            .field("outpoint", &self.outpoint)
            .field("signature", &hex::encode(self.signature))
            .field("length", &self.payload.len())
            .finish()
    }
}
