//! Gossip frames exchanged after the handshake.

use crate::types::Outpoint;

pub const TAG_INV: u8 = 0x01;
pub const TAG_GET_DATA: u8 = 0x02;
pub const TAG_DATA: u8 = 0x03;

/// Handshake magic, followed by one version byte.
pub const HANDSHAKE_MAGIC: [u8; 4] = *b"UTXC";
pub const PROTOCOL_VERSION: u8 = 0x01;
pub const HANDSHAKE_SIZE: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkMessage {
    /// Announces outpoints whose messages the sender can serve.
    Inv(Vec<Outpoint>),
    /// Requests the cached message for one outpoint.
    GetData(Outpoint),
    /// An encoded chat message, relayed byte for byte.
    Data(Vec<u8>),
}

impl NetworkMessage {
    pub fn tag(&self) -> u8 {
        match self {
            NetworkMessage::Inv(_) => TAG_INV,
            NetworkMessage::GetData(_) => TAG_GET_DATA,
            NetworkMessage::Data(_) => TAG_DATA,
        }
    }

    /// Short name used for rate limiting and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            NetworkMessage::Inv(_) => "inv",
            NetworkMessage::GetData(_) => "getdata",
            NetworkMessage::Data(_) => "data",
        }
    }
}

pub fn handshake_bytes() -> [u8; HANDSHAKE_SIZE] {
    let mut out = [0u8; HANDSHAKE_SIZE];
    out[..4].copy_from_slice(&HANDSHAKE_MAGIC);
    out[4] = PROTOCOL_VERSION;
    out
}
