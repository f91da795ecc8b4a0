use std::fmt;

pub type Hash256 = [u8; 32];

/// Size of a serialized outpoint: 32-byte txid + 4-byte output index.
pub const OUTPOINT_SIZE: usize = 36;

/// Identifies a transaction output.
///
/// Layout matches the ledger's internal serialization: the txid in
/// little-endian (internal) byte order followed by the output index as a
/// little-endian `u32`. Display uses the conventional big-endian txid hex.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Outpoint([u8; OUTPOINT_SIZE]);

impl Outpoint {
    pub fn new(txid: Hash256, vout: u32) -> Self {
        let mut bytes = [0u8; OUTPOINT_SIZE];
        bytes[..32].copy_from_slice(&txid);
        bytes[32..].copy_from_slice(&vout.to_le_bytes());
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; OUTPOINT_SIZE]) -> Self {
        Self(bytes)
    }

    /// Parse from a slice that must be exactly 36 bytes long.
    pub fn from_slice(slice: &[u8]) -> Option<Self> {
        let bytes: [u8; OUTPOINT_SIZE] = slice.try_into().ok()?;
        Some(Self(bytes))
    }

    /// Build from a txid as printed by block explorers and `bitcoin-cli`.
    pub fn from_display_txid(txid_hex: &str, vout: u32) -> Result<Self, hex::FromHexError> {
        let mut txid: Hash256 = [0u8; 32];
        hex::decode_to_slice(txid_hex, &mut txid)?;
        txid.reverse();
        Ok(Self::new(txid, vout))
    }

    pub fn as_bytes(&self) -> &[u8; OUTPOINT_SIZE] {
        &self.0
    }

    /// Txid in internal (little-endian) byte order.
    pub fn txid(&self) -> Hash256 {
        let mut txid = [0u8; 32];
        txid.copy_from_slice(&self.0[..32]);
        txid
    }

    /// Txid as big-endian hex, the form RPC interfaces expect.
    pub fn display_txid(&self) -> String {
        let mut txid = self.txid();
        txid.reverse();
        hex::encode(txid)
    }

    pub fn vout(&self) -> u32 {
        u32::from_le_bytes([self.0[32], self.0[33], self.0[34], self.0[35]])
    }
}

impl fmt::Display for Outpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.display_txid(), self.vout())
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParseOutpointError {
    #[error("expected <txid>:<vout>")]
    MissingSeparator,
    #[error("invalid txid: {0}")]
    Txid(#[from] hex::FromHexError),
    #[error("invalid output index: {0}")]
    Vout(#[from] std::num::ParseIntError),
}

/// Parses the `Display` form, `<txid hex>:<vout>`.
impl std::str::FromStr for Outpoint {
    type Err = ParseOutpointError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (txid, vout) = s
            .rsplit_once(':')
            .ok_or(ParseOutpointError::MissingSeparator)?;
        Ok(Self::from_display_txid(txid, vout.parse()?)?)
    }
}

impl fmt::Debug for Outpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Outpoint({})", self)
    }
}
