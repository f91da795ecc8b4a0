//! Classification of locking scripts that can prove single-key ownership.

/// Locking script forms understood by the admission validator. Resolved once
/// per UTXO lookup so callers never branch on raw script bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptKind {
    /// `OP_DUP OP_HASH160 <20> OP_EQUALVERIFY OP_CHECKSIG`
    P2pkh([u8; 20]),
    /// `OP_1 <32>`: Taproot output key, spendable by key path.
    TaprootKey([u8; 32]),
    Unsupported,
}

const OP_DUP: u8 = 0x76;
const OP_HASH160: u8 = 0xa9;
const OP_EQUALVERIFY: u8 = 0x88;
const OP_CHECKSIG: u8 = 0xac;
const OP_1: u8 = 0x51;
const PUSH_20: u8 = 0x14;
const PUSH_32: u8 = 0x20;

impl ScriptKind {
    pub fn classify(script: &[u8]) -> Self {
        match script {
            [OP_DUP, OP_HASH160, PUSH_20, hash @ .., OP_EQUALVERIFY, OP_CHECKSIG]
                if hash.len() == 20 =>
            {
                let mut out = [0u8; 20];
                out.copy_from_slice(hash);
                ScriptKind::P2pkh(out)
            }
            [OP_1, PUSH_32, key @ ..] if key.len() == 32 => {
                let mut out = [0u8; 32];
                out.copy_from_slice(key);
                ScriptKind::TaprootKey(out)
            }
            _ => ScriptKind::Unsupported,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ScriptKind::P2pkh(_) => "p2pkh",
            ScriptKind::TaprootKey(_) => "p2tr",
            ScriptKind::Unsupported => "unsupported",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_p2pkh() {
        let mut script = vec![OP_DUP, OP_HASH160, PUSH_20];
        script.extend_from_slice(&[0xaa; 20]);
        script.extend_from_slice(&[OP_EQUALVERIFY, OP_CHECKSIG]);
        assert_eq!(ScriptKind::classify(&script), ScriptKind::P2pkh([0xaa; 20]));
    }

    #[test]
    fn test_classify_taproot() {
        let mut script = vec![OP_1, PUSH_32];
        script.extend_from_slice(&[0xbb; 32]);
        assert_eq!(
            ScriptKind::classify(&script),
            ScriptKind::TaprootKey([0xbb; 32])
        );
    }

    #[test]
    fn test_classify_rejects_other_forms() {
        // P2WPKH
        let mut p2wpkh = vec![0x00, PUSH_20];
        p2wpkh.extend_from_slice(&[0xcc; 20]);
        assert_eq!(ScriptKind::classify(&p2wpkh), ScriptKind::Unsupported);

        // Taproot prefix with a truncated key
        let mut short = vec![OP_1, PUSH_32];
        short.extend_from_slice(&[0xbb; 31]);
        assert_eq!(ScriptKind::classify(&short), ScriptKind::Unsupported);

        // P2PKH with an extra trailing opcode
        let mut long = vec![OP_DUP, OP_HASH160, PUSH_20];
        long.extend_from_slice(&[0xaa; 20]);
        long.extend_from_slice(&[OP_EQUALVERIFY, OP_CHECKSIG, OP_CHECKSIG]);
        assert_eq!(ScriptKind::classify(&long), ScriptKind::Unsupported);

        assert_eq!(ScriptKind::classify(&[]), ScriptKind::Unsupported);
    }
}
