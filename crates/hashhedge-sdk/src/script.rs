use bitcoin::opcodes::all::{OP_CHECKSIG, OP_CHECKSIGADD, OP_DROP, OP_NUMEQUAL};
use bitcoin::script::{Builder, PushBytesBuf};
use bitcoin::secp256k1::XOnlyPublicKey;
use bitcoin::ScriptBuf;

use crate::error::{Error, Result};
use crate::keys::to_x_only;

/// Longest nonce accepted, in bytes.
pub const MAX_NONCE_LEN: usize = 32;

/// Validated per-contract salt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractNonce(PushBytesBuf);

impl ContractNonce {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.is_empty() || bytes.len() > MAX_NONCE_LEN {
            return Err(Error::Validation(format!(
                "nonce must be 1-{MAX_NONCE_LEN} bytes, got {}",
                bytes.len()
            )));
        }
        PushBytesBuf::try_from(bytes.to_vec())
            .map(Self)
            .map_err(|e| Error::Validation(format!("nonce: {e}")))
    }

    pub fn from_hex(hex_str: &str) -> Result<Self> {
        let bytes =
            hex::decode(hex_str).map_err(|e| Error::Validation(format!("nonce hex: {e}")))?;
        Self::from_bytes(&bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.as_bytes())
    }
}

/// Order two x-only keys lexicographically by their 32-byte serialization.
pub fn sort_pair(a: XOnlyPublicKey, b: XOnlyPublicKey) -> [XOnlyPublicKey; 2] {
    if a.serialize() <= b.serialize() {
        [a, b]
    } else {
        [b, a]
    }
}

/// Build the 2-of-2 tapscript leaf for an unordered key pair:
///
/// `<nonce> OP_DROP <k0> OP_CHECKSIG <k1> OP_CHECKSIGADD OP_2 OP_NUMEQUAL`
///
/// where `k0 < k1`. The result does not depend on argument order.
pub fn build_leaf(a: XOnlyPublicKey, b: XOnlyPublicKey, nonce: &ContractNonce) -> ScriptBuf {
    let [k0, k1] = sort_pair(a, b);

    Builder::new()
        .push_slice(&nonce.0)
        .push_opcode(OP_DROP)
        .push_x_only_key(&k0)
        .push_opcode(OP_CHECKSIG)
        .push_x_only_key(&k1)
        .push_opcode(OP_CHECKSIGADD)
        .push_int(2)
        .push_opcode(OP_NUMEQUAL)
        .into_script()
}

/// [`build_leaf`] over raw key encodings (32, 33 or 65 bytes).
pub fn build_leaf_from_slices(a: &[u8], b: &[u8], nonce: &ContractNonce) -> Result<ScriptBuf> {
    Ok(build_leaf(to_x_only(a)?, to_x_only(b)?, nonce))
}

#[cfg(test)]
mod tests {
    use bitcoin::secp256k1::{PublicKey, Secp256k1, SecretKey};

    use super::*;

    fn key(seed: u8) -> PublicKey {
        let secp = Secp256k1::new();
        PublicKey::from_secret_key(&secp, &SecretKey::from_slice(&[seed; 32]).unwrap())
    }

    fn nonce() -> ContractNonce {
        ContractNonce::from_hex("deadbeef").unwrap()
    }

    #[test]
    fn order_independent() {
        let a = key(1).x_only_public_key().0;
        let b = key(2).x_only_public_key().0;
        assert_eq!(build_leaf(a, b, &nonce()), build_leaf(b, a, &nonce()));
    }

    #[test]
    fn order_independent_across_encodings() {
        let a = key(3);
        let b = key(4);
        let left =
            build_leaf_from_slices(&a.serialize(), &b.serialize_uncompressed(), &nonce()).unwrap();
        let right =
            build_leaf_from_slices(&b.x_only_public_key().0.serialize(), &a.serialize(), &nonce())
                .unwrap();
        assert_eq!(left, right);
    }

    #[test]
    fn leaf_layout() {
        let a = key(5).x_only_public_key().0;
        let b = key(6).x_only_public_key().0;
        let [k0, k1] = sort_pair(a, b);
        let script = build_leaf(a, b, &nonce());
        let bytes = script.as_bytes();

        // 1+4 nonce push, drop, 1+32 key, checksig, 1+32 key, checksigadd, OP_2, numequal
        assert_eq!(bytes.len(), 5 + 1 + 33 + 1 + 33 + 1 + 1 + 1);
        assert_eq!(&bytes[0..5], &[0x04, 0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(bytes[5], OP_DROP.to_u8());
        assert_eq!(bytes[6], 0x20);
        assert_eq!(&bytes[7..39], &k0.serialize());
        assert_eq!(bytes[39], OP_CHECKSIG.to_u8());
        assert_eq!(&bytes[41..73], &k1.serialize());
        assert_eq!(bytes[73], OP_CHECKSIGADD.to_u8());
        assert_eq!(bytes[74], 0x52); // OP_2
        assert_eq!(bytes[75], OP_NUMEQUAL.to_u8());
    }

    #[test]
    fn rejects_malformed_key() {
        let good = key(7).serialize();
        let err = build_leaf_from_slices(&good, &[0x02; 20], &nonce()).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn nonce_bounds() {
        assert!(ContractNonce::from_bytes(&[]).is_err());
        assert!(ContractNonce::from_bytes(&[0u8; 33]).is_err());
        assert!(ContractNonce::from_hex("xyz").is_err());
        assert_eq!(ContractNonce::from_hex("00ff").unwrap().to_hex(), "00ff");
    }
}
