//! Public key normalization and the signing key ring.
//!
//! Contract scripts only ever see 32-byte x-only keys, but users may hand us
//! compressed, uncompressed or x-only encodings. [`ParticipantKey`] keeps the
//! original encoding around (it decides the payout address) while exposing the
//! x-only form to the script builders.

use bitcoin::key::CompressedPublicKey;
use bitcoin::secp256k1::{Keypair, PublicKey, Secp256k1, SecretKey, XOnlyPublicKey};
use bitcoin::{Address, ScriptBuf};

use crate::error::{Error, Result};
use crate::network::Network;

/// A contract participant's public key in whichever encoding it was supplied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParticipantKey {
    /// 33-byte compressed or 65-byte uncompressed SEC1 key.
    Full(PublicKey),
    /// 32-byte BIP-340 key.
    XOnly(XOnlyPublicKey),
}

impl ParticipantKey {
    /// Parse a 32, 33 or 65-byte encoding.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        match bytes.len() {
            32 => XOnlyPublicKey::from_slice(bytes)
                .map(ParticipantKey::XOnly)
                .map_err(|e| Error::Validation(format!("invalid x-only public key: {e}"))),
            33 | 65 => PublicKey::from_slice(bytes)
                .map(ParticipantKey::Full)
                .map_err(|e| Error::Validation(format!("invalid public key: {e}"))),
            other => Err(Error::Validation(format!(
                "public key must be 32, 33 or 65 bytes, got {other}"
            ))),
        }
    }

    pub fn from_hex(hex_str: &str) -> Result<Self> {
        let bytes = hex::decode(hex_str.trim())
            .map_err(|e| Error::Validation(format!("public key hex: {e}")))?;
        Self::from_slice(&bytes)
    }

    pub fn x_only(&self) -> XOnlyPublicKey {
        match self {
            ParticipantKey::Full(pk) => pk.x_only_public_key().0,
            ParticipantKey::XOnly(xonly) => *xonly,
        }
    }

    /// Address that payouts to this participant are sent to.
    ///
    /// SEC1 keys receive P2WPKH (uncompressed keys are compressed first);
    /// x-only keys receive a BIP-86 key-path P2TR output.
    pub fn payout_address(&self, network: Network) -> Address {
        match self {
            ParticipantKey::Full(pk) => {
                Address::p2wpkh(&CompressedPublicKey(*pk), network.into_bitcoin())
            }
            ParticipantKey::XOnly(xonly) => {
                let secp = Secp256k1::verification_only();
                Address::p2tr(&secp, *xonly, None, network.into_bitcoin())
            }
        }
    }

    pub fn payout_script_pubkey(&self, network: Network) -> ScriptBuf {
        self.payout_address(network).script_pubkey()
    }
}

impl From<PublicKey> for ParticipantKey {
    fn from(pk: PublicKey) -> Self {
        ParticipantKey::Full(pk)
    }
}

impl From<XOnlyPublicKey> for ParticipantKey {
    fn from(xonly: XOnlyPublicKey) -> Self {
        ParticipantKey::XOnly(xonly)
    }
}

/// Reduce any accepted public key encoding to its x-only form.
pub fn to_x_only(bytes: &[u8]) -> Result<XOnlyPublicKey> {
    ParticipantKey::from_slice(bytes).map(|k| k.x_only())
}

/// Immutable house and oracle signing keys.
///
/// Constructed once at startup and passed explicitly to whatever needs to sign.
#[derive(Clone)]
pub struct KeyRing {
    house: Keypair,
    oracle: Keypair,
}

impl KeyRing {
    pub fn new(house: SecretKey, oracle: SecretKey) -> Self {
        let secp = Secp256k1::signing_only();
        Self {
            house: Keypair::from_secret_key(&secp, &house),
            oracle: Keypair::from_secret_key(&secp, &oracle),
        }
    }

    /// Build a key ring from two hex-encoded 32-byte secrets.
    pub fn from_secret_hex(house_hex: &str, oracle_hex: &str) -> Result<Self> {
        Ok(Self::new(
            parse_secret(house_hex, "house")?,
            parse_secret(oracle_hex, "oracle")?,
        ))
    }

    pub fn house_keypair(&self) -> &Keypair {
        &self.house
    }

    pub fn oracle_keypair(&self) -> &Keypair {
        &self.oracle
    }

    pub fn house_public_key(&self) -> PublicKey {
        self.house.public_key()
    }

    pub fn oracle_public_key(&self) -> PublicKey {
        self.oracle.public_key()
    }

    pub fn house_x_only(&self) -> XOnlyPublicKey {
        self.house.x_only_public_key().0
    }

    pub fn oracle_x_only(&self) -> XOnlyPublicKey {
        self.oracle.x_only_public_key().0
    }

    /// The house wallet: funds matches, receives loss payouts and refund halves.
    pub fn house_address(&self, network: Network) -> Address {
        ParticipantKey::Full(self.house_public_key()).payout_address(network)
    }
}

impl std::fmt::Debug for KeyRing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyRing")
            .field("house", &self.house_x_only())
            .field("oracle", &self.oracle_x_only())
            .finish_non_exhaustive()
    }
}

fn parse_secret(hex_str: &str, role: &str) -> Result<SecretKey> {
    let mut bytes = hex::decode(hex_str.trim())
        .map_err(|e| Error::Validation(format!("{role} secret hex: {e}")))?;
    let secret = SecretKey::from_slice(&bytes)
        .map_err(|e| Error::Validation(format!("{role} secret: {e}")));
    bytes.fill(0);
    secret
}
