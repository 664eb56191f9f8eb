use bitcoin::key::TweakedPublicKey;
use bitcoin::secp256k1::{Parity, XOnlyPublicKey};
use bitcoin::taproot::TapLeafHash;
use bitcoin::{Address, Script, ScriptBuf};
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::keys::{KeyRing, ParticipantKey};
use crate::network::Network;
use crate::script::ContractNonce;
use crate::state::{ContractStatus, Direction};
use crate::taproot::{self, ContractAddress};
use crate::tree::{ContractTree, LeafKind};

/// Length of freshly drawn contract nonces.
pub const NONCE_LEN: usize = 4;

/// Ledger row id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContractId(pub i64);

impl std::fmt::Display for ContractId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for ContractId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        s.parse().map(ContractId)
    }
}

/// A contract as persisted by the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contract {
    pub id: ContractId,
    /// Hex, in the encoding the user supplied.
    pub user_pubkey: String,
    pub deposit_address: String,
    /// User stake in satoshis. The house matches it 1:1.
    pub amount: u64,
    pub direction: Direction,
    /// Hex.
    pub nonce: String,
    pub status: ContractStatus,
    /// Last partially or fully signed transaction.
    pub tx_hex: Option<String>,
}

impl Contract {
    pub fn user_key(&self) -> Result<ParticipantKey> {
        ParticipantKey::from_hex(&self.user_pubkey)
    }

    pub fn contract_nonce(&self) -> Result<ContractNonce> {
        ContractNonce::from_hex(&self.nonce)
    }
}

/// Everything the ledger needs to insert a new contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewContract {
    pub user_pubkey: String,
    pub deposit_address: String,
    pub amount: u64,
    pub direction: Direction,
    pub nonce: String,
}

/// Draw a fresh random contract nonce from the OS CSPRNG.
pub fn random_nonce() -> Result<ContractNonce> {
    let mut bytes = [0u8; NONCE_LEN];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    ContractNonce::from_bytes(&bytes)
}

/// A contract's full Taproot construction: leaves, tree, output key and address.
///
/// This is the only place the deposit address is derived. Creation, matching
/// and every settlement path go through it so the funds can never be sent to
/// an address the spending paths do not commit to.
#[derive(Debug, Clone)]
pub struct CompiledContract {
    user: ParticipantKey,
    house: XOnlyPublicKey,
    oracle: XOnlyPublicKey,
    nonce: ContractNonce,
    network: Network,
    tree: ContractTree,
    address: ContractAddress,
}

impl CompiledContract {
    pub fn new(
        user: ParticipantKey,
        keys: &KeyRing,
        nonce: ContractNonce,
        network: Network,
    ) -> Self {
        let house = keys.house_x_only();
        let oracle = keys.oracle_x_only();
        let tree = ContractTree::build(user.x_only(), house, oracle, &nonce);
        let address = taproot::derive_address(tree.merkle_root(), network);
        Self {
            user,
            house,
            oracle,
            nonce,
            network,
            tree,
            address,
        }
    }

    /// Recompile a persisted contract and check it still derives its stored address.
    pub fn from_contract(contract: &Contract, keys: &KeyRing, network: Network) -> Result<Self> {
        let compiled = Self::new(
            contract.user_key()?,
            keys,
            contract.contract_nonce()?,
            network,
        );
        if compiled.address().to_string() != contract.deposit_address {
            return Err(Error::Taproot(format!(
                "contract {} derives {} but stores {}",
                contract.id,
                compiled.address(),
                contract.deposit_address
            )));
        }
        Ok(compiled)
    }

    pub fn user_key(&self) -> &ParticipantKey {
        &self.user
    }

    pub fn house_key(&self) -> XOnlyPublicKey {
        self.house
    }

    pub fn oracle_key(&self) -> XOnlyPublicKey {
        self.oracle
    }

    pub fn nonce(&self) -> &ContractNonce {
        &self.nonce
    }

    pub fn network(&self) -> Network {
        self.network
    }

    pub fn tree(&self) -> &ContractTree {
        &self.tree
    }

    pub fn address(&self) -> &Address {
        &self.address.address
    }

    pub fn script_pubkey(&self) -> ScriptBuf {
        self.address.address.script_pubkey()
    }

    pub fn output_key(&self) -> TweakedPublicKey {
        self.address.output_key
    }

    pub fn parity(&self) -> Parity {
        self.address.parity
    }

    pub fn leaf(&self, kind: LeafKind) -> &Script {
        self.tree.leaf(kind)
    }

    pub fn leaf_hash(&self, kind: LeafKind) -> TapLeafHash {
        self.tree.leaf_hash(kind)
    }

    pub fn control_block(&self, kind: LeafKind) -> Vec<u8> {
        taproot::build_control_block(&self.tree, kind, self.address.parity)
    }
}

#[cfg(test)]
mod tests {
    use bitcoin::secp256k1::{PublicKey, Secp256k1, SecretKey};

    use super::*;

    fn keys() -> KeyRing {
        KeyRing::from_secret_hex(&"0a".repeat(32), &"0b".repeat(32)).unwrap()
    }

    fn user() -> PublicKey {
        let secp = Secp256k1::new();
        PublicKey::from_secret_key(&secp, &SecretKey::from_slice(&[0x0c; 32]).unwrap())
    }

    fn stored(compiled: &CompiledContract) -> Contract {
        Contract {
            id: ContractId(7),
            user_pubkey: hex::encode(user().serialize()),
            deposit_address: compiled.address().to_string(),
            amount: 100_000,
            direction: Direction::Long,
            nonce: compiled.nonce().to_hex(),
            status: ContractStatus::Pending,
            tx_hex: None,
        }
    }

    #[test]
    fn key_encoding_does_not_change_address() {
        let nonce = ContractNonce::from_hex("01020304").unwrap();
        let full = CompiledContract::new(user().into(), &keys(), nonce.clone(), Network::Regtest);
        let xonly = CompiledContract::new(
            user().x_only_public_key().0.into(),
            &keys(),
            nonce,
            Network::Regtest,
        );
        assert_eq!(full.address(), xonly.address());
    }

    #[test]
    fn recompiles_from_persisted_row() {
        let compiled = CompiledContract::new(
            user().into(),
            &keys(),
            ContractNonce::from_hex("deadbeef").unwrap(),
            Network::Regtest,
        );
        let row = stored(&compiled);
        let again = CompiledContract::from_contract(&row, &keys(), Network::Regtest).unwrap();
        assert_eq!(again.address(), compiled.address());
        assert_eq!(again.output_key(), compiled.output_key());
    }

    #[test]
    fn rejects_tampered_address() {
        let compiled = CompiledContract::new(
            user().into(),
            &keys(),
            ContractNonce::from_hex("deadbeef").unwrap(),
            Network::Regtest,
        );
        let mut row = stored(&compiled);
        row.nonce = "deadbeee".into();
        let err = CompiledContract::from_contract(&row, &keys(), Network::Regtest).unwrap_err();
        assert!(matches!(err, Error::Taproot(_)));
    }

    #[test]
    fn random_nonces_differ() {
        let a = random_nonce().unwrap();
        let b = random_nonce().unwrap();
        assert_eq!(a.as_bytes().len(), NONCE_LEN);
        assert_ne!(a, b);
    }

    #[test]
    fn contract_id_display_and_parse() {
        assert_eq!(ContractId(42).to_string(), "42");
        assert_eq!("42".parse::<ContractId>().unwrap(), ContractId(42));
    }
}
