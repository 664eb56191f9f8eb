//! In-memory collaborators and fixed keys for tests.
//!
//! `MemoryLedger` and `MockChain` stand in for the SQLite store and the
//! Electrum backend so the engine can be driven end to end without a node.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use bitcoin::hashes::Hash;
use bitcoin::secp256k1::{PublicKey, Secp256k1, SecretKey};
use bitcoin::{Address, Transaction, Txid};

use crate::assembly::TransactionAssembler;
use crate::chain::{Broadcaster, Utxo, UtxoProvider};
use crate::contract::{Contract, ContractId, NewContract};
use crate::engine::HashHedgeEngine;
use crate::error::{Error, Result};
use crate::events::ContractEvent;
use crate::fee::FeePolicy;
use crate::feed::StaticFeed;
use crate::keys::{KeyRing, ParticipantKey};
use crate::ledger::ContractLedger;
use crate::network::Network;
use crate::state::ContractStatus;

pub const TEST_HOUSE_SECRET: [u8; 32] = [0x11; 32];
pub const TEST_ORACLE_SECRET: [u8; 32] = [0x22; 32];
pub const TEST_USER_SECRET: [u8; 32] = [0x33; 32];
pub const TEST_THRESHOLD: f64 = 0.05;

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

pub fn test_keyring() -> KeyRing {
    KeyRing::new(
        SecretKey::from_slice(&TEST_HOUSE_SECRET).expect("valid house secret"),
        SecretKey::from_slice(&TEST_ORACLE_SECRET).expect("valid oracle secret"),
    )
}

pub fn test_user_public_key() -> PublicKey {
    let secp = Secp256k1::signing_only();
    PublicKey::from_secret_key(
        &secp,
        &SecretKey::from_slice(&TEST_USER_SECRET).expect("valid user secret"),
    )
}

pub fn test_user_key() -> ParticipantKey {
    ParticipantKey::Full(test_user_public_key())
}

pub fn test_user_pubkey_hex() -> String {
    hex::encode(test_user_public_key().serialize())
}

/// A UTXO with a recognizable fake txid.
pub fn test_utxo(tag: u8, value: u64) -> Utxo {
    Utxo {
        txid: Txid::from_byte_array([tag; 32]),
        vout: 0,
        value,
    }
}

pub fn test_assembler() -> TransactionAssembler {
    TransactionAssembler::new(test_keyring(), FeePolicy::default(), Network::Regtest)
}

/// An engine over a fresh `MemoryLedger` and the given chain.
pub fn memory_engine(
    chain: Arc<MockChain>,
) -> (
    HashHedgeEngine<MemoryLedger>,
    tokio::sync::broadcast::Receiver<ContractEvent>,
) {
    HashHedgeEngine::new(
        test_assembler(),
        Arc::new(Mutex::new(MemoryLedger::default())),
        chain,
        Arc::new(StaticFeed::default()),
        TEST_THRESHOLD,
    )
}

// ---------------------------------------------------------------------------
// MemoryLedger
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct MemoryLedger {
    rows: Vec<Contract>,
    fail_updates: bool,
    failures_left: usize,
}

impl MemoryLedger {
    /// Make every subsequent `update_status` fail.
    pub fn fail_updates(&mut self) {
        self.fail_updates = true;
    }

    /// Make only the next `count` calls to `update_status` fail.
    pub fn fail_next_updates(&mut self, count: usize) {
        self.failures_left = count;
    }
}

impl ContractLedger for MemoryLedger {
    fn insert_contract(&mut self, new: &NewContract) -> std::result::Result<Contract, String> {
        let contract = Contract {
            id: ContractId(self.rows.len() as i64 + 1),
            user_pubkey: new.user_pubkey.clone(),
            deposit_address: new.deposit_address.clone(),
            amount: new.amount,
            direction: new.direction,
            nonce: new.nonce.clone(),
            status: ContractStatus::Pending,
            tx_hex: None,
        };
        self.rows.push(contract.clone());
        Ok(contract)
    }

    fn get_contract(&mut self, id: ContractId) -> std::result::Result<Option<Contract>, String> {
        Ok(self.rows.iter().find(|c| c.id == id).cloned())
    }

    fn update_status(
        &mut self,
        id: ContractId,
        status: ContractStatus,
        tx_hex: Option<&str>,
    ) -> std::result::Result<(), String> {
        if self.fail_updates {
            return Err("ledger offline".into());
        }
        if self.failures_left > 0 {
            self.failures_left -= 1;
            return Err("ledger busy".into());
        }
        let row = self
            .rows
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| format!("contract {id} not found"))?;
        row.status = status;
        if let Some(tx_hex) = tx_hex {
            row.tx_hex = Some(tx_hex.to_string());
        }
        Ok(())
    }

    fn list_by_status(
        &mut self,
        status: ContractStatus,
    ) -> std::result::Result<Vec<Contract>, String> {
        Ok(self
            .rows
            .iter()
            .filter(|c| c.status == status)
            .cloned()
            .collect())
    }

    fn list_by_user(&mut self, user_pubkey: &str) -> std::result::Result<Vec<Contract>, String> {
        Ok(self
            .rows
            .iter()
            .filter(|c| c.user_pubkey == user_pubkey)
            .cloned()
            .collect())
    }
}

// ---------------------------------------------------------------------------
// MockChain
// ---------------------------------------------------------------------------

/// What `MockChain::submit` answers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BroadcastReply {
    /// Return the transaction's real txid, or reject a repeat the way a
    /// node does.
    Accept,
    /// Return this text as if the node had answered with it.
    Text(String),
    /// Fail the call outright.
    Unreachable,
}

#[derive(Debug)]
pub struct MockChain {
    utxos: Mutex<HashMap<String, Vec<Utxo>>>,
    submitted: Mutex<Vec<String>>,
    accepted: Mutex<HashSet<Txid>>,
    reply: Mutex<BroadcastReply>,
    submit_delay: Mutex<Option<Duration>>,
}

impl Default for MockChain {
    fn default() -> Self {
        Self {
            utxos: Mutex::new(HashMap::new()),
            submitted: Mutex::new(Vec::new()),
            accepted: Mutex::new(HashSet::new()),
            reply: Mutex::new(BroadcastReply::Accept),
            submit_delay: Mutex::new(None),
        }
    }
}

impl MockChain {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Add a UTXO at `address` (its string form).
    pub fn fund(&self, address: &str, utxo: Utxo) {
        self.utxos
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(address.to_string())
            .or_default()
            .push(utxo);
    }

    pub fn set_reply(&self, reply: BroadcastReply) {
        *self.reply.lock().unwrap_or_else(PoisonError::into_inner) = reply;
    }

    /// Sleep inside every `submit`, to widen race windows.
    pub fn set_submit_delay(&self, delay: Duration) {
        *self
            .submit_delay
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(delay);
    }

    /// Every raw transaction handed to `submit`, in order.
    pub fn submitted(&self) -> Vec<String> {
        self.submitted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl UtxoProvider for MockChain {
    fn fetch_utxos(&self, address: &Address) -> Vec<Utxo> {
        self.utxos
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&address.to_string())
            .cloned()
            .unwrap_or_default()
    }
}

impl Broadcaster for MockChain {
    fn submit(&self, raw_tx_hex: &str) -> Result<String> {
        let delay = *self
            .submit_delay
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }

        self.submitted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(raw_tx_hex.to_string());

        let reply = self
            .reply
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        match reply {
            BroadcastReply::Accept => {
                let bytes = hex::decode(raw_tx_hex)
                    .map_err(|e| Error::Broadcast(format!("bad hex: {e}")))?;
                let tx: Transaction = bitcoin::consensus::deserialize(&bytes)
                    .map_err(|e| Error::Broadcast(format!("bad transaction: {e}")))?;
                let txid = tx.compute_txid();
                let fresh = self
                    .accepted
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert(txid);
                if fresh {
                    Ok(txid.to_string())
                } else {
                    Err(Error::Broadcast(
                        "sendrawtransaction RPC error: txn-already-known".into(),
                    ))
                }
            }
            BroadcastReply::Text(text) => Ok(text),
            BroadcastReply::Unreachable => {
                Err(Error::CollaboratorUnavailable("mock node unreachable".into()))
            }
        }
    }
}
