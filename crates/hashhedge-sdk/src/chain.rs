use bitcoin::{Address, Txid};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// An unspent output at a watched address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utxo {
    pub txid: Txid,
    pub vout: u32,
    pub value: u64,
}

/// Looks up UTXOs at an address.
pub trait UtxoProvider: Send + Sync {
    /// Unspent outputs at `address`. Not-found and transient failures both
    /// come back as an empty list.
    fn fetch_utxos(&self, address: &Address) -> Vec<Utxo>;
}

/// Submits raw transactions to the network.
pub trait Broadcaster: Send + Sync {
    /// Returns whatever the backend answered. Only a 64-hex-char string is a txid.
    fn submit(&self, raw_tx_hex: &str) -> Result<String>;
}

/// A backend that can both look up UTXOs and broadcast.
pub trait ChainBackend: UtxoProvider + Broadcaster {}

impl<T: UtxoProvider + Broadcaster> ChainBackend for T {}

/// Whether `s` looks like a transaction id.
pub fn is_txid(s: &str) -> bool {
    s.len() == 64 && s.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Whether a node rejected a transaction only because it already has it.
pub fn is_already_known(reply: &str) -> bool {
    let reply = reply.to_ascii_lowercase();
    ["txn-already-known", "txn-already-in-mempool", "already in block chain"]
        .iter()
        .any(|marker| reply.contains(marker))
}

/// Electrum-based chain backend for Bitcoin.
pub struct ElectrumBackend {
    electrum_url: String,
}

impl ElectrumBackend {
    pub fn new(electrum_url: &str) -> Self {
        Self {
            electrum_url: electrum_url.to_string(),
        }
    }

    pub fn electrum_url(&self) -> &str {
        &self.electrum_url
    }

    fn client(&self) -> Result<electrum_client::Client> {
        electrum_client::Client::new(&self.electrum_url)
            .map_err(|e| Error::CollaboratorUnavailable(format!("electrum: {e}")))
    }

    /// Like [`UtxoProvider::fetch_utxos`] but surfacing the failure.
    pub fn scan_address(&self, address: &Address) -> Result<Vec<Utxo>> {
        use electrum_client::ElectrumApi;

        let client = self.client()?;
        let entries = client
            .script_list_unspent(&address.script_pubkey())
            .map_err(|e| Error::CollaboratorUnavailable(format!("listunspent: {e}")))?;

        entries
            .into_iter()
            .map(|entry| {
                let vout = u32::try_from(entry.tx_pos)
                    .map_err(|_| Error::CollaboratorUnavailable("vout out of range".into()))?;
                Ok(Utxo {
                    txid: entry.tx_hash,
                    vout,
                    value: entry.value,
                })
            })
            .collect()
    }
}

impl UtxoProvider for ElectrumBackend {
    fn fetch_utxos(&self, address: &Address) -> Vec<Utxo> {
        match self.scan_address(address) {
            Ok(utxos) => utxos,
            Err(e) => {
                log::warn!("chain: utxo lookup for {address} failed: {e}");
                Vec::new()
            }
        }
    }
}

impl Broadcaster for ElectrumBackend {
    fn submit(&self, raw_tx_hex: &str) -> Result<String> {
        use electrum_client::ElectrumApi;

        let raw = hex::decode(raw_tx_hex)
            .map_err(|e| Error::Broadcast(format!("transaction hex: {e}")))?;
        let client = self.client()?;
        let txid = client
            .transaction_broadcast_raw(&raw)
            .map_err(|e| Error::Broadcast(e.to_string()))?;
        Ok(txid.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn txid_shape() {
        assert!(is_txid(&"ab".repeat(32)));
        assert!(is_txid(&"AB".repeat(32)));
        assert!(!is_txid(&"ab".repeat(31)));
        assert!(!is_txid(&"zz".repeat(32)));
        assert!(!is_txid("sendrawtransaction RPC error: bad-txns-inputs-missingorspent"));
    }

    #[test]
    fn already_known_replies() {
        assert!(is_already_known("txn-already-known"));
        assert!(is_already_known("RPC error: txn-already-in-mempool"));
        assert!(is_already_known("Transaction already in block chain"));
        assert!(!is_already_known("bad-txns-inputs-missingorspent"));
        assert!(!is_already_known(&"ab".repeat(32)));
    }

    #[test]
    fn electrum_unreachable_yields_empty() {
        let backend = ElectrumBackend::new("tcp://127.0.0.1:1");
        let addr = crate::keys::KeyRing::from_secret_hex(&"01".repeat(32), &"02".repeat(32))
            .unwrap()
            .house_address(crate::network::Network::Regtest);
        assert!(backend.fetch_utxos(&addr).is_empty());
        assert!(backend.submit("00").is_err());
    }
}
