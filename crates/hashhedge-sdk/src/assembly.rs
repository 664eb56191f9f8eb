//! Transaction assembly for the four spend intents.
//!
//! Every function here is pure: UTXOs come in as arguments and a fully
//! serialized transaction comes out. Fetching and broadcasting belong to the
//! engine. Script-path spends sign with the BIP-341 `SIGHASH_DEFAULT` digest
//! committing to every prevout; the match-funding spend signs BIP-143 P2WPKH.

use bitcoin::absolute::LockTime;
use bitcoin::consensus::encode::serialize_hex;
use bitcoin::hashes::Hash;
use bitcoin::secp256k1::{Keypair, Message, Secp256k1, XOnlyPublicKey};
use bitcoin::sighash::{EcdsaSighashType, Prevouts, SighashCache, TapSighashType};
use bitcoin::transaction::Version;
use bitcoin::{Amount, OutPoint, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Txid, Witness};
use serde::{Deserialize, Serialize};

use crate::chain::Utxo;
use crate::contract::{CompiledContract, Contract};
use crate::error::{Error, FundsShortfall, Result};
use crate::fee::FeePolicy;
use crate::keys::{KeyRing, ParticipantKey};
use crate::network::Network;
use crate::script::{ContractNonce, sort_pair};
use crate::taproot::verify_control_block;
use crate::tree::LeafKind;

/// A signed (possibly only partially) transaction ready to hand out or broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledTransaction {
    pub tx: Transaction,
    pub tx_hex: String,
    pub fee: u64,
    pub total_in: u64,
}

impl AssembledTransaction {
    fn new(tx: Transaction, fee: u64, total_in: u64) -> Self {
        let tx_hex = serialize_hex(&tx);
        Self {
            tx,
            tx_hex,
            fee,
            total_in,
        }
    }

    pub fn txid(&self) -> Txid {
        self.tx.compute_txid()
    }
}

/// How a refund divides the contract balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefundSplit {
    /// Both stakes present: half to the user, half to the house.
    Shared,
    /// Only the user's stake arrived: everything back to the user.
    UserOnly,
}

impl RefundSplit {
    pub fn message(self) -> &'static str {
        match self {
            RefundSplit::Shared => "Refunded 50/50 to user and house (partial tx)",
            RefundSplit::UserOnly => "Refunded all to user (partial tx)",
        }
    }
}

/// Builds and signs contract transactions with the house and oracle keys.
#[derive(Debug, Clone)]
pub struct TransactionAssembler {
    keys: KeyRing,
    fees: FeePolicy,
    network: Network,
}

impl TransactionAssembler {
    pub fn new(keys: KeyRing, fees: FeePolicy, network: Network) -> Self {
        Self {
            keys,
            fees,
            network,
        }
    }

    pub fn keys(&self) -> &KeyRing {
        &self.keys
    }

    pub fn fee_policy(&self) -> FeePolicy {
        self.fees
    }

    pub fn network(&self) -> Network {
        self.network
    }

    pub fn compile(&self, user: ParticipantKey, nonce: ContractNonce) -> CompiledContract {
        CompiledContract::new(user, &self.keys, nonce, self.network)
    }

    pub fn compile_contract(&self, contract: &Contract) -> Result<CompiledContract> {
        CompiledContract::from_contract(contract, &self.keys, self.network)
    }

    /// Win leaf, oracle signs, the user's slot is left empty.
    pub fn assemble_win_payout(
        &self,
        contract: &CompiledContract,
        utxos: &[Utxo],
    ) -> Result<AssembledTransaction> {
        let total_in = total_value(utxos)?;
        let fee = self.fees.script_path_fee(utxos.len(), 1);
        let send = payable(total_in, fee)?;
        let outputs = vec![txout(
            send,
            contract.user_key().payout_script_pubkey(self.network),
        )];
        let tx = self.spend_leaf(
            contract,
            LeafKind::Win,
            &[self.keys.oracle_keypair()],
            utxos,
            outputs,
        )?;
        Ok(AssembledTransaction::new(tx, fee, total_in))
    }

    /// Loss leaf, house and oracle both sign. Fully signed.
    pub fn assemble_loss_payout(
        &self,
        contract: &CompiledContract,
        utxos: &[Utxo],
    ) -> Result<AssembledTransaction> {
        let total_in = total_value(utxos)?;
        let fee = self.fees.script_path_fee(utxos.len(), 1);
        let send = payable(total_in, fee)?;
        let outputs = vec![txout(send, self.house_script_pubkey())];
        let tx = self.spend_leaf(
            contract,
            LeafKind::Loss,
            &[self.keys.house_keypair(), self.keys.oracle_keypair()],
            utxos,
            outputs,
        )?;
        Ok(AssembledTransaction::new(tx, fee, total_in))
    }

    /// Refund leaf, house signs, the user's slot is left empty.
    ///
    /// Splits 50/50 when the balance covers both stakes, otherwise returns the
    /// whole balance to the user.
    pub fn assemble_refund(
        &self,
        contract: &CompiledContract,
        amount: u64,
        utxos: &[Utxo],
    ) -> Result<(AssembledTransaction, RefundSplit)> {
        let total_in = total_value(utxos)?;
        let user_spk = contract.user_key().payout_script_pubkey(self.network);

        let split = if total_in >= amount.saturating_mul(2) {
            RefundSplit::Shared
        } else {
            RefundSplit::UserOnly
        };

        let (fee, outputs) = match split {
            RefundSplit::Shared => {
                let fee = self.fees.script_path_fee(utxos.len(), 2);
                let half = payable(total_in, fee)? / 2;
                if half == 0 {
                    return Err(Error::InsufficientFunds(FundsShortfall::FeeExceedsBalance {
                        total_in,
                        required: fee + 2,
                    }));
                }
                (
                    fee,
                    vec![txout(half, user_spk), txout(half, self.house_script_pubkey())],
                )
            }
            RefundSplit::UserOnly => {
                let fee = self.fees.script_path_fee(utxos.len(), 1);
                (fee, vec![txout(payable(total_in, fee)?, user_spk)])
            }
        };

        let tx = self.spend_leaf(
            contract,
            LeafKind::Refund,
            &[self.keys.house_keypair()],
            utxos,
            outputs,
        )?;
        Ok((AssembledTransaction::new(tx, fee, total_in), split))
    }

    /// Fund `amount` sats from the house wallet into the contract address.
    pub fn assemble_match_funding(
        &self,
        contract: &CompiledContract,
        amount: u64,
        house_utxos: &[Utxo],
    ) -> Result<AssembledTransaction> {
        let total_in = total_value(house_utxos)?;
        let fee = self.fees.match_funding_fee(house_utxos.len());
        let required = amount
            .checked_add(fee)
            .ok_or_else(|| Error::Validation("match amount overflows".into()))?;
        if total_in < required {
            return Err(Error::InsufficientFunds(FundsShortfall::FeeExceedsBalance {
                total_in,
                required,
            }));
        }

        let house_spk = self.house_script_pubkey();
        let change = total_in - required;
        let mut outputs = vec![txout(amount, contract.script_pubkey())];
        if !self.fees.is_dust(change) {
            outputs.push(txout(change, house_spk.clone()));
        }

        let mut tx = unsigned_tx(house_utxos, outputs);
        let secp = Secp256k1::signing_only();
        let house = self.keys.house_keypair();

        let mut witnesses = Vec::with_capacity(house_utxos.len());
        {
            let mut cache = SighashCache::new(&tx);
            for (i, utxo) in house_utxos.iter().enumerate() {
                let sighash = cache
                    .p2wpkh_signature_hash(
                        i,
                        &house_spk,
                        Amount::from_sat(utxo.value),
                        EcdsaSighashType::All,
                    )
                    .map_err(|e| Error::Signing(format!("p2wpkh sighash input {i}: {e}")))?;
                let msg = Message::from_digest(sighash.to_byte_array());
                let signature = bitcoin::ecdsa::Signature {
                    signature: secp.sign_ecdsa(&msg, &house.secret_key()),
                    sighash_type: EcdsaSighashType::All,
                };
                let mut witness = Witness::new();
                witness.push(signature.to_vec());
                witness.push(house.public_key().serialize());
                witnesses.push(witness);
            }
        }
        for (input, witness) in tx.input.iter_mut().zip(witnesses) {
            input.witness = witness;
        }

        log::debug!(
            "assembly: match funding {amount} sats to {} from {} inputs, fee {fee}",
            contract.address(),
            house_utxos.len()
        );
        Ok(AssembledTransaction::new(tx, fee, total_in))
    }

    fn house_script_pubkey(&self) -> ScriptBuf {
        self.keys.house_address(self.network).script_pubkey()
    }

    /// Sign every input along `leaf` with whichever of `signers` appear in it.
    fn spend_leaf(
        &self,
        contract: &CompiledContract,
        leaf: LeafKind,
        signers: &[&Keypair],
        utxos: &[Utxo],
        outputs: Vec<TxOut>,
    ) -> Result<Transaction> {
        let script = contract.leaf(leaf);
        let control_block = contract.control_block(leaf);
        let output_key = contract.output_key().to_x_only_public_key();
        if !verify_control_block(script, &control_block, output_key)? {
            return Err(Error::Taproot(format!(
                "{leaf:?} control block does not commit to {}",
                contract.address()
            )));
        }

        let spk = contract.script_pubkey();
        let prevouts: Vec<TxOut> = utxos
            .iter()
            .map(|u| txout(u.value, spk.clone()))
            .collect();
        let leaf_hash = contract.leaf_hash(leaf);
        let [k0, k1] = leaf_signers(contract, leaf);

        let mut tx = unsigned_tx(utxos, outputs);
        let secp = Secp256k1::signing_only();

        let mut witnesses = Vec::with_capacity(utxos.len());
        {
            let mut cache = SighashCache::new(&tx);
            for i in 0..utxos.len() {
                let sighash = cache
                    .taproot_script_spend_signature_hash(
                        i,
                        &Prevouts::All(&prevouts),
                        leaf_hash,
                        TapSighashType::Default,
                    )
                    .map_err(|e| Error::Signing(format!("taproot sighash input {i}: {e}")))?;
                let msg = Message::from_digest(sighash.to_byte_array());

                let sign_for = |key: XOnlyPublicKey| -> Vec<u8> {
                    signers
                        .iter()
                        .find(|kp| kp.x_only_public_key().0 == key)
                        .map(|kp| {
                            bitcoin::taproot::Signature {
                                signature: secp.sign_schnorr_no_aux_rand(&msg, kp),
                                sighash_type: TapSighashType::Default,
                            }
                            .to_vec()
                        })
                        .unwrap_or_default()
                };

                let mut witness = Witness::new();
                witness.push(sign_for(k1));
                witness.push(sign_for(k0));
                witness.push(script.as_bytes());
                witness.push(&control_block);
                witnesses.push(witness);
            }
        }
        for (input, witness) in tx.input.iter_mut().zip(witnesses) {
            input.witness = witness;
        }

        log::debug!(
            "assembly: {leaf:?} spend of {} inputs from {}",
            utxos.len(),
            contract.address()
        );
        Ok(tx)
    }
}

/// The two keys of a leaf in script order.
pub fn leaf_signers(contract: &CompiledContract, leaf: LeafKind) -> [XOnlyPublicKey; 2] {
    let user = contract.user_key().x_only();
    match leaf {
        LeafKind::Win => sort_pair(user, contract.oracle_key()),
        LeafKind::Loss => sort_pair(contract.house_key(), contract.oracle_key()),
        LeafKind::Refund => sort_pair(user, contract.house_key()),
    }
}

fn total_value(utxos: &[Utxo]) -> Result<u64> {
    if utxos.is_empty() {
        return Err(Error::InsufficientFunds(FundsShortfall::NoDeposit));
    }
    utxos
        .iter()
        .try_fold(0u64, |acc, u| acc.checked_add(u.value))
        .ok_or_else(|| Error::Validation("utxo values overflow".into()))
}

fn payable(total_in: u64, fee: u64) -> Result<u64> {
    match total_in.checked_sub(fee) {
        Some(send) if send > 0 => Ok(send),
        _ => Err(Error::InsufficientFunds(FundsShortfall::FeeExceedsBalance {
            total_in,
            required: fee + 1,
        })),
    }
}

fn txout(value: u64, script_pubkey: ScriptBuf) -> TxOut {
    TxOut {
        value: Amount::from_sat(value),
        script_pubkey,
    }
}

fn unsigned_tx(utxos: &[Utxo], outputs: Vec<TxOut>) -> Transaction {
    Transaction {
        version: Version::TWO,
        lock_time: LockTime::ZERO,
        input: utxos
            .iter()
            .map(|u| TxIn {
                previous_output: OutPoint::new(u.txid, u.vout),
                script_sig: ScriptBuf::new(),
                sequence: Sequence::MAX,
                witness: Witness::new(),
            })
            .collect(),
        output: outputs,
    }
}
