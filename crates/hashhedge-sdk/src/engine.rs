//! `HashHedgeEngine`, the settlement coordinator.
//!
//! Owns the assembler, the ledger and the chain backend behind a `&self`
//! API. Ledger and chain calls are blocking and run on
//! `tokio::task::spawn_blocking`. Each contract id has its own async mutex, so
//! operations on one contract are serialized while different contracts
//! proceed in parallel.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use bitcoin::{Address, Txid};
use serde::Serialize;
use tokio::sync::{OwnedMutexGuard, broadcast};

use crate::assembly::TransactionAssembler;
use crate::chain::{ChainBackend, Utxo, is_already_known, is_txid};
use crate::contract::{Contract, ContractId, NewContract, random_nonce};
use crate::error::{Error, Result};
use crate::events::ContractEvent;
use crate::feed::{DifficultyFeed, MarketStats};
use crate::keys::ParticipantKey;
use crate::ledger::ContractLedger;
use crate::settlement::{
    CancelOutcome, MatchOutcome, Outcome, RefundOutcome, SettlementOutcome, decide_outcome,
};
use crate::state::{ContractStatus, Direction};

const EVENT_CHANNEL_CAPACITY: usize = 256;
/// Attempts at recording a status once its transaction is on the network.
const LEDGER_WRITE_ATTEMPTS: usize = 3;

/// Per-contract result of [`HashHedgeEngine::settle_all`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContractSettlement {
    pub id: ContractId,
    pub outcome: SettlementOutcome,
}

pub struct HashHedgeEngine<L: ContractLedger> {
    assembler: Arc<TransactionAssembler>,
    ledger: Arc<Mutex<L>>,
    chain: Arc<dyn ChainBackend>,
    feed: Arc<dyn DifficultyFeed>,
    threshold: f64,
    events: broadcast::Sender<ContractEvent>,
    locks: Mutex<HashMap<ContractId, Arc<tokio::sync::Mutex<()>>>>,
    /// Held while house UTXOs are selected and spent.
    house_wallet: tokio::sync::Mutex<()>,
}

impl<L: ContractLedger> HashHedgeEngine<L> {
    pub fn new(
        assembler: TransactionAssembler,
        ledger: Arc<Mutex<L>>,
        chain: Arc<dyn ChainBackend>,
        feed: Arc<dyn DifficultyFeed>,
        threshold: f64,
    ) -> (Self, broadcast::Receiver<ContractEvent>) {
        let (events, rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        (
            Self {
                assembler: Arc::new(assembler),
                ledger,
                chain,
                feed,
                threshold,
                events,
                locks: Mutex::new(HashMap::new()),
                house_wallet: tokio::sync::Mutex::new(()),
            },
            rx,
        )
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ContractEvent> {
        self.events.subscribe()
    }

    pub fn assembler(&self) -> &TransactionAssembler {
        &self.assembler
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    // ── Internal helpers ────────────────────────────────────────────────

    async fn with_ledger<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut L) -> std::result::Result<R, String> + Send + 'static,
        R: Send + 'static,
    {
        let ledger = self.ledger.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = ledger
                .lock()
                .map_err(|_| Error::Ledger("ledger mutex poisoned".into()))?;
            f(&mut guard).map_err(Error::Ledger)
        })
        .await
        .map_err(|e| Error::Task(e.to_string()))?
    }

    async fn fetch_utxos(&self, address: Address) -> Result<Vec<Utxo>> {
        let chain = self.chain.clone();
        tokio::task::spawn_blocking(move || chain.fetch_utxos(&address))
            .await
            .map_err(|e| Error::Task(e.to_string()))
    }

    /// Submit and insist on a txid-shaped answer. A node that already has
    /// `expected` counts as success.
    async fn broadcast(&self, tx_hex: String, expected: Txid) -> Result<String> {
        let chain = self.chain.clone();
        let reply = tokio::task::spawn_blocking(move || chain.submit(&tx_hex))
            .await
            .map_err(|e| Error::Task(e.to_string()))?;
        let reply = match reply {
            Ok(reply) => reply,
            Err(Error::Broadcast(reason)) if is_already_known(&reason) => reason,
            Err(e) => return Err(e),
        };
        let reply = reply.trim();
        if is_txid(reply) {
            Ok(reply.to_lowercase())
        } else if is_already_known(reply) {
            log::info!("engine: {expected} already known to the node");
            Ok(expected.to_string())
        } else {
            Err(Error::Broadcast(format!("broadcast failed: {reply}")))
        }
    }

    async fn lock_contract(&self, id: ContractId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            locks.entry(id).or_default().clone()
        };
        lock.lock_owned().await
    }

    /// Drop `id`'s lock once nobody holds or waits on it.
    fn release_lock(&self, id: ContractId) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        if locks.get(&id).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            locks.remove(&id);
        }
    }

    #[cfg(test)]
    fn tracked_locks(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    async fn load(&self, id: ContractId) -> Result<Contract> {
        self.with_ledger(move |l| l.get_contract(id))
            .await?
            .ok_or(Error::ContractNotFound(id))
    }

    async fn set_status(
        &self,
        id: ContractId,
        status: ContractStatus,
        tx_hex: Option<String>,
    ) -> Result<()> {
        self.with_ledger(move |l| l.update_status(id, status, tx_hex.as_deref()))
            .await
    }

    fn publish(&self, event: ContractEvent) {
        if self.events.send(event).is_err() {
            log::debug!("engine: no event subscribers");
        }
    }

    // ── Creation and queries ────────────────────────────────────────────

    /// Validate inputs, draw a nonce, derive the deposit address and insert a
    /// `PENDING` contract.
    pub async fn create_contract(
        &self,
        user_pubkey: &str,
        amount: u64,
        direction: Direction,
    ) -> Result<Contract> {
        let user_pubkey = user_pubkey.trim().to_lowercase();
        let user = ParticipantKey::from_hex(&user_pubkey)?;
        if amount == 0 {
            return Err(Error::Validation("amount must be greater than zero".into()));
        }

        let compiled = self.assembler.compile(user, random_nonce()?);
        let new = NewContract {
            user_pubkey,
            deposit_address: compiled.address().to_string(),
            amount,
            direction,
            nonce: compiled.nonce().to_hex(),
        };
        let contract = self.with_ledger(move |l| l.insert_contract(&new)).await?;
        log::info!(
            "engine: created contract {} ({} {} sats) at {}",
            contract.id,
            contract.direction,
            contract.amount,
            contract.deposit_address
        );
        Ok(contract)
    }

    pub async fn contract(&self, id: ContractId) -> Result<Contract> {
        self.load(id).await
    }

    pub async fn contracts_by_status(&self, status: ContractStatus) -> Result<Vec<Contract>> {
        self.with_ledger(move |l| l.list_by_status(status)).await
    }

    pub async fn contracts_by_user(&self, user_pubkey: &str) -> Result<Vec<Contract>> {
        let user_pubkey = user_pubkey.trim().to_lowercase();
        self.with_ledger(move |l| l.list_by_user(&user_pubkey)).await
    }

    /// Contracts with an outstanding user signature (payout or refund).
    pub async fn waiting_signature(&self) -> Result<Vec<Contract>> {
        let mut all = Vec::new();
        for status in ContractStatus::ALL {
            if status.is_waiting_signature() {
                all.extend(self.contracts_by_status(status).await?);
            }
        }
        all.sort_by_key(|c| c.id);
        Ok(all)
    }

    pub fn stats(&self) -> MarketStats {
        MarketStats {
            difficulty: self.feed.current_difficulty(),
            hashprice_sats: self.feed.hashprice_sats(),
            threshold: self.threshold,
            house_address: self
                .assembler
                .keys()
                .house_address(self.assembler.network())
                .to_string(),
        }
    }

    // ── Settlement ──────────────────────────────────────────────────────

    /// Settle one contract against an observed difficulty.
    pub async fn settle(
        &self,
        id: ContractId,
        difficulty: f64,
        threshold: f64,
    ) -> SettlementOutcome {
        let result = self.try_settle(id, difficulty, threshold).await;
        self.release_lock(id);
        match result {
            Ok(outcome) => outcome,
            Err(e) => {
                if e.is_no_deposit() {
                    log::info!("engine: skipping contract {id}: no funds");
                } else {
                    log::warn!("engine: settling contract {id} failed: {e}");
                }
                e.into()
            }
        }
    }

    async fn try_settle(
        &self,
        id: ContractId,
        difficulty: f64,
        threshold: f64,
    ) -> Result<SettlementOutcome> {
        check_observation(difficulty, threshold)?;
        let _guard = self.lock_contract(id).await;

        let contract = self.load(id).await?;
        if !contract.status.can_settle() {
            return Ok(SettlementOutcome::AlreadySettled {
                status: contract.status,
            });
        }

        let compiled = self.assembler.compile_contract(&contract)?;
        let utxos = self.fetch_utxos(compiled.address().clone()).await?;
        let outcome = decide_outcome(contract.direction, difficulty, threshold);
        log::info!(
            "engine: contract {id} {} at difficulty {difficulty} vs {threshold}: {outcome:?}",
            contract.direction
        );

        match outcome {
            Outcome::Win => {
                let built = self.assembler.assemble_win_payout(&compiled, &utxos)?;
                let status = ContractStatus::WaitingUserSig;
                self.set_status(id, status, Some(built.tx_hex.clone()))
                    .await?;
                let result = SettlementOutcome::WaitingUserSig {
                    tx_hex: built.tx_hex.clone(),
                };
                self.publish(ContractEvent::ActionRequired {
                    contract_id: id,
                    status,
                    tx_hex: built.tx_hex,
                    message: result.message(),
                });
                Ok(result)
            }
            Outcome::Loss => {
                let built = self.assembler.assemble_loss_payout(&compiled, &utxos)?;

                let current = self.load(id).await?;
                if !current.status.can_settle() {
                    return Ok(SettlementOutcome::AlreadySettled {
                        status: current.status,
                    });
                }

                let txid = self.broadcast(built.tx_hex.clone(), built.txid()).await?;
                if let Err(e) = self.record_settled_loss(id, &built.tx_hex).await {
                    log::error!("engine: contract {id} paid in {txid} but unrecorded: {e}");
                    return Err(Error::Ledger(format!(
                        "{txid} broadcast but not recorded ({e}); settle again to record it"
                    )));
                }
                log::info!("engine: contract {id} settled to house in {txid}");
                self.publish(ContractEvent::Settled {
                    contract_id: id,
                    result: ContractStatus::SettledLoss,
                    txid: txid.clone(),
                });
                Ok(SettlementOutcome::SettledLoss {
                    txid,
                    tx_hex: built.tx_hex,
                })
            }
        }
    }

    /// Write `SETTLED_LOSS` for a payout that is already on the network,
    /// retrying transient ledger failures.
    async fn record_settled_loss(&self, id: ContractId, tx_hex: &str) -> Result<()> {
        let mut attempt = 1;
        loop {
            let result = self
                .set_status(id, ContractStatus::SettledLoss, Some(tx_hex.to_string()))
                .await;
            match result {
                Err(e) if attempt < LEDGER_WRITE_ATTEMPTS => {
                    log::warn!("engine: recording contract {id} failed (attempt {attempt}): {e}");
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    /// Settle every `PENDING` contract, one at a time. A failure on one
    /// contract is recorded in its entry and does not stop the rest.
    pub async fn settle_all(
        &self,
        difficulty: f64,
        threshold: f64,
    ) -> Result<Vec<ContractSettlement>> {
        check_observation(difficulty, threshold)?;
        let pending = self.contracts_by_status(ContractStatus::Pending).await?;
        log::info!("engine: settling {} pending contracts", pending.len());

        let mut results = Vec::with_capacity(pending.len());
        for contract in pending {
            let outcome = self.settle(contract.id, difficulty, threshold).await;
            results.push(ContractSettlement {
                id: contract.id,
                outcome,
            });
        }
        Ok(results)
    }

    /// Build a house-signed refund and wait for the user's signature.
    pub async fn refund(&self, id: ContractId) -> RefundOutcome {
        let result = self.try_refund(id).await;
        self.release_lock(id);
        match result {
            Ok(outcome) => outcome,
            Err(e) => {
                log::warn!("engine: refund of contract {id} failed: {e}");
                e.into()
            }
        }
    }

    async fn try_refund(&self, id: ContractId) -> Result<RefundOutcome> {
        let _guard = self.lock_contract(id).await;

        let contract = self.load(id).await?;
        if contract.status != ContractStatus::Pending {
            return Ok(RefundOutcome::AlreadySettled {
                status: contract.status,
            });
        }

        let compiled = self.assembler.compile_contract(&contract)?;
        let utxos = self.fetch_utxos(compiled.address().clone()).await?;
        let (built, split) = self
            .assembler
            .assemble_refund(&compiled, contract.amount, &utxos)?;

        let status = ContractStatus::WaitingUserSigRefund;
        self.set_status(id, status, Some(built.tx_hex.clone()))
            .await?;
        let result = RefundOutcome::WaitingUserSigRefund {
            tx_hex: built.tx_hex.clone(),
            split,
        };
        self.publish(ContractEvent::ActionRequired {
            contract_id: id,
            status,
            tx_hex: built.tx_hex,
            message: result.message(),
        });
        log::info!("engine: contract {id} refund built ({split:?})");
        Ok(result)
    }

    // ── Matching and cancellation ───────────────────────────────────────

    /// Fund the house's side of a contract once the user's deposit arrived.
    pub async fn match_contract(&self, id: ContractId) -> MatchOutcome {
        let result = self.try_match(id).await;
        self.release_lock(id);
        match result {
            Ok(outcome) => outcome,
            Err(e) => {
                log::warn!("engine: matching contract {id} failed: {e}");
                e.into()
            }
        }
    }

    async fn try_match(&self, id: ContractId) -> Result<MatchOutcome> {
        let _guard = self.lock_contract(id).await;

        let contract = self.load(id).await?;
        if contract.status != ContractStatus::Pending {
            return Ok(MatchOutcome::NotEligible {
                status: contract.status,
            });
        }

        let compiled = self.assembler.compile_contract(&contract)?;
        let balance: u64 = self
            .fetch_utxos(compiled.address().clone())
            .await?
            .iter()
            .map(|u| u.value)
            .sum();
        if balance < contract.amount {
            return Ok(MatchOutcome::WaitingForUser { balance });
        }
        if balance >= contract.amount.saturating_mul(2) {
            return Ok(MatchOutcome::AlreadyMatched { balance });
        }

        let _wallet = self.house_wallet.lock().await;
        let house_address = self
            .assembler
            .keys()
            .house_address(self.assembler.network());
        let house_utxos = self.fetch_utxos(house_address).await?;
        let built = self
            .assembler
            .assemble_match_funding(&compiled, contract.amount, &house_utxos)
            .map_err(|e| {
                if e.is_no_deposit() {
                    Error::CollaboratorUnavailable("house wallet has no funds".into())
                } else {
                    e
                }
            })?;

        let current = self.load(id).await?;
        if current.status != ContractStatus::Pending {
            return Ok(MatchOutcome::NotEligible {
                status: current.status,
            });
        }

        let txid = self.broadcast(built.tx_hex.clone(), built.txid()).await?;
        log::info!(
            "engine: house matched contract {id} with {} sats in {txid}",
            contract.amount
        );
        self.publish(ContractEvent::Matched {
            contract_id: id,
            txid: txid.clone(),
            amount: contract.amount,
        });
        Ok(MatchOutcome::Matched {
            txid,
            amount: contract.amount,
        })
    }

    /// Abandon a contract that never received funds.
    pub async fn cancel(&self, id: ContractId) -> CancelOutcome {
        let result = self.try_cancel(id).await;
        self.release_lock(id);
        match result {
            Ok(outcome) => outcome,
            Err(e) => {
                log::warn!("engine: cancelling contract {id} failed: {e}");
                e.into()
            }
        }
    }

    async fn try_cancel(&self, id: ContractId) -> Result<CancelOutcome> {
        let _guard = self.lock_contract(id).await;

        let contract = self.load(id).await?;
        if contract.status != ContractStatus::Pending {
            return Ok(CancelOutcome::NotEligible {
                status: contract.status,
            });
        }

        let compiled = self.assembler.compile_contract(&contract)?;
        let balance: u64 = self
            .fetch_utxos(compiled.address().clone())
            .await?
            .iter()
            .map(|u| u.value)
            .sum();
        if balance > 0 {
            return Ok(CancelOutcome::Funded { balance });
        }

        self.set_status(id, ContractStatus::Cancelled, None).await?;
        log::info!("engine: contract {id} cancelled");
        Ok(CancelOutcome::Cancelled)
    }
}

/// Reject observations no comparison can be made against.
fn check_observation(difficulty: f64, threshold: f64) -> Result<()> {
    if !difficulty.is_finite() {
        return Err(Error::Validation(format!(
            "difficulty must be a finite number, got {difficulty}"
        )));
    }
    if !threshold.is_finite() {
        return Err(Error::Validation(format!(
            "threshold must be a finite number, got {threshold}"
        )));
    }
    Ok(())
}
