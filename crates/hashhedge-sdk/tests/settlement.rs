use std::sync::{Arc, Mutex};
use std::time::Duration;

use hashhedge_sdk::bitcoin::Transaction;
use hashhedge_sdk::fee::FeePolicy;
use hashhedge_sdk::testing::{
    BroadcastReply, MemoryLedger, MockChain, TEST_THRESHOLD, memory_engine, test_assembler,
    test_user_key, test_user_pubkey_hex, test_utxo,
};
use hashhedge_sdk::{
    CancelOutcome, ContractEvent, ContractId, ContractStatus, Direction, Error, HashHedgeEngine,
    MatchOutcome, Network, RefundOutcome, RefundSplit, SettlementOutcome, StaticFeed,
};

fn decode(tx_hex: &str) -> Transaction {
    hashhedge_sdk::bitcoin::consensus::deserialize(&hex::decode(tx_hex).unwrap()).unwrap()
}

fn house_address() -> String {
    test_assembler()
        .keys()
        .house_address(Network::Regtest)
        .to_string()
}

fn engine_over(
    chain: Arc<MockChain>,
    ledger: Arc<Mutex<MemoryLedger>>,
) -> (
    HashHedgeEngine<MemoryLedger>,
    tokio::sync::broadcast::Receiver<ContractEvent>,
) {
    HashHedgeEngine::new(
        test_assembler(),
        ledger,
        chain,
        Arc::new(StaticFeed::default()),
        TEST_THRESHOLD,
    )
}

#[tokio::test]
async fn end_to_end_win() {
    let chain = MockChain::new();
    let (engine, mut events) = memory_engine(chain.clone());

    let contract = engine
        .create_contract(&test_user_pubkey_hex(), 100_000, Direction::Long)
        .await
        .unwrap();
    assert_eq!(contract.status, ContractStatus::Pending);
    assert!(contract.deposit_address.starts_with("bcrt1p"));

    // user deposits, house matches
    chain.fund(&contract.deposit_address, test_utxo(1, 100_000));
    chain.fund(&house_address(), test_utxo(2, 1_000_000));
    let matched = engine.match_contract(contract.id).await;
    let MatchOutcome::Matched { txid, amount } = matched else {
        panic!("expected match, got {matched:?}");
    };
    assert_eq!(amount, 100_000);

    // the match pays exactly the deposit address
    let funding = decode(&chain.submitted()[0]);
    assert_eq!(funding.compute_txid().to_string(), txid);
    let compiled = engine.assembler().compile_contract(&contract).unwrap();
    assert_eq!(funding.output[0].script_pubkey, compiled.script_pubkey());
    assert_eq!(funding.output[0].value.to_sat(), 100_000);
    chain.fund(
        &contract.deposit_address,
        hashhedge_sdk::Utxo {
            txid: funding.compute_txid(),
            vout: 0,
            value: 100_000,
        },
    );

    let outcome = engine.settle(contract.id, 0.06, TEST_THRESHOLD).await;
    let SettlementOutcome::WaitingUserSig { tx_hex } = &outcome else {
        panic!("expected WIN, got {outcome:?}");
    };

    let tx = decode(tx_hex);
    let fee = FeePolicy::default().script_path_fee(2, 1);
    assert_eq!(tx.output.len(), 1);
    assert_eq!(tx.output[0].value.to_sat(), 200_000 - fee);
    assert_eq!(
        tx.output[0].script_pubkey,
        test_user_key().payout_script_pubkey(Network::Regtest)
    );
    for input in &tx.input {
        let sigs: Vec<&[u8]> = input.witness.iter().take(2).collect();
        assert_eq!(sigs.iter().filter(|s| s.is_empty()).count(), 1);
        assert_eq!(sigs.iter().filter(|s| s.len() == 64).count(), 1);
    }

    let stored = engine.contract(contract.id).await.unwrap();
    assert_eq!(stored.status, ContractStatus::WaitingUserSig);
    assert_eq!(stored.tx_hex.as_deref(), Some(tx_hex.as_str()));

    // win payouts are never broadcast by the engine
    assert_eq!(chain.submitted().len(), 1);

    assert!(matches!(
        events.try_recv().unwrap(),
        ContractEvent::Matched { .. }
    ));
    match events.try_recv().unwrap() {
        ContractEvent::ActionRequired {
            contract_id,
            status,
            ..
        } => {
            assert_eq!(contract_id, contract.id);
            assert_eq!(status, ContractStatus::WaitingUserSig);
        }
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test]
async fn loss_broadcasts_and_is_idempotent() {
    let chain = MockChain::new();
    let (engine, _events) = memory_engine(chain.clone());
    let contract = engine
        .create_contract(&test_user_pubkey_hex(), 100_000, Direction::Short)
        .await
        .unwrap();
    chain.fund(&contract.deposit_address, test_utxo(1, 200_000));

    let outcome = engine.settle(contract.id, 0.051, TEST_THRESHOLD).await;
    let SettlementOutcome::SettledLoss { txid, tx_hex } = &outcome else {
        panic!("expected LOSS, got {outcome:?}");
    };
    assert_eq!(txid.len(), 64);
    let tx = decode(tx_hex);
    assert_eq!(tx.output[0].value.to_sat(), 200_000 - 384);
    assert_eq!(
        tx.output[0].script_pubkey.to_string(),
        test_assembler()
            .keys()
            .house_address(Network::Regtest)
            .script_pubkey()
            .to_string()
    );

    let again = engine.settle(contract.id, 0.051, TEST_THRESHOLD).await;
    assert_eq!(
        again,
        SettlementOutcome::AlreadySettled {
            status: ContractStatus::SettledLoss
        }
    );
    let stored = engine.contract(contract.id).await.unwrap();
    assert_eq!(stored.status, ContractStatus::SettledLoss);
    assert_eq!(stored.tx_hex.as_deref(), Some(tx_hex.as_str()));
    assert_eq!(chain.submitted().len(), 1);
}

#[tokio::test]
async fn failed_broadcast_leaves_contract_retryable() {
    let chain = MockChain::new();
    let (engine, _events) = memory_engine(chain.clone());
    let contract = engine
        .create_contract(&test_user_pubkey_hex(), 100_000, Direction::Long)
        .await
        .unwrap();
    chain.fund(&contract.deposit_address, test_utxo(1, 200_000));

    chain.set_reply(BroadcastReply::Text(
        "sendrawtransaction RPC error: bad-txns-inputs-missingorspent".into(),
    ));
    let outcome = engine.settle(contract.id, 0.04, TEST_THRESHOLD).await;
    assert_eq!(outcome.tag(), "ERROR");
    assert!(outcome.message().contains("missingorspent"));
    let stored = engine.contract(contract.id).await.unwrap();
    assert_eq!(stored.status, ContractStatus::Pending);
    assert!(stored.tx_hex.is_none());

    chain.set_reply(BroadcastReply::Unreachable);
    let outcome = engine.settle(contract.id, 0.04, TEST_THRESHOLD).await;
    assert!(outcome.is_error());
    assert_eq!(
        engine.contract(contract.id).await.unwrap().status,
        ContractStatus::Pending
    );

    chain.set_reply(BroadcastReply::Accept);
    let outcome = engine.settle(contract.id, 0.04, TEST_THRESHOLD).await;
    assert_eq!(outcome.tag(), "SETTLED_LOSS");
}

#[tokio::test]
async fn unfunded_contract_is_skipped() {
    let chain = MockChain::new();
    let (engine, _events) = memory_engine(chain.clone());
    let contract = engine
        .create_contract(&test_user_pubkey_hex(), 100_000, Direction::Long)
        .await
        .unwrap();

    let outcome = engine.settle(contract.id, 0.06, TEST_THRESHOLD).await;
    assert_eq!(outcome, SettlementOutcome::Skipped);
    assert_eq!(
        engine.contract(contract.id).await.unwrap().status,
        ContractStatus::Pending
    );
}

#[tokio::test]
async fn unknown_contract() {
    let (engine, _events) = memory_engine(MockChain::new());
    let id = ContractId(99);
    assert_eq!(
        engine.settle(id, 0.06, TEST_THRESHOLD).await,
        SettlementOutcome::NotFound
    );
    assert_eq!(engine.refund(id).await, RefundOutcome::NotFound);
    assert_eq!(engine.match_contract(id).await, MatchOutcome::NotFound);
    assert_eq!(engine.cancel(id).await, CancelOutcome::NotFound);
    assert!(matches!(
        engine.contract(id).await,
        Err(Error::ContractNotFound(ContractId(99)))
    ));
}

#[tokio::test]
async fn settle_all_continues_past_failures() {
    let chain = MockChain::new();
    let (engine, _events) = memory_engine(chain.clone());
    let user = test_user_pubkey_hex();

    let winner = engine
        .create_contract(&user, 100_000, Direction::Long)
        .await
        .unwrap();
    let unfunded = engine
        .create_contract(&user, 100_000, Direction::Long)
        .await
        .unwrap();
    let dust = engine
        .create_contract(&user, 100_000, Direction::Long)
        .await
        .unwrap();
    let loser = engine
        .create_contract(&user, 100_000, Direction::Short)
        .await
        .unwrap();
    let settled = engine
        .create_contract(&user, 100_000, Direction::Short)
        .await
        .unwrap();

    chain.fund(&winner.deposit_address, test_utxo(1, 200_000));
    chain.fund(&dust.deposit_address, test_utxo(2, 300));
    chain.fund(&loser.deposit_address, test_utxo(3, 200_000));
    chain.fund(&settled.deposit_address, test_utxo(4, 200_000));
    assert_eq!(
        engine.settle(settled.id, 0.06, TEST_THRESHOLD).await.tag(),
        "SETTLED_LOSS"
    );

    let results = engine.settle_all(0.06, TEST_THRESHOLD).await.unwrap();
    let tags: Vec<(ContractId, &str)> = results.iter().map(|r| (r.id, r.outcome.tag())).collect();
    assert_eq!(
        tags,
        vec![
            (winner.id, "WAITING_USER_SIG"),
            (unfunded.id, "SKIPPED"),
            (dust.id, "ERROR"),
            (loser.id, "SETTLED_LOSS"),
        ]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_settles_broadcast_once() {
    let chain = MockChain::new();
    chain.set_submit_delay(Duration::from_millis(50));
    let (engine, _events) = memory_engine(chain.clone());
    let engine = Arc::new(engine);

    let contract = engine
        .create_contract(&test_user_pubkey_hex(), 100_000, Direction::Long)
        .await
        .unwrap();
    chain.fund(&contract.deposit_address, test_utxo(1, 200_000));
    let id = contract.id;

    let handles: Vec<_> = (0..2)
        .map(|_| {
            let engine = engine.clone();
            tokio::spawn(async move { engine.settle(id, 0.01, TEST_THRESHOLD).await })
        })
        .collect();

    let mut tags = Vec::new();
    for handle in handles {
        tags.push(handle.await.unwrap().tag());
    }
    tags.sort();
    assert_eq!(tags, vec!["ALREADY_SETTLED", "SETTLED_LOSS"]);
    assert_eq!(chain.submitted().len(), 1);
}

#[tokio::test]
async fn refund_splits_and_waits_for_user() {
    let chain = MockChain::new();
    let (engine, mut events) = memory_engine(chain.clone());
    let contract = engine
        .create_contract(&test_user_pubkey_hex(), 100_000, Direction::Long)
        .await
        .unwrap();
    chain.fund(&contract.deposit_address, test_utxo(1, 100_000));
    chain.fund(&contract.deposit_address, test_utxo(2, 100_000));

    let outcome = engine.refund(contract.id).await;
    let RefundOutcome::WaitingUserSigRefund { tx_hex, split } = &outcome else {
        panic!("expected refund, got {outcome:?}");
    };
    assert_eq!(*split, RefundSplit::Shared);
    let tx = decode(tx_hex);
    assert_eq!(tx.output.len(), 2);
    assert_eq!(tx.output[0].value, tx.output[1].value);
    assert!(chain.submitted().is_empty());

    assert_eq!(
        engine.contract(contract.id).await.unwrap().status,
        ContractStatus::WaitingUserSigRefund
    );
    assert!(matches!(
        events.try_recv().unwrap(),
        ContractEvent::ActionRequired {
            status: ContractStatus::WaitingUserSigRefund,
            ..
        }
    ));

    assert_eq!(
        engine.refund(contract.id).await,
        RefundOutcome::AlreadySettled {
            status: ContractStatus::WaitingUserSigRefund
        }
    );
    assert_eq!(
        engine.settle(contract.id, 0.06, TEST_THRESHOLD).await.tag(),
        "ALREADY_SETTLED"
    );
}

#[tokio::test]
async fn match_checks_balance() {
    let chain = MockChain::new();
    let (engine, _events) = memory_engine(chain.clone());
    let contract = engine
        .create_contract(&test_user_pubkey_hex(), 100_000, Direction::Long)
        .await
        .unwrap();

    assert_eq!(
        engine.match_contract(contract.id).await,
        MatchOutcome::WaitingForUser { balance: 0 }
    );

    chain.fund(&contract.deposit_address, test_utxo(1, 100_000));
    let no_house = engine.match_contract(contract.id).await;
    assert_eq!(no_house.tag(), "ERROR");
    assert!(chain.submitted().is_empty());

    chain.fund(&contract.deposit_address, test_utxo(2, 100_000));
    assert_eq!(
        engine.match_contract(contract.id).await,
        MatchOutcome::AlreadyMatched { balance: 200_000 }
    );
    assert_eq!(
        engine.contract(contract.id).await.unwrap().status,
        ContractStatus::Pending
    );
}

#[tokio::test]
async fn cancel_only_unfunded_pending() {
    let chain = MockChain::new();
    let (engine, _events) = memory_engine(chain.clone());
    let user = test_user_pubkey_hex();

    let empty = engine
        .create_contract(&user, 50_000, Direction::Long)
        .await
        .unwrap();
    assert_eq!(engine.cancel(empty.id).await, CancelOutcome::Cancelled);
    assert_eq!(
        engine.contract(empty.id).await.unwrap().status,
        ContractStatus::Cancelled
    );
    assert_eq!(
        engine.cancel(empty.id).await,
        CancelOutcome::NotEligible {
            status: ContractStatus::Cancelled
        }
    );
    assert_eq!(
        engine.settle(empty.id, 0.06, TEST_THRESHOLD).await.tag(),
        "ALREADY_SETTLED"
    );

    let funded = engine
        .create_contract(&user, 50_000, Direction::Long)
        .await
        .unwrap();
    chain.fund(&funded.deposit_address, test_utxo(1, 50_000));
    assert_eq!(
        engine.cancel(funded.id).await,
        CancelOutcome::Funded { balance: 50_000 }
    );
    assert_eq!(
        engine.contract(funded.id).await.unwrap().status,
        ContractStatus::Pending
    );
}

#[tokio::test]
async fn create_rejects_bad_input() {
    let (engine, _events) = memory_engine(MockChain::new());
    assert!(matches!(
        engine
            .create_contract("02abcd", 100_000, Direction::Long)
            .await,
        Err(Error::Validation(_))
    ));
    assert!(matches!(
        engine
            .create_contract(&test_user_pubkey_hex(), 0, Direction::Long)
            .await,
        Err(Error::Validation(_))
    ));
    assert!(
        engine
            .contracts_by_status(ContractStatus::Pending)
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn queries() {
    let chain = MockChain::new();
    let (engine, _events) = memory_engine(chain.clone());
    let user = test_user_pubkey_hex();

    let a = engine
        .create_contract(&user, 10_000, Direction::Long)
        .await
        .unwrap();
    let b = engine
        .create_contract(&user, 10_000, Direction::Long)
        .await
        .unwrap();
    let _c = engine
        .create_contract(&user.to_uppercase(), 10_000, Direction::Short)
        .await
        .unwrap();
    assert_ne!(a.deposit_address, b.deposit_address);
    assert_ne!(a.nonce, b.nonce);

    chain.fund(&a.deposit_address, test_utxo(1, 20_000));
    chain.fund(&b.deposit_address, test_utxo(2, 20_000));
    engine.settle(a.id, 0.06, TEST_THRESHOLD).await;
    engine.refund(b.id).await;

    let waiting: Vec<_> = engine
        .waiting_signature()
        .await
        .unwrap()
        .into_iter()
        .map(|c| c.id)
        .collect();
    assert_eq!(waiting, vec![a.id, b.id]);
    assert_eq!(engine.contracts_by_user(&user).await.unwrap().len(), 3);

    let stats = engine.stats();
    assert_eq!(stats.threshold, TEST_THRESHOLD);
    assert_eq!(stats.house_address, house_address());
}

#[tokio::test]
async fn ledger_failure_reported_as_error() {
    let chain = MockChain::new();
    let ledger = Arc::new(Mutex::new(MemoryLedger::default()));
    let (engine, _events) = engine_over(chain.clone(), ledger.clone());
    let contract = engine
        .create_contract(&test_user_pubkey_hex(), 100_000, Direction::Long)
        .await
        .unwrap();
    chain.fund(&contract.deposit_address, test_utxo(1, 200_000));

    ledger.lock().unwrap().fail_updates();
    let outcome = engine.settle(contract.id, 0.06, TEST_THRESHOLD).await;
    assert!(outcome.is_error());
    assert!(outcome.message().contains("ledger offline"));
}

#[tokio::test]
async fn loss_recorded_after_transient_ledger_failure() {
    let chain = MockChain::new();
    let ledger = Arc::new(Mutex::new(MemoryLedger::default()));
    let (engine, mut events) = engine_over(chain.clone(), ledger.clone());
    let contract = engine
        .create_contract(&test_user_pubkey_hex(), 100_000, Direction::Short)
        .await
        .unwrap();
    chain.fund(&contract.deposit_address, test_utxo(1, 200_000));

    ledger.lock().unwrap().fail_next_updates(1);
    let outcome = engine.settle(contract.id, 0.06, TEST_THRESHOLD).await;
    assert_eq!(outcome.tag(), "SETTLED_LOSS");
    assert_eq!(
        engine.contract(contract.id).await.unwrap().status,
        ContractStatus::SettledLoss
    );
    assert_eq!(chain.submitted().len(), 1);
    assert!(matches!(
        events.try_recv().unwrap(),
        ContractEvent::Settled { .. }
    ));
}

#[tokio::test]
async fn unrecorded_loss_is_recorded_by_next_settle() {
    let chain = MockChain::new();
    let ledger = Arc::new(Mutex::new(MemoryLedger::default()));
    let (engine, mut events) = engine_over(chain.clone(), ledger.clone());
    let contract = engine
        .create_contract(&test_user_pubkey_hex(), 100_000, Direction::Short)
        .await
        .unwrap();
    chain.fund(&contract.deposit_address, test_utxo(1, 200_000));

    // more failures than the engine retries
    ledger.lock().unwrap().fail_next_updates(10);
    let outcome = engine.settle(contract.id, 0.06, TEST_THRESHOLD).await;
    assert!(outcome.is_error());
    let payout = decode(&chain.submitted()[0]).compute_txid().to_string();
    assert!(outcome.message().contains(&payout));
    assert!(outcome.message().contains("settle again"));
    assert_eq!(
        engine.contract(contract.id).await.unwrap().status,
        ContractStatus::Pending
    );
    assert!(events.try_recv().is_err());

    ledger.lock().unwrap().fail_next_updates(0);
    let outcome = engine.settle(contract.id, 0.06, TEST_THRESHOLD).await;
    let SettlementOutcome::SettledLoss { txid, .. } = &outcome else {
        panic!("expected LOSS, got {outcome:?}");
    };
    assert_eq!(txid, &payout);

    // the node already had it; same transaction both times
    let submitted = chain.submitted();
    assert_eq!(submitted.len(), 2);
    assert_eq!(submitted[0], submitted[1]);
    let stored = engine.contract(contract.id).await.unwrap();
    assert_eq!(stored.status, ContractStatus::SettledLoss);
    assert_eq!(stored.tx_hex.as_deref(), Some(submitted[0].as_str()));
    match events.try_recv().unwrap() {
        ContractEvent::Settled {
            contract_id, txid, ..
        } => {
            assert_eq!(contract_id, contract.id);
            assert_eq!(txid, payout);
        }
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test]
async fn already_known_reply_counts_as_broadcast() {
    let chain = MockChain::new();
    let (engine, _events) = memory_engine(chain.clone());
    let contract = engine
        .create_contract(&test_user_pubkey_hex(), 100_000, Direction::Long)
        .await
        .unwrap();
    chain.fund(&contract.deposit_address, test_utxo(1, 200_000));

    chain.set_reply(BroadcastReply::Text("txn-already-in-mempool".into()));
    let outcome = engine.settle(contract.id, 0.04, TEST_THRESHOLD).await;
    let SettlementOutcome::SettledLoss { txid, tx_hex } = &outcome else {
        panic!("expected LOSS, got {outcome:?}");
    };
    assert_eq!(txid, &decode(tx_hex).compute_txid().to_string());
    assert_eq!(
        engine.contract(contract.id).await.unwrap().status,
        ContractStatus::SettledLoss
    );
}

#[tokio::test]
async fn non_finite_observation_rejected() {
    let chain = MockChain::new();
    let (engine, _events) = memory_engine(chain.clone());
    let contract = engine
        .create_contract(&test_user_pubkey_hex(), 100_000, Direction::Long)
        .await
        .unwrap();
    chain.fund(&contract.deposit_address, test_utxo(1, 200_000));

    for (difficulty, threshold) in [
        (f64::NAN, TEST_THRESHOLD),
        (f64::INFINITY, TEST_THRESHOLD),
        (0.06, f64::NAN),
        (0.06, f64::NEG_INFINITY),
    ] {
        let outcome = engine.settle(contract.id, difficulty, threshold).await;
        assert_eq!(outcome.tag(), "ERROR");
        assert!(outcome.message().contains("finite"));
    }
    assert!(matches!(
        engine.settle_all(f64::NAN, TEST_THRESHOLD).await,
        Err(Error::Validation(_))
    ));

    assert!(chain.submitted().is_empty());
    let stored = engine.contract(contract.id).await.unwrap();
    assert_eq!(stored.status, ContractStatus::Pending);
    assert!(stored.tx_hex.is_none());
}
