pub use bitcoin;

pub mod assembly;
pub mod chain;
pub mod contract;
pub mod engine;
pub mod error;
pub mod events;
pub mod fee;
pub mod feed;
pub mod keys;
pub mod ledger;
pub mod network;
pub mod script;
pub mod settlement;
pub mod state;
pub mod taproot;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod tree;

// Core types
pub use assembly::{AssembledTransaction, RefundSplit, TransactionAssembler};
pub use chain::{
    Broadcaster, ChainBackend, ElectrumBackend, Utxo, UtxoProvider, is_already_known, is_txid,
};
pub use contract::{CompiledContract, Contract, ContractId, NewContract, random_nonce};
pub use engine::{ContractSettlement, HashHedgeEngine};
pub use error::{Error, FundsShortfall, Result};
pub use events::ContractEvent;
pub use fee::FeePolicy;
pub use feed::{DifficultyFeed, MarketStats, StaticFeed};
pub use keys::{KeyRing, ParticipantKey};
pub use ledger::ContractLedger;
pub use network::Network;
pub use state::{ContractStatus, Direction};

// Outcomes
pub use settlement::{
    CancelOutcome, MatchOutcome, Outcome, RefundOutcome, SettlementOutcome, decide_outcome,
};

// Taproot construction
pub use script::{ContractNonce, build_leaf};
pub use taproot::{
    ContractAddress, NUMS_KEY_BYTES, build_control_block, derive_address, nums_internal_key,
    verify_control_block,
};
pub use tree::{ContractTree, LeafKind};
