use serde::Serialize;

use crate::contract::ContractId;
use crate::state::ContractStatus;

/// Notifications published by the engine.
///
/// Delivered over a `tokio::sync::broadcast` channel; a send with no live
/// receivers is dropped silently.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContractEvent {
    /// The house funded its side.
    Matched {
        contract_id: ContractId,
        txid: String,
        amount: u64,
    },
    /// A partially signed transaction awaits the user's signature.
    ActionRequired {
        contract_id: ContractId,
        status: ContractStatus,
        tx_hex: String,
        message: String,
    },
    /// A payout was broadcast.
    Settled {
        contract_id: ContractId,
        result: ContractStatus,
        txid: String,
    },
}

impl ContractEvent {
    pub fn contract_id(&self) -> ContractId {
        match self {
            ContractEvent::Matched { contract_id, .. }
            | ContractEvent::ActionRequired { contract_id, .. }
            | ContractEvent::Settled { contract_id, .. } => *contract_id,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}
