use serde::Serialize;
use thiserror::Error;

use crate::contract::ContractId;
use crate::state::ContractStatus;

/// Why a spend could not be funded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FundsShortfall {
    /// The source address holds no UTXOs (yet).
    NoDeposit,
    /// The UTXOs exist but cannot cover the fee plus required outputs.
    FeeExceedsBalance { total_in: u64, required: u64 },
}

impl std::fmt::Display for FundsShortfall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FundsShortfall::NoDeposit => write!(f, "no funds at address"),
            FundsShortfall::FeeExceedsBalance { total_in, required } => {
                write!(f, "balance {total_in} sats does not cover {required} sats")
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("insufficient funds: {0}")]
    InsufficientFunds(FundsShortfall),

    #[error("contract {id} is {status}, operation not allowed")]
    InvalidContractState {
        id: ContractId,
        status: ContractStatus,
    },

    #[error("contract {0} not found")]
    ContractNotFound(ContractId),

    #[error("broadcast error: {0}")]
    Broadcast(String),

    #[error("collaborator unavailable: {0}")]
    CollaboratorUnavailable(String),

    #[error("ledger error: {0}")]
    Ledger(String),

    #[error("signing error: {0}")]
    Signing(String),

    #[error("taproot construction error: {0}")]
    Taproot(String),

    #[error("task join error: {0}")]
    Task(String),
}

impl Error {
    /// True for the "nothing deposited yet" condition, which callers treat
    /// as a skip rather than a failure.
    pub fn is_no_deposit(&self) -> bool {
        matches!(self, Error::InsufficientFunds(FundsShortfall::NoDeposit))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
