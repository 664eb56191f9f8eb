use serde::Serialize;

use crate::assembly::RefundSplit;
use crate::error::Error;
use crate::state::{ContractStatus, Direction};

/// Which leaf a settlement spends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Outcome {
    Win,
    Loss,
}

/// WIN iff LONG and `difficulty > threshold`, or SHORT and `difficulty <= threshold`.
pub fn decide_outcome(direction: Direction, difficulty: f64, threshold: f64) -> Outcome {
    let user_wins = match direction {
        Direction::Long => difficulty > threshold,
        Direction::Short => difficulty <= threshold,
    };
    if user_wins {
        Outcome::Win
    } else {
        Outcome::Loss
    }
}

/// Result of settling one contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SettlementOutcome {
    /// Win payout built and oracle-signed.
    WaitingUserSig { tx_hex: String },
    /// Loss payout broadcast.
    SettledLoss { txid: String, tx_hex: String },
    AlreadySettled { status: ContractStatus },
    /// Nothing deposited yet.
    Skipped,
    NotFound,
    Error { message: String },
}

impl SettlementOutcome {
    pub fn tag(&self) -> &'static str {
        match self {
            Self::WaitingUserSig { .. } => "WAITING_USER_SIG",
            Self::SettledLoss { .. } => "SETTLED_LOSS",
            Self::AlreadySettled { .. } => "ALREADY_SETTLED",
            Self::Skipped => "SKIPPED",
            Self::NotFound => "NOT_FOUND",
            Self::Error { .. } => "ERROR",
        }
    }

    pub fn message(&self) -> String {
        match self {
            Self::WaitingUserSig { .. } => {
                "Oracle signed. Transaction saved. Waiting for user signature.".into()
            }
            Self::SettledLoss { .. } => "Oracle and house signed. Funds sent to house.".into(),
            Self::AlreadySettled { status } => format!("Contract is {status}"),
            Self::Skipped => "No funds in contract address.".into(),
            Self::NotFound => "Contract not found.".into(),
            Self::Error { message } => message.clone(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }
}

impl From<Error> for SettlementOutcome {
    fn from(e: Error) -> Self {
        match e {
            e if e.is_no_deposit() => Self::Skipped,
            Error::ContractNotFound(_) => Self::NotFound,
            Error::InvalidContractState { status, .. } => Self::AlreadySettled { status },
            other => Self::Error {
                message: other.to_string(),
            },
        }
    }
}

/// Result of building a refund.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RefundOutcome {
    WaitingUserSigRefund { tx_hex: String, split: RefundSplit },
    AlreadySettled { status: ContractStatus },
    Skipped,
    NotFound,
    Error { message: String },
}

impl RefundOutcome {
    pub fn tag(&self) -> &'static str {
        match self {
            Self::WaitingUserSigRefund { .. } => "WAITING_USER_SIG_REFUND",
            Self::AlreadySettled { .. } => "ALREADY_SETTLED",
            Self::Skipped => "SKIPPED",
            Self::NotFound => "NOT_FOUND",
            Self::Error { .. } => "ERROR",
        }
    }

    pub fn message(&self) -> String {
        match self {
            Self::WaitingUserSigRefund { split, .. } => {
                format!("{}. Waiting for user signature.", split.message())
            }
            Self::AlreadySettled { status } => format!("Contract is {status}"),
            Self::Skipped => "No funds in contract address.".into(),
            Self::NotFound => "Contract not found.".into(),
            Self::Error { message } => message.clone(),
        }
    }
}

impl From<Error> for RefundOutcome {
    fn from(e: Error) -> Self {
        match e {
            e if e.is_no_deposit() => Self::Skipped,
            Error::ContractNotFound(_) => Self::NotFound,
            Error::InvalidContractState { status, .. } => Self::AlreadySettled { status },
            other => Self::Error {
                message: other.to_string(),
            },
        }
    }
}

/// Result of asking the house to match a contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchOutcome {
    Matched { txid: String, amount: u64 },
    /// The user's stake has not fully arrived.
    WaitingForUser { balance: u64 },
    /// Both stakes are already at the address.
    AlreadyMatched { balance: u64 },
    NotEligible { status: ContractStatus },
    NotFound,
    Error { message: String },
}

impl MatchOutcome {
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Matched { .. } => "MATCHED",
            Self::WaitingForUser { .. } => "WAITING_FOR_USER",
            Self::AlreadyMatched { .. } => "ALREADY_MATCHED",
            Self::NotEligible { .. } => "NOT_ELIGIBLE",
            Self::NotFound => "NOT_FOUND",
            Self::Error { .. } => "ERROR",
        }
    }

    pub fn message(&self) -> String {
        match self {
            Self::Matched { amount, .. } => {
                format!("House matched {amount} sats (1:1 odds). Contract is now live!")
            }
            Self::WaitingForUser { .. } => "User deposit not detected yet.".into(),
            Self::AlreadyMatched { .. } => "Contract is already fully funded.".into(),
            Self::NotEligible { status } => format!("Contract is {status}"),
            Self::NotFound => "Contract not found.".into(),
            Self::Error { message } => message.clone(),
        }
    }
}

impl From<Error> for MatchOutcome {
    fn from(e: Error) -> Self {
        match e {
            Error::ContractNotFound(_) => Self::NotFound,
            Error::InvalidContractState { status, .. } => Self::NotEligible { status },
            other => Self::Error {
                message: other.to_string(),
            },
        }
    }
}

/// Result of cancelling a contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CancelOutcome {
    Cancelled,
    /// Funds already arrived; only a refund can unwind it now.
    Funded { balance: u64 },
    NotEligible { status: ContractStatus },
    NotFound,
    Error { message: String },
}

impl CancelOutcome {
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Cancelled => "CANCELLED",
            Self::Funded { .. } => "FUNDED",
            Self::NotEligible { .. } => "NOT_ELIGIBLE",
            Self::NotFound => "NOT_FOUND",
            Self::Error { .. } => "ERROR",
        }
    }

    pub fn message(&self) -> String {
        match self {
            Self::Cancelled => "Contract cancelled.".into(),
            Self::Funded { balance } => {
                format!("Deposit address holds {balance} sats; use refund instead.")
            }
            Self::NotEligible { status } => format!("Contract is {status}"),
            Self::NotFound => "Contract not found.".into(),
            Self::Error { message } => message.clone(),
        }
    }
}

impl From<Error> for CancelOutcome {
    fn from(e: Error) -> Self {
        match e {
            Error::ContractNotFound(_) => Self::NotFound,
            Error::InvalidContractState { status, .. } => Self::NotEligible { status },
            other => Self::Error {
                message: other.to_string(),
            },
        }
    }
}
