use serde::{Deserialize, Serialize};

/// Settlement lifecycle of a contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContractStatus {
    /// Created; awaiting deposit, matching or settlement.
    Pending,
    /// Both stakes are in. Derived from the on-chain balance, never persisted by the engine.
    Matched,
    /// Win payout built and oracle-signed; the user must add their signature.
    WaitingUserSig,
    /// Refund built and house-signed; the user must add their signature.
    WaitingUserSigRefund,
    /// Loss payout broadcast to the house.
    SettledLoss,
    /// Win payout confirmed as broadcast by the user.
    SettledWin,
    /// Abandoned before any funds arrived.
    Cancelled,
}

impl ContractStatus {
    pub const ALL: [ContractStatus; 7] = [
        ContractStatus::Pending,
        ContractStatus::Matched,
        ContractStatus::WaitingUserSig,
        ContractStatus::WaitingUserSigRefund,
        ContractStatus::SettledLoss,
        ContractStatus::SettledWin,
        ContractStatus::Cancelled,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Matched => "MATCHED",
            Self::WaitingUserSig => "WAITING_USER_SIG",
            Self::WaitingUserSigRefund => "WAITING_USER_SIG_REFUND",
            Self::SettledLoss => "SETTLED_LOSS",
            Self::SettledWin => "SETTLED_WIN",
            Self::Cancelled => "CANCELLED",
        }
    }

    /// Whether `settle` may act on a contract in this state.
    pub fn can_settle(self) -> bool {
        matches!(self, Self::Pending | Self::WaitingUserSig)
    }

    /// Whether a user signature is outstanding.
    pub fn is_waiting_signature(self) -> bool {
        matches!(self, Self::WaitingUserSig | Self::WaitingUserSigRefund)
    }
}

impl std::fmt::Display for ContractStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ContractStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let upper = s.to_uppercase();
        Self::ALL
            .into_iter()
            .find(|st| st.as_str() == upper)
            .ok_or_else(|| format!("invalid contract status: {s}"))
    }
}

/// Which side of the difficulty threshold the user is betting on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    /// Wins when difficulty ends strictly above the threshold.
    Long,
    /// Wins when difficulty ends at or below the threshold.
    Short,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Long => "LONG",
            Self::Short => "SHORT",
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "LONG" => Ok(Self::Long),
            "SHORT" => Ok(Self::Short),
            _ => Err(format!("invalid direction: {s}")),
        }
    }
}
