use chrono::NaiveDateTime;

use hashhedge_sdk::{Contract, ContractId, ContractStatus, Direction, NewContract};

use crate::error::StoreError;
use crate::models::{ContractRow, NewContractRow};
use crate::store::ContractRecord;

/// Format SQLite's `datetime('now')` produces.
const SQLITE_DATETIME: &str = "%Y-%m-%d %H:%M:%S";

pub fn amount_to_i64(amount: u64) -> std::result::Result<i64, StoreError> {
    i64::try_from(amount)
        .map_err(|_| StoreError::InvalidData(format!("amount {amount} does not fit in i64")))
}

pub fn parse_timestamp(value: &str, field: &str) -> std::result::Result<NaiveDateTime, StoreError> {
    NaiveDateTime::parse_from_str(value, SQLITE_DATETIME)
        .map_err(|e| StoreError::InvalidData(format!("{field}: {e}")))
}

pub fn new_contract_row(new: &NewContract) -> std::result::Result<NewContractRow, StoreError> {
    hex::decode(&new.nonce).map_err(|e| StoreError::InvalidData(format!("nonce: {e}")))?;
    Ok(NewContractRow {
        user_pubkey: new.user_pubkey.clone(),
        deposit_address: new.deposit_address.clone(),
        amount: amount_to_i64(new.amount)?,
        direction: new.direction.as_str().to_string(),
        nonce: new.nonce.clone(),
        status: ContractStatus::Pending.as_str().to_string(),
    })
}

// --- ContractRow -> SDK types ---

impl TryFrom<&ContractRow> for Contract {
    type Error = StoreError;

    fn try_from(row: &ContractRow) -> std::result::Result<Self, Self::Error> {
        let amount = u64::try_from(row.amount)
            .map_err(|_| StoreError::InvalidData(format!("negative amount {}", row.amount)))?;
        let direction: Direction = row
            .direction
            .parse()
            .map_err(|e| StoreError::InvalidData(format!("direction: {e}")))?;
        let status: ContractStatus = row
            .status
            .parse()
            .map_err(|e| StoreError::InvalidData(format!("status: {e}")))?;

        Ok(Contract {
            id: ContractId(row.id),
            user_pubkey: row.user_pubkey.clone(),
            deposit_address: row.deposit_address.clone(),
            amount,
            direction,
            nonce: row.nonce.clone(),
            status,
            tx_hex: row.tx_hex.clone(),
        })
    }
}

impl TryFrom<&ContractRow> for ContractRecord {
    type Error = StoreError;

    fn try_from(row: &ContractRow) -> std::result::Result<Self, Self::Error> {
        Ok(ContractRecord {
            contract: Contract::try_from(row)?,
            created_at: parse_timestamp(&row.created_at, "created_at")?,
            updated_at: parse_timestamp(&row.updated_at, "updated_at")?,
        })
    }
}
