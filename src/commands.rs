use std::path::PathBuf;

use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::{Value, json};

use hashhedge_sdk::{ContractId, ContractStatus, Direction};
use hashhedge_store::{ContractFilter, ContractRecord};

use crate::app::OracleApp;
use crate::config::CONFIG_FILE;
use crate::error::AppError;

#[derive(Debug, Parser)]
#[command(name = "hashhedge-oracle")]
#[command(about = "Oracle and settlement engine for HashHedge difficulty contracts", long_about = None)]
pub struct Cli {
    /// Path to the JSON config file.
    #[arg(short, long, default_value = CONFIG_FILE)]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Open a contract and print its deposit address
    Create {
        /// User public key (hex, 32/33/65 bytes)
        user_pubkey: String,
        /// Stake in sats
        amount: u64,
        /// LONG or SHORT
        direction: Direction,
    },
    /// Fund the house's side once the user's deposit arrived
    Match { id: ContractId },
    /// Settle one contract
    Settle {
        id: ContractId,
        /// Observed difficulty; defaults to the configured feed
        #[arg(short, long)]
        difficulty: Option<f64>,
        /// Defaults to the configured threshold
        #[arg(short, long)]
        threshold: Option<f64>,
    },
    /// Settle every pending contract
    SettleAll {
        #[arg(short, long)]
        difficulty: Option<f64>,
        #[arg(short, long)]
        threshold: Option<f64>,
    },
    /// Build a refund waiting for the user's signature
    Refund { id: ContractId },
    /// Cancel a contract that never received funds
    Cancel { id: ContractId },
    /// Print one contract
    Show { id: ContractId },
    /// List contracts
    List {
        #[arg(short, long)]
        status: Option<ContractStatus>,
        #[arg(short, long)]
        user: Option<String>,
        #[arg(short, long)]
        limit: Option<i64>,
    },
    /// Difficulty, threshold and house address
    Stats,
}

/// Outcome JSON (which carries its `result` tag) plus a human-readable message.
fn outcome_json<T: Serialize>(
    id: ContractId,
    outcome: &T,
    message: String,
) -> Result<Value, AppError> {
    let mut value = serde_json::to_value(outcome)?;
    if let Value::Object(map) = &mut value {
        map.insert("contract_id".into(), json!(id));
        map.insert("message".into(), json!(message));
    }
    Ok(value)
}

fn record_json(record: &ContractRecord) -> Result<Value, AppError> {
    let mut value = serde_json::to_value(&record.contract)?;
    if let Value::Object(map) = &mut value {
        map.insert("created_at".into(), json!(record.created_at.to_string()));
        map.insert("updated_at".into(), json!(record.updated_at.to_string()));
    }
    Ok(value)
}

/// Execute one command and return what it prints.
pub async fn run_command(app: &mut OracleApp, command: Command) -> Result<Value, AppError> {
    let engine = app.engine();
    let stats = engine.stats();

    let output = match command {
        Command::Create {
            user_pubkey,
            amount,
            direction,
        } => {
            let contract = engine
                .create_contract(&user_pubkey, amount, direction)
                .await?;
            json!({
                "contract_id": contract.id,
                "deposit_address": contract.deposit_address,
                "amount": contract.amount,
                "direction": contract.direction,
                "status": contract.status,
                "message": format!("Send {} sats to the deposit address", contract.amount),
            })
        }
        Command::Match { id } => {
            let outcome = engine.match_contract(id).await;
            outcome_json(id, &outcome, outcome.message())?
        }
        Command::Settle {
            id,
            difficulty,
            threshold,
        } => {
            let difficulty = difficulty.unwrap_or(stats.difficulty);
            let threshold = threshold.unwrap_or(stats.threshold);
            let outcome = engine.settle(id, difficulty, threshold).await;
            outcome_json(id, &outcome, outcome.message())?
        }
        Command::SettleAll {
            difficulty,
            threshold,
        } => {
            let difficulty = difficulty.unwrap_or(stats.difficulty);
            let threshold = threshold.unwrap_or(stats.threshold);
            let results = engine.settle_all(difficulty, threshold).await?;
            let entries = results
                .iter()
                .map(|r| outcome_json(r.id, &r.outcome, r.outcome.message()))
                .collect::<Result<Vec<_>, _>>()?;
            json!({
                "difficulty": difficulty,
                "threshold": threshold,
                "count": entries.len(),
                "results": entries,
            })
        }
        Command::Refund { id } => {
            let outcome = engine.refund(id).await;
            outcome_json(id, &outcome, outcome.message())?
        }
        Command::Cancel { id } => {
            let outcome = engine.cancel(id).await;
            outcome_json(id, &outcome, outcome.message())?
        }
        Command::Show { id } => {
            let record = app
                .with_store(move |s| s.get_record(id))
                .await?
                .ok_or(hashhedge_sdk::Error::ContractNotFound(id))?;
            record_json(&record)?
        }
        Command::List {
            status,
            user,
            limit,
        } => {
            let filter = ContractFilter {
                status,
                user_pubkey: user.map(|u| u.trim().to_lowercase()),
                limit,
            };
            let records = app.with_store(move |s| s.list_contracts(&filter)).await?;
            let contracts = records
                .iter()
                .map(record_json)
                .collect::<Result<Vec<_>, _>>()?;
            json!({ "count": contracts.len(), "contracts": contracts })
        }
        Command::Stats => {
            let counts = app.with_store(|s| s.count_by_status()).await?;
            let mut by_status = serde_json::Map::new();
            for (status, n) in counts {
                by_status.insert(status.as_str().into(), json!(n));
            }
            json!({
                "network": app.config().network,
                "difficulty": stats.difficulty,
                "hashprice_sats": stats.hashprice_sats,
                "threshold": stats.threshold,
                "house_address": stats.house_address,
                "contracts": by_status,
            })
        }
    };

    app.drain_events();
    Ok(output)
}
