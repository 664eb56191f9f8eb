use chrono::NaiveDateTime;
use diesel::prelude::*;
use diesel::sql_types::BigInt;
use diesel::sqlite::SqliteConnection;
use diesel_migrations::{EmbeddedMigrations, MigrationHarness, embed_migrations};

use hashhedge_sdk::{Contract, ContractId, ContractLedger, ContractStatus, NewContract};

use crate::conversions::new_contract_row;
use crate::error::StoreError;
use crate::models::ContractRow;
use crate::schema::contracts;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

/// SQL expression for SQLite's `datetime('now')`.
const DATETIME_NOW: &str = "datetime('now')";

// --- Public types ---

/// A contract together with its bookkeeping timestamps.
#[derive(Debug, Clone)]
pub struct ContractRecord {
    pub contract: Contract,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Default)]
pub struct ContractFilter {
    pub status: Option<ContractStatus>,
    pub user_pubkey: Option<String>,
    pub limit: Option<i64>,
}

// --- HashHedgeStore ---

/// SQLite-backed contract ledger.
///
/// All methods take `&mut self` because Diesel's `SqliteConnection` requires
/// `&mut` for all operations, including reads.
pub struct HashHedgeStore {
    conn: SqliteConnection,
}

impl HashHedgeStore {
    /// Open (or create) a store at the given file path. Runs migrations automatically.
    pub fn open(path: &str) -> crate::Result<Self> {
        Self::establish(path)
    }

    /// Open an in-memory store for tests.
    pub fn open_in_memory() -> crate::Result<Self> {
        Self::establish(":memory:")
    }

    fn establish(url: &str) -> crate::Result<Self> {
        let mut conn = SqliteConnection::establish(url)?;
        conn.run_pending_migrations(MIGRATIONS)
            .map_err(|e| StoreError::Migration(e.to_string()))?;
        Ok(HashHedgeStore { conn })
    }

    // ==================== Writes ====================

    /// Insert a `PENDING` contract. Returns it with its row id.
    pub fn insert_contract(&mut self, new: &NewContract) -> crate::Result<Contract> {
        let row = new_contract_row(new)?;

        let id = self.conn.transaction::<i64, StoreError, _>(|conn| {
            diesel::insert_into(contracts::table)
                .values(&row)
                .execute(conn)?;
            Ok(diesel::select(diesel::dsl::sql::<BigInt>("last_insert_rowid()")).get_result(conn)?)
        })?;

        self.get_contract(ContractId(id))?
            .ok_or(StoreError::NotFound(ContractId(id)))
    }

    /// Set the status and bump `updated_at`. `tx_hex = None` keeps the stored
    /// transaction.
    pub fn update_status(
        &mut self,
        id: ContractId,
        status: ContractStatus,
        tx_hex: Option<&str>,
    ) -> crate::Result<()> {
        let target = contracts::table.filter(contracts::id.eq(id.0));
        let now = diesel::dsl::sql::<diesel::sql_types::Text>(DATETIME_NOW);

        let updated = match tx_hex {
            Some(tx_hex) => diesel::update(target)
                .set((
                    contracts::status.eq(status.as_str()),
                    contracts::tx_hex.eq(tx_hex),
                    contracts::updated_at.eq(now),
                ))
                .execute(&mut self.conn)?,
            None => diesel::update(target)
                .set((
                    contracts::status.eq(status.as_str()),
                    contracts::updated_at.eq(now),
                ))
                .execute(&mut self.conn)?,
        };

        if updated == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }

    // ==================== Queries ====================

    pub fn get_contract(&mut self, id: ContractId) -> crate::Result<Option<Contract>> {
        Ok(self.get_record(id)?.map(|r| r.contract))
    }

    pub fn get_record(&mut self, id: ContractId) -> crate::Result<Option<ContractRecord>> {
        let row: Option<ContractRow> = contracts::table
            .filter(contracts::id.eq(id.0))
            .select(ContractRow::as_select())
            .first(&mut self.conn)
            .optional()?;

        row.as_ref().map(ContractRecord::try_from).transpose()
    }

    pub fn get_by_address(&mut self, address: &str) -> crate::Result<Option<Contract>> {
        let row: Option<ContractRow> = contracts::table
            .filter(contracts::deposit_address.eq(address))
            .select(ContractRow::as_select())
            .first(&mut self.conn)
            .optional()?;

        row.as_ref().map(Contract::try_from).transpose()
    }

    /// Contracts matching `filter`, ordered by id.
    pub fn list_contracts(
        &mut self,
        filter: &ContractFilter,
    ) -> crate::Result<Vec<ContractRecord>> {
        let mut query = contracts::table
            .select(ContractRow::as_select())
            .order(contracts::id.asc())
            .into_boxed();

        if let Some(status) = filter.status {
            query = query.filter(contracts::status.eq(status.as_str()));
        }
        if let Some(ref user) = filter.user_pubkey {
            query = query.filter(contracts::user_pubkey.eq(user.clone()));
        }
        if let Some(lim) = filter.limit {
            query = query.limit(lim);
        }

        let rows: Vec<ContractRow> = query.load(&mut self.conn)?;
        rows.iter().map(ContractRecord::try_from).collect()
    }

    fn list_plain(&mut self, filter: ContractFilter) -> crate::Result<Vec<Contract>> {
        Ok(self
            .list_contracts(&filter)?
            .into_iter()
            .map(|r| r.contract)
            .collect())
    }

    /// Number of contracts per status, in `ContractStatus::ALL` order.
    pub fn count_by_status(&mut self) -> crate::Result<Vec<(ContractStatus, i64)>> {
        let mut counts = Vec::with_capacity(ContractStatus::ALL.len());
        for status in ContractStatus::ALL {
            let n: i64 = contracts::table
                .filter(contracts::status.eq(status.as_str()))
                .count()
                .get_result(&mut self.conn)?;
            counts.push((status, n));
        }
        Ok(counts)
    }
}

// ==================== ContractLedger impl ====================

impl ContractLedger for HashHedgeStore {
    fn insert_contract(&mut self, new: &NewContract) -> Result<Contract, String> {
        self.insert_contract(new).map_err(|e| format!("{e}"))
    }

    fn get_contract(&mut self, id: ContractId) -> Result<Option<Contract>, String> {
        self.get_contract(id).map_err(|e| format!("{e}"))
    }

    fn update_status(
        &mut self,
        id: ContractId,
        status: ContractStatus,
        tx_hex: Option<&str>,
    ) -> Result<(), String> {
        self.update_status(id, status, tx_hex)
            .map_err(|e| format!("{e}"))
    }

    fn list_by_status(&mut self, status: ContractStatus) -> Result<Vec<Contract>, String> {
        self.list_plain(ContractFilter {
            status: Some(status),
            ..Default::default()
        })
        .map_err(|e| format!("{e}"))
    }

    fn list_by_user(&mut self, user_pubkey: &str) -> Result<Vec<Contract>, String> {
        self.list_plain(ContractFilter {
            user_pubkey: Some(user_pubkey.to_string()),
            ..Default::default()
        })
        .map_err(|e| format!("{e}"))
    }
}
