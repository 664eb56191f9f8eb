use diesel::prelude::*;

use crate::schema::contracts;

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = contracts)]
pub struct ContractRow {
    pub id: i64,
    pub user_pubkey: String,
    pub deposit_address: String,
    pub amount: i64,
    pub direction: String,
    pub nonce: String,
    pub status: String,
    pub tx_hex: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = contracts)]
pub struct NewContractRow {
    pub user_pubkey: String,
    pub deposit_address: String,
    pub amount: i64,
    pub direction: String,
    pub nonce: String,
    pub status: String,
}
