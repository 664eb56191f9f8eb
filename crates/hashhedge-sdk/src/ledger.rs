use crate::contract::{Contract, ContractId, NewContract};
use crate::state::ContractStatus;

/// Persistence operations the engine needs.
///
/// The `hashhedge-store` crate implements this for `HashHedgeStore`; the
/// `testing` module ships an in-memory version. Errors are plain strings so
/// implementors do not need to depend on this crate's error type.
pub trait ContractLedger: Send + 'static {
    /// Insert a `PENDING` contract and return it with its assigned id.
    fn insert_contract(&mut self, new: &NewContract) -> Result<Contract, String>;

    fn get_contract(&mut self, id: ContractId) -> Result<Option<Contract>, String>;

    /// Set the status. `tx_hex = None` leaves the stored transaction untouched.
    fn update_status(
        &mut self,
        id: ContractId,
        status: ContractStatus,
        tx_hex: Option<&str>,
    ) -> Result<(), String>;

    /// Ordered by id.
    fn list_by_status(&mut self, status: ContractStatus) -> Result<Vec<Contract>, String>;

    /// Ordered by id.
    fn list_by_user(&mut self, user_pubkey: &str) -> Result<Vec<Contract>, String>;
}
