pub mod contract;

pub use contract::{ContractRow, NewContractRow};
