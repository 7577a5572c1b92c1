//! Store handle, configuration and transactions.

mod config;
mod schema;
mod store;
mod transaction;


pub use config::{FieldDescriptor, StoreConfig, TypeSchema, MAX_NAME_LEN};
pub use schema::{Schema, TypeInfo};
pub use store::Store;
pub use transaction::{ReadTxn, TxnState, WriteTxn};
