//! Penumbra: an embedded, single-file object store.
//!
//! Typed records live in copy-on-write B+ trees inside one paged file. One
//! writer at a time stages changes privately and publishes them atomically
//! by flipping a checksummed commit marker; readers work from the snapshot
//! that was current when they began and never block the writer. Fields
//! declared as indexed get an equality index, and [`Store::find_equal`]
//! answers the same way whether it walks the index or scans the type.
//!
//! ```no_run
//! use penumbra::{fields, Store, StoreConfig, TypeSchema, Value, ValueKind};
//!
//! # fn main() -> penumbra::Result<()> {
//! let config = StoreConfig::new("items.penumbra").with_type(
//!     TypeSchema::new("Item")
//!         .field("number", ValueKind::String)
//!         .index("number"),
//! );
//! let store = Store::open(config)?;
//! store.write(|txn| txn.insert("Item", fields([("number", "42")])).map(|_| ()))?;
//! let hits = store.find_equal("Item", "number", &Value::Str("42".into()))?;
//! assert_eq!(hits.len(), 1);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

/// Store administration: statistics and integrity verification.
pub mod admin;
/// Store handle, configuration, schema and transactions.
pub mod db;
pub mod primitives;
/// Equality query planning and execution.
pub mod query;
pub mod storage;
pub mod types;

pub use db::{
    FieldDescriptor, ReadTxn, Store, StoreConfig, TxnState, TypeSchema, WriteTxn,
};
pub use primitives::io::{FaultPlan, FaultyIo, FileIo, StdFileIo};
pub use primitives::pager::Synchronous;
pub use query::{QueryPlan, QueryStrategy};
pub use storage::{fields, Fields, Record, Value, ValueKind};
pub use types::{PenumbraError, RecordId, Result, Version};
