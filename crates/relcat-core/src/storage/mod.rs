//! In-memory row storage.
//!
//! Each table's rows, key indexes and sequences live together behind one
//! lock so a constraint check and the mutation it gates happen atomically.

mod lock;
mod row_store;
mod table;

pub use lock::{LockMode, LockPlan, LockedTables, TableHandle};
pub use row_store::{Row, RowId, RowStore};
pub use table::Table;
