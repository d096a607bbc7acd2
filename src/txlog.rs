//! Transaction Log (C5): immutable, append-only record of every mutation observed or applied.

pub mod entry;
#[cfg(feature = "sea-orm")]
pub mod sea_orm;
pub mod store;

pub use entry::{Source, TransactionLogEntry, TransactionType};
#[cfg(feature = "sea-orm")]
pub use sea_orm::SeaOrmTransactionLogStore;
pub use store::{MemoryTransactionLogStore, NewTransactionLogEntry, StoreError, TransactionLogStore};
