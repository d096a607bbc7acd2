//! Mirror Store (C4): a per-tenant authoritative copy of external ledger entities.

pub mod entities;
#[cfg(feature = "sea-orm")]
pub mod sea_orm;
pub mod store;

pub use entities::{EntityKind, EntityRef, MirrorRow};
#[cfg(feature = "sea-orm")]
pub use sea_orm::SeaOrmMirrorStore;
pub use store::{MemoryMirrorStore, MirrorStore, StoreError, UpsertOutcome};
