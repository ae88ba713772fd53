//! Transactional storage boundary.
//!
//! The engine needs atomic multi-record batches with compare-and-swap checks and
//! owner-scoped reads; it makes no other assumption about the backing store.

pub mod in_memory;
pub mod r#trait;

pub use in_memory::InMemoryStorage;
pub use r#trait::{AtomicOp, ReferenceKey, StockMovement, Storage, StorageError};
