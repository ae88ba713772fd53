//! `partybook-engine` — the ledger and document lifecycle engine.
//!
//! Ties the pure domain crates to a transactional `Storage` collaborator and
//! an event bus:
//!
//! - `ledger_store`: append-only party-pair ledgers with CAS on the chain head
//! - `lifecycle`: document transitions, conversion to invoices, return processing
//! - `invoices`: direct invoice issue and payments
//! - `aging`: receivable/payable aging buckets
//!
//! Every operation takes an `EngineContext` (owner, storage, clock) and
//! returns `DomainResult`.

pub mod aging;
pub mod config;
pub mod context;
pub mod emitter;
pub mod engine;
pub mod invoices;
pub mod ledger_store;
pub mod lifecycle;
pub mod storage;

#[cfg(test)]
mod integration_tests;

pub use aging::{AgingAnalyzer, AgingBucket, AgingReport};
pub use config::{AgingSettings, ConfigError, EngineConfig, InvoicingSettings};
pub use context::EngineContext;
pub use emitter::{DomainEvent, DomainEventEmitter, DomainEventEnvelope};
pub use engine::Engine;
pub use invoices::{InvoiceService, PaymentReceipt, PaymentRequest};
pub use ledger_store::LedgerEntryStore;
pub use lifecycle::{DocumentLifecycleManager, ReturnOutcome};
pub use storage::{AtomicOp, InMemoryStorage, ReferenceKey, StockMovement, Storage, StorageError};
