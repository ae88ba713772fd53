//! `partybook-core` — domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! identifiers, money, the shared error model, optimistic-concurrency
//! expectations and the clock abstraction.

pub mod aggregate;
pub mod clock;
pub mod error;
pub mod id;
pub mod money;

pub use aggregate::{AggregateRoot, ExpectedVersion};
pub use clock::{Clock, FixedClock, SystemClock};
pub use error::{ConflictKind, DomainError, DomainResult};
pub use id::{DocumentId, EntryId, InvoiceId, ItemId, OwnerId, PartyId};
pub use money::Money;
