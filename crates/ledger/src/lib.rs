//! Party ledger module (append-only two-party running balances).
//!
//! Pure domain logic only: no IO, no persistence concerns. Storage and
//! serialization of concurrent writers live in `partybook-engine`.

pub mod balance;
pub mod entry;
pub mod statement;

pub use balance::{BalanceCalculator, BalancePosition, ChainBreak, CounterpartyBalance};
pub use entry::{
    EntryAdded, EntryType, LedgerEntry, NewLedgerEntry, PairKey, PartyType, ReferenceType,
};
pub use statement::Statement;
