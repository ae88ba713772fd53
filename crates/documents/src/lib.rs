//! Provisional commercial documents (booking orders, proforma estimates,
//! dispatch notes, inward returns) and their lifecycle state machines.
//!
//! This crate contains the transition tables and pure planning logic only
//! (no IO, no storage). The engine persists the planned changes.

pub mod document;
pub mod item;
pub mod status;

pub use document::{
    Document, DocumentConverted, DocumentDetails, DocumentStatusChanged, NewDocument,
    StatusChange, TransitionExtra,
};
pub use item::{LineItem, items_total};
pub use status::{
    BookingStatus, DispatchStatus, DocumentKind, DocumentStatus, ProformaStatus, ReturnStatus,
};
