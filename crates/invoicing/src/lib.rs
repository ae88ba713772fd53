//! Final invoices and accounts receivable rules.
//!
//! This crate contains business rules for invoices implemented purely as
//! deterministic domain logic (no IO, no storage). Ledger effects of issuing
//! and paying invoices are posted by the engine.

pub mod invoice;

pub use invoice::{
    Invoice, InvoiceIssued, InvoiceSource, InvoiceStatus, NewInvoice, PaymentRecorded,
};
