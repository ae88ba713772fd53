use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use partybook_core::{
    DocumentId, DomainError, ExpectedVersion, InvoiceId, ItemId, OwnerId, PartyId,
};
use partybook_documents::{Document, DocumentKind};
use partybook_invoicing::Invoice;
use partybook_ledger::{LedgerEntry, PairKey, ReferenceType};

/// Restock instruction handed to the inventory collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockMovement {
    pub owner_id: OwnerId,
    pub item_id: ItemId,
    pub item_name: String,
    /// Positive quantity returned to stock.
    pub quantity: i64,
    pub document_id: DocumentId,
    pub recorded_at: DateTime<Utc>,
}

/// Lookup key for the posting-uniqueness rule.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReferenceKey {
    pub owner_id: OwnerId,
    pub party_id: PartyId,
    pub reference_type: ReferenceType,
    pub reference_id: String,
}

impl ReferenceKey {
    pub fn of(entry: &LedgerEntry) -> Self {
        Self {
            owner_id: entry.owner_id,
            party_id: entry.party_id,
            reference_type: entry.reference_type,
            reference_id: entry.reference_id.clone(),
        }
    }
}

/// One write inside an atomic batch.
///
/// Every variant carries the compare-and-swap expectation it needs; a batch
/// either applies all of its ops or none of them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AtomicOp {
    /// Append to a pair's chain. `expected` is the pair's current last sequence
    /// (`Exact(0)` for an empty pair). Fails on a duplicate reference key.
    InsertEntry {
        entry: LedgerEntry,
        expected: ExpectedVersion,
    },
    InsertDocument(Document),
    /// Replace a stored document that is still at `expected_version`.
    UpdateDocument {
        document: Document,
        expected_version: u64,
    },
    InsertInvoice(Invoice),
    /// Replace a stored invoice that is still at `expected_version`.
    UpdateInvoice {
        invoice: Invoice,
        expected_version: u64,
    },
    RecordStockMovements(Vec<StockMovement>),
}

impl AtomicOp {
    pub fn insert_entry(entry: LedgerEntry) -> Self {
        let expected = ExpectedVersion::Exact(entry.sequence.saturating_sub(1));
        AtomicOp::InsertEntry { entry, expected }
    }

    pub fn update_document(document: Document, loaded_at_version: u64) -> Self {
        AtomicOp::UpdateDocument {
            document,
            expected_version: loaded_at_version,
        }
    }

    pub fn update_invoice(invoice: Invoice, loaded_at_version: u64) -> Self {
        AtomicOp::UpdateInvoice {
            invoice,
            expected_version: loaded_at_version,
        }
    }

    /// Short label for logs.
    pub fn label(&self) -> &'static str {
        match self {
            AtomicOp::InsertEntry { .. } => "insert_entry",
            AtomicOp::InsertDocument(_) => "insert_document",
            AtomicOp::UpdateDocument { .. } => "update_document",
            AtomicOp::InsertInvoice(_) => "insert_invoice",
            AtomicOp::UpdateInvoice { .. } => "update_invoice",
            AtomicOp::RecordStockMovements(_) => "record_stock_movements",
        }
    }
}

/// Storage collaborator failure.
///
/// These are infrastructure errors (concurrency, availability) as opposed to
/// domain errors (validation, transitions).
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("optimistic concurrency check failed: {0}")]
    Conflict(String),

    #[error("record not found: {0}")]
    NotFound(String),

    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("transaction aborted: {0}")]
    Aborted(String),
}

impl From<StorageError> for DomainError {
    fn from(value: StorageError) -> Self {
        match value {
            StorageError::Conflict(msg) => DomainError::stale(msg),
            StorageError::NotFound(what) => DomainError::not_found(what),
            StorageError::Unavailable(msg) | StorageError::Aborted(msg) => {
                DomainError::persistence(msg)
            }
        }
    }
}

/// Transactional storage collaborator.
///
/// ## Implementation requirements
///
/// - `run_atomically` is all-or-nothing: check every op's expectation against
///   the state left by the ops before it, then apply them all or none
/// - entries of a pair are returned in chain order (`sequence` ascending),
///   which is also chronological order
/// - every read and write is scoped to an owner; nothing crosses owners
pub trait Storage: Send + Sync {
    fn run_atomically(&self, ops: Vec<AtomicOp>) -> Result<(), StorageError>;

    /// Chronologically last entry of a pair.
    fn last_entry(&self, pair: PairKey) -> Result<Option<LedgerEntry>, StorageError>;

    fn entries_for_pair(&self, pair: PairKey) -> Result<Vec<LedgerEntry>, StorageError>;

    /// Every entry where `party_id` is the ledger's party, across counterparties.
    fn entries_for_party(
        &self,
        owner_id: OwnerId,
        party_id: PartyId,
    ) -> Result<Vec<LedgerEntry>, StorageError>;

    fn find_entry_by_reference(
        &self,
        key: &ReferenceKey,
    ) -> Result<Option<LedgerEntry>, StorageError>;

    fn get_document(
        &self,
        owner_id: OwnerId,
        document_id: DocumentId,
    ) -> Result<Option<Document>, StorageError>;

    fn list_documents(
        &self,
        owner_id: OwnerId,
        kind: Option<DocumentKind>,
    ) -> Result<Vec<Document>, StorageError>;

    fn get_invoice(
        &self,
        owner_id: OwnerId,
        invoice_id: InvoiceId,
    ) -> Result<Option<Invoice>, StorageError>;

    fn invoices_for_party(
        &self,
        owner_id: OwnerId,
        party_id: PartyId,
    ) -> Result<Vec<Invoice>, StorageError>;

    fn stock_movements(&self, owner_id: OwnerId) -> Result<Vec<StockMovement>, StorageError>;

    /// Next value of a per-owner counter (document and invoice numbering).
    /// Values are unique and increasing; gaps are allowed.
    fn next_number(&self, owner_id: OwnerId, series: &str) -> Result<u64, StorageError>;
}

impl<S> Storage for Arc<S>
where
    S: Storage + ?Sized,
{
    fn run_atomically(&self, ops: Vec<AtomicOp>) -> Result<(), StorageError> {
        (**self).run_atomically(ops)
    }

    fn last_entry(&self, pair: PairKey) -> Result<Option<LedgerEntry>, StorageError> {
        (**self).last_entry(pair)
    }

    fn entries_for_pair(&self, pair: PairKey) -> Result<Vec<LedgerEntry>, StorageError> {
        (**self).entries_for_pair(pair)
    }

    fn entries_for_party(
        &self,
        owner_id: OwnerId,
        party_id: PartyId,
    ) -> Result<Vec<LedgerEntry>, StorageError> {
        (**self).entries_for_party(owner_id, party_id)
    }

    fn find_entry_by_reference(
        &self,
        key: &ReferenceKey,
    ) -> Result<Option<LedgerEntry>, StorageError> {
        (**self).find_entry_by_reference(key)
    }

    fn get_document(
        &self,
        owner_id: OwnerId,
        document_id: DocumentId,
    ) -> Result<Option<Document>, StorageError> {
        (**self).get_document(owner_id, document_id)
    }

    fn list_documents(
        &self,
        owner_id: OwnerId,
        kind: Option<DocumentKind>,
    ) -> Result<Vec<Document>, StorageError> {
        (**self).list_documents(owner_id, kind)
    }

    fn get_invoice(
        &self,
        owner_id: OwnerId,
        invoice_id: InvoiceId,
    ) -> Result<Option<Invoice>, StorageError> {
        (**self).get_invoice(owner_id, invoice_id)
    }

    fn invoices_for_party(
        &self,
        owner_id: OwnerId,
        party_id: PartyId,
    ) -> Result<Vec<Invoice>, StorageError> {
        (**self).invoices_for_party(owner_id, party_id)
    }

    fn stock_movements(&self, owner_id: OwnerId) -> Result<Vec<StockMovement>, StorageError> {
        (**self).stock_movements(owner_id)
    }

    fn next_number(&self, owner_id: OwnerId, series: &str) -> Result<u64, StorageError> {
        (**self).next_number(owner_id, series)
    }
}
