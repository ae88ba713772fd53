use std::collections::{HashMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use partybook_core::{AggregateRoot, DocumentId, InvoiceId, OwnerId, PartyId};
use partybook_documents::{Document, DocumentKind};
use partybook_invoicing::Invoice;
use partybook_ledger::{BalanceCalculator, LedgerEntry, PairKey};

use super::r#trait::{AtomicOp, ReferenceKey, StockMovement, Storage, StorageError};

#[derive(Debug, Default)]
struct Tables {
    chains: HashMap<PairKey, Vec<LedgerEntry>>,
    /// Reference key -> (pair, index in that pair's chain).
    references: HashMap<ReferenceKey, (PairKey, usize)>,
    documents: HashMap<(OwnerId, DocumentId), Document>,
    invoices: HashMap<(OwnerId, InvoiceId), Invoice>,
    stock: Vec<StockMovement>,
    counters: HashMap<(OwnerId, String), u64>,
}

impl Tables {
    fn head(&self, pair: &PairKey) -> u64 {
        self.chains
            .get(pair)
            .and_then(|chain| chain.last())
            .map(|e| e.sequence)
            .unwrap_or(0)
    }

    /// Check every op against the state the ops before it would leave behind.
    fn check(&self, ops: &[AtomicOp]) -> Result<(), StorageError> {
        let mut heads: HashMap<PairKey, u64> = HashMap::new();
        let mut new_refs: HashSet<ReferenceKey> = HashSet::new();
        let mut documents: HashMap<(OwnerId, DocumentId), u64> = HashMap::new();
        let mut invoices: HashMap<(OwnerId, InvoiceId), u64> = HashMap::new();

        for (index, op) in ops.iter().enumerate() {
            let label = op.label();
            match op {
                AtomicOp::InsertEntry { entry, expected } => {
                    let pair = entry.pair_key();
                    let head = heads.get(&pair).copied().unwrap_or_else(|| self.head(&pair));
                    if !expected.matches(head) || entry.sequence != head + 1 {
                        return Err(StorageError::Conflict(format!(
                            "op {index} ({label}): pair is at sequence {head}, expected {expected:?}"
                        )));
                    }
                    let key = ReferenceKey::of(entry);
                    if self.references.contains_key(&key) || !new_refs.insert(key) {
                        return Err(StorageError::Conflict(format!(
                            "op {index} ({label}): duplicate posting for {} {}",
                            entry.reference_type, entry.reference_id
                        )));
                    }
                    heads.insert(pair, entry.sequence);
                }
                AtomicOp::InsertDocument(document) => {
                    let key = (document.owner_id(), *document.id());
                    if self.documents.contains_key(&key) || documents.contains_key(&key) {
                        return Err(StorageError::Conflict(format!(
                            "op {index} ({label}): document {} already exists",
                            document.id()
                        )));
                    }
                    documents.insert(key, document.version());
                }
                AtomicOp::UpdateDocument {
                    document,
                    expected_version,
                } => {
                    let key = (document.owner_id(), *document.id());
                    let current = documents
                        .get(&key)
                        .copied()
                        .or_else(|| self.documents.get(&key).map(|d| d.version()))
                        .ok_or_else(|| {
                            StorageError::NotFound(format!("document {}", document.id()))
                        })?;
                    if current != *expected_version {
                        return Err(StorageError::Conflict(format!(
                            "op {index} ({label}): document {} is at version {current}, expected {expected_version}",
                            document.id()
                        )));
                    }
                    documents.insert(key, document.version());
                }
                AtomicOp::InsertInvoice(invoice) => {
                    let key = (invoice.owner_id(), *invoice.id());
                    if self.invoices.contains_key(&key) || invoices.contains_key(&key) {
                        return Err(StorageError::Conflict(format!(
                            "op {index} ({label}): invoice {} already exists",
                            invoice.id()
                        )));
                    }
                    invoices.insert(key, invoice.version());
                }
                AtomicOp::UpdateInvoice {
                    invoice,
                    expected_version,
                } => {
                    let key = (invoice.owner_id(), *invoice.id());
                    let current = invoices
                        .get(&key)
                        .copied()
                        .or_else(|| self.invoices.get(&key).map(|i| i.version()))
                        .ok_or_else(|| {
                            StorageError::NotFound(format!("invoice {}", invoice.id()))
                        })?;
                    if current != *expected_version {
                        return Err(StorageError::Conflict(format!(
                            "op {index} ({label}): invoice {} is at version {current}, expected {expected_version}",
                            invoice.id()
                        )));
                    }
                    invoices.insert(key, invoice.version());
                }
                AtomicOp::RecordStockMovements(_) => {}
            }
        }
        Ok(())
    }

    /// Apply ops that already passed `check`. Infallible.
    fn apply(&mut self, ops: Vec<AtomicOp>) {
        for op in ops {
            match op {
                AtomicOp::InsertEntry { entry, .. } => {
                    let pair = entry.pair_key();
                    let key = ReferenceKey::of(&entry);
                    let chain = self.chains.entry(pair).or_default();
                    self.references.insert(key, (pair, chain.len()));
                    chain.push(entry);
                }
                AtomicOp::InsertDocument(document) | AtomicOp::UpdateDocument { document, .. } => {
                    self.documents
                        .insert((document.owner_id(), *document.id()), document);
                }
                AtomicOp::InsertInvoice(invoice) | AtomicOp::UpdateInvoice { invoice, .. } => {
                    self.invoices.insert((invoice.owner_id(), *invoice.id()), invoice);
                }
                AtomicOp::RecordStockMovements(movements) => self.stock.extend(movements),
            }
        }
    }
}

/// In-memory storage collaborator.
///
/// Intended for tests/dev. One `RwLock` guards every table, so an atomic batch
/// is checked and applied under a single write guard.
#[derive(Debug, Default)]
pub struct InMemoryStorage {
    tables: RwLock<Tables>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Tables>, StorageError> {
        self.tables
            .read()
            .map_err(|_| StorageError::Unavailable("lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Tables>, StorageError> {
        self.tables
            .write()
            .map_err(|_| StorageError::Unavailable("lock poisoned".to_string()))
    }

    /// Number of stored invoices for an owner.
    pub fn invoice_count(&self, owner_id: OwnerId) -> Result<usize, StorageError> {
        Ok(self
            .read()?
            .invoices
            .keys()
            .filter(|(owner, _)| *owner == owner_id)
            .count())
    }
}

impl Storage for InMemoryStorage {
    fn run_atomically(&self, ops: Vec<AtomicOp>) -> Result<(), StorageError> {
        if ops.is_empty() {
            return Ok(());
        }
        let mut tables = self.write()?;
        tables.check(&ops)?;
        tables.apply(ops);
        Ok(())
    }

    fn last_entry(&self, pair: PairKey) -> Result<Option<LedgerEntry>, StorageError> {
        Ok(self
            .read()?
            .chains
            .get(&pair)
            .and_then(|chain| chain.last())
            .cloned())
    }

    fn entries_for_pair(&self, pair: PairKey) -> Result<Vec<LedgerEntry>, StorageError> {
        Ok(self.read()?.chains.get(&pair).cloned().unwrap_or_default())
    }

    fn entries_for_party(
        &self,
        owner_id: OwnerId,
        party_id: PartyId,
    ) -> Result<Vec<LedgerEntry>, StorageError> {
        let tables = self.read()?;
        let mut entries: Vec<LedgerEntry> = tables
            .chains
            .iter()
            .filter(|(pair, _)| pair.owner_id == owner_id && pair.party_id == party_id)
            .flat_map(|(_, chain)| chain.iter().cloned())
            .collect();
        BalanceCalculator::sort_chronologically(&mut entries);
        Ok(entries)
    }

    fn find_entry_by_reference(
        &self,
        key: &ReferenceKey,
    ) -> Result<Option<LedgerEntry>, StorageError> {
        let tables = self.read()?;
        Ok(tables
            .references
            .get(key)
            .and_then(|(pair, index)| tables.chains.get(pair)?.get(*index))
            .cloned())
    }

    fn get_document(
        &self,
        owner_id: OwnerId,
        document_id: DocumentId,
    ) -> Result<Option<Document>, StorageError> {
        Ok(self.read()?.documents.get(&(owner_id, document_id)).cloned())
    }

    fn list_documents(
        &self,
        owner_id: OwnerId,
        kind: Option<DocumentKind>,
    ) -> Result<Vec<Document>, StorageError> {
        let tables = self.read()?;
        let mut docs: Vec<Document> = tables
            .documents
            .iter()
            .filter(|((owner, _), doc)| {
                *owner == owner_id && kind.is_none_or(|k| doc.kind() == k)
            })
            .map(|(_, doc)| doc.clone())
            .collect();
        docs.sort_by(|a, b| {
            (a.created_at(), a.number()).cmp(&(b.created_at(), b.number()))
        });
        Ok(docs)
    }

    fn get_invoice(
        &self,
        owner_id: OwnerId,
        invoice_id: InvoiceId,
    ) -> Result<Option<Invoice>, StorageError> {
        Ok(self.read()?.invoices.get(&(owner_id, invoice_id)).cloned())
    }

    fn invoices_for_party(
        &self,
        owner_id: OwnerId,
        party_id: PartyId,
    ) -> Result<Vec<Invoice>, StorageError> {
        let tables = self.read()?;
        let mut invoices: Vec<Invoice> = tables
            .invoices
            .iter()
            .filter(|((owner, _), inv)| *owner == owner_id && inv.party_id() == party_id)
            .map(|(_, inv)| inv.clone())
            .collect();
        invoices.sort_by_key(|inv| (inv.issue_date(), inv.created_at()));
        Ok(invoices)
    }

    fn stock_movements(&self, owner_id: OwnerId) -> Result<Vec<StockMovement>, StorageError> {
        Ok(self
            .read()?
            .stock
            .iter()
            .filter(|m| m.owner_id == owner_id)
            .cloned()
            .collect())
    }

    fn next_number(&self, owner_id: OwnerId, series: &str) -> Result<u64, StorageError> {
        let mut tables = self.write()?;
        let counter = tables
            .counters
            .entry((owner_id, series.to_string()))
            .or_insert(0);
        *counter += 1;
        Ok(*counter)
    }
}
