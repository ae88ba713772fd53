//! Document lifecycle orchestration.
//!
//! Mirrors the load -> decide -> persist -> publish pipeline:
//!
//! ```text
//! 1. Load the document (owner-scoped)
//! 2. Plan the change (pure, in partybook-documents)
//! 3. Persist every effect in one atomic batch (CAS on the loaded version)
//! 4. Publish domain events (best-effort, after commit)
//! ```
//!
//! Conversion and return processing are idempotent: a document that already
//! carries its result returns that result without writing anything.

use std::sync::Arc;

use chrono::Days;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use partybook_core::{
    AggregateRoot, ConflictKind, DocumentId, DomainError, DomainResult, InvoiceId,
};
use partybook_documents::{
    Document, DocumentConverted, DocumentDetails, DocumentKind, DocumentStatus,
    DocumentStatusChanged, NewDocument, StatusChange, TransitionExtra,
};
use partybook_events::EventBus;
use partybook_invoicing::{Invoice, InvoiceIssued};
use partybook_ledger::{EntryAdded, EntryType, LedgerEntry, NewLedgerEntry, PartyType, ReferenceType};

use crate::config::InvoicingSettings;
use crate::context::EngineContext;
use crate::emitter::{DomainEventEmitter, DomainEventEnvelope};
use crate::ledger_store::{Posting, prepare_new_posting, prepare_posting};
use crate::storage::{AtomicOp, ReferenceKey, StockMovement, Storage};

/// Everything processing an inward return produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnOutcome {
    pub document: Document,
    /// Credit posted to the customer's ledger.
    pub credit_entry: LedgerEntry,
    pub stock_movements: Vec<StockMovement>,
}

pub struct DocumentLifecycleManager<B> {
    emitter: Arc<DomainEventEmitter<B>>,
    invoicing: InvoicingSettings,
}

impl<B> DocumentLifecycleManager<B>
where
    B: EventBus<DomainEventEnvelope>,
{
    pub fn new(emitter: Arc<DomainEventEmitter<B>>, invoicing: InvoicingSettings) -> Self {
        Self { emitter, invoicing }
    }

    fn load<S: Storage>(ctx: &EngineContext<S>, document_id: DocumentId) -> DomainResult<Document> {
        ctx.storage()
            .get_document(ctx.owner_id(), document_id)?
            .ok_or_else(|| DomainError::not_found(format!("document {document_id}")))
    }

    fn status_changed<S: Storage>(
        &self,
        ctx: &EngineContext<S>,
        document: &Document,
        change: &StatusChange,
    ) {
        self.emitter.emit(
            ctx.owner_id(),
            DocumentStatusChanged {
                owner_id: ctx.owner_id(),
                document_id: change.document_id,
                number: document.number().to_string(),
                from: change.expected_status,
                to: change.new_status,
                occurred_at: change.at,
            },
        );
    }

    /// Validate and store a new document in its kind's initial status.
    #[instrument(skip_all, fields(owner_id = %ctx.owner_id(), kind = %new.details.kind()))]
    pub fn create_document<S: Storage>(
        &self,
        ctx: &EngineContext<S>,
        new: NewDocument,
    ) -> DomainResult<Document> {
        let number = ctx.next_number(new.details.kind().number_prefix())?;
        let document = Document::create(ctx.owner_id(), DocumentId::new(), number, new, ctx.clock().now())?;

        ctx.storage()
            .run_atomically(vec![AtomicOp::InsertDocument(document.clone())])?;
        info!(
            document_id = %document.id(),
            number = document.number(),
            total = %document.total_amount(),
            "document created"
        );
        Ok(document)
    }

    /// Load a document with its time-derived status (proforma expiry) applied.
    pub fn get_document<S: Storage>(
        &self,
        ctx: &EngineContext<S>,
        document_id: DocumentId,
    ) -> DomainResult<Document> {
        Ok(Self::load(ctx, document_id)?.as_of(ctx.clock().today()))
    }

    pub fn list_documents<S: Storage>(
        &self,
        ctx: &EngineContext<S>,
        kind: Option<DocumentKind>,
    ) -> DomainResult<Vec<Document>> {
        let today = ctx.clock().today();
        Ok(ctx
            .storage()
            .list_documents(ctx.owner_id(), kind)?
            .into_iter()
            .map(|doc| doc.as_of(today))
            .collect())
    }

    /// Move a document along its kind's transition table.
    ///
    /// Converted and processed are reached only through `convert_to_invoice`
    /// and `process_return`; expired is derived, never requested.
    #[instrument(
        skip_all,
        fields(owner_id = %ctx.owner_id(), document_id = %document_id, requested = %requested)
    )]
    pub fn transition<S: Storage>(
        &self,
        ctx: &EngineContext<S>,
        document_id: DocumentId,
        requested: DocumentStatus,
        extra: TransitionExtra,
    ) -> DomainResult<Document> {
        let mut document = Self::load(ctx, document_id)?;
        let loaded_version = document.version();

        let change = match document.plan_transition(requested, &extra, ctx.clock().now()) {
            Ok(change) => change,
            Err(err) => {
                warn!(error = %err, "transition rejected");
                return Err(err);
            }
        };
        document.apply_change(&change)?;

        if let Err(err) = ctx
            .storage()
            .run_atomically(vec![AtomicOp::update_document(document.clone(), loaded_version)])
        {
            warn!(error = %err, "document update lost a concurrent write");
            return Err(err.into());
        }

        info!(from = %change.expected_status, to = %change.new_status, "document status changed");
        self.status_changed(ctx, &document, &change);
        Ok(document.as_of(ctx.clock().today()))
    }

    /// Turn a booking order or proforma into a final invoice, exactly once.
    ///
    /// One atomic batch creates the invoice, marks the document converted and
    /// posts the invoice's debit to the customer's ledger. Calling this again
    /// on a converted document returns the same invoice id and writes nothing.
    #[instrument(skip_all, fields(owner_id = %ctx.owner_id(), document_id = %document_id))]
    pub fn convert_to_invoice<S: Storage>(
        &self,
        ctx: &EngineContext<S>,
        document_id: DocumentId,
    ) -> DomainResult<InvoiceId> {
        let mut document = Self::load(ctx, document_id)?;
        if let Some(invoice_id) = document.converted_invoice_id() {
            debug!(invoice_id = %invoice_id, "already converted; returning existing invoice");
            return Ok(invoice_id);
        }

        let now = ctx.clock().now();
        let today = now.date_naive();
        let invoice_id = InvoiceId::new();
        let change = match document.plan_conversion(invoice_id, now) {
            Ok(change) => change,
            Err(err) => {
                warn!(error = %err, "conversion rejected");
                return Err(err);
            }
        };

        let invoice_number = ctx.next_number(&self.invoicing.number_prefix)?;
        let due_date = today.checked_add_days(Days::new(u64::from(self.invoicing.default_due_days)));
        let invoice = Invoice::from_document(&document, invoice_id, invoice_number, due_date, now)?;

        let debit = prepare_new_posting(
            ctx,
            NewLedgerEntry {
                party_id: document.counterparty_id(),
                party_type: PartyType::Customer,
                counterparty_id: ctx.owner_id().as_party(),
                entry_type: EntryType::Debit,
                amount: invoice.grand_total(),
                reference_type: ReferenceType::Invoice,
                reference_id: invoice_id.to_string(),
                reference_number: invoice.invoice_number().to_string(),
                entry_date: today,
                notes: Some(format!("converted from {}", document.number())),
            },
        )?;

        let loaded_version = document.version();
        document.apply_change(&change)?;

        let batch = vec![
            AtomicOp::InsertInvoice(invoice.clone()),
            AtomicOp::update_document(document.clone(), loaded_version),
            AtomicOp::insert_entry(debit.clone()),
        ];
        if let Err(err) = ctx.storage().run_atomically(batch) {
            let err: DomainError = err.into();
            if is_stale(&err) {
                // A concurrent caller may have converted it first.
                if let Some(existing) = Self::load(ctx, document_id)?.converted_invoice_id() {
                    debug!(invoice_id = %existing, "lost conversion race; returning winner's invoice");
                    return Ok(existing);
                }
            }
            warn!(error = %err, "conversion rolled back");
            return Err(err);
        }

        info!(
            invoice_id = %invoice_id,
            invoice_number = invoice.invoice_number(),
            amount = %invoice.grand_total(),
            "document converted to invoice"
        );
        let owner_id = ctx.owner_id();
        self.status_changed(ctx, &document, &change);
        self.emitter.emit(
            owner_id,
            DocumentConverted {
                owner_id,
                document_id,
                kind: document.kind(),
                invoice_id,
                total_amount: invoice.grand_total(),
                occurred_at: now,
            },
        );
        self.emitter.emit(
            owner_id,
            InvoiceIssued {
                owner_id,
                invoice_id,
                party_id: invoice.party_id(),
                party_type: invoice.party_type(),
                invoice_number: invoice.invoice_number().to_string(),
                grand_total: invoice.grand_total(),
                source: invoice.source(),
                occurred_at: now,
            },
        );
        self.emitter.emit(owner_id, EntryAdded { entry: debit });
        Ok(invoice_id)
    }

    /// Process an inward return: mark it processed, credit the customer for
    /// the return total and hand restock movements to inventory, atomically.
    ///
    /// Processing an already-processed return returns the recorded outcome.
    #[instrument(skip_all, fields(owner_id = %ctx.owner_id(), document_id = %document_id))]
    pub fn process_return<S: Storage>(
        &self,
        ctx: &EngineContext<S>,
        document_id: DocumentId,
    ) -> DomainResult<ReturnOutcome> {
        let mut document = Self::load(ctx, document_id)?;
        if document.kind() != DocumentKind::ReturnInward {
            return Err(DomainError::illegal_transition(format!(
                "a {} is not processed as a return",
                document.kind()
            )));
        }
        if document.status().is_terminal() {
            debug!("return already processed; returning recorded outcome");
            return Self::recorded_outcome(ctx, document);
        }

        let now = ctx.clock().now();
        let posting = prepare_posting(
            ctx,
            NewLedgerEntry {
                party_id: document.counterparty_id(),
                party_type: PartyType::Customer,
                counterparty_id: ctx.owner_id().as_party(),
                entry_type: EntryType::Credit,
                amount: document.total_amount(),
                reference_type: ReferenceType::CreditNote,
                reference_id: document_id.to_string(),
                reference_number: document.number().to_string(),
                entry_date: now.date_naive(),
                notes: return_reason(&document),
            },
        )?;
        let credit = match posting {
            Posting::New(entry) => entry,
            // Another caller committed the return between our load and now.
            Posting::Existing(_) => return Self::settled_return(ctx, document_id),
        };

        let change = document.plan_processing(credit.id, now)?;
        let loaded_version = document.version();
        document.apply_change(&change)?;

        let movements = document
            .items()
            .iter()
            .map(|line| {
                let item_id = line.item_id.ok_or_else(|| {
                    DomainError::invariant(format!(
                        "return {} line '{}' has no stock item",
                        document.number(),
                        line.name
                    ))
                })?;
                Ok(StockMovement {
                    owner_id: ctx.owner_id(),
                    item_id,
                    item_name: line.name.clone(),
                    quantity: line.quantity,
                    document_id,
                    recorded_at: now,
                })
            })
            .collect::<DomainResult<Vec<StockMovement>>>()?;

        let batch = vec![
            AtomicOp::update_document(document.clone(), loaded_version),
            AtomicOp::insert_entry(credit.clone()),
            AtomicOp::RecordStockMovements(movements.clone()),
        ];
        if let Err(err) = ctx.storage().run_atomically(batch) {
            let err: DomainError = err.into();
            if is_stale(&err) {
                debug!("lost return race; returning recorded outcome");
                return Self::settled_return(ctx, document_id);
            }
            warn!(error = %err, "return processing rolled back");
            return Err(err);
        }

        info!(
            entry_id = %credit.id,
            amount = %credit.amount,
            restocked_lines = movements.len(),
            "return processed"
        );
        self.status_changed(ctx, &document, &change);
        self.emitter.emit(
            ctx.owner_id(),
            EntryAdded {
                entry: credit.clone(),
            },
        );
        Ok(ReturnOutcome {
            document,
            credit_entry: credit,
            stock_movements: movements,
        })
    }

    /// Reload after losing a race; the winner must have left the return processed.
    fn settled_return<S: Storage>(
        ctx: &EngineContext<S>,
        document_id: DocumentId,
    ) -> DomainResult<ReturnOutcome> {
        let current = Self::load(ctx, document_id)?;
        if !current.status().is_terminal() {
            return Err(DomainError::stale(format!(
                "return {} changed concurrently; retry",
                current.number()
            )));
        }
        Self::recorded_outcome(ctx, current)
    }

    fn recorded_outcome<S: Storage>(
        ctx: &EngineContext<S>,
        document: Document,
    ) -> DomainResult<ReturnOutcome> {
        let key = ReferenceKey {
            owner_id: ctx.owner_id(),
            party_id: document.counterparty_id(),
            reference_type: ReferenceType::CreditNote,
            reference_id: document.id().to_string(),
        };
        let credit_entry = ctx.storage().find_entry_by_reference(&key)?.ok_or_else(|| {
            DomainError::invariant(format!(
                "return {} is processed but has no credit entry",
                document.number()
            ))
        })?;
        let stock_movements = ctx
            .storage()
            .stock_movements(ctx.owner_id())?
            .into_iter()
            .filter(|m| m.document_id == *document.id())
            .collect();
        Ok(ReturnOutcome {
            document,
            credit_entry,
            stock_movements,
        })
    }
}

fn is_stale(err: &DomainError) -> bool {
    matches!(
        err,
        DomainError::ConflictingState {
            kind: ConflictKind::StaleWrite,
            ..
        }
    )
}

fn return_reason(document: &Document) -> Option<String> {
    match document.details() {
        DocumentDetails::ReturnInward { reason, .. } => reason.clone(),
        _ => None,
    }
}
