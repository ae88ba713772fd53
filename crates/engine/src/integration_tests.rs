//! Integration tests for the full engine pipeline.
//!
//! Tests: Engine operation → Storage batch → EventBus
//!
//! Verifies:
//! - Running balances chain correctly, also under concurrent writers
//! - Conversion and return processing are idempotent and all-or-nothing
//! - Payments respect the invoice total and replay safely
//! - Aging reads the invoices the engine wrote

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use chrono::{Days, NaiveDate};

    use partybook_core::{
        AggregateRoot, ConflictKind, DocumentId, DomainError, DomainResult, FixedClock, InvoiceId, ItemId, Money,
        OwnerId, PartyId,
    };
    use partybook_documents::{
        BookingStatus, DispatchStatus, Document, DocumentDetails, DocumentStatus, LineItem, NewDocument, ProformaStatus,
        ReturnStatus, TransitionExtra,
    };
    use partybook_events::{InMemoryEventBus, Subscription};
    use partybook_invoicing::{InvoiceStatus, NewInvoice};
    use partybook_ledger::{
        BalanceCalculator, EntryType, LedgerEntry, NewLedgerEntry, PairKey, PartyType,
        ReferenceType,
    };

    use crate::config::EngineConfig;
    use crate::context::EngineContext;
    use crate::emitter::DomainEventEnvelope;
    use crate::engine::Engine;
    use crate::invoices::PaymentRequest;
    use crate::lifecycle::ReturnOutcome;
    use crate::storage::{
        AtomicOp, InMemoryStorage, ReferenceKey, StockMovement, Storage, StorageError,
    };

    type Bus = Arc<InMemoryEventBus<DomainEventEnvelope>>;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()
    }

    struct Harness<S> {
        engine: Engine<Bus>,
        ctx: EngineContext<S>,
        events: Subscription<DomainEventEnvelope>,
    }

    fn harness_with<S: Storage>(storage: S) -> Harness<S> {
        let bus: Bus = Arc::new(InMemoryEventBus::new());
        let engine = Engine::new(&EngineConfig::default(), bus).unwrap();
        let events = engine.subscribe();
        let ctx = EngineContext::with_clock(OwnerId::new(), storage, Arc::new(FixedClock::on(today())));
        Harness {
            engine,
            ctx,
            events,
        }
    }

    fn harness() -> (Harness<Arc<InMemoryStorage>>, Arc<InMemoryStorage>) {
        let storage = Arc::new(InMemoryStorage::new());
        (harness_with(storage.clone()), storage)
    }

    fn posting(
        party: PartyId,
        counterparty: PartyId,
        entry_type: EntryType,
        amount: i64,
        reference: &str,
    ) -> NewLedgerEntry {
        NewLedgerEntry {
            party_id: party,
            party_type: PartyType::Customer,
            counterparty_id: counterparty,
            entry_type,
            amount: Money::from_minor(amount),
            reference_type: ReferenceType::Adjustment,
            reference_id: reference.to_string(),
            reference_number: reference.to_string(),
            entry_date: today(),
            notes: None,
        }
    }

    fn line(item_id: Option<ItemId>, name: &str, qty: i64, rate: i64) -> LineItem {
        LineItem::new(item_id, name, qty, Money::from_minor(rate)).unwrap()
    }

    fn new_document(customer: PartyId, details: DocumentDetails) -> NewDocument {
        NewDocument {
            counterparty_id: customer,
            counterparty_name: "Meena Traders".to_string(),
            items: vec![line(None, "Rice 25kg", 2, 1_250), line(None, "Dal 5kg", 1, 500)],
            details,
            notes: None,
        }
    }

    fn booking(customer: PartyId) -> NewDocument {
        new_document(
            customer,
            DocumentDetails::BookingOrder {
                expected_delivery: None,
            },
        )
    }

    fn proforma(customer: PartyId) -> NewDocument {
        new_document(
            customer,
            DocumentDetails::ProformaInvoice {
                valid_until: today() + Days::new(15),
            },
        )
    }

    fn return_inward(customer: PartyId) -> NewDocument {
        NewDocument {
            counterparty_id: customer,
            counterparty_name: "Meena Traders".to_string(),
            items: vec![line(Some(ItemId::new()), "Oil 1L", 2, 150)],
            details: DocumentDetails::ReturnInward {
                original_invoice_id: None,
                reason: None,
                credit_entry_id: None,
                processed_at: None,
            },
            notes: None,
        }
    }

    fn customer_invoice(customer: PartyId, total: i64, due_date: Option<NaiveDate>) -> NewInvoice {
        NewInvoice {
            party_id: customer,
            party_type: PartyType::Customer,
            party_name: "Meena Traders".to_string(),
            items: vec![line(None, "Sugar 50kg", 1, total)],
            issue_date: today(),
            due_date,
            notes: None,
        }
    }

    fn payment(reference: &str, amount: i64) -> PaymentRequest {
        PaymentRequest {
            reference: reference.to_string(),
            amount: Money::from_minor(amount),
            date: None,
            notes: None,
        }
    }

    fn conflict_kind(err: &DomainError) -> Option<ConflictKind> {
        match err {
            DomainError::ConflictingState { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    fn advance_booking_to_ready<S: Storage>(h: &Harness<S>, id: DocumentId) {
        for next in [BookingStatus::Confirmed, BookingStatus::Ready] {
            h.engine
                .documents
                .transition(&h.ctx, id, DocumentStatus::Booking(next), TransitionExtra::default())
                .unwrap();
        }
    }

    #[test]
    fn credit_then_debit_leaves_the_difference() {
        let (h, _) = harness();
        let (party, cp) = (PartyId::new(), PartyId::new());

        let first = h
            .engine
            .ledger
            .add_entry(&h.ctx, posting(party, cp, EntryType::Credit, 500, "ADJ-1"))
            .unwrap();
        let second = h
            .engine
            .ledger
            .add_entry(&h.ctx, posting(party, cp, EntryType::Debit, 200, "ADJ-2"))
            .unwrap();

        assert_eq!(first.running_balance, Money::from_minor(500));
        assert_eq!(second.running_balance, Money::from_minor(300));
        assert_eq!(h.engine.ledger.balance(&h.ctx, party, cp).unwrap(), Money::from_minor(300));

        let entries = h.engine.ledger.get_entries(&h.ctx, party, cp).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].id, first.id);
        assert_eq!(entries[1].id, second.id);
    }

    #[test]
    fn replayed_posting_returns_the_stored_entry() {
        let (h, _) = harness();
        let (party, cp) = (PartyId::new(), PartyId::new());
        let request = posting(party, cp, EntryType::Credit, 500, "ADJ-1");

        let first = h.engine.ledger.add_entry(&h.ctx, request.clone()).unwrap();
        let again = h.engine.ledger.add_entry(&h.ctx, request).unwrap();
        assert_eq!(first, again);
        assert_eq!(h.engine.ledger.get_entries(&h.ctx, party, cp).unwrap().len(), 1);

        // Same reference, different amount.
        let err = h
            .engine
            .ledger
            .add_entry(&h.ctx, posting(party, cp, EntryType::Credit, 900, "ADJ-1"))
            .unwrap_err();
        assert_eq!(conflict_kind(&err), Some(ConflictKind::AlreadyProcessed));
    }

    #[test]
    fn invalid_postings_are_rejected_without_writes() {
        let (h, _) = harness();
        let (party, cp) = (PartyId::new(), PartyId::new());

        let err = h
            .engine
            .ledger
            .add_entry(&h.ctx, posting(party, cp, EntryType::Credit, 0, "ADJ-0"))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
        assert!(h.engine.ledger.get_entries(&h.ctx, party, cp).unwrap().is_empty());
        assert_eq!(h.engine.events_emitted(), 0);
    }

    #[test]
    fn concurrent_writers_keep_the_chain_intact() {
        let (h, _) = harness();
        let (party, cp) = (PartyId::new(), PartyId::new());
        let writers = 8;
        let per_writer = 10;

        let (engine, ctx) = (&h.engine, &h.ctx);
        std::thread::scope(|scope| {
            for w in 0..writers {
                scope.spawn(move || {
                    for i in 0..per_writer {
                        let reference = format!("W{w}-{i}");
                        loop {
                            let request = posting(party, cp, EntryType::Credit, 100, &reference);
                            match engine.ledger.add_entry(ctx, request) {
                                Ok(_) => break,
                                Err(err) if err.is_retryable() => continue,
                                Err(err) => panic!("unexpected error: {err}"),
                            }
                        }
                    }
                });
            }
        });

        let entries = h.engine.ledger.get_entries(&h.ctx, party, cp).unwrap();
        assert_eq!(entries.len(), writers * per_writer);
        assert!(BalanceCalculator::verify_chain(&entries).is_ok());
        assert_eq!(BalanceCalculator::net_sum(&entries).unwrap(), Money::from_minor(8_000));
        assert_eq!(entries.last().unwrap().running_balance, Money::from_minor(8_000));
        let sequences: Vec<u64> = entries.iter().map(|e| e.sequence).collect();
        assert_eq!(sequences, (1..=80).collect::<Vec<u64>>());
    }

    #[test]
    fn counterparty_balances_group_by_counterparty() {
        let (h, _) = harness();
        let party = PartyId::new();
        let (a, b) = (PartyId::new(), PartyId::new());

        h.engine.ledger.add_entry(&h.ctx, posting(party, a, EntryType::Credit, 700, "A-1")).unwrap();
        h.engine.ledger.add_entry(&h.ctx, posting(party, a, EntryType::Debit, 200, "A-2")).unwrap();
        h.engine.ledger.add_entry(&h.ctx, posting(party, b, EntryType::Debit, 300, "B-1")).unwrap();

        let rows = h.engine.ledger.counterparty_balances(&h.ctx, party).unwrap();
        assert_eq!(rows.len(), 2);
        let of = |cp: PartyId| rows.iter().find(|r| r.counterparty_id == cp).unwrap();
        assert_eq!(of(a).balance, Money::from_minor(500));
        assert_eq!(of(b).balance, Money::from_minor(-300));
    }

    #[test]
    fn booking_converts_once() {
        let (h, storage) = harness();
        let customer = PartyId::new();
        let doc = h.engine.documents.create_document(&h.ctx, booking(customer)).unwrap();
        assert_eq!(doc.number(), "BO-0001");
        advance_booking_to_ready(&h, *doc.id());

        let first = h.engine.documents.convert_to_invoice(&h.ctx, *doc.id()).unwrap();
        let second = h.engine.documents.convert_to_invoice(&h.ctx, *doc.id()).unwrap();
        assert_eq!(first, second);
        assert_eq!(storage.invoice_count(h.ctx.owner_id()).unwrap(), 1);

        let converted = h.engine.documents.get_document(&h.ctx, *doc.id()).unwrap();
        assert_eq!(converted.status(), DocumentStatus::Booking(BookingStatus::Converted));
        assert_eq!(converted.converted_invoice_id(), Some(first));

        let invoice = h.engine.invoices.get_invoice(&h.ctx, first).unwrap();
        assert_eq!(invoice.grand_total(), Money::from_minor(3_000));
        assert_eq!(invoice.invoice_number(), "INV-0001");
        assert_eq!(invoice.due_date(), Some(today() + Days::new(30)));
        assert_eq!(invoice.source().map(|s| s.document_id), Some(*doc.id()));

        // Exactly one debit for the invoice on the customer's ledger.
        let owner_side = h.ctx.owner_id().as_party();
        let entries = h.engine.ledger.get_entries(&h.ctx, customer, owner_side).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].entry_type, EntryType::Debit);
        assert_eq!(entries[0].reference_type, ReferenceType::Invoice);
        assert_eq!(entries[0].reference_id, first.to_string());
        assert_eq!(entries[0].running_balance, Money::from_minor(-3_000));
    }

    #[test]
    fn converted_proforma_cannot_be_sent() {
        let (h, _) = harness();
        let doc = h
            .engine
            .documents
            .create_document(&h.ctx, proforma(PartyId::new()))
            .unwrap();
        assert_eq!(doc.number(), "PI-0001");
        h.engine.documents.convert_to_invoice(&h.ctx, *doc.id()).unwrap();

        let err = h
            .engine
            .documents
            .transition(
                &h.ctx,
                *doc.id(),
                DocumentStatus::Proforma(ProformaStatus::Sent),
                TransitionExtra::default(),
            )
            .unwrap_err();
        assert_eq!(conflict_kind(&err), Some(ConflictKind::IllegalTransition));
        assert_eq!(
            h.engine.documents.get_document(&h.ctx, *doc.id()).unwrap().status(),
            DocumentStatus::Proforma(ProformaStatus::Converted)
        );
    }

    #[test]
    fn expired_proforma_does_not_convert() {
        let (h, storage) = harness();
        let doc = h
            .engine
            .documents
            .create_document(&h.ctx, proforma(PartyId::new()))
            .unwrap();

        let later = EngineContext::with_clock(
            h.ctx.owner_id(),
            storage.clone(),
            Arc::new(FixedClock::on(today() + Days::new(40))),
        );
        assert_eq!(
            h.engine.documents.get_document(&later, *doc.id()).unwrap().status(),
            DocumentStatus::Proforma(ProformaStatus::Expired)
        );
        let err = h
            .engine
            .documents
            .convert_to_invoice(&later, *doc.id())
            .unwrap_err();
        assert_eq!(conflict_kind(&err), Some(ConflictKind::IllegalTransition));
        assert_eq!(storage.invoice_count(h.ctx.owner_id()).unwrap(), 0);
    }

    #[test]
    fn dispatch_delivery_requires_receiver() {
        let (h, _) = harness();
        let doc = h
            .engine
            .documents
            .create_document(
                &h.ctx,
                new_document(
                    PartyId::new(),
                    DocumentDetails::DispatchNote {
                        source_invoice_id: None,
                        transport: Some("Truck KA-01".to_string()),
                        receiver_name: None,
                        delivered_at: None,
                    },
                ),
            )
            .unwrap();
        let id = *doc.id();
        let in_transit = DocumentStatus::Dispatch(DispatchStatus::InTransit);
        let delivered_status = DocumentStatus::Dispatch(DispatchStatus::Delivered);

        h.engine
            .documents
            .transition(&h.ctx, id, in_transit, TransitionExtra::default())
            .unwrap();
        let err = h
            .engine
            .documents
            .transition(&h.ctx, id, delivered_status, TransitionExtra::default())
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));

        let delivered = h
            .engine
            .documents
            .transition(&h.ctx, id, delivered_status, TransitionExtra::receiver("Ravi"))
            .unwrap();
        assert_eq!(delivered.status(), delivered_status);
        match delivered.details() {
            DocumentDetails::DispatchNote {
                receiver_name,
                delivered_at,
                ..
            } => {
                assert_eq!(receiver_name.as_deref(), Some("Ravi"));
                assert!(delivered_at.is_some());
            }
            other => panic!("unexpected details: {other:?}"),
        }
    }

    /// Delegates to an in-memory store. Can fail every multi-op batch, and
    /// can answer the next document read with an older snapshot.
    struct ScriptedStorage {
        inner: Arc<InMemoryStorage>,
        fail_batches: bool,
        stale_read: Mutex<Option<Document>>,
    }

    impl ScriptedStorage {
        fn new(inner: Arc<InMemoryStorage>) -> Self {
            Self {
                inner,
                fail_batches: false,
                stale_read: Mutex::new(None),
            }
        }

        fn failing_batches(inner: Arc<InMemoryStorage>) -> Self {
            Self {
                fail_batches: true,
                ..Self::new(inner)
            }
        }

        fn serve_once(&self, snapshot: Document) {
            *self.stale_read.lock().unwrap() = Some(snapshot);
        }
    }

    impl Storage for ScriptedStorage {
        fn run_atomically(&self, ops: Vec<AtomicOp>) -> Result<(), StorageError> {
            if self.fail_batches && ops.len() > 1 {
                return Err(StorageError::Aborted("injected failure".to_string()));
            }
            self.inner.run_atomically(ops)
        }

        fn last_entry(&self, pair: PairKey) -> Result<Option<LedgerEntry>, StorageError> {
            self.inner.last_entry(pair)
        }

        fn entries_for_pair(&self, pair: PairKey) -> Result<Vec<LedgerEntry>, StorageError> {
            self.inner.entries_for_pair(pair)
        }

        fn entries_for_party(
            &self,
            owner_id: OwnerId,
            party_id: PartyId,
        ) -> Result<Vec<LedgerEntry>, StorageError> {
            self.inner.entries_for_party(owner_id, party_id)
        }

        fn find_entry_by_reference(
            &self,
            key: &ReferenceKey,
        ) -> Result<Option<LedgerEntry>, StorageError> {
            self.inner.find_entry_by_reference(key)
        }

        fn get_document(
            &self,
            owner_id: OwnerId,
            document_id: DocumentId,
        ) -> Result<Option<Document>, StorageError> {
            if let Some(snapshot) = self.stale_read.lock().unwrap().take() {
                return Ok(Some(snapshot));
            }
            self.inner.get_document(owner_id, document_id)
        }

        fn list_documents(
            &self,
            owner_id: OwnerId,
            kind: Option<partybook_documents::DocumentKind>,
        ) -> Result<Vec<Document>, StorageError> {
            self.inner.list_documents(owner_id, kind)
        }

        fn get_invoice(
            &self,
            owner_id: OwnerId,
            invoice_id: InvoiceId,
        ) -> Result<Option<partybook_invoicing::Invoice>, StorageError> {
            self.inner.get_invoice(owner_id, invoice_id)
        }

        fn invoices_for_party(
            &self,
            owner_id: OwnerId,
            party_id: PartyId,
        ) -> Result<Vec<partybook_invoicing::Invoice>, StorageError> {
            self.inner.invoices_for_party(owner_id, party_id)
        }

        fn stock_movements(&self, owner_id: OwnerId) -> Result<Vec<StockMovement>, StorageError> {
            self.inner.stock_movements(owner_id)
        }

        fn next_number(&self, owner_id: OwnerId, series: &str) -> Result<u64, StorageError> {
            self.inner.next_number(owner_id, series)
        }
    }

    #[test]
    fn failed_conversion_leaves_no_trace() {
        let inner = Arc::new(InMemoryStorage::new());
        let h = harness_with(ScriptedStorage::failing_batches(inner.clone()));
        let customer = PartyId::new();
        let doc = h
            .engine
            .documents
            .create_document(&h.ctx, proforma(customer))
            .unwrap();
        let emitted_before = h.engine.events_emitted();

        let err = h
            .engine
            .documents
            .convert_to_invoice(&h.ctx, *doc.id())
            .unwrap_err();
        assert!(matches!(err, DomainError::Persistence(_)));
        assert!(err.is_retryable());

        let reloaded = h.engine.documents.get_document(&h.ctx, *doc.id()).unwrap();
        assert_eq!(reloaded.status(), DocumentStatus::Proforma(ProformaStatus::Draft));
        assert_eq!(reloaded.converted_invoice_id(), None);
        assert_eq!(inner.invoice_count(h.ctx.owner_id()).unwrap(), 0);
        let owner_side = h.ctx.owner_id().as_party();
        assert!(
            h.engine
                .ledger
                .get_entries(&h.ctx, customer, owner_side)
                .unwrap()
                .is_empty()
        );
        assert_eq!(h.engine.events_emitted(), emitted_before);
    }

    #[test]
    fn return_is_processed_once_with_restock() {
        let (h, storage) = harness();
        let customer = PartyId::new();
        let (tracked, packing) = (ItemId::new(), ItemId::new());
        let doc = h
            .engine
            .documents
            .create_document(
                &h.ctx,
                NewDocument {
                    counterparty_id: customer,
                    counterparty_name: "Meena Traders".to_string(),
                    items: vec![line(Some(tracked), "Oil 1L", 4, 150), line(Some(packing), "Packing", 1, 50)],
                    details: DocumentDetails::ReturnInward {
                        original_invoice_id: None,
                        reason: Some("leaking cans".to_string()),
                        credit_entry_id: None,
                        processed_at: None,
                    },
                    notes: None,
                },
            )
            .unwrap();
        assert_eq!(doc.number(), "RI-0001");

        let outcome = h.engine.documents.process_return(&h.ctx, *doc.id()).unwrap();
        assert_eq!(outcome.document.status(), DocumentStatus::Return(ReturnStatus::Processed));
        assert_eq!(outcome.credit_entry.entry_type, EntryType::Credit);
        assert_eq!(outcome.credit_entry.amount, Money::from_minor(650));
        assert_eq!(outcome.stock_movements.len(), 2);
        assert_eq!(outcome.stock_movements[0].item_id, tracked);
        assert_eq!(outcome.stock_movements[0].quantity, 4);
        assert_eq!(outcome.stock_movements[1].item_id, packing);
        assert_eq!(outcome.stock_movements[1].quantity, 1);

        let again = h.engine.documents.process_return(&h.ctx, *doc.id()).unwrap();
        assert_eq!(again.credit_entry.id, outcome.credit_entry.id);
        assert_eq!(again.stock_movements, outcome.stock_movements);

        let owner_side = h.ctx.owner_id().as_party();
        assert_eq!(h.engine.ledger.get_entries(&h.ctx, customer, owner_side).unwrap().len(), 1);
        assert_eq!(storage.stock_movements(h.ctx.owner_id()).unwrap().len(), 2);
    }

    #[test]
    fn returns_must_restock_every_line() {
        let (h, storage) = harness();
        let mut request = return_inward(PartyId::new());
        request.items.push(line(None, "Packing", 1, 50));

        let err = h.engine.documents.create_document(&h.ctx, request).unwrap_err();
        assert!(matches!(err, DomainError::Validation(ref msg) if msg.contains("Packing")));
        assert!(storage.list_documents(h.ctx.owner_id(), None).unwrap().is_empty());
    }

    #[test]
    fn lost_conversion_race_returns_the_winners_invoice() {
        let inner = Arc::new(InMemoryStorage::new());
        let scripted = Arc::new(ScriptedStorage::new(inner.clone()));
        let h = harness_with(scripted.clone());
        let customer = PartyId::new();
        let doc = h.engine.documents.create_document(&h.ctx, booking(customer)).unwrap();
        advance_booking_to_ready(&h, *doc.id());
        let before = inner.get_document(h.ctx.owner_id(), *doc.id()).unwrap().unwrap();

        let winner = h.engine.documents.convert_to_invoice(&h.ctx, *doc.id()).unwrap();
        // The late caller still sees the document as ready.
        scripted.serve_once(before);
        let late = h.engine.documents.convert_to_invoice(&h.ctx, *doc.id()).unwrap();

        assert_eq!(late, winner);
        assert_eq!(inner.invoice_count(h.ctx.owner_id()).unwrap(), 1);
        let owner_side = h.ctx.owner_id().as_party();
        assert_eq!(h.engine.ledger.get_entries(&h.ctx, customer, owner_side).unwrap().len(), 1);
    }

    #[test]
    fn lost_return_race_returns_the_recorded_outcome() {
        let inner = Arc::new(InMemoryStorage::new());
        let scripted = Arc::new(ScriptedStorage::new(inner.clone()));
        let h = harness_with(scripted.clone());
        let customer = PartyId::new();
        let doc = h
            .engine
            .documents
            .create_document(&h.ctx, return_inward(customer))
            .unwrap();
        let before = inner.get_document(h.ctx.owner_id(), *doc.id()).unwrap().unwrap();

        let winner = h.engine.documents.process_return(&h.ctx, *doc.id()).unwrap();
        // The late caller still sees the return as received.
        scripted.serve_once(before);
        let late = h.engine.documents.process_return(&h.ctx, *doc.id()).unwrap();

        assert_eq!(late.credit_entry.id, winner.credit_entry.id);
        assert_eq!(late.stock_movements, winner.stock_movements);
        assert_eq!(late.document.status(), DocumentStatus::Return(ReturnStatus::Processed));
        let owner_side = h.ctx.owner_id().as_party();
        assert_eq!(h.engine.ledger.get_entries(&h.ctx, customer, owner_side).unwrap().len(), 1);
        assert_eq!(inner.stock_movements(h.ctx.owner_id()).unwrap().len(), 1);
    }

    #[test]
    fn concurrent_conversions_create_one_invoice() {
        let (h, storage) = harness();
        let customer = PartyId::new();
        let doc = h.engine.documents.create_document(&h.ctx, proforma(customer)).unwrap();
        let id = *doc.id();

        let (engine, ctx) = (&h.engine, &h.ctx);
        let results: Vec<DomainResult<InvoiceId>> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| scope.spawn(move || engine.documents.convert_to_invoice(ctx, id)))
                .collect();
            handles.into_iter().map(|handle| handle.join().unwrap()).collect()
        });

        let ids: Vec<InvoiceId> = results.into_iter().map(|r| r.unwrap()).collect();
        assert!(ids.iter().all(|invoice_id| *invoice_id == ids[0]));
        assert_eq!(storage.invoice_count(h.ctx.owner_id()).unwrap(), 1);
        let owner_side = h.ctx.owner_id().as_party();
        assert_eq!(h.engine.ledger.get_entries(&h.ctx, customer, owner_side).unwrap().len(), 1);
        let converted = h.engine.documents.get_document(&h.ctx, id).unwrap();
        assert_eq!(converted.converted_invoice_id(), Some(ids[0]));
    }

    #[test]
    fn concurrent_return_processing_posts_one_credit() {
        let (h, storage) = harness();
        let customer = PartyId::new();
        let doc = h
            .engine
            .documents
            .create_document(&h.ctx, return_inward(customer))
            .unwrap();
        let id = *doc.id();

        let (engine, ctx) = (&h.engine, &h.ctx);
        let results: Vec<DomainResult<ReturnOutcome>> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| scope.spawn(move || engine.documents.process_return(ctx, id)))
                .collect();
            handles.into_iter().map(|handle| handle.join().unwrap()).collect()
        });

        let outcomes: Vec<ReturnOutcome> = results.into_iter().map(|r| r.unwrap()).collect();
        let credit = outcomes[0].credit_entry.id;
        assert!(outcomes.iter().all(|o| o.credit_entry.id == credit));
        let owner_side = h.ctx.owner_id().as_party();
        let entries = h.engine.ledger.get_entries(&h.ctx, customer, owner_side).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].amount, Money::from_minor(300));
        assert_eq!(storage.stock_movements(h.ctx.owner_id()).unwrap().len(), 1);
    }

    #[test]
    fn payments_track_the_invoice_and_the_ledger() {
        let (h, _) = harness();
        let customer = PartyId::new();
        let invoice = h
            .engine
            .invoices
            .issue_invoice(&h.ctx, customer_invoice(customer, 1_000, None))
            .unwrap();
        let id = *invoice.id();

        let receipt = h.engine.invoices.record_payment(&h.ctx, id, payment("RCPT-1", 400)).unwrap();
        assert_eq!(receipt.invoice.status(), InvoiceStatus::Partial);
        assert_eq!(receipt.invoice.paid_amount(), Money::from_minor(400));
        assert_eq!(receipt.entry.entry_type, EntryType::Credit);

        // Replay is a no-op.
        let replay = h.engine.invoices.record_payment(&h.ctx, id, payment("RCPT-1", 400)).unwrap();
        assert_eq!(replay.entry.id, receipt.entry.id);
        assert_eq!(replay.invoice.paid_amount(), Money::from_minor(400));

        let err = h
            .engine
            .invoices
            .record_payment(&h.ctx, id, payment("RCPT-2", 700))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));

        let settled = h.engine.invoices.record_payment(&h.ctx, id, payment("RCPT-3", 600)).unwrap();
        assert_eq!(settled.invoice.status(), InvoiceStatus::Paid);
        assert!(settled.invoice.is_settled());

        let owner_side = h.ctx.owner_id().as_party();
        assert_eq!(h.engine.ledger.balance(&h.ctx, customer, owner_side).unwrap(), Money::ZERO);
        assert_eq!(
            h.engine.ledger.get_entries(&h.ctx, customer, owner_side).unwrap().len(),
            3
        );
    }

    #[test]
    fn payment_reference_belongs_to_one_invoice() {
        let (h, _) = harness();
        let customer = PartyId::new();
        let first = h
            .engine
            .invoices
            .issue_invoice(&h.ctx, customer_invoice(customer, 1_000, None))
            .unwrap();
        let second = h
            .engine
            .invoices
            .issue_invoice(&h.ctx, customer_invoice(customer, 1_000, None))
            .unwrap();
        h.engine
            .invoices
            .record_payment(&h.ctx, *first.id(), payment("CHQ-1", 300))
            .unwrap();

        let err = h
            .engine
            .invoices
            .record_payment(&h.ctx, *second.id(), payment("CHQ-1", 300))
            .unwrap_err();
        assert_eq!(conflict_kind(&err), Some(ConflictKind::AlreadyProcessed));

        let untouched = h.engine.invoices.get_invoice(&h.ctx, *second.id()).unwrap();
        assert_eq!(untouched.paid_amount(), Money::ZERO);
        assert_eq!(untouched.status(), InvoiceStatus::Unpaid);
        let paid = h.engine.invoices.get_invoice(&h.ctx, *first.id()).unwrap();
        assert_eq!(paid.paid_amount(), Money::from_minor(300));
        let owner_side = h.ctx.owner_id().as_party();
        assert_eq!(h.engine.ledger.get_entries(&h.ctx, customer, owner_side).unwrap().len(), 3);
    }

    #[test]
    fn issued_invoices_post_on_their_issue_date() {
        let (h, storage) = harness();
        let customer = PartyId::new();
        let mut backdated = customer_invoice(customer, 800, None);
        backdated.issue_date = today() - Days::new(10);
        h.engine.invoices.issue_invoice(&h.ctx, backdated).unwrap();

        let owner_side = h.ctx.owner_id().as_party();
        let entries = h.engine.ledger.get_entries(&h.ctx, customer, owner_side).unwrap();
        assert_eq!(entries[0].entry_date, today() - Days::new(10));

        // Earlier than the pair's latest entry.
        let mut older = customer_invoice(customer, 500, None);
        older.issue_date = today() - Days::new(20);
        let err = h.engine.invoices.issue_invoice(&h.ctx, older).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
        assert_eq!(storage.invoice_count(h.ctx.owner_id()).unwrap(), 1);
        assert_eq!(h.engine.ledger.get_entries(&h.ctx, customer, owner_side).unwrap().len(), 1);
    }

    #[test]
    fn vendor_bills_post_the_other_way() {
        let (h, _) = harness();
        let vendor = PartyId::new();
        let mut bill = customer_invoice(vendor, 2_000, None);
        bill.party_type = PartyType::Vendor;
        let invoice = h.engine.invoices.issue_invoice(&h.ctx, bill).unwrap();
        h.engine
            .invoices
            .record_payment(&h.ctx, *invoice.id(), payment("CHQ-77", 500))
            .unwrap();

        let owner_side = h.ctx.owner_id().as_party();
        assert_eq!(
            h.engine.ledger.balance(&h.ctx, vendor, owner_side).unwrap(),
            Money::from_minor(1_500)
        );
        let report = h
            .engine
            .aging
            .get_aging_analysis(&h.ctx, vendor, PartyType::Vendor)
            .unwrap();
        assert_eq!(report.total_due, Money::from_minor(1_500));
        let as_customer = h
            .engine
            .aging
            .get_aging_analysis(&h.ctx, vendor, PartyType::Customer)
            .unwrap();
        assert_eq!(as_customer.invoice_count, 0);
    }

    #[test]
    fn aging_buckets_engine_invoices() {
        let (h, _) = harness();
        let customer = PartyId::new();
        let mut overdue = customer_invoice(customer, 1_000, Some(today() - Days::new(45)));
        overdue.issue_date = today() - Days::new(60);
        h.engine.invoices.issue_invoice(&h.ctx, overdue).unwrap();
        h.engine
            .invoices
            .issue_invoice(&h.ctx, customer_invoice(customer, 250, None))
            .unwrap();

        let report = h
            .engine
            .aging
            .get_aging_analysis(&h.ctx, customer, PartyType::Customer)
            .unwrap();
        assert_eq!(report.second, Money::from_minor(1_000));
        assert_eq!(report.current, Money::from_minor(250));
        assert_eq!(report.total_due, Money::from_minor(1_250));
        assert_eq!(report.invoice_count, 2);
    }

    #[test]
    fn conversion_publishes_events_in_order() {
        let (h, _) = harness();
        let doc = h
            .engine
            .documents
            .create_document(&h.ctx, proforma(PartyId::new()))
            .unwrap();
        h.engine.documents.convert_to_invoice(&h.ctx, *doc.id()).unwrap();
        // Idempotent replay publishes nothing.
        h.engine.documents.convert_to_invoice(&h.ctx, *doc.id()).unwrap();

        let types: Vec<String> = h
            .events
            .drain()
            .iter()
            .map(|e| e.event_type().to_string())
            .collect();
        assert_eq!(
            types,
            vec![
                "documents.document.status_changed",
                "documents.document.converted",
                "invoicing.invoice.issued",
                "ledger.entry.added",
            ]
        );
    }

    #[test]
    fn owners_do_not_see_each_other() {
        let (h, storage) = harness();
        let doc = h
            .engine
            .documents
            .create_document(&h.ctx, booking(PartyId::new()))
            .unwrap();

        let stranger = EngineContext::with_clock(
            OwnerId::new(),
            storage,
            Arc::new(FixedClock::on(today())),
        );
        let err = h
            .engine
            .documents
            .get_document(&stranger, *doc.id())
            .unwrap_err();
        assert!(matches!(err, DomainError::NotFound(_)));
        assert!(h.engine.documents.list_documents(&stranger, None).unwrap().is_empty());
    }
}
