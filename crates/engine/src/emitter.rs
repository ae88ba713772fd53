//! Domain event emission.
//!
//! Events are published only after the write they describe has committed.
//! Publication is best-effort: a failure is logged and never undoes or fails
//! the operation that produced the event.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use partybook_core::OwnerId;
use partybook_documents::{DocumentConverted, DocumentStatusChanged};
use partybook_events::{Event, EventBus, EventEnvelope, Subscription};
use partybook_invoicing::{InvoiceIssued, PaymentRecorded};
use partybook_ledger::EntryAdded;

/// Everything the engine announces to notification/audit collaborators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum DomainEvent {
    EntryAdded(EntryAdded),
    DocumentStatusChanged(DocumentStatusChanged),
    DocumentConverted(DocumentConverted),
    InvoiceIssued(InvoiceIssued),
    PaymentRecorded(PaymentRecorded),
}

impl Event for DomainEvent {
    fn event_type(&self) -> &'static str {
        match self {
            DomainEvent::EntryAdded(e) => e.event_type(),
            DomainEvent::DocumentStatusChanged(e) => e.event_type(),
            DomainEvent::DocumentConverted(e) => e.event_type(),
            DomainEvent::InvoiceIssued(e) => e.event_type(),
            DomainEvent::PaymentRecorded(e) => e.event_type(),
        }
    }

    fn version(&self) -> u32 {
        match self {
            DomainEvent::EntryAdded(e) => e.version(),
            DomainEvent::DocumentStatusChanged(e) => e.version(),
            DomainEvent::DocumentConverted(e) => e.version(),
            DomainEvent::InvoiceIssued(e) => e.version(),
            DomainEvent::PaymentRecorded(e) => e.version(),
        }
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            DomainEvent::EntryAdded(e) => e.occurred_at(),
            DomainEvent::DocumentStatusChanged(e) => e.occurred_at(),
            DomainEvent::DocumentConverted(e) => e.occurred_at(),
            DomainEvent::InvoiceIssued(e) => e.occurred_at(),
            DomainEvent::PaymentRecorded(e) => e.occurred_at(),
        }
    }
}

impl From<EntryAdded> for DomainEvent {
    fn from(value: EntryAdded) -> Self {
        DomainEvent::EntryAdded(value)
    }
}

impl From<DocumentStatusChanged> for DomainEvent {
    fn from(value: DocumentStatusChanged) -> Self {
        DomainEvent::DocumentStatusChanged(value)
    }
}

impl From<DocumentConverted> for DomainEvent {
    fn from(value: DocumentConverted) -> Self {
        DomainEvent::DocumentConverted(value)
    }
}

impl From<InvoiceIssued> for DomainEvent {
    fn from(value: InvoiceIssued) -> Self {
        DomainEvent::InvoiceIssued(value)
    }
}

impl From<PaymentRecorded> for DomainEvent {
    fn from(value: PaymentRecorded) -> Self {
        DomainEvent::PaymentRecorded(value)
    }
}

pub type DomainEventEnvelope = EventEnvelope<DomainEvent>;

/// Wraps a bus and stamps each outgoing event with this emitter's next
/// sequence number (starting at 1).
#[derive(Debug)]
pub struct DomainEventEmitter<B> {
    bus: B,
    sequence: AtomicU64,
}

impl<B> DomainEventEmitter<B>
where
    B: EventBus<DomainEventEnvelope>,
{
    pub fn new(bus: B) -> Self {
        Self {
            bus,
            sequence: AtomicU64::new(0),
        }
    }

    pub fn subscribe(&self) -> Subscription<DomainEventEnvelope> {
        self.bus.subscribe()
    }

    /// Number of events handed to the bus so far.
    pub fn emitted(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }

    pub fn emit(&self, owner_id: OwnerId, event: impl Into<DomainEvent>) {
        let event = event.into();
        let event_type = event.event_type();
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;

        if let Err(err) = self.bus.publish(EventEnvelope::wrap(owner_id, sequence, event)) {
            warn!(%owner_id, event_type, sequence, error = ?err, "failed to publish domain event");
        }
    }
}
