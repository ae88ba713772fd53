use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use partybook_core::{
    AggregateRoot, DocumentId, DomainError, DomainResult, EntryId, InvoiceId, Money, OwnerId,
    PartyId,
};
use partybook_events::Event;

use crate::item::{LineItem, items_total};
use crate::status::{DispatchStatus, DocumentKind, DocumentStatus, ProformaStatus};

/// Kind-specific fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DocumentDetails {
    BookingOrder {
        expected_delivery: Option<NaiveDate>,
    },
    ProformaInvoice {
        /// Last day the estimate can be accepted or converted.
        valid_until: NaiveDate,
    },
    DispatchNote {
        source_invoice_id: Option<InvoiceId>,
        transport: Option<String>,
        receiver_name: Option<String>,
        delivered_at: Option<DateTime<Utc>>,
    },
    ReturnInward {
        original_invoice_id: Option<InvoiceId>,
        reason: Option<String>,
        /// Credit posted to the customer's ledger when the return was processed.
        credit_entry_id: Option<EntryId>,
        processed_at: Option<DateTime<Utc>>,
    },
}

impl DocumentDetails {
    pub fn kind(&self) -> DocumentKind {
        match self {
            DocumentDetails::BookingOrder { .. } => DocumentKind::BookingOrder,
            DocumentDetails::ProformaInvoice { .. } => DocumentKind::ProformaInvoice,
            DocumentDetails::DispatchNote { .. } => DocumentKind::DispatchNote,
            DocumentDetails::ReturnInward { .. } => DocumentKind::ReturnInward,
        }
    }

    fn has_lifecycle_fields(&self) -> bool {
        match self {
            DocumentDetails::DispatchNote {
                receiver_name,
                delivered_at,
                ..
            } => receiver_name.is_some() || delivered_at.is_some(),
            DocumentDetails::ReturnInward {
                credit_entry_id,
                processed_at,
                ..
            } => credit_entry_id.is_some() || processed_at.is_some(),
            DocumentDetails::BookingOrder { .. } | DocumentDetails::ProformaInvoice { .. } => false,
        }
    }
}

/// User submission for a new document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewDocument {
    pub counterparty_id: PartyId,
    pub counterparty_name: String,
    pub items: Vec<LineItem>,
    pub details: DocumentDetails,
    pub notes: Option<String>,
}

/// Optional inputs some transitions require.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionExtra {
    /// Required for DispatchNote -> delivered.
    pub receiver_name: Option<String>,
}

impl TransitionExtra {
    pub fn receiver(name: impl Into<String>) -> Self {
        Self {
            receiver_name: Some(name.into()),
        }
    }
}

/// A validated status update, applied by storage with compare-and-swap on
/// `expected_status` + `expected_version`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChange {
    pub document_id: DocumentId,
    pub expected_status: DocumentStatus,
    pub expected_version: u64,
    pub new_status: DocumentStatus,
    pub receiver_name: Option<String>,
    pub converted_invoice_id: Option<InvoiceId>,
    pub credit_entry_id: Option<EntryId>,
    pub at: DateTime<Utc>,
}

/// A provisional commercial document.
///
/// Core fields are immutable after creation; only the lifecycle fields
/// (status, delivery/processing details, converted invoice) change, and only
/// through `apply_change`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    id: DocumentId,
    owner_id: OwnerId,
    number: String,
    counterparty_id: PartyId,
    counterparty_name: String,
    items: Vec<LineItem>,
    total_amount: Money,
    status: DocumentStatus,
    details: DocumentDetails,
    notes: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    converted_invoice_id: Option<InvoiceId>,
    version: u64,
}

impl Document {
    pub fn create(
        owner_id: OwnerId,
        id: DocumentId,
        number: impl Into<String>,
        new: NewDocument,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        if new.counterparty_name.trim().is_empty() {
            return Err(DomainError::validation("counterparty name is required"));
        }
        if new.items.is_empty() {
            return Err(DomainError::validation("document must have at least one item"));
        }
        let total_amount = items_total(&new.items)?;

        if new.details.has_lifecycle_fields() {
            return Err(DomainError::validation(
                "delivery and processing fields are set by the lifecycle, not on creation",
            ));
        }
        if let DocumentDetails::ReturnInward { .. } = &new.details {
            if let Some(line) = new.items.iter().find(|line| line.item_id.is_none()) {
                return Err(DomainError::validation(format!(
                    "returned line '{}' must name the stock item it restocks",
                    line.name
                )));
            }
        }
        if let DocumentDetails::ProformaInvoice { valid_until } = &new.details {
            if *valid_until < now.date_naive() {
                return Err(DomainError::validation("proforma valid_until is in the past"));
            }
        }

        let kind = new.details.kind();
        Ok(Self {
            id,
            owner_id,
            number: number.into(),
            counterparty_id: new.counterparty_id,
            counterparty_name: new.counterparty_name,
            items: new.items,
            total_amount,
            status: kind.initial_status(),
            details: new.details,
            notes: new.notes,
            created_at: now,
            updated_at: now,
            converted_invoice_id: None,
            version: 1,
        })
    }

    pub fn owner_id(&self) -> OwnerId {
        self.owner_id
    }

    pub fn kind(&self) -> DocumentKind {
        self.details.kind()
    }

    pub fn number(&self) -> &str {
        &self.number
    }

    pub fn counterparty_id(&self) -> PartyId {
        self.counterparty_id
    }

    pub fn counterparty_name(&self) -> &str {
        &self.counterparty_name
    }

    pub fn items(&self) -> &[LineItem] {
        &self.items
    }

    pub fn total_amount(&self) -> Money {
        self.total_amount
    }

    /// Stored status, without time-based derivation.
    pub fn status(&self) -> DocumentStatus {
        self.status
    }

    pub fn details(&self) -> &DocumentDetails {
        &self.details
    }

    pub fn notes(&self) -> Option<&str> {
        self.notes.as_deref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn converted_invoice_id(&self) -> Option<InvoiceId> {
        self.converted_invoice_id
    }

    /// Status as of `today`: a live proforma past its `valid_until` reads as expired.
    pub fn effective_status(&self, today: NaiveDate) -> DocumentStatus {
        match (&self.details, self.status) {
            (DocumentDetails::ProformaInvoice { valid_until }, DocumentStatus::Proforma(s))
                if !s.is_terminal() && today > *valid_until =>
            {
                DocumentStatus::Proforma(ProformaStatus::Expired)
            }
            _ => self.status,
        }
    }

    /// The same document with its time-derived status materialized (not persisted).
    pub fn as_of(mut self, today: NaiveDate) -> Self {
        self.status = self.effective_status(today);
        self
    }

    fn change_to(&self, new_status: DocumentStatus, at: DateTime<Utc>) -> StatusChange {
        StatusChange {
            document_id: self.id,
            expected_status: self.status,
            expected_version: self.version,
            new_status,
            receiver_name: None,
            converted_invoice_id: None,
            credit_entry_id: None,
            at,
        }
    }

    /// Validate a user-requested transition against the kind's table.
    pub fn plan_transition(
        &self,
        requested: DocumentStatus,
        extra: &TransitionExtra,
        now: DateTime<Utc>,
    ) -> DomainResult<StatusChange> {
        let current = self.effective_status(now.date_naive());

        if !current.can_transition_to(requested) {
            return Err(DomainError::illegal_transition(format!(
                "{} {} cannot move from {} to {}",
                self.kind(),
                self.number,
                current,
                requested
            )));
        }
        if requested.is_protocol_only() {
            return Err(DomainError::illegal_transition(format!(
                "{} {} reaches {} only through its dedicated operation",
                self.kind(),
                self.number,
                requested
            )));
        }

        let mut change = self.change_to(requested, now);
        if requested == DocumentStatus::Dispatch(DispatchStatus::Delivered) {
            let receiver = extra
                .receiver_name
                .as_deref()
                .map(str::trim)
                .filter(|r| !r.is_empty())
                .ok_or_else(|| DomainError::validation("delivery requires a receiver name"))?;
            change.receiver_name = Some(receiver.to_string());
        }
        Ok(change)
    }

    /// Validate the conversion of a booking/proforma into `invoice_id`.
    pub fn plan_conversion(
        &self,
        invoice_id: InvoiceId,
        now: DateTime<Utc>,
    ) -> DomainResult<StatusChange> {
        if let Some(existing) = self.converted_invoice_id {
            return Err(DomainError::already_processed(format!(
                "cannot convert: already converted to invoice {existing}"
            )));
        }
        let target = DocumentStatus::converted(self.kind()).ok_or_else(|| {
            DomainError::illegal_transition(format!("a {} does not convert to an invoice", self.kind()))
        })?;

        let current = self.effective_status(now.date_naive());
        if !current.can_transition_to(target) {
            return Err(DomainError::illegal_transition(format!(
                "cannot convert {} {} while {}",
                self.kind(),
                self.number,
                current
            )));
        }

        let mut change = self.change_to(target, now);
        change.converted_invoice_id = Some(invoice_id);
        Ok(change)
    }

    /// Validate processing of an inward return that posts `credit_entry_id`.
    pub fn plan_processing(
        &self,
        credit_entry_id: EntryId,
        now: DateTime<Utc>,
    ) -> DomainResult<StatusChange> {
        let DocumentDetails::ReturnInward { .. } = &self.details else {
            return Err(DomainError::illegal_transition(format!(
                "a {} is not processed as a return",
                self.kind()
            )));
        };
        let target = DocumentStatus::Return(crate::status::ReturnStatus::Processed);
        if !self.status.can_transition_to(target) {
            return Err(DomainError::already_processed(format!(
                "return {} is already {}",
                self.number, self.status
            )));
        }

        let mut change = self.change_to(target, now);
        change.credit_entry_id = Some(credit_entry_id);
        Ok(change)
    }

    /// Apply a planned change if the document is still where the plan found it.
    pub fn apply_change(&mut self, change: &StatusChange) -> DomainResult<()> {
        if change.document_id != self.id {
            return Err(DomainError::invariant("status change targets another document"));
        }
        if self.status != change.expected_status || self.version != change.expected_version {
            return Err(DomainError::stale(format!(
                "document {} is {} at version {}, expected {} at version {}",
                self.number, self.status, self.version, change.expected_status, change.expected_version
            )));
        }
        if change.new_status.is_converted() {
            if self.converted_invoice_id.is_some() {
                return Err(DomainError::already_processed(
                    "cannot convert: already converted",
                ));
            }
            if change.converted_invoice_id.is_none() {
                return Err(DomainError::invariant(
                    "converted status requires the converted invoice id",
                ));
            }
        }

        match &mut self.details {
            DocumentDetails::DispatchNote {
                receiver_name,
                delivered_at,
                ..
            } if change.receiver_name.is_some() => {
                *receiver_name = change.receiver_name.clone();
                *delivered_at = Some(change.at);
            }
            DocumentDetails::ReturnInward {
                credit_entry_id,
                processed_at,
                ..
            } if change.credit_entry_id.is_some() => {
                *credit_entry_id = change.credit_entry_id;
                *processed_at = Some(change.at);
            }
            _ => {}
        }

        self.status = change.new_status;
        if change.converted_invoice_id.is_some() {
            self.converted_invoice_id = change.converted_invoice_id;
        }
        self.updated_at = change.at;
        self.version += 1;
        Ok(())
    }
}

impl AggregateRoot for Document {
    type Id = DocumentId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Event: DocumentStatusChanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentStatusChanged {
    pub owner_id: OwnerId,
    pub document_id: DocumentId,
    pub number: String,
    pub from: DocumentStatus,
    pub to: DocumentStatus,
    pub occurred_at: DateTime<Utc>,
}

impl Event for DocumentStatusChanged {
    fn event_type(&self) -> &'static str {
        "documents.document.status_changed"
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }
}

/// Event: DocumentConverted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentConverted {
    pub owner_id: OwnerId,
    pub document_id: DocumentId,
    pub kind: DocumentKind,
    pub invoice_id: InvoiceId,
    pub total_amount: Money,
    pub occurred_at: DateTime<Utc>,
}

impl Event for DocumentConverted {
    fn event_type(&self) -> &'static str {
        "documents.document.converted"
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }
}
