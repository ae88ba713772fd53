use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use partybook_core::{
    AggregateRoot, DocumentId, DomainError, DomainResult, InvoiceId, Money, OwnerId, PartyId,
};
use partybook_documents::{Document, DocumentKind, LineItem, items_total};
use partybook_events::Event;
use partybook_ledger::PartyType;

/// Payment state, derived from `paid_amount` against `grand_total`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvoiceStatus {
    Unpaid,
    Partial,
    Paid,
}

impl InvoiceStatus {
    fn derive(grand_total: Money, paid: Money) -> Self {
        if paid.is_zero() {
            InvoiceStatus::Unpaid
        } else if paid < grand_total {
            InvoiceStatus::Partial
        } else {
            InvoiceStatus::Paid
        }
    }
}

/// The provisional document an invoice was converted from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceSource {
    pub kind: DocumentKind,
    pub document_id: DocumentId,
}

/// Request to issue an invoice directly (not through conversion).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewInvoice {
    /// Billed customer, or the vendor whose bill is being recorded.
    pub party_id: PartyId,
    pub party_type: PartyType,
    pub party_name: String,
    pub items: Vec<LineItem>,
    pub issue_date: NaiveDate,
    pub due_date: Option<NaiveDate>,
    pub notes: Option<String>,
}

/// A final invoice.
///
/// `party_type` tells the direction: a customer invoice is a sale billed by the
/// owner, a vendor invoice is a purchase bill the owner has to pay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invoice {
    id: InvoiceId,
    owner_id: OwnerId,
    party_id: PartyId,
    party_type: PartyType,
    party_name: String,
    invoice_number: String,
    items: Vec<LineItem>,
    grand_total: Money,
    paid_amount: Money,
    status: InvoiceStatus,
    issue_date: NaiveDate,
    due_date: Option<NaiveDate>,
    source: Option<InvoiceSource>,
    notes: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    version: u64,
}

impl Invoice {
    pub fn issue(
        owner_id: OwnerId,
        id: InvoiceId,
        invoice_number: impl Into<String>,
        new: NewInvoice,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        if new.items.is_empty() {
            return Err(DomainError::validation("cannot issue invoice without lines"));
        }
        if new.party_name.trim().is_empty() {
            return Err(DomainError::validation("party name is required"));
        }
        if let Some(due) = new.due_date {
            if due < new.issue_date {
                return Err(DomainError::validation("due date precedes issue date"));
            }
        }
        let grand_total = items_total(&new.items)?;

        Ok(Self {
            id,
            owner_id,
            party_id: new.party_id,
            party_type: new.party_type,
            party_name: new.party_name,
            invoice_number: invoice_number.into(),
            items: new.items,
            grand_total,
            paid_amount: Money::ZERO,
            status: InvoiceStatus::Unpaid,
            issue_date: new.issue_date,
            due_date: new.due_date,
            source: None,
            notes: new.notes,
            created_at: now,
            updated_at: now,
            version: 1,
        })
    }

    /// Build the invoice a booking order or proforma converts into.
    pub fn from_document(
        document: &Document,
        id: InvoiceId,
        invoice_number: impl Into<String>,
        due_date: Option<NaiveDate>,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        if !document.kind().converts_to_invoice() {
            return Err(DomainError::illegal_transition(format!(
                "a {} does not convert to an invoice",
                document.kind()
            )));
        }
        let mut invoice = Self::issue(
            document.owner_id(),
            id,
            invoice_number,
            NewInvoice {
                party_id: document.counterparty_id(),
                party_type: PartyType::Customer,
                party_name: document.counterparty_name().to_string(),
                items: document.items().to_vec(),
                issue_date: now.date_naive(),
                due_date,
                notes: document.notes().map(str::to_string),
            },
            now,
        )?;
        if invoice.grand_total != document.total_amount() {
            return Err(DomainError::invariant(format!(
                "document {} total {} does not match its items ({})",
                document.number(),
                document.total_amount(),
                invoice.grand_total
            )));
        }
        invoice.source = Some(InvoiceSource {
            kind: document.kind(),
            document_id: *document.id(),
        });
        Ok(invoice)
    }

    pub fn owner_id(&self) -> OwnerId {
        self.owner_id
    }

    pub fn party_id(&self) -> PartyId {
        self.party_id
    }

    pub fn party_type(&self) -> PartyType {
        self.party_type
    }

    pub fn party_name(&self) -> &str {
        &self.party_name
    }

    pub fn invoice_number(&self) -> &str {
        &self.invoice_number
    }

    pub fn items(&self) -> &[LineItem] {
        &self.items
    }

    pub fn grand_total(&self) -> Money {
        self.grand_total
    }

    pub fn paid_amount(&self) -> Money {
        self.paid_amount
    }

    pub fn status(&self) -> InvoiceStatus {
        self.status
    }

    pub fn issue_date(&self) -> NaiveDate {
        self.issue_date
    }

    pub fn due_date(&self) -> Option<NaiveDate> {
        self.due_date
    }

    pub fn source(&self) -> Option<InvoiceSource> {
        self.source
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

    /// `grand_total - paid_amount`, never negative.
    pub fn outstanding(&self) -> Money {
        self.grand_total.saturating_sub_floor(self.paid_amount)
    }

    pub fn is_settled(&self) -> bool {
        self.outstanding().is_zero()
    }

    /// Apply a payment against this invoice.
    pub fn register_payment(&mut self, amount: Money, at: DateTime<Utc>) -> DomainResult<()> {
        if !amount.is_positive() {
            return Err(DomainError::validation("payment amount must be positive"));
        }
        if self.is_settled() {
            return Err(DomainError::validation(format!(
                "invoice {} is already fully paid",
                self.invoice_number
            )));
        }
        let new_paid = self.paid_amount.checked_add(amount)?;
        if new_paid > self.grand_total {
            return Err(DomainError::validation(format!(
                "cannot overpay invoice {}: outstanding {}, payment {}",
                self.invoice_number,
                self.outstanding(),
                amount
            )));
        }

        self.paid_amount = new_paid;
        self.status = InvoiceStatus::derive(self.grand_total, new_paid);
        self.updated_at = at;
        self.version += 1;
        Ok(())
    }
}

impl AggregateRoot for Invoice {
    type Id = InvoiceId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Event: InvoiceIssued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceIssued {
    pub owner_id: OwnerId,
    pub invoice_id: InvoiceId,
    pub party_id: PartyId,
    pub party_type: PartyType,
    pub invoice_number: String,
    pub grand_total: Money,
    pub source: Option<InvoiceSource>,
    pub occurred_at: DateTime<Utc>,
}

impl Event for InvoiceIssued {
    fn event_type(&self) -> &'static str {
        "invoicing.invoice.issued"
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }
}

/// Event: PaymentRecorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRecorded {
    pub owner_id: OwnerId,
    pub invoice_id: InvoiceId,
    pub payment_reference: String,
    pub amount: Money,
    pub new_paid_amount: Money,
    pub status: InvoiceStatus,
    pub occurred_at: DateTime<Utc>,
}

impl Event for PaymentRecorded {
    fn event_type(&self) -> &'static str {
        "invoicing.invoice.payment_recorded"
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }
}
