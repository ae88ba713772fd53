//! Invoice issuing and payment recording.
//!
//! Each write lands the invoice change and its ledger posting in one atomic
//! batch, so an invoice's paid amount and its party's ledger never disagree.

use std::sync::Arc;

use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use partybook_core::{AggregateRoot, DomainError, DomainResult, InvoiceId, Money, PartyId};
use partybook_events::EventBus;
use partybook_invoicing::{Invoice, InvoiceIssued, NewInvoice, PaymentRecorded};
use partybook_ledger::{EntryAdded, EntryType, LedgerEntry, NewLedgerEntry, PartyType, ReferenceType};

use crate::config::InvoicingSettings;
use crate::context::EngineContext;
use crate::emitter::{DomainEventEmitter, DomainEventEnvelope};
use crate::ledger_store::{Posting, prepare_new_posting, prepare_posting};
use crate::storage::{AtomicOp, Storage};

/// A payment against one invoice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRequest {
    /// Caller-chosen payment reference (receipt or cheque number); replaying
    /// the same reference is a no-op.
    pub reference: String,
    pub amount: Money,
    /// Defaults to today.
    pub date: Option<NaiveDate>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentReceipt {
    pub invoice: Invoice,
    pub entry: LedgerEntry,
}

/// Direction of an invoice posting on the party's ledger.
///
/// A customer invoice is money owed to the owner (debit); a vendor bill is
/// money the owner owes (credit). Payments post the opposite side.
fn invoice_side(party_type: PartyType) -> EntryType {
    match party_type {
        PartyType::Customer => EntryType::Debit,
        PartyType::Vendor => EntryType::Credit,
    }
}

fn payment_side(party_type: PartyType) -> EntryType {
    match invoice_side(party_type) {
        EntryType::Debit => EntryType::Credit,
        EntryType::Credit => EntryType::Debit,
    }
}

pub struct InvoiceService<B> {
    emitter: Arc<DomainEventEmitter<B>>,
    settings: InvoicingSettings,
}

impl<B> InvoiceService<B>
where
    B: EventBus<DomainEventEnvelope>,
{
    pub fn new(emitter: Arc<DomainEventEmitter<B>>, settings: InvoicingSettings) -> Self {
        Self { emitter, settings }
    }

    fn load<S: Storage>(ctx: &EngineContext<S>, invoice_id: InvoiceId) -> DomainResult<Invoice> {
        ctx.storage()
            .get_invoice(ctx.owner_id(), invoice_id)?
            .ok_or_else(|| DomainError::not_found(format!("invoice {invoice_id}")))
    }

    /// Issue an invoice directly and post it to the party's ledger, dated on
    /// its issue date.
    ///
    /// Without an explicit due date the invoice falls due
    /// `default_due_days` after its issue date.
    #[instrument(
        skip_all,
        fields(owner_id = %ctx.owner_id(), party_id = %new.party_id, party_type = ?new.party_type)
    )]
    pub fn issue_invoice<S: Storage>(
        &self,
        ctx: &EngineContext<S>,
        mut new: NewInvoice,
    ) -> DomainResult<Invoice> {
        if new.due_date.is_none() {
            new.due_date = new
                .issue_date
                .checked_add_days(Days::new(u64::from(self.settings.default_due_days)));
        }
        let now = ctx.clock().now();
        let invoice_id = InvoiceId::new();
        let number = ctx.next_number(&self.settings.number_prefix)?;
        let invoice = Invoice::issue(ctx.owner_id(), invoice_id, number, new, now)?;

        let entry = prepare_new_posting(
            ctx,
            NewLedgerEntry {
                party_id: invoice.party_id(),
                party_type: invoice.party_type(),
                counterparty_id: ctx.owner_id().as_party(),
                entry_type: invoice_side(invoice.party_type()),
                amount: invoice.grand_total(),
                reference_type: ReferenceType::Invoice,
                reference_id: invoice_id.to_string(),
                reference_number: invoice.invoice_number().to_string(),
                entry_date: invoice.issue_date(),
                notes: invoice.notes().map(str::to_string),
            },
        )?;

        if let Err(err) = ctx.storage().run_atomically(vec![
            AtomicOp::InsertInvoice(invoice.clone()),
            AtomicOp::insert_entry(entry.clone()),
        ]) {
            warn!(error = %err, "invoice issue rolled back");
            return Err(err.into());
        }

        info!(
            invoice_id = %invoice_id,
            invoice_number = invoice.invoice_number(),
            amount = %invoice.grand_total(),
            "invoice issued"
        );
        let owner_id = ctx.owner_id();
        self.emitter.emit(
            owner_id,
            InvoiceIssued {
                owner_id,
                invoice_id,
                party_id: invoice.party_id(),
                party_type: invoice.party_type(),
                invoice_number: invoice.invoice_number().to_string(),
                grand_total: invoice.grand_total(),
                source: None,
                occurred_at: now,
            },
        );
        self.emitter.emit(owner_id, EntryAdded { entry });
        Ok(invoice)
    }

    /// Record a payment against an invoice and post it to the party's ledger.
    ///
    /// Replaying a payment reference already posted for this invoice returns
    /// the stored entry with the invoice as it stands now. A reference already
    /// posted against a different invoice of the same party is rejected.
    #[instrument(
        skip_all,
        fields(owner_id = %ctx.owner_id(), invoice_id = %invoice_id, reference = %payment.reference)
    )]
    pub fn record_payment<S: Storage>(
        &self,
        ctx: &EngineContext<S>,
        invoice_id: InvoiceId,
        payment: PaymentRequest,
    ) -> DomainResult<PaymentReceipt> {
        let mut invoice = Self::load(ctx, invoice_id)?;
        let now = ctx.clock().now();

        let request = NewLedgerEntry {
            party_id: invoice.party_id(),
            party_type: invoice.party_type(),
            counterparty_id: ctx.owner_id().as_party(),
            entry_type: payment_side(invoice.party_type()),
            amount: payment.amount,
            reference_type: ReferenceType::Payment,
            reference_id: payment.reference.clone(),
            reference_number: invoice.invoice_number().to_string(),
            entry_date: payment.date.unwrap_or_else(|| now.date_naive()),
            notes: payment.notes.clone(),
        };
        let entry = match prepare_posting(ctx, request)? {
            Posting::Existing(entry) if entry.reference_number == invoice.invoice_number() => {
                debug!(entry_id = %entry.id, "payment already recorded");
                return Ok(PaymentReceipt { invoice, entry });
            }
            Posting::Existing(entry) => {
                warn!(
                    entry_id = %entry.id,
                    recorded_against = %entry.reference_number,
                    "payment reference already used for another invoice"
                );
                return Err(DomainError::already_processed(format!(
                    "payment {} is already recorded against {}",
                    payment.reference, entry.reference_number
                )));
            }
            Posting::New(entry) => entry,
        };

        let loaded_version = invoice.version();
        if let Err(err) = invoice.register_payment(payment.amount, now) {
            warn!(error = %err, "payment rejected");
            return Err(err);
        }

        if let Err(err) = ctx.storage().run_atomically(vec![
            AtomicOp::update_invoice(invoice.clone(), loaded_version),
            AtomicOp::insert_entry(entry.clone()),
        ]) {
            warn!(error = %err, "payment rolled back");
            return Err(err.into());
        }

        info!(
            entry_id = %entry.id,
            amount = %payment.amount,
            paid = %invoice.paid_amount(),
            status = ?invoice.status(),
            "payment recorded"
        );
        let owner_id = ctx.owner_id();
        self.emitter.emit(
            owner_id,
            PaymentRecorded {
                owner_id,
                invoice_id,
                payment_reference: payment.reference,
                amount: payment.amount,
                new_paid_amount: invoice.paid_amount(),
                status: invoice.status(),
                occurred_at: now,
            },
        );
        self.emitter.emit(
            owner_id,
            EntryAdded {
                entry: entry.clone(),
            },
        );
        Ok(PaymentReceipt { invoice, entry })
    }

    pub fn get_invoice<S: Storage>(
        &self,
        ctx: &EngineContext<S>,
        invoice_id: InvoiceId,
    ) -> DomainResult<Invoice> {
        Self::load(ctx, invoice_id)
    }

    pub fn invoices_for_party<S: Storage>(
        &self,
        ctx: &EngineContext<S>,
        party_id: PartyId,
    ) -> DomainResult<Vec<Invoice>> {
        Ok(ctx.storage().invoices_for_party(ctx.owner_id(), party_id)?)
    }
}
