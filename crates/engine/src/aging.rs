//! Receivable/payable aging.
//!
//! A pure read-side computation over a party's unsettled invoices; it never
//! mutates ledger, document or invoice state.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use partybook_core::{DomainResult, Money, PartyId};
use partybook_invoicing::Invoice;
use partybook_ledger::PartyType;

use crate::config::{AgingSettings, ConfigError};
use crate::context::EngineContext;
use crate::storage::Storage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgingBucket {
    /// Not yet due, no due date, or overdue by at most the first boundary.
    Current,
    Second,
    Third,
    /// Overdue by more than the third boundary.
    Beyond,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgingReport {
    pub party_id: PartyId,
    pub party_type: PartyType,
    pub as_of: NaiveDate,
    /// Inclusive upper bounds (days overdue) of current, second and third.
    pub boundaries: [u32; 3],
    pub current: Money,
    pub second: Money,
    pub third: Money,
    pub beyond: Money,
    pub total_due: Money,
    pub invoice_count: usize,
}

impl AgingReport {
    fn empty(party_id: PartyId, party_type: PartyType, as_of: NaiveDate, boundaries: [u32; 3]) -> Self {
        Self {
            party_id,
            party_type,
            as_of,
            boundaries,
            current: Money::ZERO,
            second: Money::ZERO,
            third: Money::ZERO,
            beyond: Money::ZERO,
            total_due: Money::ZERO,
            invoice_count: 0,
        }
    }

    pub fn bucket(&self, bucket: AgingBucket) -> Money {
        match bucket {
            AgingBucket::Current => self.current,
            AgingBucket::Second => self.second,
            AgingBucket::Third => self.third,
            AgingBucket::Beyond => self.beyond,
        }
    }

    fn bucket_mut(&mut self, bucket: AgingBucket) -> &mut Money {
        match bucket {
            AgingBucket::Current => &mut self.current,
            AgingBucket::Second => &mut self.second,
            AgingBucket::Third => &mut self.third,
            AgingBucket::Beyond => &mut self.beyond,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AgingAnalyzer {
    settings: AgingSettings,
}

impl AgingAnalyzer {
    pub fn new(settings: AgingSettings) -> Result<Self, ConfigError> {
        settings.validate()?;
        Ok(Self { settings })
    }

    pub fn classify(&self, due_date: Option<NaiveDate>, today: NaiveDate) -> AgingBucket {
        let Some(due) = due_date else {
            return AgingBucket::Current;
        };
        let age_days = (today - due).num_days().max(0);
        if age_days <= i64::from(self.settings.first) {
            AgingBucket::Current
        } else if age_days <= i64::from(self.settings.second) {
            AgingBucket::Second
        } else if age_days <= i64::from(self.settings.third) {
            AgingBucket::Third
        } else {
            AgingBucket::Beyond
        }
    }

    /// Bucket the unsettled invoices of `party_id`/`party_type` found in `invoices`.
    pub fn report(
        &self,
        party_id: PartyId,
        party_type: PartyType,
        invoices: &[Invoice],
        today: NaiveDate,
    ) -> DomainResult<AgingReport> {
        let s = self.settings;
        let mut report = AgingReport::empty(party_id, party_type, today, [s.first, s.second, s.third]);

        let open = invoices.iter().filter(|inv| {
            inv.party_id() == party_id && inv.party_type() == party_type && !inv.is_settled()
        });
        for invoice in open {
            let outstanding = invoice.outstanding();
            let slot = report.bucket_mut(self.classify(invoice.due_date(), today));
            *slot = slot.checked_add(outstanding)?;
            report.total_due = report.total_due.checked_add(outstanding)?;
            report.invoice_count += 1;
        }
        Ok(report)
    }

    #[instrument(skip_all, fields(owner_id = %ctx.owner_id(), party_id = %party_id))]
    pub fn get_aging_analysis<S: Storage>(
        &self,
        ctx: &EngineContext<S>,
        party_id: PartyId,
        party_type: PartyType,
    ) -> DomainResult<AgingReport> {
        let invoices = ctx.storage().invoices_for_party(ctx.owner_id(), party_id)?;
        let report = self.report(party_id, party_type, &invoices, ctx.clock().today())?;
        debug!(
            invoice_count = report.invoice_count,
            total_due = %report.total_due,
            "aging analysis computed"
        );
        Ok(report)
    }
}
