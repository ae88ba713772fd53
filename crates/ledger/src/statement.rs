//! Ledger statement for a date range (ledger screen, PDF export).

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use partybook_core::{DomainError, DomainResult, Money};

use crate::balance::BalanceCalculator;
use crate::entry::{EntryType, LedgerEntry};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Statement {
    pub from: NaiveDate,
    pub to: NaiveDate,
    /// Balance carried in from entries dated before `from`.
    pub opening_balance: Money,
    pub entries: Vec<LedgerEntry>,
    pub total_debits: Money,
    pub total_credits: Money,
    pub closing_balance: Money,
}

impl Statement {
    /// Build a statement from a pair's full log (any order).
    pub fn build(mut entries: Vec<LedgerEntry>, from: NaiveDate, to: NaiveDate) -> DomainResult<Self> {
        if from > to {
            return Err(DomainError::validation("statement range is reversed"));
        }
        BalanceCalculator::sort_chronologically(&mut entries);

        let opening_balance = entries
            .iter()
            .take_while(|e| e.entry_date < from)
            .last()
            .map(|e| e.running_balance)
            .unwrap_or(Money::ZERO);

        let in_range: Vec<LedgerEntry> = entries
            .into_iter()
            .filter(|e| e.entry_date >= from && e.entry_date <= to)
            .collect();

        let total_of = |kind: EntryType| {
            Money::try_sum(
                in_range
                    .iter()
                    .filter(|e| e.entry_type == kind)
                    .map(|e| e.amount),
            )
        };
        let total_debits = total_of(EntryType::Debit)?;
        let total_credits = total_of(EntryType::Credit)?;

        let closing_balance = in_range
            .last()
            .map(|e| e.running_balance)
            .unwrap_or(opening_balance);

        Ok(Self {
            from,
            to,
            opening_balance,
            entries: in_range,
            total_debits,
            total_credits,
            closing_balance,
        })
    }
}
