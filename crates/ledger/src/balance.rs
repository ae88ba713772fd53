//! Running-balance derivation and verification.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use partybook_core::{DomainResult, Money, PartyId};

use crate::entry::LedgerEntry;

/// Where a chain's running balance fails to follow from its predecessor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainBreak {
    /// Index (in chronological order) of the first inconsistent entry.
    pub index: usize,
    pub expected: Money,
    pub found: Money,
}

impl core::fmt::Display for ChainBreak {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "running balance broken at entry {} (expected {}, found {})",
            self.index, self.expected, self.found
        )
    }
}

/// What a raw balance means for the party.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "position", content = "amount", rename_all = "snake_case")]
pub enum BalancePosition {
    Settled,
    /// Negative balance: the party owes the counterparty this much.
    PartyOwes(Money),
    /// Positive balance: the counterparty owes the party this much.
    PartyIsOwed(Money),
}

impl BalancePosition {
    pub fn from_balance(balance: Money) -> Self {
        if balance.is_zero() {
            BalancePosition::Settled
        } else if balance.is_negative() {
            BalancePosition::PartyOwes(balance.abs())
        } else {
            BalancePosition::PartyIsOwed(balance)
        }
    }
}

/// Summary row for one counterparty of a party.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterpartyBalance {
    pub counterparty_id: PartyId,
    pub balance: Money,
    pub position: BalancePosition,
    pub entry_count: usize,
    pub last_entry_date: Option<NaiveDate>,
}

impl CounterpartyBalance {
    pub fn from_entries(counterparty_id: PartyId, entries: &[LedgerEntry]) -> Self {
        let balance = BalanceCalculator::current_balance(entries);
        Self {
            counterparty_id,
            balance,
            position: BalancePosition::from_balance(balance),
            entry_count: entries.len(),
            last_entry_date: entries.iter().map(|e| e.entry_date).max(),
        }
    }
}

/// Pure balance functions over an already-loaded entry log.
pub struct BalanceCalculator;

impl BalanceCalculator {
    /// Sort into the authoritative order: entry date, then insertion time, then chain position.
    pub fn sort_chronologically(entries: &mut [LedgerEntry]) {
        entries.sort_by_key(LedgerEntry::chronological_key);
    }

    /// Running balance of the chronologically last entry, or zero for an empty log.
    ///
    /// Does not assume `entries` is sorted; display order does not matter.
    pub fn current_balance(entries: &[LedgerEntry]) -> Money {
        entries
            .iter()
            .max_by_key(|e| e.chronological_key())
            .map(|e| e.running_balance)
            .unwrap_or(Money::ZERO)
    }

    /// Credits minus debits over the whole log.
    pub fn net_sum(entries: &[LedgerEntry]) -> DomainResult<Money> {
        Money::try_sum(entries.iter().map(LedgerEntry::signed_amount))
    }

    /// Check every link `running[n] == running[n-1] + signed[n]` and that chain
    /// positions are contiguous from 1. `entries` must be in chronological order.
    pub fn verify_chain(entries: &[LedgerEntry]) -> Result<(), ChainBreak> {
        let mut previous = Money::ZERO;
        for (index, entry) in entries.iter().enumerate() {
            let expected = previous
                .checked_add(entry.signed_amount())
                .map_err(|_| ChainBreak {
                    index,
                    expected: previous,
                    found: entry.running_balance,
                })?;
            if entry.running_balance != expected || entry.sequence != index as u64 + 1 {
                return Err(ChainBreak {
                    index,
                    expected,
                    found: entry.running_balance,
                });
            }
            previous = entry.running_balance;
        }
        Ok(())
    }
}
