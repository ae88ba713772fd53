use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use partybook_core::{DomainError, DomainResult, EntryId, Money, OwnerId, PartyId};
use partybook_events::Event;

/// Which side of the relationship the ledger's party sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartyType {
    Customer,
    Vendor,
}

/// Posting direction.
///
/// Balances are kept from the party's account perspective: a credit adds to
/// what the counterparty owes the party, a debit subtracts from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryType {
    Debit,
    Credit,
}

impl EntryType {
    /// Apply the sign convention to a positive amount.
    pub fn signed(self, amount: Money) -> Money {
        match self {
            EntryType::Credit => amount,
            EntryType::Debit => Money::from_minor(-amount.minor()),
        }
    }
}

/// What business event produced the posting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReferenceType {
    Payment,
    Invoice,
    CreditNote,
    OpeningBalance,
    Adjustment,
}

impl core::fmt::Display for ReferenceType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = match self {
            ReferenceType::Payment => "PAYMENT",
            ReferenceType::Invoice => "INVOICE",
            ReferenceType::CreditNote => "CREDIT_NOTE",
            ReferenceType::OpeningBalance => "OPENING_BALANCE",
            ReferenceType::Adjustment => "ADJUSTMENT",
        };
        f.write_str(s)
    }
}

/// Identity of one running-balance chain.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PairKey {
    pub owner_id: OwnerId,
    pub party_id: PartyId,
    pub counterparty_id: PartyId,
}

impl PairKey {
    pub fn new(owner_id: OwnerId, party_id: PartyId, counterparty_id: PartyId) -> Self {
        Self {
            owner_id,
            party_id,
            counterparty_id,
        }
    }
}

/// One immutable posting in a party-pair ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: EntryId,
    pub owner_id: OwnerId,
    pub party_id: PartyId,
    pub party_type: PartyType,
    pub counterparty_id: PartyId,
    pub entry_type: EntryType,
    /// Strictly positive, in minor units.
    pub amount: Money,
    pub reference_type: ReferenceType,
    /// Idempotency key of the business action that produced this entry.
    pub reference_id: String,
    /// Human-facing number (invoice no., receipt no.).
    pub reference_number: String,
    pub entry_date: NaiveDate,
    pub created_at: DateTime<Utc>,
    /// 1-based position in the pair's chain; doubles as the chain's version.
    pub sequence: u64,
    /// Balance after this entry, snapshotted at insertion.
    pub running_balance: Money,
    pub notes: Option<String>,
}

impl LedgerEntry {
    pub fn signed_amount(&self) -> Money {
        self.entry_type.signed(self.amount)
    }

    pub fn pair_key(&self) -> PairKey {
        PairKey::new(self.owner_id, self.party_id, self.counterparty_id)
    }

    /// Total order used for every balance computation.
    ///
    /// Same-day entries fall back to insertion time, then to chain position.
    pub fn chronological_key(&self) -> (NaiveDate, DateTime<Utc>, u64) {
        (self.entry_date, self.created_at, self.sequence)
    }
}

/// Request to append an entry to a pair's ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewLedgerEntry {
    pub party_id: PartyId,
    pub party_type: PartyType,
    pub counterparty_id: PartyId,
    pub entry_type: EntryType,
    pub amount: Money,
    pub reference_type: ReferenceType,
    pub reference_id: String,
    pub reference_number: String,
    pub entry_date: NaiveDate,
    pub notes: Option<String>,
}

impl NewLedgerEntry {
    pub fn validate(&self) -> DomainResult<()> {
        if !self.amount.is_positive() {
            return Err(DomainError::validation("amount must be positive"));
        }
        if self.reference_id.trim().is_empty() {
            return Err(DomainError::validation("reference_id is required"));
        }
        if self.party_id == self.counterparty_id {
            return Err(DomainError::validation(
                "party and counterparty must be different",
            ));
        }
        Ok(())
    }

    /// Build the persisted form of this entry on top of `previous`, the pair's
    /// chronologically last entry (if any).
    pub fn post(
        self,
        owner_id: OwnerId,
        id: EntryId,
        previous: Option<&LedgerEntry>,
        now: DateTime<Utc>,
    ) -> DomainResult<LedgerEntry> {
        self.validate()?;

        let key = PairKey::new(owner_id, self.party_id, self.counterparty_id);
        let (last_balance, last_sequence, created_at) = match previous {
            None => (Money::ZERO, 0, now),
            Some(prev) => {
                if prev.pair_key() != key {
                    return Err(DomainError::invariant(
                        "previous entry belongs to a different ledger pair",
                    ));
                }
                if prev.party_type != self.party_type {
                    return Err(DomainError::validation(format!(
                        "party is recorded as {:?}, not {:?}",
                        prev.party_type, self.party_type
                    )));
                }
                if self.entry_date < prev.entry_date {
                    return Err(DomainError::validation(format!(
                        "entry date {} precedes the last posting on {}; post a correction dated on or after it",
                        self.entry_date, prev.entry_date
                    )));
                }
                (prev.running_balance, prev.sequence, now.max(prev.created_at))
            }
        };

        let running_balance = last_balance.checked_add(self.entry_type.signed(self.amount))?;

        Ok(LedgerEntry {
            id,
            owner_id,
            party_id: self.party_id,
            party_type: self.party_type,
            counterparty_id: self.counterparty_id,
            entry_type: self.entry_type,
            amount: self.amount,
            reference_type: self.reference_type,
            reference_id: self.reference_id,
            reference_number: self.reference_number,
            entry_date: self.entry_date,
            created_at,
            sequence: last_sequence + 1,
            running_balance,
            notes: self.notes,
        })
    }
}

/// Event: EntryAdded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryAdded {
    pub entry: LedgerEntry,
}

impl Event for EntryAdded {
    fn event_type(&self) -> &'static str {
        "ledger.entry.added"
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        self.entry.created_at
    }
}
