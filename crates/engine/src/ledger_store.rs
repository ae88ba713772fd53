//! Append-only party-pair ledger.
//!
//! Every write reads the pair's last entry, computes the new running balance
//! on top of it, and commits with a compare-and-swap on the pair's sequence.
//! A writer that lost the race gets `ConflictingState{StaleWrite}` and may
//! simply call again; the engine itself never retries.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::NaiveDate;
use tracing::{debug, info, instrument, warn};

use partybook_core::{DomainError, DomainResult, EntryId, Money, PartyId};
use partybook_events::EventBus;
use partybook_ledger::{
    BalanceCalculator, CounterpartyBalance, EntryAdded, LedgerEntry, NewLedgerEntry, PairKey,
    Statement,
};

use crate::context::EngineContext;
use crate::emitter::{DomainEventEmitter, DomainEventEnvelope};
use crate::storage::{AtomicOp, ReferenceKey, Storage};

/// Outcome of preparing a posting against current storage state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Posting {
    /// The reference was already posted; nothing to write.
    Existing(LedgerEntry),
    /// A new entry chained onto the pair's current head.
    New(LedgerEntry),
}

/// Validate a request and chain it onto the pair's last entry, or find the
/// entry an earlier call with the same reference already posted.
pub(crate) fn prepare_posting<S: Storage>(
    ctx: &EngineContext<S>,
    request: NewLedgerEntry,
) -> DomainResult<Posting> {
    request.validate()?;
    let owner_id = ctx.owner_id();

    let key = ReferenceKey {
        owner_id,
        party_id: request.party_id,
        reference_type: request.reference_type,
        reference_id: request.reference_id.clone(),
    };
    if let Some(existing) = ctx.storage().find_entry_by_reference(&key)? {
        if existing.counterparty_id != request.counterparty_id
            || existing.entry_type != request.entry_type
            || existing.amount != request.amount
        {
            return Err(DomainError::already_processed(format!(
                "{} {} was already posted with different details",
                request.reference_type, request.reference_id
            )));
        }
        return Ok(Posting::Existing(existing));
    }

    let pair = PairKey::new(owner_id, request.party_id, request.counterparty_id);
    let previous = ctx.storage().last_entry(pair)?;
    let entry = request.post(owner_id, EntryId::new(), previous.as_ref(), ctx.clock().now())?;
    Ok(Posting::New(entry))
}

/// Prepare a posting that must be new (its reference was minted by the caller).
pub(crate) fn prepare_new_posting<S: Storage>(
    ctx: &EngineContext<S>,
    request: NewLedgerEntry,
) -> DomainResult<LedgerEntry> {
    match prepare_posting(ctx, request)? {
        Posting::New(entry) => Ok(entry),
        Posting::Existing(entry) => Err(DomainError::invariant(format!(
            "{} {} is already posted as entry {}",
            entry.reference_type, entry.reference_id, entry.id
        ))),
    }
}

pub struct LedgerEntryStore<B> {
    emitter: Arc<DomainEventEmitter<B>>,
}

impl<B> LedgerEntryStore<B>
where
    B: EventBus<DomainEventEnvelope>,
{
    pub fn new(emitter: Arc<DomainEventEmitter<B>>) -> Self {
        Self { emitter }
    }

    /// Append an entry to the `(party, counterparty)` ledger.
    ///
    /// Replaying a request whose `(party, reference_type, reference_id)` is
    /// already posted returns the stored entry and emits nothing.
    #[instrument(
        skip_all,
        fields(
            owner_id = %ctx.owner_id(),
            party_id = %request.party_id,
            counterparty_id = %request.counterparty_id,
            amount = %request.amount,
        )
    )]
    pub fn add_entry<S: Storage>(
        &self,
        ctx: &EngineContext<S>,
        request: NewLedgerEntry,
    ) -> DomainResult<LedgerEntry> {
        let entry = match prepare_posting(ctx, request)? {
            Posting::Existing(entry) => {
                debug!(entry_id = %entry.id, "reference already posted; returning stored entry");
                return Ok(entry);
            }
            Posting::New(entry) => entry,
        };

        if let Err(err) = ctx
            .storage()
            .run_atomically(vec![AtomicOp::insert_entry(entry.clone())])
        {
            warn!(error = %err, sequence = entry.sequence, "ledger write rejected");
            return Err(err.into());
        }

        info!(
            entry_id = %entry.id,
            sequence = entry.sequence,
            running_balance = %entry.running_balance,
            "ledger entry posted"
        );
        self.emitter.emit(
            ctx.owner_id(),
            EntryAdded {
                entry: entry.clone(),
            },
        );
        Ok(entry)
    }

    /// The pair's entries, oldest first, after verifying the running-balance chain.
    #[instrument(skip_all, fields(owner_id = %ctx.owner_id(), party_id = %party_id, counterparty_id = %counterparty_id))]
    pub fn get_entries<S: Storage>(
        &self,
        ctx: &EngineContext<S>,
        party_id: PartyId,
        counterparty_id: PartyId,
    ) -> DomainResult<Vec<LedgerEntry>> {
        let pair = PairKey::new(ctx.owner_id(), party_id, counterparty_id);
        let mut entries = ctx.storage().entries_for_pair(pair)?;
        BalanceCalculator::sort_chronologically(&mut entries);

        if let Err(brk) = BalanceCalculator::verify_chain(&entries) {
            warn!(%brk, "stored ledger chain failed verification");
            return Err(DomainError::invariant(format!(
                "ledger {party_id}/{counterparty_id}: {brk}"
            )));
        }
        debug!(count = entries.len(), "loaded ledger entries");
        Ok(entries)
    }

    /// Current balance of a pair, read from its last entry's snapshot.
    pub fn balance<S: Storage>(
        &self,
        ctx: &EngineContext<S>,
        party_id: PartyId,
        counterparty_id: PartyId,
    ) -> DomainResult<Money> {
        let pair = PairKey::new(ctx.owner_id(), party_id, counterparty_id);
        Ok(ctx
            .storage()
            .last_entry(pair)?
            .map(|e| e.running_balance)
            .unwrap_or(Money::ZERO))
    }

    /// One summary row per counterparty the party has a ledger with.
    pub fn counterparty_balances<S: Storage>(
        &self,
        ctx: &EngineContext<S>,
        party_id: PartyId,
    ) -> DomainResult<Vec<CounterpartyBalance>> {
        let mut by_counterparty: BTreeMap<PartyId, Vec<LedgerEntry>> = BTreeMap::new();
        for entry in ctx.storage().entries_for_party(ctx.owner_id(), party_id)? {
            by_counterparty
                .entry(entry.counterparty_id)
                .or_default()
                .push(entry);
        }
        Ok(by_counterparty
            .into_iter()
            .map(|(counterparty_id, entries)| {
                CounterpartyBalance::from_entries(counterparty_id, &entries)
            })
            .collect())
    }

    pub fn statement<S: Storage>(
        &self,
        ctx: &EngineContext<S>,
        party_id: PartyId,
        counterparty_id: PartyId,
        from: NaiveDate,
        to: NaiveDate,
    ) -> DomainResult<Statement> {
        let entries = self.get_entries(ctx, party_id, counterparty_id)?;
        Statement::build(entries, from, to)
    }
}
