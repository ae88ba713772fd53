use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use std::sync::Arc;

use chrono::{Days, NaiveDate};
use partybook_core::{FixedClock, Money, OwnerId, PartyId};
use partybook_documents::LineItem;
use partybook_engine::{
    AgingAnalyzer, AgingSettings, DomainEventEnvelope, Engine, EngineConfig, EngineContext,
    InMemoryStorage,
};
use partybook_events::InMemoryEventBus;
use partybook_invoicing::{Invoice, NewInvoice};
use partybook_ledger::{
    BalanceCalculator, EntryType, LedgerEntry, NewLedgerEntry, PartyType, ReferenceType,
};

type Bus = Arc<InMemoryEventBus<DomainEventEnvelope>>;

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()
}

fn setup() -> (Engine<Bus>, EngineContext<Arc<InMemoryStorage>>) {
    let engine = Engine::new(&EngineConfig::default(), Arc::new(InMemoryEventBus::new())).unwrap();
    let ctx = EngineContext::with_clock(
        OwnerId::new(),
        Arc::new(InMemoryStorage::new()),
        Arc::new(FixedClock::on(today())),
    );
    (engine, ctx)
}

fn posting(party: PartyId, cp: PartyId, i: u64) -> NewLedgerEntry {
    NewLedgerEntry {
        party_id: party,
        party_type: PartyType::Customer,
        counterparty_id: cp,
        entry_type: if i % 3 == 0 { EntryType::Debit } else { EntryType::Credit },
        amount: Money::from_minor(100 + (i % 50) as i64),
        reference_type: ReferenceType::Adjustment,
        reference_id: format!("ADJ-{i}"),
        reference_number: format!("ADJ-{i}"),
        entry_date: today(),
        notes: None,
    }
}

fn chain(count: u64) -> Vec<LedgerEntry> {
    let (engine, ctx) = setup();
    let (party, cp) = (PartyId::new(), PartyId::new());
    for i in 0..count {
        engine.ledger.add_entry(&ctx, posting(party, cp, i)).unwrap();
    }
    engine.ledger.get_entries(&ctx, party, cp).unwrap()
}

fn bench_add_entry(c: &mut Criterion) {
    let mut group = c.benchmark_group("add_entry");

    // Benchmark: append onto a pair with a growing history
    group.bench_function("append_to_pair", |b| {
        let (engine, ctx) = setup();
        let (party, cp) = (PartyId::new(), PartyId::new());
        let mut i = 0u64;
        b.iter(|| {
            i += 1;
            black_box(engine.ledger.add_entry(&ctx, posting(party, cp, i)).unwrap());
        });
    });

    // Benchmark: idempotent replay of an already-posted reference
    group.bench_function("replay_posted_reference", |b| {
        let (engine, ctx) = setup();
        let (party, cp) = (PartyId::new(), PartyId::new());
        engine.ledger.add_entry(&ctx, posting(party, cp, 1)).unwrap();
        b.iter(|| {
            black_box(engine.ledger.add_entry(&ctx, posting(party, cp, 1)).unwrap());
        });
    });

    group.finish();
}

fn bench_verify_chain(c: &mut Criterion) {
    let mut group = c.benchmark_group("verify_chain");

    for count in [10u64, 100, 1000].iter() {
        let entries = chain(*count);
        group.throughput(Throughput::Elements(*count));
        group.bench_with_input(BenchmarkId::new("entries", count), &entries, |b, entries| {
            b.iter(|| BalanceCalculator::verify_chain(black_box(entries)).unwrap());
        });
    }

    group.finish();
}

fn bench_aging_report(c: &mut Criterion) {
    let mut group = c.benchmark_group("aging_report");
    let analyzer = AgingAnalyzer::new(AgingSettings::default()).unwrap();
    let party = PartyId::new();
    let issue_date = today() - Days::new(200);

    for count in [10usize, 100, 1000].iter() {
        let invoices: Vec<Invoice> = (0..*count)
            .map(|i| {
                Invoice::issue(
                    OwnerId::new(),
                    partybook_core::InvoiceId::new(),
                    format!("INV-{i:04}"),
                    NewInvoice {
                        party_id: party,
                        party_type: PartyType::Customer,
                        party_name: "Bench Customer".to_string(),
                        items: vec![
                            LineItem::new(None, "Item", 1, Money::from_minor(1_000)).unwrap(),
                        ],
                        issue_date,
                        due_date: Some(issue_date + Days::new((i % 200) as u64)),
                        notes: None,
                    },
                    chrono::Utc::now(),
                )
                .unwrap()
            })
            .collect();

        group.throughput(Throughput::Elements(*count as u64));
        group.bench_with_input(BenchmarkId::new("invoices", count), &invoices, |b, invoices| {
            b.iter(|| {
                black_box(
                    analyzer
                        .report(party, PartyType::Customer, black_box(invoices), today())
                        .unwrap(),
                )
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_add_entry, bench_verify_chain, bench_aging_report);
criterion_main!(benches);
