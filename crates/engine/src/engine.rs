use std::sync::Arc;

use partybook_events::{EventBus, Subscription};

use crate::aging::AgingAnalyzer;
use crate::config::{ConfigError, EngineConfig};
use crate::emitter::{DomainEventEmitter, DomainEventEnvelope};
use crate::invoices::InvoiceService;
use crate::ledger_store::LedgerEntryStore;
use crate::lifecycle::DocumentLifecycleManager;

/// The engine's services wired to one event emitter.
///
/// Every service is stateless apart from that shared emitter; owner, storage
/// and clock travel in the `EngineContext` passed to each call.
pub struct Engine<B> {
    pub ledger: LedgerEntryStore<B>,
    pub aging: AgingAnalyzer,
    pub documents: DocumentLifecycleManager<B>,
    pub invoices: InvoiceService<B>,
    emitter: Arc<DomainEventEmitter<B>>,
}

impl<B> Engine<B>
where
    B: EventBus<DomainEventEnvelope>,
{
    pub fn new(config: &EngineConfig, bus: B) -> Result<Self, ConfigError> {
        config.validate()?;
        let emitter = Arc::new(DomainEventEmitter::new(bus));
        Ok(Self {
            ledger: LedgerEntryStore::new(emitter.clone()),
            aging: AgingAnalyzer::new(config.aging)?,
            documents: DocumentLifecycleManager::new(emitter.clone(), config.invoicing.clone()),
            invoices: InvoiceService::new(emitter.clone(), config.invoicing.clone()),
            emitter,
        })
    }

    pub fn subscribe(&self) -> Subscription<DomainEventEnvelope> {
        self.emitter.subscribe()
    }

    pub fn events_emitted(&self) -> u64 {
        self.emitter.emitted()
    }
}
