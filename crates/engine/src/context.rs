use std::sync::Arc;

use partybook_core::{Clock, DomainResult, OwnerId, SystemClock};

use crate::storage::Storage;

/// Who is acting, against which store, at what time.
///
/// Passed explicitly into every engine operation; the engine keeps no
/// process-wide session state.
#[derive(Clone)]
pub struct EngineContext<S> {
    owner_id: OwnerId,
    storage: S,
    clock: Arc<dyn Clock>,
}

impl<S: Storage> EngineContext<S> {
    pub fn new(owner_id: OwnerId, storage: S) -> Self {
        Self::with_clock(owner_id, storage, Arc::new(SystemClock))
    }

    pub fn with_clock(owner_id: OwnerId, storage: S, clock: Arc<dyn Clock>) -> Self {
        Self {
            owner_id,
            storage,
            clock,
        }
    }

    pub fn owner_id(&self) -> OwnerId {
        self.owner_id
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    /// Allocate the next human-facing number in a series, e.g. `BO-0007`.
    pub fn next_number(&self, prefix: &str) -> DomainResult<String> {
        let n = self.storage.next_number(self.owner_id, prefix)?;
        Ok(format!("{prefix}-{n:04}"))
    }
}

impl<S> core::fmt::Debug for EngineContext<S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("EngineContext")
            .field("owner_id", &self.owner_id)
            .finish_non_exhaustive()
    }
}
