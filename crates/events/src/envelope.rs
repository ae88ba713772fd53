use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use partybook_core::OwnerId;

use crate::Event;

/// Envelope for an event, carrying owner scoping + delivery metadata.
///
/// Notes:
/// - **Isolation** is expressed via `owner_id`; consumers must filter on it.
/// - `sequence_number` is monotonically increasing per emitter, so consumers can
///   detect gaps or duplicates (delivery is at-least-once at best).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope<E> {
    event_id: Uuid,
    owner_id: OwnerId,
    event_type: String,
    event_version: u32,
    occurred_at: DateTime<Utc>,

    /// Monotonically increasing position in the emitter's output.
    sequence_number: u64,

    payload: E,
}

impl<E> EventEnvelope<E> {
    pub fn new(
        event_id: Uuid,
        owner_id: OwnerId,
        event_type: impl Into<String>,
        event_version: u32,
        occurred_at: DateTime<Utc>,
        sequence_number: u64,
        payload: E,
    ) -> Self {
        Self {
            event_id,
            owner_id,
            event_type: event_type.into(),
            event_version,
            occurred_at,
            sequence_number,
            payload,
        }
    }

    pub fn event_id(&self) -> Uuid {
        self.event_id
    }

    pub fn owner_id(&self) -> OwnerId {
        self.owner_id
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn event_version(&self) -> u32 {
        self.event_version
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    pub fn sequence_number(&self) -> u64 {
        self.sequence_number
    }

    pub fn payload(&self) -> &E {
        &self.payload
    }

    pub fn into_payload(self) -> E {
        self.payload
    }
}

impl<E: Event> EventEnvelope<E> {
    /// Wrap a typed event, copying its metadata onto the envelope.
    pub fn wrap(owner_id: OwnerId, sequence_number: u64, event: E) -> Self {
        Self::new(
            Uuid::now_v7(),
            owner_id,
            event.event_type(),
            event.version(),
            event.occurred_at(),
            sequence_number,
            event,
        )
    }
}
