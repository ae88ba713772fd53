//! Domain event mechanics: the `Event` contract, envelopes, and pub/sub buses.
//!
//! Events here are notifications *about* committed state. They are delivered
//! best-effort and sit outside every transactional boundary.

pub mod bus;
pub mod envelope;
pub mod event;
pub mod in_memory_bus;

pub use bus::{EventBus, Subscription};
pub use envelope::EventEnvelope;
pub use event::Event;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
