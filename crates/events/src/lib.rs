//! Domain events, their persisted envelope, and the notification bus.

pub mod bus;
pub mod envelope;
pub mod event;
pub mod in_memory_bus;
pub mod notification;

pub use bus::{EventBus, Subscription};
pub use envelope::EventEnvelope;
pub use event::Event;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
pub use notification::{Notification, NotificationKind};
