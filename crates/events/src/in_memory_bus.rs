//! Process-local notification fan-out.

use std::sync::{Mutex, mpsc};

use crate::bus::{EventBus, Subscription};

#[derive(Debug)]
pub enum InMemoryBusError {
    Poisoned,
}

/// Every subscriber gets its own channel. Closed ones are forgotten on the
/// next publish.
#[derive(Debug)]
pub struct InMemoryEventBus<M> {
    listeners: Mutex<Vec<mpsc::Sender<M>>>,
}

impl<M> InMemoryEventBus<M> {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<M> Default for InMemoryEventBus<M> {
    fn default() -> Self {
        Self {
            listeners: Mutex::new(Vec::new()),
        }
    }
}

impl<M> EventBus<M> for InMemoryEventBus<M>
where
    M: Clone + Send + 'static,
{
    type Error = InMemoryBusError;

    fn publish(&self, message: M) -> Result<(), Self::Error> {
        let mut listeners = self.listeners.lock().map_err(|_| InMemoryBusError::Poisoned)?;
        listeners.retain(|tx| tx.send(message.clone()).is_ok());
        Ok(())
    }

    fn subscribe(&self) -> Subscription<M> {
        let (tx, rx) = mpsc::channel();
        if let Ok(mut listeners) = self.listeners.lock() {
            listeners.push(tx);
        }
        Subscription::new(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Notification, NotificationKind};

    fn created(id: &str) -> Notification {
        Notification::new(
            NotificationKind::InvoiceCreated,
            id,
            "فاتورة جديدة",
            serde_json::json!({}),
        )
    }

    #[test]
    fn each_listener_sees_every_notification_in_order() {
        let bus = InMemoryEventBus::new();
        let owner = bus.subscribe();
        let log = bus.subscribe();

        bus.publish(created("a")).unwrap();
        bus.publish(created("b")).unwrap();

        for inbox in [owner, log] {
            let ids: Vec<_> = inbox.drain().into_iter().map(|n| n.entity_id).collect();
            assert_eq!(ids, vec!["a", "b"]);
        }
    }

    #[test]
    fn closed_listeners_are_dropped_on_publish() {
        let bus = InMemoryEventBus::<u32>::new();
        let kept = bus.subscribe();
        drop(bus.subscribe());

        bus.publish(5).unwrap();
        assert_eq!(bus.listeners.lock().unwrap().len(), 1);
        assert_eq!(kept.try_recv().unwrap(), 5);
    }
}
