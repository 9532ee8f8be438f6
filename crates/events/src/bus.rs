//! Fan-out channel for user notifications.
//!
//! Services publish only after the state change behind a notification has
//! been committed. Delivery is best-effort: a publish failure is logged by
//! the caller and never rolls anything back.

use std::sync::Arc;
use std::sync::mpsc::{Receiver, RecvError, TryRecvError};

/// Receiving end handed to one listener. Sees every message published after
/// it was created.
#[derive(Debug)]
pub struct Subscription<M> {
    inbox: Receiver<M>,
}

impl<M> Subscription<M> {
    pub fn new(inbox: Receiver<M>) -> Self {
        Self { inbox }
    }

    /// Blocks until a message arrives or every publisher is gone.
    pub fn recv(&self) -> Result<M, RecvError> {
        self.inbox.recv()
    }

    pub fn try_recv(&self) -> Result<M, TryRecvError> {
        self.inbox.try_recv()
    }

    /// Everything queued right now, oldest first.
    pub fn drain(&self) -> Vec<M> {
        self.inbox.try_iter().collect()
    }
}

pub trait EventBus<M>: Send + Sync {
    type Error: core::fmt::Debug + Send + Sync + 'static;

    fn publish(&self, message: M) -> Result<(), Self::Error>;

    fn subscribe(&self) -> Subscription<M>;
}

impl<M, B> EventBus<M> for Arc<B>
where
    B: EventBus<M> + ?Sized,
{
    type Error = B::Error;

    fn publish(&self, message: M) -> Result<(), Self::Error> {
        (**self).publish(message)
    }

    fn subscribe(&self) -> Subscription<M> {
        (**self).subscribe()
    }
}
