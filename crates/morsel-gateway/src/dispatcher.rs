use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::{broadcast, watch};
use tracing::{error, trace, warn};

use morsel_types::{FrameKind, GatewayEvent};

use crate::error::HandlerError;

pub type HandlerId = u64;

/// A consumer of inbound events. Called synchronously on the connection task,
/// so implementations must not block.
pub trait FrameHandler: Send + Sync {
    fn handle(&self, event: &GatewayEvent) -> Result<(), HandlerError>;
}

impl<F> FrameHandler for F
where
    F: Fn(&GatewayEvent) -> Result<(), HandlerError> + Send + Sync,
{
    fn handle(&self, event: &GatewayEvent) -> Result<(), HandlerError> {
        self(event)
    }
}

struct Registration {
    id: HandlerId,
    /// Empty means every kind.
    topics: Vec<FrameKind>,
    handler: Arc<dyn FrameHandler>,
}

impl Registration {
    fn wants(&self, kind: FrameKind) -> bool {
        self.topics.is_empty() || self.topics.contains(&kind)
    }
}

/// Fans inbound events out to registered handlers and UI subscribers.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    /// Every event, for UI-side subscription
    broadcast_tx: broadcast::Sender<GatewayEvent>,

    /// Most recent event only
    latest_tx: watch::Sender<Option<GatewayEvent>>,

    /// Handlers in registration order
    handlers: RwLock<Vec<Registration>>,

    next_id: AtomicU64,
}

impl Dispatcher {
    pub fn new(buffer: usize) -> Self {
        let (broadcast_tx, _) = broadcast::channel(buffer.max(1));
        let (latest_tx, _) = watch::channel(None);
        Self {
            inner: Arc::new(DispatcherInner {
                broadcast_tx,
                latest_tx,
                handlers: RwLock::new(Vec::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Subscribe to every inbound event. Returns a broadcast receiver.
    pub fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.inner.broadcast_tx.subscribe()
    }

    /// Watch the latest inbound event.
    pub fn latest(&self) -> watch::Receiver<Option<GatewayEvent>> {
        self.inner.latest_tx.subscribe()
    }

    /// Register a handler for the given kinds (all kinds if empty).
    pub fn add_handler<H>(&self, topics: &[FrameKind], handler: H) -> HandlerId
    where
        H: FrameHandler + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Registration {
                id,
                topics: topics.to_vec(),
                handler: Arc::new(handler),
            });
        id
    }

    /// Unregister a handler. Returns false if it was not registered.
    pub fn remove_handler(&self, id: HandlerId) -> bool {
        let mut handlers = self
            .inner
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = handlers.len();
        handlers.retain(|registration| registration.id != id);
        handlers.len() != before
    }

    pub fn handler_count(&self) -> usize {
        self.inner
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Deliver one event to every interested handler, in registration order.
    ///
    /// A handler that fails or panics is logged and skipped; the rest still
    /// run. Handlers may add or remove handlers while being called.
    pub fn dispatch(&self, event: GatewayEvent) {
        let kind = event.kind();

        // Snapshot so handlers can (un)register without deadlocking
        let targets: Vec<(HandlerId, Arc<dyn FrameHandler>)> = self
            .inner
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|registration| registration.wants(kind))
            .map(|registration| (registration.id, registration.handler.clone()))
            .collect();

        trace!(kind = %kind, handlers = targets.len(), "Dispatching event");

        for (id, handler) in targets {
            match panic::catch_unwind(AssertUnwindSafe(|| handler.handle(&event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(handler = id, kind = %kind, error = %e, "Frame handler failed");
                }
                Err(_) => {
                    error!(handler = id, kind = %kind, "Frame handler panicked");
                }
            }
        }

        self.inner.latest_tx.send_replace(Some(event.clone()));
        let _ = self.inner.broadcast_tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn expired(id: &str) -> GatewayEvent {
        GatewayEvent::FeedExpired { id: id.to_string() }
    }

    #[test]
    fn test_registration_order_and_topics() {
        let dispatcher = Dispatcher::new(16);
        let seen = Arc::new(Mutex::new(Vec::new()));

        let log = seen.clone();
        dispatcher.add_handler(&[], move |_: &GatewayEvent| -> Result<(), HandlerError> {
            log.lock().unwrap().push("first");
            Ok(())
        });
        let log = seen.clone();
        dispatcher.add_handler(
            &[FrameKind::Typing],
            move |_: &GatewayEvent| -> Result<(), HandlerError> {
                log.lock().unwrap().push("typing-only");
                Ok(())
            },
        );
        let log = seen.clone();
        dispatcher.add_handler(
            &[FrameKind::HungerBroadcastExpired],
            move |_: &GatewayEvent| -> Result<(), HandlerError> {
                log.lock().unwrap().push("third");
                Ok(())
            },
        );

        dispatcher.dispatch(expired("h1"));
        assert_eq!(*seen.lock().unwrap(), vec!["first", "third"]);
    }

    #[test]
    fn test_failing_handlers_are_isolated() {
        let dispatcher = Dispatcher::new(16);
        let delivered = Arc::new(Mutex::new(0));

        dispatcher.add_handler(&[], |_: &GatewayEvent| -> Result<(), HandlerError> {
            Err(HandlerError::new("boom"))
        });
        dispatcher.add_handler(&[], |_: &GatewayEvent| -> Result<(), HandlerError> {
            panic!("handler bug")
        });
        let count = delivered.clone();
        dispatcher.add_handler(&[], move |_: &GatewayEvent| -> Result<(), HandlerError> {
            *count.lock().unwrap() += 1;
            Ok(())
        });

        dispatcher.dispatch(expired("h1"));
        dispatcher.dispatch(expired("h2"));
        assert_eq!(*delivered.lock().unwrap(), 2);
    }

    #[test]
    fn test_remove_handler() {
        let dispatcher = Dispatcher::new(16);
        let delivered = Arc::new(Mutex::new(0));
        let count = delivered.clone();
        let id = dispatcher.add_handler(&[], move |_: &GatewayEvent| -> Result<(), HandlerError> {
            *count.lock().unwrap() += 1;
            Ok(())
        });

        dispatcher.dispatch(expired("h1"));
        assert!(dispatcher.remove_handler(id));
        assert!(!dispatcher.remove_handler(id));
        dispatcher.dispatch(expired("h2"));
        assert_eq!(*delivered.lock().unwrap(), 1);
        assert_eq!(dispatcher.handler_count(), 0);
    }

    #[test]
    fn test_latest_and_subscribers() {
        let dispatcher = Dispatcher::new(16);
        let mut rx = dispatcher.subscribe();
        let latest = dispatcher.latest();
        assert!(latest.borrow().is_none());

        dispatcher.dispatch(expired("h1"));
        dispatcher.dispatch(GatewayEvent::Connected);

        assert_eq!(rx.try_recv().unwrap(), expired("h1"));
        assert_eq!(rx.try_recv().unwrap(), GatewayEvent::Connected);
        assert_eq!(*latest.borrow(), Some(GatewayEvent::Connected));
    }
}
