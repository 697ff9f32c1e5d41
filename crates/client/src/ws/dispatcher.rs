//! Typed publish/subscribe bus for incoming order events.
//!
//! The connection task hands every decoded event to [`EventDispatcher::dispatch`],
//! which runs each handler registered for that event kind in registration
//! order. Filtering by order, vendor or customer is left to the handlers.

use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use orderlink_shared::{
    EventKind, OrderCreated, OrderDelayed, OrderEtaUpdated, OrderEvent, OrderStatusChanged,
};

type Handler = Box<dyn Fn(&OrderEvent) + Send + Sync>;

struct Registration {
    id: u64,
    active: AtomicBool,
    handler: Handler,
}

#[derive(Default)]
struct DispatcherInner {
    next_id: u64,
    handlers: HashMap<EventKind, Vec<Arc<Registration>>>,
}

/// Identifies one handler registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId {
    kind: EventKind,
    id: u64,
}

impl SubscriptionId {
    pub fn kind(&self) -> EventKind {
        self.kind
    }
}

#[derive(Clone, Default)]
pub struct EventDispatcher {
    inner: Arc<Mutex<DispatcherInner>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for events of `kind`.
    ///
    /// The handler stays registered until the returned [`Subscription`] is
    /// dropped or unsubscribed.
    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> Subscription
    where
        F: Fn(&OrderEvent) + Send + Sync + 'static,
    {
        let mut inner = self.lock();
        inner.next_id += 1;
        let id = inner.next_id;
        inner
            .handlers
            .entry(kind)
            .or_default()
            .push(Arc::new(Registration {
                id,
                active: AtomicBool::new(true),
                handler: Box::new(handler),
            }));

        tracing::debug!("Subscribed handler {} to {}", id, kind);
        Subscription {
            id: SubscriptionId { kind, id },
            dispatcher: Arc::downgrade(&self.inner),
            released: false,
        }
    }

    pub fn on_status_changed<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&OrderStatusChanged) + Send + Sync + 'static,
    {
        self.subscribe(EventKind::OrderStatusChanged, move |event| {
            if let OrderEvent::StatusChanged(e) = event {
                handler(e)
            }
        })
    }

    pub fn on_eta_updated<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&OrderEtaUpdated) + Send + Sync + 'static,
    {
        self.subscribe(EventKind::OrderEtaUpdated, move |event| {
            if let OrderEvent::EtaUpdated(e) = event {
                handler(e)
            }
        })
    }

    pub fn on_created<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&OrderCreated) + Send + Sync + 'static,
    {
        self.subscribe(EventKind::OrderCreated, move |event| {
            if let OrderEvent::Created(e) = event {
                handler(e)
            }
        })
    }

    pub fn on_delayed<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&OrderDelayed) + Send + Sync + 'static,
    {
        self.subscribe(EventKind::OrderDelayed, move |event| {
            if let OrderEvent::Delayed(e) = event {
                handler(e)
            }
        })
    }

    /// Remove one registration. Returns `false` if it was already gone.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        remove_registration(&self.inner, id)
    }

    /// Deliver `event` to every handler registered for its kind.
    ///
    /// Handlers run synchronously on the calling task. A panicking handler is
    /// logged and skipped; the rest still receive the event. Returns the
    /// number of handlers that completed.
    pub fn dispatch(&self, event: &OrderEvent) -> usize {
        let kind = event.kind();
        let registrations: Vec<Arc<Registration>> = self
            .lock()
            .handlers
            .get(&kind)
            .cloned()
            .unwrap_or_default();

        let mut delivered = 0;
        for registration in registrations {
            // Removed after the snapshot was taken.
            if !registration.active.load(Ordering::Acquire) {
                continue;
            }
            match panic::catch_unwind(AssertUnwindSafe(|| (registration.handler)(event))) {
                Ok(()) => delivered += 1,
                Err(payload) => tracing::error!(
                    "Handler {} for {} panicked on order {}: {}",
                    registration.id,
                    kind,
                    event.order_id(),
                    panic_message(payload.as_ref())
                ),
            }
        }
        delivered
    }

    /// Number of live handlers for `kind`.
    pub fn handler_count(&self, kind: EventKind) -> usize {
        self.lock().handlers.get(&kind).map_or(0, Vec::len)
    }

    fn lock(&self) -> MutexGuard<'_, DispatcherInner> {
        self.inner.lock().expect("dispatcher mutex poisoned")
    }
}

fn remove_registration(inner: &Mutex<DispatcherInner>, id: SubscriptionId) -> bool {
    let mut inner = inner.lock().expect("dispatcher mutex poisoned");
    let Some(list) = inner.handlers.get_mut(&id.kind) else {
        return false;
    };
    let Some(pos) = list.iter().position(|r| r.id == id.id) else {
        return false;
    };

    let registration = list.remove(pos);
    registration.active.store(false, Ordering::Release);
    if list.is_empty() {
        inner.handlers.remove(&id.kind);
    }
    tracing::debug!("Unsubscribed handler {} from {}", id.id, id.kind);
    true
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}

/// A handler registration that is removed when dropped.
#[must_use = "dropping a Subscription unsubscribes its handler"]
pub struct Subscription {
    id: SubscriptionId,
    dispatcher: Weak<Mutex<DispatcherInner>>,
    released: bool,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Remove the handler now. Calling it again is a no-op.
    pub fn unsubscribe(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if let Some(inner) = self.dispatcher.upgrade() {
            remove_registration(&inner, self.id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("released", &self.released)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use orderlink_shared::OrderStatus;
    use std::sync::atomic::AtomicUsize;

    fn delayed(order_id: &str) -> OrderEvent {
        OrderEvent::Delayed(OrderDelayed {
            order_id: order_id.to_string(),
            order_code: "A-1".to_string(),
            delay_minutes: 10,
            reason: Some("oven".to_string()),
            new_eta: None,
            timestamp: Utc::now(),
        })
    }

    fn status(order_id: &str) -> OrderEvent {
        OrderEvent::StatusChanged(OrderStatusChanged {
            order_id: order_id.to_string(),
            order_code: String::new(),
            old_status: None,
            new_status: OrderStatus::Ready,
            timestamp: Utc::now(),
            eta: None,
            vendor_id: None,
        })
    }

    #[test]
    fn handlers_run_in_registration_order() {
        let dispatcher = EventDispatcher::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let subs: Vec<Subscription> = (0..3)
            .map(|n| {
                let seen = seen.clone();
                dispatcher.subscribe(EventKind::OrderDelayed, move |_| {
                    seen.lock().unwrap().push(n)
                })
            })
            .collect();

        assert_eq!(dispatcher.dispatch(&delayed("o")), 3);
        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2]);
        drop(subs);
    }

    #[test]
    fn only_matching_kind_is_invoked() {
        let dispatcher = EventDispatcher::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let _sub = dispatcher.on_status_changed(move |e| {
            assert_eq!(e.new_status, OrderStatus::Ready);
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(dispatcher.dispatch(&delayed("o")), 0);
        assert_eq!(dispatcher.dispatch(&status("o")), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn panicking_handler_does_not_block_the_next() {
        let dispatcher = EventDispatcher::new();
        let received = Arc::new(Mutex::new(None));

        let _faulty = dispatcher.on_delayed(|_| panic!("consumer bug"));
        let sink = received.clone();
        let _healthy = dispatcher.on_delayed(move |e| {
            *sink.lock().unwrap() = Some(e.delay_minutes);
        });

        assert_eq!(dispatcher.dispatch(&delayed("o")), 1);
        assert_eq!(*received.lock().unwrap(), Some(10));
    }

    #[test]
    fn unsubscribed_handler_is_not_called_again() {
        let dispatcher = EventDispatcher::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let mut sub = dispatcher.subscribe(EventKind::OrderStatusChanged, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        dispatcher.dispatch(&status("event-1"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        sub.unsubscribe();
        sub.unsubscribe();
        assert!(!dispatcher.unsubscribe(sub.id()));

        dispatcher.dispatch(&status("event-2"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(dispatcher.handler_count(EventKind::OrderStatusChanged), 0);
    }

    #[test]
    fn dropping_the_subscription_releases_it() {
        let dispatcher = EventDispatcher::new();
        {
            let _sub = dispatcher.subscribe(EventKind::OrderCreated, |_| {});
            assert_eq!(dispatcher.handler_count(EventKind::OrderCreated), 1);
        }
        assert_eq!(dispatcher.handler_count(EventKind::OrderCreated), 0);
    }

    #[test]
    fn explicit_unsubscribe_removes_exactly_one() {
        let dispatcher = EventDispatcher::new();
        let first = dispatcher.subscribe(EventKind::OrderCreated, |_| {});
        let _second = dispatcher.subscribe(EventKind::OrderCreated, |_| {});

        assert!(dispatcher.unsubscribe(first.id()));
        assert_eq!(dispatcher.handler_count(EventKind::OrderCreated), 1);
        drop(first);
        assert_eq!(dispatcher.handler_count(EventKind::OrderCreated), 1);
    }

    #[test]
    fn handler_may_unsubscribe_during_dispatch() {
        let dispatcher = EventDispatcher::new();
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));
        let calls = Arc::new(AtomicUsize::new(0));

        let (slot_in, counter) = (slot.clone(), calls.clone());
        let sub = dispatcher.subscribe(EventKind::OrderDelayed, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            slot_in.lock().unwrap().take();
        });
        *slot.lock().unwrap() = Some(sub);

        dispatcher.dispatch(&delayed("o"));
        dispatcher.dispatch(&delayed("o"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn subscription_outliving_dispatcher_is_harmless() {
        let dispatcher = EventDispatcher::new();
        let mut sub = dispatcher.subscribe(EventKind::OrderDelayed, |_| {});
        drop(dispatcher);
        sub.unsubscribe();
    }
}
