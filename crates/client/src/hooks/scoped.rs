//! Lifecycle shared by every entity-scoped hook.
//!
//! A hook owns a piece of state for one entity (an order, a vendor, a
//! customer). Mounting registers its handlers, joins the entity's group and
//! makes sure the connection is up. Dropping it unsubscribes the handlers
//! first and then leaves the group.

use std::sync::Arc;

use orderlink_shared::{EventKind, GroupKey, OrderEvent};
use tokio::sync::watch;

use crate::ws::{RealtimeClient, Subscription};

/// State folded from order events for a single entity.
pub trait ScopedState: Clone + Send + Sync + 'static {
    /// Event kinds the hook subscribes to.
    const KINDS: &'static [EventKind];

    /// Fresh state for `entity_id`.
    fn for_entity(entity_id: String) -> Self;

    fn entity_id(&self) -> &str;

    /// The interest group carrying events for `entity_id`.
    fn group(entity_id: &str) -> GroupKey;

    /// Fold `event` in if it concerns this entity. Returns whether anything changed.
    fn apply(&mut self, event: &OrderEvent) -> bool;

    /// The connection error recorded by the last `start()`, if it failed.
    fn error(&self) -> Option<&str>;

    /// Record or clear the connection error. Returns whether anything changed.
    fn set_error(&mut self, error: Option<String>) -> bool;
}

/// Finished orders a collection hook keeps around after they complete.
pub const FINISHED_ORDERS_KEPT: usize = 20;

/// Drop the oldest orders with a final status beyond [`FINISHED_ORDERS_KEPT`].
/// Orders that are still in progress are never removed.
pub(crate) fn prune_finished<T>(orders: &mut Vec<T>, is_final: impl Fn(&T) -> bool) {
    let finished = orders.iter().filter(|o| is_final(o)).count();
    let mut excess = finished.saturating_sub(FINISHED_ORDERS_KEPT);
    if excess == 0 {
        return;
    }
    orders.retain(|o| {
        if excess > 0 && is_final(o) {
            excess -= 1;
            false
        } else {
            true
        }
    });
}

type AppliedCallback = Arc<dyn Fn(&OrderEvent) + Send + Sync>;

/// A mounted hook for state `S`.
pub struct ScopedHook<S: ScopedState> {
    client: RealtimeClient,
    state: Arc<watch::Sender<S>>,
    group: GroupKey,
    subscriptions: Vec<Subscription>,
}

impl<S: ScopedState> ScopedHook<S> {
    /// Mount the hook and ensure the connection is started.
    ///
    /// A failed start is recorded in the state's error field; the hook stays
    /// mounted and does not retry.
    pub async fn mount(client: &RealtimeClient, entity_id: impl Into<String>) -> Self {
        let hook = Self::attach(client, entity_id);
        hook.connect().await;
        hook
    }

    /// Register handlers and join the group without touching the connection.
    pub fn attach(client: &RealtimeClient, entity_id: impl Into<String>) -> Self {
        Self::attach_with(client, entity_id.into(), None)
    }

    pub(crate) fn attach_with(
        client: &RealtimeClient,
        entity_id: String,
        on_applied: Option<AppliedCallback>,
    ) -> Self {
        let group = S::group(&entity_id);
        let (state, _) = watch::channel(S::for_entity(entity_id));
        let state = Arc::new(state);

        let subscriptions = S::KINDS
            .iter()
            .map(|kind| {
                let state = state.clone();
                let on_applied = on_applied.clone();
                client.subscribe(*kind, move |event| {
                    if state.send_if_modified(|s| s.apply(event)) {
                        if let Some(callback) = &on_applied {
                            callback(event);
                        }
                    }
                })
            })
            .collect();

        client.join(group.clone());
        tracing::debug!("Mounted hook for {}", group);

        Self {
            client: client.clone(),
            state,
            group,
            subscriptions,
        }
    }

    /// Start the connection, recording the outcome in the state's error field.
    pub async fn connect(&self) {
        match self.client.start().await {
            Ok(()) => {
                self.state.send_if_modified(|s| s.set_error(None));
            }
            Err(e) => {
                tracing::warn!("Hook for {} could not connect: {}", self.group, e);
                self.state
                    .send_if_modified(|s| s.set_error(Some(e.to_string())));
            }
        }
    }

    /// Switch to another entity: reset the state, leave the old group, join the new one.
    pub fn track(&mut self, entity_id: impl Into<String>) {
        let entity_id = entity_id.into();
        if entity_id == self.entity_id() {
            return;
        }

        let group = S::group(&entity_id);
        self.state.send_modify(|s| {
            // The connection error belongs to the client, not the entity.
            let error = s.error().map(str::to_string);
            *s = S::for_entity(entity_id);
            s.set_error(error);
        });

        self.client.leave(&self.group);
        self.client.join(group.clone());
        tracing::debug!("Hook moved from {} to {}", self.group, group);
        self.group = group;
    }

    /// A copy of the current state.
    pub fn snapshot(&self) -> S {
        self.state.borrow().clone()
    }

    /// Receiver notified on every state change.
    pub fn watch(&self) -> watch::Receiver<S> {
        self.state.subscribe()
    }

    pub fn entity_id(&self) -> String {
        self.state.borrow().entity_id().to_string()
    }

    pub fn group(&self) -> &GroupKey {
        &self.group
    }

    pub fn client(&self) -> &RealtimeClient {
        &self.client
    }

    pub(crate) fn modify(&self, f: impl FnOnce(&mut S) -> bool) -> bool {
        self.state.send_if_modified(f)
    }
}

impl<S: ScopedState> Drop for ScopedHook<S> {
    fn drop(&mut self) {
        // Handlers first, then the leave.
        self.subscriptions.clear();
        self.client.leave(&self.group);
        tracing::debug!("Unmounted hook for {}", self.group);
    }
}
