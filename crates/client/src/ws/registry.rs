//! Reference-counted interest groups.
//!
//! The registry is the only place that decides when a join or leave goes on
//! the wire. Counts survive disconnects and `stop()`; whatever is still
//! referenced when a link attaches is joined again.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use orderlink_shared::{ClientCommand, GroupKey, RealtimeError};

use super::link::LinkHandle;

#[derive(Default)]
struct RegistryInner {
    counts: HashMap<GroupKey, usize>,
    link: Option<LinkHandle>,
}

/// Tracks which groups the client wants routed and keeps the server in sync.
#[derive(Clone, Default)]
pub struct GroupRegistry {
    inner: Arc<Mutex<RegistryInner>>,
}

impl GroupRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a reference to `group`, joining it on the server on the first one.
    ///
    /// Without a live link the join is deferred to the next rejoin sweep.
    pub fn join(&self, group: GroupKey) {
        let mut inner = self.lock();
        let count = inner.counts.entry(group.clone()).or_insert(0);
        *count += 1;
        let first = *count == 1;

        if !first {
            tracing::debug!("{} already joined ({} references)", group, count);
            return;
        }

        match &inner.link {
            Some(link) => send_group_command(link, group.join_command()),
            None => tracing::debug!("Deferring join of {} until connected", group),
        }
    }

    /// Drop a reference to `group`, leaving it on the server with the last one.
    pub fn leave(&self, group: &GroupKey) {
        let mut inner = self.lock();
        let Some(count) = inner.counts.get_mut(group) else {
            tracing::debug!("Ignoring leave of {}: not joined", group);
            return;
        };

        *count -= 1;
        if *count > 0 {
            return;
        }
        inner.counts.remove(group);

        if let Some(link) = &inner.link {
            send_group_command(link, group.leave_command());
        }
    }

    /// Current number of references to `group`.
    pub fn ref_count(&self, group: &GroupKey) -> usize {
        self.lock().counts.get(group).copied().unwrap_or(0)
    }

    /// All groups with at least one reference.
    pub fn groups(&self) -> Vec<GroupKey> {
        self.lock().counts.keys().cloned().collect()
    }

    /// Rejoin every referenced group on `link`, then route future changes through it.
    ///
    /// Returns how many joins were issued.
    pub(crate) fn attach(&self, link: LinkHandle) -> usize {
        let mut inner = self.lock();
        let groups: Vec<GroupKey> = inner.counts.keys().cloned().collect();
        for group in &groups {
            send_group_command(&link, group.join_command());
        }
        inner.link = Some(link);

        if !groups.is_empty() {
            tracing::info!("Rejoined {} interest groups", groups.len());
        }
        groups.len()
    }

    /// Stop sending group changes; returns the link that was attached.
    pub(crate) fn detach(&self) -> Option<LinkHandle> {
        self.lock().link.take()
    }

    fn lock(&self) -> MutexGuard<'_, RegistryInner> {
        self.inner.lock().expect("group registry mutex poisoned")
    }
}

/// Send a join/leave; failures are logged and never propagate.
fn send_group_command(link: &LinkHandle, command: ClientCommand) {
    if let Err(e) = link.invoke(command.clone()) {
        let failure = RealtimeError::GroupOperationFailed {
            group: command.group(),
            target: command.target().to_string(),
            reason: e.to_string(),
        };
        tracing::warn!("{}", failure);
    }
}
