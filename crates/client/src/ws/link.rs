//! Command handle for the live connection.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use orderlink_shared::{ClientCommand, RealtimeError, RealtimeResult, WsEnvelope};
use tokio::sync::mpsc::UnboundedSender;
use tokio::time::Instant;

/// An invocation that has been sent but not yet acknowledged.
#[derive(Debug, Clone)]
pub(crate) struct PendingInvocation {
    pub command: ClientCommand,
    pub sent_at: Instant,
}

/// Handle for sending commands through the current connection.
///
/// Every command is tracked until the server answers it with an `Ack` or
/// `Error` frame carrying the envelope id as `correlation_id`.
#[derive(Clone)]
pub struct LinkHandle {
    sender: UnboundedSender<WsEnvelope<ClientCommand>>,
    pending: Arc<Mutex<HashMap<String, PendingInvocation>>>,
}

impl LinkHandle {
    pub(crate) fn new(sender: UnboundedSender<WsEnvelope<ClientCommand>>) -> Self {
        Self {
            sender,
            pending: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Queue a hub invocation and return the id its reply will correlate with.
    pub fn invoke(&self, command: ClientCommand) -> RealtimeResult<String> {
        tracing::debug!("Invoking {} for {}", command.target(), command.group());
        let envelope = WsEnvelope::new(command.clone());
        let id = envelope.id.clone();

        self.lock().insert(
            id.clone(),
            PendingInvocation {
                command,
                sent_at: Instant::now(),
            },
        );

        if let Err(e) = self.sender.send(envelope) {
            self.lock().remove(&id);
            return Err(RealtimeError::Transport(format!("link closed: {}", e)));
        }
        Ok(id)
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    pub(crate) fn resolve(&self, correlation_id: &str) -> Option<PendingInvocation> {
        self.lock().remove(correlation_id)
    }

    /// Remove and return invocations that have waited longer than `timeout`.
    pub(crate) fn expire(&self, timeout: Duration) -> Vec<PendingInvocation> {
        let now = Instant::now();
        let mut pending = self.lock();
        let expired: Vec<String> = pending
            .iter()
            .filter(|(_, invocation)| now.duration_since(invocation.sent_at) >= timeout)
            .map(|(id, _)| id.clone())
            .collect();

        expired
            .into_iter()
            .filter_map(|id| pending.remove(&id))
            .collect()
    }

    /// Forget every unanswered invocation; the connection they were sent on is gone.
    pub(crate) fn abandon(&self) -> usize {
        let mut pending = self.lock();
        let count = pending.len();
        pending.clear();
        count
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, PendingInvocation>> {
        self.pending.lock().expect("pending invocation mutex poisoned")
    }
}
