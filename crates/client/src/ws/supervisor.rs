//! Connection lifecycle: first connect, session loop and bounded reconnects.
//!
//! Every state change goes through [`Shared::with_epoch`]. `stop()` bumps the
//! epoch under the same lock, so a connect or reconnect that finishes after
//! `stop()` sees a stale epoch and discards its link instead of announcing it.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use orderlink_shared::{RealtimeError, RealtimeResult, ServerEvent, WsEnvelope};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use super::backoff::ReconnectPolicy;
use super::connection::{ConnectionState, Transport, TransportLink};
use super::dispatcher::EventDispatcher;
use super::link::LinkHandle;
use super::registry::GroupRegistry;
use crate::auth::{require_token, TokenProvider};

const MIN_ACK_CHECK: Duration = Duration::from_millis(100);

#[derive(Default)]
struct Control {
    epoch: u64,
    task: Option<JoinHandle<()>>,
}

pub(crate) struct Shared {
    transport: Arc<dyn Transport>,
    tokens: Arc<dyn TokenProvider>,
    policy: ReconnectPolicy,
    ack_timeout: Duration,
    server_timeout: Option<Duration>,
    registry: GroupRegistry,
    dispatcher: EventDispatcher,
    state: watch::Sender<ConnectionState>,
    attempts: AtomicU32,
    control: Mutex<Control>,
}

impl Shared {
    fn lock_control(&self) -> MutexGuard<'_, Control> {
        self.control.lock().expect("supervisor mutex poisoned")
    }

    /// Run `f` only if no `stop()` happened since `epoch` was read.
    fn with_epoch<R>(&self, epoch: u64, f: impl FnOnce(&mut Control) -> R) -> Option<R> {
        let mut control = self.lock_control();
        if control.epoch != epoch {
            return None;
        }
        Some(f(&mut control))
    }

    /// Rejoin every referenced group on the new link, then announce `Connected`.
    fn go_live(&self, link: TransportLink) -> (UnboundedReceiver<WsEnvelope<ServerEvent>>, LinkHandle) {
        let handle = LinkHandle::new(link.outbound);
        self.attempts.store(0, Ordering::SeqCst);
        self.registry.attach(handle.clone());
        self.state.send_replace(ConnectionState::Connected);
        (link.inbound, handle)
    }

    fn handle_frame(&self, link: &LinkHandle, envelope: WsEnvelope<ServerEvent>) {
        let correlation_id = envelope.correlation_id;
        match envelope.payload {
            ServerEvent::Ack { target } => {
                match correlation_id.as_deref().and_then(|id| link.resolve(id)) {
                    Some(pending) => tracing::debug!(
                        "{} for {} acknowledged after {:?}",
                        target,
                        pending.command.group(),
                        pending.sent_at.elapsed()
                    ),
                    None => tracing::debug!("Ack for unknown invocation of {}", target),
                }
            }
            ServerEvent::Error { code, message } => {
                match correlation_id.as_deref().and_then(|id| link.resolve(id)) {
                    Some(pending) => {
                        let failure = RealtimeError::GroupOperationFailed {
                            group: pending.command.group(),
                            target: pending.command.target().to_string(),
                            reason: format!("{}: {}", code, message),
                        };
                        tracing::warn!("{}", failure);
                    }
                    None => tracing::warn!("Hub reported error {}: {}", code, message),
                }
            }
            other => {
                if let Some(event) = other.into_order_event() {
                    let delivered = self.dispatcher.dispatch(&event);
                    tracing::trace!(
                        "{} for {} delivered to {} handlers",
                        event.kind(),
                        event.order_id(),
                        delivered
                    );
                }
            }
        }
    }
}

/// Result of the most recent `start()`.
struct StartOutcome {
    /// Bumped by every completed `start()`.
    generation: u64,
    /// Control epoch the connect ran under.
    epoch: u64,
    result: RealtimeResult<()>,
}

/// Owns the connection state machine for one client.
pub(crate) struct Supervisor {
    shared: Arc<Shared>,
    start_lock: tokio::sync::Mutex<()>,
    /// Lets a caller that queued behind another `start()` reuse its outcome.
    last_start: Mutex<StartOutcome>,
}

impl Supervisor {
    pub(crate) fn new(
        transport: Arc<dyn Transport>,
        tokens: Arc<dyn TokenProvider>,
        policy: ReconnectPolicy,
        ack_timeout: Duration,
        server_timeout: Option<Duration>,
        registry: GroupRegistry,
        dispatcher: EventDispatcher,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            shared: Arc::new(Shared {
                transport,
                tokens,
                policy,
                ack_timeout,
                server_timeout,
                registry,
                dispatcher,
                state,
                attempts: AtomicU32::new(0),
                control: Mutex::new(Control::default()),
            }),
            start_lock: tokio::sync::Mutex::new(()),
            last_start: Mutex::new(StartOutcome {
                generation: 0,
                epoch: 0,
                result: Ok(()),
            }),
        }
    }

    /// Ensure the connection is up.
    ///
    /// Concurrent calls are serialized; a caller that waited on another
    /// `start()` returns that call's outcome, unless `stop()` ran since that
    /// call began connecting, in which case it connects itself.
    pub(crate) async fn start(&self) -> RealtimeResult<()> {
        let token = require_token(self.shared.tokens.as_ref())?;
        let observed = self.lock_last_start().generation;

        let _guard = self.start_lock.lock().await;
        {
            let last = self.lock_last_start();
            if last.generation != observed && last.epoch == self.shared.lock_control().epoch {
                return last.result.clone();
            }
        }

        let epoch = self.shared.lock_control().epoch;
        let result = self.connect_once(&token, epoch).await;
        let mut last = self.lock_last_start();
        last.generation += 1;
        last.epoch = epoch;
        last.result = result.clone();
        result
    }

    async fn connect_once(&self, token: &str, epoch: u64) -> RealtimeResult<()> {
        let busy = {
            let state = self.shared.state.borrow();
            state.is_connected() || matches!(*state, ConnectionState::Reconnecting { .. })
        };
        if busy {
            tracing::debug!("start() ignored: connection already active");
            return Ok(());
        }

        let connecting = self.shared.with_epoch(epoch, |_| {
            self.shared.state.send_replace(ConnectionState::Connecting);
        });
        if connecting.is_none() {
            return Err(RealtimeError::Transport(
                "stopped while connecting".to_string(),
            ));
        }
        tracing::info!("Connecting via {}", self.shared.transport.name());

        match self.shared.transport.connect(token).await {
            Ok(link) => {
                let shared = self.shared.clone();
                let live = self.shared.with_epoch(epoch, |control| {
                    let (inbound, handle) = shared.go_live(link);
                    let task = tokio::spawn(supervise(shared.clone(), epoch, inbound, handle));
                    if let Some(previous) = control.task.replace(task) {
                        previous.abort();
                    }
                });
                match live {
                    Some(()) => {
                        tracing::info!("Connected via {}", self.shared.transport.name());
                        Ok(())
                    }
                    None => Err(RealtimeError::Transport(
                        "stopped while connecting".to_string(),
                    )),
                }
            }
            Err(e) => {
                tracing::warn!("Connect failed: {}", e);
                self.shared.with_epoch(epoch, |_| {
                    self.shared.state.send_replace(ConnectionState::Disconnected);
                });
                Err(e)
            }
        }
    }

    /// Tear the connection down from any state. Group reference counts survive.
    pub(crate) fn stop(&self) {
        let previous = {
            let mut control = self.shared.lock_control();
            control.epoch += 1;
            if let Some(task) = control.task.take() {
                task.abort();
            }
            if let Some(link) = self.shared.registry.detach() {
                link.abandon();
            }
            self.shared.attempts.store(0, Ordering::SeqCst);
            self.shared.state.send_replace(ConnectionState::Disconnected)
        };
        if previous != ConnectionState::Disconnected {
            tracing::info!("Connection stopped (was {:?})", previous);
        }
    }

    pub(crate) fn state(&self) -> ConnectionState {
        self.shared.state.borrow().clone()
    }

    pub(crate) fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    pub(crate) fn reconnect_attempts(&self) -> u32 {
        self.shared.attempts.load(Ordering::SeqCst)
    }

    fn lock_last_start(&self) -> MutexGuard<'_, StartOutcome> {
        self.last_start.lock().expect("start outcome mutex poisoned")
    }
}

/// Connection task: runs sessions back to back until reconnecting gives up
/// or the epoch goes stale.
async fn supervise(
    shared: Arc<Shared>,
    epoch: u64,
    mut inbound: UnboundedReceiver<WsEnvelope<ServerEvent>>,
    mut link: LinkHandle,
) {
    loop {
        let reason = run_session(&shared, &mut inbound, &link).await;

        let dropped = link.abandon();
        let current = shared.with_epoch(epoch, |_| {
            shared.registry.detach();
        });
        if current.is_none() {
            return;
        }
        tracing::warn!(
            "Connection closed: {} ({} invocations unanswered)",
            reason,
            dropped
        );

        match reconnect(&shared, epoch).await {
            Some((next_inbound, next_link)) => {
                inbound = next_inbound;
                link = next_link;
            }
            None => return,
        }
    }
}

async fn run_session(
    shared: &Shared,
    inbound: &mut UnboundedReceiver<WsEnvelope<ServerEvent>>,
    link: &LinkHandle,
) -> &'static str {
    let mut ack_check = tokio::time::interval((shared.ack_timeout / 2).max(MIN_ACK_CHECK));
    ack_check.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut silence_deadline = shared.server_timeout.map(|timeout| Instant::now() + timeout);

    loop {
        tokio::select! {
            frame = inbound.recv() => match frame {
                Some(envelope) => {
                    if let Some(timeout) = shared.server_timeout {
                        silence_deadline = Some(Instant::now() + timeout);
                    }
                    shared.handle_frame(link, envelope);
                }
                None => return "link closed",
            },
            _ = ack_check.tick() => {
                for pending in link.expire(shared.ack_timeout) {
                    let failure = RealtimeError::GroupOperationFailed {
                        group: pending.command.group(),
                        target: pending.command.target().to_string(),
                        reason: format!("no acknowledgement within {:?}", shared.ack_timeout),
                    };
                    tracing::warn!("{}", failure);
                }
            }
            _ = sleep_until(silence_deadline) => return "server silent",
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Retry on the policy's schedule. Returns the new link, or `None` once the
/// connection is `Lost` or stopped.
async fn reconnect(
    shared: &Arc<Shared>,
    epoch: u64,
) -> Option<(UnboundedReceiver<WsEnvelope<ServerEvent>>, LinkHandle)> {
    let mut failures = 0u32;

    loop {
        if !shared.policy.allows_retry(failures) {
            shared.with_epoch(epoch, |_| {
                shared.attempts.store(failures, Ordering::SeqCst);
                shared
                    .state
                    .send_replace(ConnectionState::Lost { attempts: failures });
            })?;
            tracing::error!("{}", RealtimeError::ConnectionLost { attempts: failures });
            return None;
        }

        let attempt = failures + 1;
        shared.with_epoch(epoch, |_| {
            shared.attempts.store(attempt, Ordering::SeqCst);
            shared
                .state
                .send_replace(ConnectionState::Reconnecting { attempt });
        })?;

        let delay = shared.policy.next_delay(failures);
        tracing::info!("Reconnecting in {:?} (attempt {})", delay, attempt);
        tokio::time::sleep(delay).await;

        let token = match require_token(shared.tokens.as_ref()) {
            Ok(token) => token,
            Err(e) => {
                tracing::warn!("Reconnect attempt {} skipped: {}", attempt, e);
                failures += 1;
                continue;
            }
        };

        match shared.transport.connect(&token).await {
            Ok(link) => {
                let live = shared.with_epoch(epoch, |_| shared.go_live(link))?;
                tracing::info!("Reconnected on attempt {}", attempt);
                return Some(live);
            }
            Err(e) => {
                tracing::warn!("Reconnect attempt {} failed: {}", attempt, e);
                failures += 1;
            }
        }
    }
}
