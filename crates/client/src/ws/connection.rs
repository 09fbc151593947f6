//! Connection lifecycle with bounded auto-reconnect.
//!
//! The [`ReconnectController`] owns exactly one logical transport connection
//! per session. `connect` always tears down whatever came before it, failed
//! attempts are retried on an exponential schedule up to a ceiling, and
//! `disconnect` is idempotent from any state.

use std::sync::Arc;
use std::time::Duration;

use futures_channel::mpsc::{UnboundedReceiver, UnboundedSender};
use futures_util::StreamExt;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

use super::transport::{ConnectRequest, Transport, TransportEvent, TransportSession};
use super::InboundMessage;

/// Connection state of the notification socket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    pub fn is_connecting(&self) -> bool {
        matches!(self, ConnectionState::Connecting)
    }
}

/// Configuration for auto-reconnect behavior
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    /// Maximum number of automatic retries after a failure (0 = never retry)
    pub max_attempts: u32,
    /// Delay before the first retry, in milliseconds
    pub initial_delay_ms: u64,
    /// Upper bound for any single delay, in milliseconds
    pub max_delay_ms: u64,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 2000,
            max_delay_ms: 60_000,
            backoff_multiplier: 2,
        }
    }
}

impl ReconnectConfig {
    /// Delay before retry number `attempt` (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = u64::from(self.backoff_multiplier).saturating_pow(attempt);
        let delay = self.initial_delay_ms.saturating_mul(factor);
        Duration::from_millis(delay.min(self.max_delay_ms))
    }
}

/// Bounded retry state: the attempt counter plus its ceiling.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: ReconnectConfig,
    attempt: u32,
}

impl Backoff {
    pub fn new(config: ReconnectConfig) -> Self {
        Self { config, attempt: 0 }
    }

    /// Retries scheduled since the last reset.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Record a failure. Returns the delay before the next try, or `None`
    /// once the ceiling is reached.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempt >= self.config.max_attempts {
            return None;
        }
        let delay = self.config.delay_for_attempt(self.attempt);
        self.attempt += 1;
        Some(delay)
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

/// Everything the controller mutates, behind one lock.
struct Inner {
    /// Bumped on every connect and disconnect; stale tasks compare against it.
    generation: u64,
    request: Option<ConnectRequest>,
    backoff: Backoff,
    session: Option<Box<dyn TransportSession>>,
    subscriptions: Vec<String>,
    attempt_task: Option<JoinHandle<()>>,
    retry_task: Option<JoinHandle<()>>,
    pump_task: Option<JoinHandle<()>>,
}

/// Manages one logical transport connection.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct ReconnectController {
    transport: Arc<dyn Transport>,
    channels: Arc<Vec<String>>,
    inbound: UnboundedSender<InboundMessage>,
    state: Arc<watch::Sender<ConnectionState>>,
    inner: Arc<Mutex<Inner>>,
}

impl ReconnectController {
    /// `channels` are subscribed after every successful connect; messages on
    /// them are forwarded to `inbound`.
    pub fn new(
        transport: Arc<dyn Transport>,
        config: ReconnectConfig,
        channels: Vec<String>,
        inbound: UnboundedSender<InboundMessage>,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            transport,
            channels: Arc::new(channels),
            inbound,
            state: Arc::new(state),
            inner: Arc::new(Mutex::new(Inner {
                generation: 0,
                request: None,
                backoff: Backoff::new(config),
                session: None,
                subscriptions: Vec::new(),
                attempt_task: None,
                retry_task: None,
                pump_task: None,
            })),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Retries scheduled since the last successful connect or explicit disconnect.
    pub async fn retry_attempts(&self) -> u32 {
        self.inner.lock().await.backoff.attempt()
    }

    pub async fn has_pending_retry(&self) -> bool {
        self.inner
            .lock()
            .await
            .retry_task
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    pub async fn subscription_count(&self) -> usize {
        self.inner.lock().await.subscriptions.len()
    }

    /// Start a fresh connection, tearing down any previous one first.
    ///
    /// Returns immediately; the attempt runs in the background.
    pub async fn connect(&self, request: ConnectRequest) {
        let mut inner = self.inner.lock().await;
        self.teardown(&mut inner).await;
        inner.request = Some(request);
        self.start_attempt(&mut inner);
    }

    /// Unsubscribe, close, cancel pending work and reset the retry counter.
    pub async fn disconnect(&self) {
        let mut inner = self.inner.lock().await;
        self.teardown(&mut inner).await;
        inner.request = None;
    }

    async fn teardown(&self, inner: &mut Inner) {
        inner.generation += 1;

        for task in [
            inner.attempt_task.take(),
            inner.retry_task.take(),
            inner.pump_task.take(),
        ]
        .into_iter()
        .flatten()
        {
            task.abort();
        }

        let subscriptions = std::mem::take(&mut inner.subscriptions);
        if let Some(mut session) = inner.session.take() {
            for id in &subscriptions {
                if let Err(e) = session.unsubscribe(id).await {
                    crate::log_debug!("Unsubscribe {} failed: {}", id, e);
                }
            }
            session.close().await;
            crate::log_info!("Notification socket disconnected");
        }

        inner.backoff.reset();
        self.state.send_replace(ConnectionState::Disconnected);
    }

    fn start_attempt(&self, inner: &mut Inner) {
        let Some(request) = inner.request.clone() else {
            return;
        };
        let generation = inner.generation;
        self.state.send_replace(ConnectionState::Connecting);

        let controller = self.clone();
        inner.attempt_task = Some(tokio::spawn(async move {
            let result = controller.transport.connect(&request).await;
            controller.finish_attempt(generation, result).await;
        }));
    }

    async fn finish_attempt(
        &self,
        generation: u64,
        result: Result<
            (Box<dyn TransportSession>, UnboundedReceiver<TransportEvent>),
            super::TransportError,
        >,
    ) {
        let mut inner = self.inner.lock().await;

        if inner.generation != generation {
            // Superseded by a disconnect or a newer connect.
            if let Ok((mut session, _)) = result {
                session.close().await;
            }
            return;
        }
        // This task is finishing on its own; dropping the handle does not abort it.
        inner.attempt_task = None;

        match result {
            Ok((mut session, events)) => {
                let mut subscriptions = Vec::with_capacity(self.channels.len());
                for channel in self.channels.iter() {
                    match session.subscribe(channel).await {
                        Ok(id) => subscriptions.push(id),
                        Err(e) => crate::log_warn!("Subscribing to {} failed: {}", channel, e),
                    }
                }

                inner.session = Some(session);
                inner.subscriptions = subscriptions;
                inner.backoff.reset();
                inner.pump_task = Some(tokio::spawn(self.clone().pump(generation, events)));
                self.state.send_replace(ConnectionState::Connected);
                crate::log_info!(
                    "Notification socket connected with {} subscriptions",
                    inner.subscriptions.len()
                );
            }
            Err(e) => {
                crate::log_warn!("Notification socket connect failed: {}", e);
                self.state.send_replace(ConnectionState::Disconnected);
                self.schedule_retry(&mut inner);
            }
        }
    }

    fn schedule_retry(&self, inner: &mut Inner) {
        let Some(delay) = inner.backoff.next_delay() else {
            crate::log_info!("Reconnect attempts exhausted, staying disconnected");
            return;
        };
        crate::log_info!(
            "Reconnecting in {}ms (attempt {})",
            delay.as_millis(),
            inner.backoff.attempt()
        );

        let generation = inner.generation;
        let controller = self.clone();
        inner.retry_task = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            controller.retry(generation).await;
        }));
    }

    async fn retry(&self, generation: u64) {
        let mut inner = self.inner.lock().await;
        if inner.generation != generation {
            return;
        }
        inner.retry_task = None;
        self.start_attempt(&mut inner);
    }

    /// Forward transport events until the session ends.
    async fn pump(self, generation: u64, mut events: UnboundedReceiver<TransportEvent>) {
        while let Some(event) = events.next().await {
            match event {
                TransportEvent::Message {
                    destination, body, ..
                } => {
                    if self
                        .inbound
                        .unbounded_send(InboundMessage { destination, body })
                        .is_err()
                    {
                        crate::log_debug!("Router is gone, dropping inbound message");
                    }
                }
                TransportEvent::Closed { reason } => {
                    self.connection_lost(generation, &reason).await;
                    return;
                }
            }
        }
        self.connection_lost(generation, "event stream ended").await;
    }

    async fn connection_lost(&self, generation: u64, reason: &str) {
        let mut inner = self.inner.lock().await;
        if inner.generation != generation {
            return;
        }
        crate::log_warn!("Notification socket lost: {}", reason);

        // Called from the pump itself, so release its handle instead of aborting.
        inner.pump_task = None;
        inner.subscriptions.clear();
        if let Some(mut session) = inner.session.take() {
            session.close().await;
        }
        self.state.send_replace(ConnectionState::Disconnected);
        self.schedule_retry(&mut inner);
    }
}
