//! In-memory transport and API used by the integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use academia_client::ws::{
    ConnectRequest, Transport, TransportError, TransportEvent, TransportSession,
};
use academia_client::NotificationApi;
use academia_shared::{ApiError, NotificationId, NotificationKind, NotificationRecord};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use futures_channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use parking_lot::Mutex;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Fail,
    Succeed,
    /// Waits for [`MockTransport::release_pending`], then connects.
    Pending,
    /// Connects, but every SUBSCRIBE to this channel fails.
    FailSubscribe(&'static str),
}

#[derive(Debug, Default)]
pub struct SessionLog {
    pub subscribed: Vec<String>,
    pub unsubscribed: Vec<String>,
    pub closed: bool,
}

#[derive(Default)]
pub struct MockTransport {
    script: Mutex<VecDeque<Outcome>>,
    fallback: Mutex<Option<Outcome>>,
    connects: AtomicUsize,
    pending: tokio::sync::Notify,
    pub attempt_times: Mutex<Vec<Instant>>,
    pub sessions: Mutex<Vec<Arc<Mutex<SessionLog>>>>,
    pub event_senders: Mutex<Vec<UnboundedSender<TransportEvent>>>,
}

impl MockTransport {
    /// Every connect has the same outcome.
    pub fn always(outcome: Outcome) -> Arc<Self> {
        let transport = Self::default();
        *transport.fallback.lock() = Some(outcome);
        Arc::new(transport)
    }

    /// Outcomes are consumed in order, then `then` applies.
    pub fn scripted(outcomes: &[Outcome], then: Outcome) -> Arc<Self> {
        let transport = Self::default();
        transport.script.lock().extend(outcomes.iter().copied());
        *transport.fallback.lock() = Some(then);
        Arc::new(transport)
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Let one `Outcome::Pending` connect go ahead.
    pub fn release_pending(&self) {
        self.pending.notify_one();
    }

    /// Sessions that were opened and never closed.
    pub fn open_sessions(&self) -> usize {
        self.sessions.lock().iter().filter(|s| !s.lock().closed).count()
    }

    pub fn session(&self, index: usize) -> Arc<Mutex<SessionLog>> {
        self.sessions.lock()[index].clone()
    }

    /// Push a MESSAGE frame body through the most recent session.
    pub fn push(&self, destination: &str, body: &str) {
        let senders = self.event_senders.lock();
        let sender = senders.last().expect("no session open");
        sender
            .unbounded_send(TransportEvent::Message {
                destination: destination.to_string(),
                subscription: None,
                body: body.to_string(),
            })
            .expect("session pump is gone");
    }

    /// Simulate the server dropping the most recent session.
    pub fn drop_connection(&self) {
        let senders = self.event_senders.lock();
        let sender = senders.last().expect("no session open");
        let _ = sender.unbounded_send(TransportEvent::Closed {
            reason: "server went away".to_string(),
        });
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(
        &self,
        _request: &ConnectRequest,
    ) -> Result<(Box<dyn TransportSession>, UnboundedReceiver<TransportEvent>), TransportError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.attempt_times.lock().push(Instant::now());

        let outcome = self
            .script
            .lock()
            .pop_front()
            .or(*self.fallback.lock())
            .unwrap_or(Outcome::Fail);

        let failing_channel = match outcome {
            Outcome::Fail => return Err(TransportError::Connect("connection refused".to_string())),
            Outcome::Succeed => None,
            Outcome::Pending => {
                self.pending.notified().await;
                None
            }
            Outcome::FailSubscribe(channel) => Some(channel),
        };

        let log = Arc::new(Mutex::new(SessionLog::default()));
        self.sessions.lock().push(log.clone());
        let (tx, rx) = unbounded();
        self.event_senders.lock().push(tx);

        Ok((
            Box::new(MockSession {
                log,
                failing_channel,
                next_id: 0,
            }),
            rx,
        ))
    }
}

struct MockSession {
    log: Arc<Mutex<SessionLog>>,
    failing_channel: Option<&'static str>,
    next_id: u32,
}

#[async_trait]
impl TransportSession for MockSession {
    async fn subscribe(&mut self, destination: &str) -> Result<String, TransportError> {
        if self.failing_channel == Some(destination) {
            return Err(TransportError::Protocol("subscription refused".to_string()));
        }
        let id = format!("sub-{}", self.next_id);
        self.next_id += 1;
        self.log.lock().subscribed.push(destination.to_string());
        Ok(id)
    }

    async fn unsubscribe(&mut self, subscription_id: &str) -> Result<(), TransportError> {
        self.log.lock().unsubscribed.push(subscription_id.to_string());
        Ok(())
    }

    async fn close(&mut self) {
        self.log.lock().closed = true;
    }
}

pub fn record(id: &str, read: bool) -> NotificationRecord {
    let created = Utc.with_ymd_and_hms(2026, 9, 1, 8, 0, 0).unwrap();
    NotificationRecord {
        id: id.into(),
        kind: NotificationKind::Info,
        title: format!("Notification {id}"),
        message: "Group 2A schedule updated".to_string(),
        user_id: "u-1".to_string(),
        read,
        read_at: read.then_some(created),
        created_at: created,
        route: None,
        json: None,
    }
}

/// Backend double. Calls are recorded; failures are switched on per endpoint.
#[derive(Default)]
pub struct MockApi {
    pub records: Mutex<Vec<NotificationRecord>>,
    pub count: Mutex<u64>,
    pub fail_load: Mutex<bool>,
    pub fail_mutations: Mutex<bool>,
    pub calls: Mutex<Vec<String>>,
    /// When set, `list_notifications` waits for a permit before answering.
    pub gate: Mutex<Option<Arc<tokio::sync::Semaphore>>>,
}

impl MockApi {
    pub fn with(records: Vec<NotificationRecord>, count: u64) -> Arc<Self> {
        let api = Self::default();
        *api.records.lock() = records;
        *api.count.lock() = count;
        Arc::new(api)
    }

    fn mutation(&self, call: String) -> Result<(), ApiError> {
        self.calls.lock().push(call);
        if *self.fail_mutations.lock() {
            return Err(ApiError::Http {
                status: 500,
                body: r#"{"title":"Internal Server Error","status":500,"detail":"database unavailable"}"#
                    .to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl NotificationApi for MockApi {
    async fn list_notifications(&self, user_id: &str) -> Result<Vec<NotificationRecord>, ApiError> {
        self.calls.lock().push(format!("list {user_id}"));
        let gate = self.gate.lock().clone();
        if let Some(gate) = gate {
            let _permit = gate.acquire().await.expect("semaphore closed");
        }
        if *self.fail_load.lock() {
            return Err(ApiError::Network("connection reset".to_string()));
        }
        Ok(self.records.lock().clone())
    }

    async fn unread_count(&self, user_id: &str) -> Result<u64, ApiError> {
        self.calls.lock().push(format!("count {user_id}"));
        if *self.fail_load.lock() {
            return Err(ApiError::Network("connection reset".to_string()));
        }
        Ok(*self.count.lock())
    }

    async fn mark_as_read(&self, user_id: &str, id: &NotificationId) -> Result<(), ApiError> {
        self.mutation(format!("read {user_id} {id}"))
    }

    async fn mark_as_unread(&self, user_id: &str, id: &NotificationId) -> Result<(), ApiError> {
        self.mutation(format!("unread {user_id} {id}"))
    }

    async fn mark_all_as_read(&self, user_id: &str) -> Result<(), ApiError> {
        self.mutation(format!("read-all {user_id}"))
    }

    async fn delete_notification(&self, user_id: &str, id: &NotificationId) -> Result<(), ApiError> {
        self.mutation(format!("delete {user_id} {id}"))
    }

    async fn delete_all_read(&self, user_id: &str) -> Result<(), ApiError> {
        self.mutation(format!("delete-read {user_id}"))
    }
}
