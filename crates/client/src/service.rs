//! Session-scoped notification service.
//!
//! Ties the pieces together: when a session starts the store is filled from
//! the REST API, and after a short delay the socket is connected so pushed
//! envelopes keep it current. Local actions change the store optimistically
//! and are rolled back if the backend call fails.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use academia_shared::{
    ApiError, NotificationId, NotificationPatch, NotificationRecord, NOTIFICATIONS_CHANNEL,
    NOTIFICATION_COUNT_CHANNEL,
};
use chrono::Utc;
use futures_channel::mpsc::unbounded;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::api_client::NotificationApi;
use crate::auth_session::{self, AuthSession, SessionGate};
use crate::config::ClientConfig;
use crate::stores::NotificationsHandle;
use crate::ws::{ConnectionState, MessageRouter, ReconnectController, StompTransport, Transport};

/// Builds the API used for a session.
pub type ApiFactory = Arc<dyn Fn(&AuthSession) -> Arc<dyn NotificationApi> + Send + Sync>;

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("no active session")]
    NoSession,
    #[error("notification {0} not found")]
    NotFound(NotificationId),
    #[error(transparent)]
    Api(#[from] ApiError),
}

impl NotificationError {
    /// Message suitable for an error toast.
    pub fn user_message(&self) -> String {
        match self {
            NotificationError::Api(e) => e.user_message(),
            other => other.to_string(),
        }
    }
}

struct ActiveSession {
    session: AuthSession,
    api: Arc<dyn NotificationApi>,
    generation: u64,
    connect_task: Option<JoinHandle<()>>,
}

/// Notification state and real-time delivery for one signed-in user at a time.
pub struct NotificationService {
    config: ClientConfig,
    store: NotificationsHandle,
    controller: ReconnectController,
    api_factory: ApiFactory,
    active: Mutex<Option<ActiveSession>>,
    generation: AtomicU64,
    router_task: JoinHandle<()>,
}

impl NotificationService {
    /// Must be called from within a tokio runtime; the router loop is spawned here.
    pub fn new(config: ClientConfig, transport: Arc<dyn Transport>, api_factory: ApiFactory) -> Self {
        let store = NotificationsHandle::new();
        let (inbound_tx, inbound_rx) = unbounded();
        let controller = ReconnectController::new(
            transport,
            config.reconnect.clone(),
            vec![
                NOTIFICATIONS_CHANNEL.to_string(),
                NOTIFICATION_COUNT_CHANNEL.to_string(),
            ],
            inbound_tx,
        );
        let router_task = tokio::spawn(MessageRouter::new(store.clone()).run(inbound_rx));

        Self {
            config,
            store,
            controller,
            api_factory,
            active: Mutex::new(None),
            generation: AtomicU64::new(0),
            router_task,
        }
    }

    /// Service over the real REST API and STOMP transport.
    pub fn with_defaults(config: ClientConfig) -> Self {
        let api_url = config.api_url.clone();
        let factory: ApiFactory = Arc::new(move |session: &AuthSession| {
            Arc::new(auth_session::client_for(&api_url, Some(session))) as Arc<dyn NotificationApi>
        });
        Self::new(config, Arc::new(StompTransport::new()), factory)
    }

    pub fn store(&self) -> &NotificationsHandle {
        &self.store
    }

    pub fn controller(&self) -> &ReconnectController {
        &self.controller
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.controller.state()
    }

    pub fn watch_connection(&self) -> watch::Receiver<ConnectionState> {
        self.controller.watch_state()
    }

    pub fn current_user(&self) -> Option<String> {
        self.active.lock().as_ref().map(|a| a.session.user_id.clone())
    }

    pub fn is_active(&self) -> bool {
        self.active.lock().is_some()
    }

    /// Start serving `session`: bulk load, then connect after the configured delay.
    pub async fn init(&self, session: AuthSession) {
        self.teardown().await;

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let api = (self.api_factory)(&session);
        let request =
            auth_session::connect_request_for(&self.config.api_url, &self.config.ws_path, &session);
        crate::log_info!("Notifications starting for {}", session.user_id);

        *self.active.lock() = Some(ActiveSession {
            session,
            api,
            generation,
            connect_task: None,
        });

        self.load_all().await;

        let Some(request) = request else {
            return;
        };
        let controller = self.controller.clone();
        let delay = self.config.connect_delay;
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            controller.connect(request).await;
        });

        let mut active = self.active.lock();
        match active.as_mut() {
            Some(a) if a.generation == generation => a.connect_task = Some(task),
            // The session ended while loading.
            _ => task.abort(),
        }
    }

    /// Stop serving the current session and forget its notifications.
    pub async fn teardown(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        let previous = self.active.lock().take();
        if let Some(mut previous) = previous {
            if let Some(task) = previous.connect_task.take() {
                task.abort();
            }
            crate::log_info!("Notifications stopped for {}", previous.session.user_id);
        }
        self.controller.disconnect().await;
        self.store.clear();
    }

    /// Replace the store with the server's list and count.
    ///
    /// Failures reset to empty and are only logged. A result that arrives
    /// after the session changed is discarded.
    pub async fn load_all(&self) {
        let Some((user_id, api, generation)) = self.session_parts() else {
            return;
        };

        let (records, count) = tokio::join!(api.list_notifications(&user_id), api.unread_count(&user_id));
        let records = records.unwrap_or_else(|e| {
            crate::log_warn!("Loading notifications failed: {}", e);
            Vec::new()
        });
        let count = count.unwrap_or_else(|e| {
            crate::log_warn!("Loading unread count failed: {}", e);
            0
        });

        if self.generation.load(Ordering::SeqCst) != generation {
            crate::log_debug!("Discarding notifications loaded for a previous session");
            return;
        }
        crate::log_info!("Loaded {} notifications ({} unread)", records.len(), count);
        self.store.replace_all(records, count);
    }

    fn session_parts(&self) -> Option<(String, Arc<dyn NotificationApi>, u64)> {
        self.active
            .lock()
            .as_ref()
            .map(|a| (a.session.user_id.clone(), a.api.clone(), a.generation))
    }

    fn require_session(&self) -> Result<(String, Arc<dyn NotificationApi>), NotificationError> {
        self.session_parts()
            .map(|(user_id, api, _)| (user_id, api))
            .ok_or(NotificationError::NoSession)
    }

    fn require_record(&self, id: &NotificationId) -> Result<NotificationRecord, NotificationError> {
        self.store
            .get(id)
            .ok_or_else(|| NotificationError::NotFound(id.clone()))
    }

    pub async fn mark_as_read(&self, id: &NotificationId) -> Result<(), NotificationError> {
        let (user_id, api) = self.require_session()?;
        let prior = self.require_record(id)?;
        if prior.read {
            return Ok(());
        }

        self.store
            .update_fields(id, NotificationPatch::mark_read(Utc::now()));
        if let Err(e) = api.mark_as_read(&user_id, id).await {
            crate::log_error!("Marking {} as read failed, rolling back: {}", id, e);
            self.store.update_fields(id, NotificationPatch::restore(&prior));
            return Err(e.into());
        }
        Ok(())
    }

    pub async fn mark_as_unread(&self, id: &NotificationId) -> Result<(), NotificationError> {
        let (user_id, api) = self.require_session()?;
        let prior = self.require_record(id)?;
        if !prior.read {
            return Ok(());
        }

        self.store.update_fields(id, NotificationPatch::mark_unread());
        if let Err(e) = api.mark_as_unread(&user_id, id).await {
            crate::log_error!("Marking {} as unread failed, rolling back: {}", id, e);
            self.store.update_fields(id, NotificationPatch::restore(&prior));
            return Err(e.into());
        }
        Ok(())
    }

    pub async fn mark_all_as_read(&self) -> Result<(), NotificationError> {
        let (user_id, api) = self.require_session()?;
        let now = Utc::now();
        let changed: Vec<NotificationRecord> = self.store.update(|store| {
            let unread: Vec<_> = store
                .records()
                .iter()
                .filter(|r| !r.read)
                .cloned()
                .collect();
            for record in &unread {
                store.update_fields(&record.id, NotificationPatch::mark_read(now));
            }
            unread
        });

        if let Err(e) = api.mark_all_as_read(&user_id).await {
            crate::log_error!("Marking all as read failed, rolling back: {}", e);
            self.store.update(|store| {
                for record in &changed {
                    store.update_fields(&record.id, NotificationPatch::restore(record));
                }
            });
            return Err(e.into());
        }
        Ok(())
    }

    pub async fn delete(&self, id: &NotificationId) -> Result<(), NotificationError> {
        let (user_id, api) = self.require_session()?;
        let removed = self
            .store
            .remove(id)
            .ok_or_else(|| NotificationError::NotFound(id.clone()))?;

        if let Err(e) = api.delete_notification(&user_id, id).await {
            crate::log_error!("Deleting {} failed, rolling back: {}", id, e);
            self.store.reinsert(vec![removed]);
            return Err(e.into());
        }
        Ok(())
    }

    pub async fn delete_all_read(&self) -> Result<(), NotificationError> {
        let (user_id, api) = self.require_session()?;
        let removed = self.store.remove_read();

        if let Err(e) = api.delete_all_read(&user_id).await {
            crate::log_error!("Deleting read notifications failed, rolling back: {}", e);
            self.store.reinsert(removed);
            return Err(e.into());
        }
        Ok(())
    }

    /// Follow `gate`: init on sign-in or user switch, teardown on sign-out.
    pub fn follow(self: &Arc<Self>, gate: &SessionGate) -> JoinHandle<()> {
        let service = Arc::clone(self);
        let mut sessions = gate.watch();
        tokio::spawn(async move {
            let mut last: Option<AuthSession> = None;
            loop {
                let current = sessions.borrow_and_update().clone();
                if current != last {
                    match current.clone() {
                        Some(session) => service.init(session).await,
                        None => service.teardown().await,
                    }
                    last = current;
                }
                if sessions.changed().await.is_err() {
                    break;
                }
            }
            crate::log_debug!("Session gate dropped, stopping");
        })
    }

    /// Teardown and stop the router loop.
    pub async fn shutdown(&self) {
        self.teardown().await;
        self.router_task.abort();
    }
}

impl Drop for NotificationService {
    fn drop(&mut self) {
        self.router_task.abort();
    }
}
