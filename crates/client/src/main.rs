//! academia-notify - follows a user's notifications from the terminal.
//!
//! Reads its configuration from the environment (see `ClientConfig::from_env`)
//! plus `ACADEMIA_USER_ID` and `ACADEMIA_TOKEN`, then logs every change to the
//! notification store until interrupted.

use std::sync::Arc;

use academia_client::{logging, AuthSession, ClientConfig, NotificationService, SessionGate};
use anyhow::{bail, Context, Result};

#[tokio::main]
async fn main() -> Result<()> {
    logging::init();

    let config = ClientConfig::from_env();
    let user_id = std::env::var("ACADEMIA_USER_ID").context("ACADEMIA_USER_ID is not set")?;
    let token = std::env::var("ACADEMIA_TOKEN").context("ACADEMIA_TOKEN is not set")?;

    tracing::info!("Using API at {}", config.api_url);

    let gate = SessionGate::from_config(&config);
    let service = Arc::new(NotificationService::with_defaults(config));
    let follower = service.follow(&gate);

    let mut unread = service.store().watch_unread();
    let mut connection = service.watch_connection();
    let mut seen = 0usize;

    if !gate.login(AuthSession::new(user_id, token)) {
        bail!("ACADEMIA_USER_ID and ACADEMIA_TOKEN must not be empty");
    }

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                tracing::info!("Interrupted, signing out");
                break;
            }
            changed = unread.changed() => {
                if changed.is_err() {
                    break;
                }
                let count = *unread.borrow_and_update();
                let records = service.store().snapshot();
                // New records are prepended, so the fresh ones are at the front.
                if records.len() > seen {
                    for record in records.iter().take(records.len() - seen) {
                        tracing::info!(
                            id = %record.id,
                            kind = ?record.kind,
                            "{}: {}",
                            record.title,
                            record.message
                        );
                    }
                }
                seen = records.len();
                tracing::info!("{} unread", count);
            }
            changed = connection.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *connection.borrow_and_update();
                tracing::info!("Connection {:?}", state);
            }
        }
    }

    gate.logout();
    service.shutdown().await;
    follower.abort();
    Ok(())
}
