mod config;

use std::sync::Arc;

use anyhow::Context;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use morsel_api::{HttpApi, TokenStore};
use morsel_gateway::{ConnectionManager, WsConnector};
use morsel_sync::{Session, SessionConfig};

use crate::config::ClientConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "morsel=debug".into()),
        )
        .init();

    let config = ClientConfig::from_env()?;

    let tokens = Arc::new(TokenStore::new(
        Some(config.access_token.clone()),
        config.refresh_token.clone(),
        None,
    ));
    let user_id = config
        .user_id
        .clone()
        .or_else(|| tokens.user_id())
        .context("no MORSEL_USER_ID and the access token carries no subject")?;

    let api = Arc::new(HttpApi::new(&config.api, tokens.clone())?);
    let manager = ConnectionManager::spawn(config.gateway.clone(), tokens.clone(), WsConnector);
    let session = Session::start(SessionConfig::new(&user_id), manager.clone(), api);

    info!(user_id = %user_id, url = %config.gateway.url, "Starting Morsel client");
    session.bootstrap().await;
    manager.connect(config.access_token.clone());

    let mut events = manager.subscribe();
    let mut toasts = session.toasts();
    let mut state = manager.state();
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => info!(
                    kind = %event.kind(),
                    conversation_id = ?event.conversation_id(),
                    "Event"
                ),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Event log lagging"),
                Err(RecvError::Closed) => break,
            },
            toast = toasts.recv() => match toast {
                Ok(toast) => info!(
                    title = %toast.title,
                    description = %toast.description,
                    link = ?toast.action.as_ref().map(|link| link.path()),
                    "Toast"
                ),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Toasts lagging"),
                Err(RecvError::Closed) => break,
            },
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = *state.borrow_and_update();
                info!(state = ?current, "Connection state");
            }
            _ = &mut shutdown => {
                info!("Shutting down");
                break;
            }
        }
    }

    session.with_state(|state| {
        info!(
            feed = state.feed.len(),
            unread_messages = state.conversations.unread_total(),
            unread_notifications = state.activity.unread_notifications(),
            "Final state"
        );
    });
    manager.shutdown();
    Ok(())
}
