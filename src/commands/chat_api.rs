use crate::commands::{AppState, TauriHost};
use crate::envelope::Message;
use crate::identity::PeerIdentity;
use crate::peer::{PeerJsBroker, RtcMediaDevices};
use crate::session::PeerSession;
use std::sync::Arc;
use tauri::{command, AppHandle, Runtime, State};
use tracing::{info, warn};

fn build_session<R: Runtime>(app: AppHandle<R>, state: &AppState) -> Result<Arc<PeerSession>, String> {
    let broker = PeerJsBroker::new(state.config.peerjs.clone()).map_err(|e| e.to_string())?;
    let devices = RtcMediaDevices::new(state.config.media);
    let host = TauriHost::new(app, state.messages());
    let session = PeerSession::new(state.config.clone(), Arc::new(broker), Arc::new(devices), Arc::new(host))
        .map_err(|e| e.to_string())?;
    Ok(Arc::new(session))
}

/// Registers `id` with the broker, creating the session on first use
#[command]
pub async fn connect<R: Runtime>(app: AppHandle<R>, state: State<'_, AppState>, id: String) -> Result<PeerIdentity, String> {
    let session = {
        let existing = state.session.lock().clone();
        match existing {
            Some(session) => session,
            None => {
                let session = build_session(app, &state)?;
                *state.session.lock() = Some(session.clone());
                session
            }
        }
    };
    session.register(&id).await.map_err(|e| e.to_string())?;
    info!(id, "session connected");
    Ok(session.identity())
}

/// Sends and stores a chat message; returns it for display
#[command]
pub async fn send_message(state: State<'_, AppState>, remote_id: String, text: String) -> Result<Message, String> {
    let session = state.session()?;
    let message = session.send(&remote_id, &text).await.map_err(|e| e.to_string())?;
    if let Err(e) = state.messages().save(&message) {
        warn!(error = %e, "outbound message not stored");
    }
    Ok(message)
}

#[command]
pub async fn probe_peer(state: State<'_, AppState>, remote_id: String) -> Result<bool, String> {
    Ok(state.session()?.probe(&remote_id).await)
}

#[command]
pub fn identity_status(state: State<'_, AppState>) -> Option<PeerIdentity> {
    state.session.lock().as_ref().map(|s| s.identity())
}

#[command]
pub async fn disconnect(state: State<'_, AppState>) -> Result<(), String> {
    let session = state.session.lock().take();
    if let Some(session) = session {
        session.logout().await;
    }
    Ok(())
}
