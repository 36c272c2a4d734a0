//! Tauri plugin exposing a [`PeerSession`] and the local store to a web UI.
//!
//! Commands are invoked as `plugin:peerchat|<name>`; session notifications
//! arrive as `peerchat-*` events.

pub mod call_api;
pub mod chat_api;
pub mod store_api;
pub mod util_api;

use crate::call::CallState;
use crate::config::ClientConfig;
use crate::envelope::Message;
use crate::host::HostHandler;
use crate::identity::IdentityState;
use crate::media::{MediaSlot, MediaStream};
use crate::session::PeerSession;
use crate::store::{FileStore, KeyValueStore, MessageLog};
use crate::utils::escape_html;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use tauri::plugin::{Builder, TauriPlugin};
use tauri::{AppHandle, Emitter, Manager, Runtime};
use tracing::{debug, warn};

pub const EVENT_MESSAGE: &str = "peerchat-message";
pub const EVENT_STATUS: &str = "peerchat-status";
pub const EVENT_CALL_STATE: &str = "peerchat-call-state";
pub const EVENT_MEDIA: &str = "peerchat-media";
pub const EVENT_CALL_FAILED: &str = "peerchat-call-failed";

const STORE_FILE: &str = "peerchat.json";
const CONFIG_FILE: &str = "peerchat.config.json";

/// Plugin state managed by Tauri
pub struct AppState {
    config: ClientConfig,
    store: Arc<dyn KeyValueStore>,
    session: Mutex<Option<Arc<PeerSession>>>,
}

impl AppState {
    pub fn new(config: ClientConfig, store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            config,
            store,
            session: Mutex::new(None),
        }
    }

    pub(crate) fn session(&self) -> Result<Arc<PeerSession>, String> {
        self.session.lock().clone().ok_or_else(|| "not connected".to_string())
    }

    pub(crate) fn messages(&self) -> MessageLog {
        MessageLog::new(self.store.clone())
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct MediaBinding {
    slot: MediaSlot,
    stream_id: Option<String>,
}

/// Host that forwards session notifications to the webview as events
pub struct TauriHost<R: Runtime> {
    app: AppHandle<R>,
    log: MessageLog,
}

impl<R: Runtime> TauriHost<R> {
    pub fn new(app: AppHandle<R>, log: MessageLog) -> Self {
        Self { app, log }
    }

    fn emit<S: Serialize + Clone>(&self, event: &str, payload: S) {
        if let Err(e) = self.app.emit(event, payload) {
            warn!(event, error = %e, "failed to emit event");
        }
    }
}

impl<R: Runtime> HostHandler for TauriHost<R> {
    fn on_message(&self, message: Message) {
        if let Err(e) = self.log.save(&message) {
            warn!(error = %e, "inbound message not stored");
        }
        let shown = Message {
            text: escape_html(&message.text),
            ..message
        };
        self.emit(EVENT_MESSAGE, shown);
    }

    fn on_status(&self, state: IdentityState) {
        debug!(%state, "status event");
        self.emit(EVENT_STATUS, state);
    }

    fn on_call_state(&self, state: CallState) {
        self.emit(EVENT_CALL_STATE, state);
    }

    fn on_media(&self, slot: MediaSlot, stream: Option<Arc<dyn MediaStream>>) {
        self.emit(
            EVENT_MEDIA,
            MediaBinding {
                slot,
                stream_id: stream.map(|s| s.id().to_string()),
            },
        );
    }

    fn on_call_failed(&self, reason: &str) {
        self.emit(EVENT_CALL_FAILED, reason.to_string());
    }
}

pub fn init<R: Runtime>() -> TauriPlugin<R> {
    Builder::new("peerchat")
        .invoke_handler(tauri::generate_handler![
            chat_api::connect,
            chat_api::send_message,
            chat_api::probe_peer,
            chat_api::identity_status,
            chat_api::disconnect,
            call_api::start_call,
            call_api::end_call,
            call_api::call_state,
            store_api::register_account,
            store_api::login,
            store_api::current_user,
            store_api::update_profile,
            store_api::logout_account,
            store_api::list_contacts,
            store_api::add_contact,
            store_api::search_contacts,
            store_api::conversation,
            util_api::escape_text,
            util_api::avatar_url,
            util_api::identicon,
        ])
        .setup(|app, _api| {
            let dir = app.path().app_data_dir()?;
            let config = match ClientConfig::from_file(dir.join(CONFIG_FILE)) {
                Ok(config) => config,
                Err(e) => {
                    debug!(error = %e, "using default client config");
                    ClientConfig::default()
                }
            };
            let store = FileStore::open(dir.join(STORE_FILE))?;
            app.manage(AppState::new(config, Arc::new(store)));
            Ok(())
        })
        .build()
}
