use crate::call::CallState;
use crate::commands::AppState;
use tauri::{command, State};

#[command]
pub async fn start_call(state: State<'_, AppState>, remote_id: String) -> Result<(), String> {
    state
        .session()?
        .start_call(&remote_id)
        .await
        .map_err(|e| e.to_string())
}

#[command]
pub async fn end_call(state: State<'_, AppState>) -> Result<(), String> {
    state.session()?.end_call().await;
    Ok(())
}

#[command]
pub async fn call_state(state: State<'_, AppState>) -> Result<CallState, String> {
    let session = state.session.lock().clone();
    match session {
        Some(session) => Ok(session.call_state().await),
        None => Ok(CallState::Idle),
    }
}
