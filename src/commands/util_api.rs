use crate::store::avatar;
use crate::utils::escape_html;
use tauri::command;

/// Escapes user text before the webview renders it
#[command]
pub fn escape_text(text: String) -> String {
    escape_html(&text)
}

#[command]
pub fn avatar_url(uuid: String, size: Option<u32>) -> String {
    avatar::dicebear_url(&uuid, size.unwrap_or(100))
}

/// Offline avatar, for when the DiceBear service is unreachable
#[command]
pub fn identicon(uuid: String, size: Option<u32>) -> String {
    avatar::identicon_data_uri(&uuid, size.unwrap_or(100))
}
