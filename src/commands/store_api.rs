use crate::commands::AppState;
use crate::envelope::Message;
use crate::store::{Accounts, Contact, Contacts, User};
use tauri::{command, State};

fn accounts(state: &AppState) -> Accounts {
    Accounts::new(state.store.clone())
}

fn contacts(state: &AppState, owner: String) -> Contacts {
    Contacts::new(state.store.clone(), owner)
}

#[command]
pub fn register_account(state: State<'_, AppState>, username: String, password: String) -> Result<User, String> {
    accounts(&state).register(&username, &password).map_err(|e| e.to_string())
}

#[command]
pub fn login(state: State<'_, AppState>, username: String, password: String) -> Result<Option<User>, String> {
    accounts(&state).login(&username, &password).map_err(|e| e.to_string())
}

#[command]
pub fn current_user(state: State<'_, AppState>) -> Result<Option<User>, String> {
    accounts(&state).current().map_err(|e| e.to_string())
}

#[command]
pub fn update_profile(state: State<'_, AppState>, user: User) -> Result<(), String> {
    accounts(&state).update(&user).map_err(|e| e.to_string())
}

#[command]
pub fn logout_account(state: State<'_, AppState>) -> Result<(), String> {
    accounts(&state).logout().map_err(|e| e.to_string())
}

#[command]
pub fn list_contacts(state: State<'_, AppState>, owner: String) -> Result<Vec<Contact>, String> {
    contacts(&state, owner).list().map_err(|e| e.to_string())
}

#[command]
pub fn add_contact(state: State<'_, AppState>, owner: String, uuid: String) -> Result<Contact, String> {
    contacts(&state, owner).add(&uuid).map_err(|e| e.to_string())
}

#[command]
pub fn search_contacts(state: State<'_, AppState>, owner: String, term: String) -> Result<Vec<Contact>, String> {
    contacts(&state, owner).search(&term).map_err(|e| e.to_string())
}

#[command]
pub fn conversation(state: State<'_, AppState>, me: String, peer: String) -> Result<Vec<Message>, String> {
    state.messages().conversation(&me, &peer).map_err(|e| e.to_string())
}
