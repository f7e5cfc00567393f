//! OS keyring storage for secrets: the OAuth refresh token (keyed by account
//! email) and the client secret (keyed by client id).

use keyring::{Entry, Error as KeyringError};

use crate::config::APP_DIR;
use crate::error::AuthError;

fn entry(user: &str) -> Result<Entry, AuthError> {
    Entry::new(APP_DIR, user).map_err(|e| AuthError::Keyring(e.to_string()))
}

pub fn save_refresh_token(account: &str, refresh_token: &str) -> Result<(), AuthError> {
    entry(account)?
        .set_password(refresh_token)
        .map_err(|e| AuthError::Keyring(e.to_string()))
}

pub fn load_refresh_token(account: &str) -> Result<Option<String>, AuthError> {
    match entry(account)?.get_password() {
        Ok(v) => Ok(Some(v)),
        Err(KeyringError::NoEntry) => Ok(None),
        Err(e) => Err(AuthError::Keyring(e.to_string())),
    }
}

pub fn save_client_secret(client_id: &str, client_secret: &str) -> Result<(), AuthError> {
    entry(client_id)?
        .set_password(client_secret)
        .map_err(|e| AuthError::Keyring(e.to_string()))
}

pub fn load_client_secret(client_id: &str) -> Result<Option<String>, AuthError> {
    match entry(client_id)?.get_password() {
        Ok(v) => Ok(Some(v)),
        Err(KeyringError::NoEntry) => Ok(None),
        Err(e) => Err(AuthError::Keyring(e.to_string())),
    }
}
