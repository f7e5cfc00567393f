//! Non-secret access-token metadata cached between runs in
//! ~/.config/gmail_digest/tokens.json. The refresh token itself lives in the
//! keyring, never here.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::PathBuf;

use crate::config::APP_DIR;
use crate::error::AuthError;

#[derive(Debug, Serialize, Deserialize)]
pub struct TokenCache {
    pub access_token: Option<String>,
    pub expires_at_epoch: Option<i64>, // epoch seconds
}

fn tokens_path() -> Result<PathBuf, AuthError> {
    let mut p = dirs::config_dir()
        .ok_or_else(|| AuthError::Io(io::Error::other("no config dir available")))?
        .join(APP_DIR);
    fs::create_dir_all(&p)?;
    p.push("tokens.json");
    Ok(p)
}

pub fn save_tokens(access_token: Option<&str>, expires_at_epoch: Option<i64>) -> Result<(), AuthError> {
    let p = tokens_path()?;
    let cache = TokenCache {
        access_token: access_token.map(|s| s.to_string()),
        expires_at_epoch,
    };
    let s = serde_json::to_string_pretty(&cache)?;
    fs::write(&p, s)?;
    Ok(())
}

pub fn load_tokens() -> Result<Option<TokenCache>, AuthError> {
    let p = tokens_path()?;
    if !p.exists() {
        return Ok(None);
    }
    let s = fs::read_to_string(&p)?;
    let cache: TokenCache = serde_json::from_str(&s)?;
    Ok(Some(cache))
}
