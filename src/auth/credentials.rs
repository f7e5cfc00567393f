//! Process-scoped credential store: resolves a valid access token once per
//! run from the cached token, or by refreshing against the token endpoint.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::auth::tokens_file::TokenCache;
use crate::auth::{oauth, token_store, tokens_file};
use crate::config::Config;
use crate::error::AuthError;
use crate::retry::RetryPolicy;

#[derive(Clone)]
pub struct CredentialStore {
    pub client_id: String,
    pub client_secret: Option<String>,
    pub user_email: String,
    retry: RetryPolicy,
}

impl CredentialStore {
    pub fn from_config(cfg: &Config, retry: RetryPolicy) -> Result<Self, AuthError> {
        let client_id = cfg.client_id.clone();
        let user_email = cfg
            .user_email
            .clone()
            .ok_or_else(|| AuthError::Config("user_email not set in config".to_string()))?;

        let client_secret = token_store::load_client_secret(&client_id)?
            .or_else(|| std::env::var("OAUTH_CLIENT_SECRET").ok());

        Ok(Self {
            client_id,
            client_secret,
            user_email,
            retry,
        })
    }

    /// Returns a valid access token: cached-and-unexpired, else a refresh
    /// exchange. Never falls back to interactive auth; the scheduled run has
    /// no browser; provisioning happens via `gmail_digest auth`.
    pub fn obtain_access_token(&self) -> Result<String, AuthError> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);

        if let Some(at) = usable_cached_token(tokens_file::load_tokens(), now) {
            return Ok(at);
        }

        let refresh_token = token_store::load_refresh_token(&self.user_email)?
            .or_else(|| std::env::var("GMAIL_REFRESH_TOKEN").ok())
            .ok_or(AuthError::NoRefreshToken)?;

        let t = oauth::refresh_access_token(
            &self.client_id,
            self.client_secret.as_deref(),
            &refresh_token,
            &self.retry,
        )?;

        // Surface the refreshed token to the next run. Default expiry pads
        // slightly under the usual hour.
        let exp = t.expires_in.map(|s| now + s as i64).unwrap_or(now + 3500);
        tokens_file::save_tokens(Some(&t.access_token), Some(exp))?;

        if let Some(rt) = &t.refresh_token
            && let Err(e) = token_store::save_refresh_token(&self.user_email, rt)
        {
            log::warn!("could not save rotated refresh token to keyring: {e}");
        }

        Ok(t.access_token)
    }
}

/// A cached token is only usable when the cache file loaded cleanly and the
/// token is unexpired. A corrupt or unreadable cache falls through to the
/// refresh exchange rather than failing the run.
fn usable_cached_token(loaded: Result<Option<TokenCache>, AuthError>, now: i64) -> Option<String> {
    let cache = match loaded {
        Ok(c) => c?,
        Err(e) => {
            log::warn!("ignoring unreadable token cache: {e}");
            return None;
        }
    };
    let (at, exp) = (cache.access_token?, cache.expires_at_epoch?);
    if now < exp {
        log::debug!("using cached access token (expires in {}s)", exp - now);
        Some(at)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache(at: Option<&str>, exp: Option<i64>) -> Option<TokenCache> {
        Some(TokenCache {
            access_token: at.map(String::from),
            expires_at_epoch: exp,
        })
    }

    #[test]
    fn corrupt_cache_falls_through_instead_of_failing() {
        let parse_err = serde_json::from_str::<TokenCache>("{not json").unwrap_err();
        let loaded: Result<Option<TokenCache>, AuthError> = Err(AuthError::Json(parse_err));
        assert!(usable_cached_token(loaded, 100).is_none());
    }

    #[test]
    fn cached_token_only_used_before_expiry() {
        let hit = usable_cached_token(Ok(cache(Some("tok"), Some(200))), 100);
        assert_eq!(hit.as_deref(), Some("tok"));
        assert!(usable_cached_token(Ok(cache(Some("tok"), Some(50))), 100).is_none());
        assert!(usable_cached_token(Ok(cache(None, Some(200))), 100).is_none());
        assert!(usable_cached_token(Ok(None), 100).is_none());
    }
}
