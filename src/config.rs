use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

pub const APP_DIR: &str = "gmail_digest";

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    pub client_id: String,
    pub user_email: Option<String>,
    /// Digest recipient; defaults to user_email.
    pub send_to: Option<String>,
    pub redirect_uri: Option<String>,
    pub db_path: Option<String>,

    /// Fetch window length in hours (default 24).
    pub window_hours: Option<i64>,
    /// Extra Gmail search terms appended to the window query.
    pub extra_query: Option<String>,
    /// Restrict the fetch to these Gmail labels (e.g. ["UNREAD"]).
    pub labels: Option<Vec<String>>,

    pub model: Option<String>,
    pub openai_base_url: Option<String>,
    pub summary_max_tokens: Option<u32>,
    /// Per-message character budget for prompt bodies (default 1200).
    pub body_char_budget: Option<usize>,

    /// When set (together with NOTION_SECRET in the env), the composed digest
    /// is mirrored to this Notion database.
    pub notion_db_id: Option<String>,
    pub desktop_notification: Option<bool>,
}

impl Config {
    pub fn user_email(&self) -> Result<&str> {
        self.user_email
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("user_email not set in config"))
    }

    pub fn recipient(&self) -> Result<&str> {
        match self.send_to.as_deref() {
            Some(to) => Ok(to),
            None => self.user_email(),
        }
    }

    pub fn window_hours(&self) -> i64 {
        self.window_hours.unwrap_or(24)
    }

    pub fn model(&self) -> &str {
        self.model.as_deref().unwrap_or("gpt-4o")
    }

    pub fn summary_max_tokens(&self) -> u32 {
        self.summary_max_tokens.unwrap_or(120)
    }

    pub fn body_char_budget(&self) -> usize {
        self.body_char_budget.unwrap_or(1200)
    }
}

fn config_dir() -> Result<PathBuf> {
    Ok(dirs::config_dir()
        .ok_or_else(|| anyhow::anyhow!("no config dir available"))?
        .join(APP_DIR))
}

pub fn config_path() -> Result<PathBuf> {
    let mut p = config_dir()?;
    fs::create_dir_all(&p)?;
    p.push("config.toml");
    Ok(p)
}

pub fn default_db_path() -> Result<PathBuf> {
    let mut p = config_dir()?;
    fs::create_dir_all(&p)?;
    p.push("digest.db");
    Ok(p)
}

pub fn load_config() -> Result<Config> {
    let path = config_path()?;
    if !path.exists() {
        // create a template config for users to edit
        let sample = Config {
            client_id: "YOUR_CLIENT_ID.apps.googleusercontent.com".to_string(),
            user_email: Some("you@example.com".to_string()),
            send_to: None,
            redirect_uri: Some("http://127.0.0.1:8080/callback".to_string()),
            db_path: None,
            window_hours: Some(24),
            extra_query: None,
            labels: None,
            model: Some("gpt-4o".to_string()),
            openai_base_url: None,
            summary_max_tokens: Some(120),
            body_char_budget: Some(1200),
            notion_db_id: None,
            desktop_notification: Some(false),
        };
        let tom = toml::to_string_pretty(&sample)?;
        fs::write(&path, tom)?;
        return Err(anyhow::anyhow!(
            "Created template config at {}; edit it and run again",
            path.display()
        ));
    }
    let s = fs::read_to_string(path)?;
    let cfg: Config = toml::from_str(&s)?;
    Ok(cfg)
}

pub fn resolve_db_path(cfg: &Config) -> Result<PathBuf> {
    if let Some(p) = &cfg.db_path {
        Ok(PathBuf::from(p))
    } else {
        default_db_path()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal() -> Config {
        toml::from_str(r#"client_id = "abc.apps.googleusercontent.com""#).unwrap()
    }

    #[test]
    fn defaults_apply() {
        let cfg = minimal();
        assert_eq!(cfg.window_hours(), 24);
        assert_eq!(cfg.model(), "gpt-4o");
        assert_eq!(cfg.summary_max_tokens(), 120);
        assert_eq!(cfg.body_char_budget(), 1200);
        assert!(cfg.user_email().is_err());
    }

    #[test]
    fn recipient_falls_back_to_user_email() {
        let mut cfg = minimal();
        cfg.user_email = Some("me@example.com".to_string());
        assert_eq!(cfg.recipient().unwrap(), "me@example.com");
        cfg.send_to = Some("digest@example.com".to_string());
        assert_eq!(cfg.recipient().unwrap(), "digest@example.com");
    }
}
