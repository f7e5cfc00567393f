use anyhow::{Result, anyhow};
use clap::{Parser, Subcommand};

use gmail_digest::auth::{CredentialStore, oauth, token_store, tokens_file};
use gmail_digest::config::{load_config, resolve_db_path};
use gmail_digest::domain::digest::RunStatus;
use gmail_digest::llm::Summarizer;
use gmail_digest::mail::{GmailClient, MessageFilter};
use gmail_digest::notifier::Notifier;
use gmail_digest::pipeline::Pipeline;
use gmail_digest::retry::RetryPolicy;
use gmail_digest::rules::Rules;
use gmail_digest::store::notion::NotionLog;
use gmail_digest::store::{DigestRepository, SqliteRepo};

#[derive(Parser)]
#[command(name = "gmail_digest")]
#[command(about = "Summarize recent Gmail into a daily digest", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one digest pipeline invocation (fetch, summarize, store, notify)
    Run {
        /// Override the fetch window length in hours
        #[arg(long)]
        window_hours: Option<i64>,

        /// Store summaries but skip the delivery stage
        #[arg(long, default_value_t = false)]
        no_notify: bool,
    },

    /// Provision a refresh token via the interactive OAuth consent flow
    Auth,

    /// Store the OAuth client secret in keyring
    SetClientSecret {
        #[arg(long)]
        client_id: String,
    },

    /// Show recent digest runs
    History {
        #[arg(long, default_value_t = 10)]
        limit: u32,
    },
}

fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();

    match cli.cmd {
        Command::SetClientSecret { client_id } => {
            eprintln!("Paste client secret (end with Ctrl-D):");
            let mut secret = String::new();
            std::io::Read::read_to_string(&mut std::io::stdin(), &mut secret)?;
            let secret = secret.trim();
            token_store::save_client_secret(&client_id, secret)?;
            println!("Saved client secret for client_id {}", client_id);
            Ok(())
        }

        Command::Auth => {
            let cfg = load_config().map_err(|e| anyhow!("Configuration error: {e}"))?;
            let user_email = cfg.user_email()?.to_string();
            let redirect = cfg
                .redirect_uri
                .clone()
                .unwrap_or_else(|| "http://127.0.0.1:8080/callback".to_string());
            let client_secret = token_store::load_client_secret(&cfg.client_id)?
                .or_else(|| std::env::var("OAUTH_CLIENT_SECRET").ok());

            let tokens = oauth::perform_consent_flow(
                &cfg.client_id,
                client_secret.as_deref(),
                &redirect,
                &user_email,
            )?;

            if let Some(expires_in) = tokens.expires_in {
                let exp = chrono::Utc::now().timestamp() + expires_in as i64;
                tokens_file::save_tokens(Some(&tokens.access_token), Some(exp))?;
            }
            println!("Authorized {user_email}; refresh token stored in keyring.");
            Ok(())
        }

        Command::History { limit } => {
            let cfg = load_config().map_err(|e| anyhow!("Configuration error: {e}"))?;
            let repo = SqliteRepo::open(&resolve_db_path(&cfg)?)?;
            for run in repo.recent_runs(limit)? {
                println!(
                    "run {:>4}  [{} .. {})  {:>3} written  {:>3} skipped  {}",
                    run.run_id,
                    run.window.start.format("%Y-%m-%d %H:%M"),
                    run.window.end.format("%Y-%m-%d %H:%M"),
                    run.message_count,
                    run.skipped_count,
                    run.status
                );
            }
            Ok(())
        }

        Command::Run {
            window_hours,
            no_notify,
        } => {
            let cfg = load_config().map_err(|e| anyhow!("Configuration error: {e}"))?;
            let retry = RetryPolicy::default();

            let repo = SqliteRepo::open(&resolve_db_path(&cfg)?)?;
            let credentials = CredentialStore::from_config(&cfg, retry.clone())?;
            let gmail = GmailClient::new(retry.clone())?;
            let summarizer = Summarizer::from_env(&cfg, retry.clone())?;
            let notion = NotionLog::from_env(cfg.notion_db_id.as_deref(), retry.clone());
            let rules = Rules::default();

            let user_email = cfg.user_email()?.to_string();
            let recipient = cfg.recipient()?.to_string();
            let notifier = Notifier::new(&gmail, user_email, recipient);

            let pipeline = Pipeline {
                credentials: &credentials,
                gmail: &gmail,
                summarizer: &summarizer,
                repo: &repo,
                notifier: &notifier,
                notion: notion.as_ref(),
                rules: &rules,
                filter: MessageFilter {
                    labels: cfg.labels.clone().unwrap_or_default(),
                    extra_query: cfg.extra_query.clone(),
                },
                window_hours: window_hours.unwrap_or_else(|| cfg.window_hours()),
                desktop_notification: cfg.desktop_notification.unwrap_or(false),
                deliver: !no_notify,
            };

            let run = pipeline.run()?;
            println!(
                "run {}: {} ({} written, {} skipped)",
                run.run_id, run.status, run.message_count, run.skipped_count
            );

            // the scheduler watches the exit code: 0 for success/partial
            if run.status == RunStatus::Failed {
                std::process::exit(1);
            }
            Ok(())
        }
    }
}
