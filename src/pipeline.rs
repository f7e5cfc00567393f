//! Run orchestration: INIT → AUTHENTICATED → FETCHED → SUMMARIZED →
//! PERSISTED → NOTIFIED → DONE, with FAILED reachable from any stage.
//!
//! Propagation policy: auth errors and total fetch failure abort the run;
//! per-message summarize/storage failures skip that message and degrade the
//! run to `partial`; a delivery failure also degrades to `partial` but never
//! rolls back persisted entries.

use std::collections::HashSet;

use chrono::Utc;

use crate::auth::CredentialStore;
use crate::domain::digest::{DigestRun, RunStatus, Window};
use crate::domain::email::EmailMessage;
use crate::error::{AuthError, DeliveryError, FetchError, StorageError, SummarizeError};
use crate::llm::Summarizer;
use crate::mail::{GmailClient, MessageFilter};
use crate::notifier::{DIGEST_SUBJECT_PREFIX, Digest, Notifier, compose_digest, desktop_toast};
use crate::rules::Rules;
use crate::store::DigestRepository;
use crate::store::notion::NotionLog;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Init,
    Authenticated,
    Fetched,
    Summarized,
    Persisted,
    Notified,
    Done,
    Failed,
}

/// Narrow seams over the network-facing collaborators, mirroring the
/// `DigestRepository` seam on the store side.
pub trait TokenSource {
    fn obtain_access_token(&self) -> Result<String, AuthError>;
}

impl TokenSource for CredentialStore {
    fn obtain_access_token(&self) -> Result<String, AuthError> {
        CredentialStore::obtain_access_token(self)
    }
}

pub trait MessageSource {
    fn fetch_recent(
        &self,
        access_token: &str,
        window: &Window,
        filter: &MessageFilter,
    ) -> Result<Vec<EmailMessage>, FetchError>;
}

impl MessageSource for GmailClient {
    fn fetch_recent(
        &self,
        access_token: &str,
        window: &Window,
        filter: &MessageFilter,
    ) -> Result<Vec<EmailMessage>, FetchError> {
        GmailClient::fetch_recent(self, access_token, window, filter)
    }
}

pub trait Summarize {
    fn summarize(&self, msg: &EmailMessage) -> Result<String, SummarizeError>;
}

impl Summarize for Summarizer {
    fn summarize(&self, msg: &EmailMessage) -> Result<String, SummarizeError> {
        Summarizer::summarize(self, msg)
    }
}

pub trait DigestSender {
    fn send_digest(&self, access_token: &str, digest: &Digest) -> Result<String, DeliveryError>;
}

impl DigestSender for Notifier<'_> {
    fn send_digest(&self, access_token: &str, digest: &Digest) -> Result<String, DeliveryError> {
        Notifier::send_digest(self, access_token, digest)
    }
}

pub struct Pipeline<'a> {
    pub credentials: &'a dyn TokenSource,
    pub gmail: &'a dyn MessageSource,
    pub summarizer: &'a dyn Summarize,
    pub repo: &'a dyn DigestRepository,
    pub notifier: &'a dyn DigestSender,
    pub notion: Option<&'a NotionLog>,
    pub rules: &'a Rules,
    pub filter: MessageFilter,
    pub window_hours: i64,
    pub desktop_notification: bool,
    /// Set false to skip the delivery stage (`run --no-notify`).
    pub deliver: bool,
}

impl Pipeline<'_> {
    /// Execute one run. `Err` means the run record itself could not be
    /// written; every other failure is reported through the returned
    /// `DigestRun` status.
    pub fn run(&self) -> Result<DigestRun, StorageError> {
        let now = Utc::now();
        let window = Window::last_hours(self.window_hours, now);
        let mut run = self.repo.create_run(&window, now)?;
        log::info!(
            "stage {:?}: run {} over [{}, {})",
            Stage::Init,
            run.run_id,
            window.start,
            window.end
        );

        let token = match self.credentials.obtain_access_token() {
            Ok(t) => t,
            Err(e) => {
                log::error!("stage {:?}: {e}", Stage::Failed);
                return self.fail(run);
            }
        };
        log::info!("stage {:?}", Stage::Authenticated);

        let messages = match self.gmail.fetch_recent(&token, &window, &self.filter) {
            Ok(m) => m,
            Err(e) => {
                log::error!("stage {:?}: fetch: {e}", Stage::Failed);
                return self.fail(run);
            }
        };
        log::info!("stage {:?}: {} message(s)", Stage::Fetched, messages.len());

        let fresh = self.filter_new_messages(messages);

        let (written, skipped) = process_messages(&fresh, run.run_id, self.repo, self.rules, |m| {
            self.summarizer.summarize(m)
        });
        run.message_count = written;
        run.skipped_count = skipped;
        log::info!(
            "stage {:?}/{:?}: {} written, {} skipped",
            Stage::Summarized,
            Stage::Persisted,
            written,
            skipped
        );

        let mut delivery_failed = false;
        if written == 0 {
            log::info!("no new entries; skipping delivery");
        } else if !self.deliver {
            log::info!("delivery disabled; leaving {} entries unsent", written);
        } else {
            match self.repo.entries_for_run(run.run_id) {
                Ok(entries) => {
                    let digest = compose_digest(window.end, &entries, self.rules);
                    match self.notifier.send_digest(&token, &digest) {
                        Ok(receipt) => {
                            log::info!("stage {:?}: delivered as {receipt}", Stage::Notified)
                        }
                        Err(e) => {
                            log::warn!("delivery failed (entries are kept): {e}");
                            delivery_failed = true;
                        }
                    }
                    if let Some(notion) = self.notion
                        && let Err(e) = notion.append_run(&digest.subject, &digest.lines)
                    {
                        log::warn!("notion mirror failed: {e}");
                    }
                    if self.desktop_notification {
                        desktop_toast(
                            DIGEST_SUBJECT_PREFIX,
                            &format!("{written} message(s) summarized"),
                        );
                    }
                }
                Err(e) => {
                    log::warn!("could not read back entries for delivery: {e}");
                    delivery_failed = true;
                }
            }
        }

        run.status = if skipped > 0 || delivery_failed {
            RunStatus::Partial
        } else {
            RunStatus::Success
        };
        self.repo.finish_run(&run)?;
        log::info!("stage {:?}: status {}", Stage::Done, run.status);
        Ok(run)
    }

    fn fail(&self, mut run: DigestRun) -> Result<DigestRun, StorageError> {
        run.status = RunStatus::Failed;
        self.repo.finish_run(&run)?;
        Ok(run)
    }

    /// Drop self-sent digests, duplicate subjects within the batch, and
    /// messages already recorded by an earlier overlapping run. None of
    /// these count as skips; they are expected.
    fn filter_new_messages(&self, messages: Vec<EmailMessage>) -> Vec<EmailMessage> {
        let mut seen_subjects: HashSet<String> = HashSet::new();
        let mut fresh = Vec::with_capacity(messages.len());
        for msg in messages {
            if msg.subject.starts_with(DIGEST_SUBJECT_PREFIX) {
                log::debug!("dropping self-sent digest {}", msg.id);
                continue;
            }
            if !seen_subjects.insert(msg.subject.clone()) {
                log::debug!("dropping duplicate subject {:?} ({})", msg.subject, msg.id);
                continue;
            }
            match self.repo.has_entry(&msg.id) {
                Ok(true) => {
                    log::debug!("message {} already recorded; skipping", msg.id);
                    continue;
                }
                Ok(false) => {}
                // if the lookup fails, let the upsert dedup later
                Err(e) => log::warn!("has_entry({}) failed: {e}", msg.id),
            }
            fresh.push(msg);
        }
        fresh
    }
}

/// Summarize and persist each message, isolating failures per message.
/// Returns `(written, skipped)`.
fn process_messages<F>(
    messages: &[EmailMessage],
    run_id: i64,
    repo: &dyn DigestRepository,
    rules: &Rules,
    mut summarize: F,
) -> (u32, u32)
where
    F: FnMut(&EmailMessage) -> Result<String, SummarizeError>,
{
    let mut written = 0u32;
    let mut skipped = 0u32;

    for msg in messages {
        let summary = match summarize(msg) {
            Ok(s) => s,
            Err(e) => {
                log::warn!("summarize {}: {e}; message skipped", msg.id);
                skipped += 1;
                continue;
            }
        };

        let entry = crate::domain::digest::DigestEntry {
            source_message_id: msg.id.clone(),
            digest_run_id: run_id,
            summary_text: summary,
            sender: msg.sender.clone(),
            subject: msg.subject.clone(),
            category: rules.categorize(&msg.sender, &msg.subject),
            received_at: msg.received_at,
            created_at: Utc::now(),
        };

        match repo.upsert_entry(&entry) {
            Ok(true) => written += 1,
            Ok(false) => log::debug!("entry for {} already present", msg.id),
            Err(e) => {
                log::warn!("store {}: {e}; entry skipped", msg.id);
                skipped += 1;
            }
        }
    }

    (written, skipped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteRepo;
    use chrono::{Duration, Utc};
    use std::cell::Cell;

    struct NoToken;
    impl TokenSource for NoToken {
        fn obtain_access_token(&self) -> Result<String, AuthError> {
            Err(AuthError::NoRefreshToken)
        }
    }

    struct Token;
    impl TokenSource for Token {
        fn obtain_access_token(&self) -> Result<String, AuthError> {
            Ok("tok".to_string())
        }
    }

    struct Messages(Vec<EmailMessage>);
    impl MessageSource for Messages {
        fn fetch_recent(
            &self,
            _token: &str,
            _window: &Window,
            _filter: &MessageFilter,
        ) -> Result<Vec<EmailMessage>, FetchError> {
            Ok(self.0.clone())
        }
    }

    struct NoFetch;
    impl MessageSource for NoFetch {
        fn fetch_recent(
            &self,
            _token: &str,
            _window: &Window,
            _filter: &MessageFilter,
        ) -> Result<Vec<EmailMessage>, FetchError> {
            panic!("fetch must not run after an auth failure")
        }
    }

    struct EchoSummaries;
    impl Summarize for EchoSummaries {
        fn summarize(&self, msg: &EmailMessage) -> Result<String, SummarizeError> {
            Ok(format!("summary of {}", msg.id))
        }
    }

    struct NoSummaries;
    impl Summarize for NoSummaries {
        fn summarize(&self, _msg: &EmailMessage) -> Result<String, SummarizeError> {
            panic!("summarizer must not run")
        }
    }

    struct CountingSender {
        sent: Cell<u32>,
    }
    impl DigestSender for CountingSender {
        fn send_digest(&self, _token: &str, _digest: &Digest) -> Result<String, DeliveryError> {
            self.sent.set(self.sent.get() + 1);
            Ok("sent-1".to_string())
        }
    }

    struct RejectingSender;
    impl DigestSender for RejectingSender {
        fn send_digest(&self, _token: &str, _digest: &Digest) -> Result<String, DeliveryError> {
            Err(DeliveryError::Rejected {
                status: 500,
                message: "backend unavailable".to_string(),
            })
        }
    }

    struct NoSend;
    impl DigestSender for NoSend {
        fn send_digest(&self, _token: &str, _digest: &Digest) -> Result<String, DeliveryError> {
            panic!("delivery must not run")
        }
    }

    fn msg(id: &str, subject: &str) -> EmailMessage {
        EmailMessage {
            id: id.to_string(),
            thread_id: format!("t-{id}"),
            sender: "someone@example.com".to_string(),
            subject: subject.to_string(),
            received_at: Utc::now() - Duration::hours(1),
            body_text: "body".to_string(),
            labels: vec!["INBOX".to_string()],
        }
    }

    #[test]
    fn one_failure_of_n_writes_n_minus_one() {
        let repo = SqliteRepo::open_in_memory().unwrap();
        let run = repo
            .create_run(&Window::last_hours(24, Utc::now()), Utc::now())
            .unwrap();
        let messages = vec![msg("a", "s1"), msg("b", "s2"), msg("c", "s3")];

        let (written, skipped) =
            process_messages(&messages, run.run_id, &repo, &Rules::default(), |m| {
                if m.id == "b" {
                    Err(SummarizeError::MalformedResponse("boom".to_string()))
                } else {
                    Ok(format!("summary of {}", m.id))
                }
            });

        assert_eq!(written, 2);
        assert_eq!(skipped, 1);
        assert_eq!(repo.entries_for_run(run.run_id).unwrap().len(), 2);
    }

    #[test]
    fn reprocessing_recorded_message_is_a_noop_not_a_skip() {
        let repo = SqliteRepo::open_in_memory().unwrap();
        let run = repo
            .create_run(&Window::last_hours(24, Utc::now()), Utc::now())
            .unwrap();
        let messages = vec![msg("a", "s1")];

        let summarize = |m: &EmailMessage| Ok(format!("summary of {}", m.id));
        let (w1, s1) = process_messages(&messages, run.run_id, &repo, &Rules::default(), summarize);
        assert_eq!((w1, s1), (1, 0));

        // second run over an overlapping window sees the same message
        let run2 = repo
            .create_run(&Window::last_hours(24, Utc::now()), Utc::now())
            .unwrap();
        let (w2, s2) =
            process_messages(&messages, run2.run_id, &repo, &Rules::default(), summarize);
        assert_eq!((w2, s2), (0, 0));
        assert_eq!(repo.entries_for_run(run.run_id).unwrap().len(), 1);
    }

    #[test]
    fn empty_input_writes_nothing_and_skips_nothing() {
        let repo = SqliteRepo::open_in_memory().unwrap();
        let run = repo
            .create_run(&Window::last_hours(24, Utc::now()), Utc::now())
            .unwrap();
        let (written, skipped) =
            process_messages(&[], run.run_id, &repo, &Rules::default(), |_| {
                panic!("summarizer must not be called for an empty batch")
            });
        assert_eq!((written, skipped), (0, 0));
    }

    #[test]
    fn entries_carry_category_from_rules() {
        let repo = SqliteRepo::open_in_memory().unwrap();
        let run = repo
            .create_run(&Window::last_hours(24, Utc::now()), Utc::now())
            .unwrap();
        let messages = vec![msg("inv", "Your invoice is ready")];
        process_messages(&messages, run.run_id, &repo, &Rules::default(), |_| {
            Ok("pay it".to_string())
        });
        let entries = repo.entries_for_run(run.run_id).unwrap();
        assert_eq!(entries[0].category, "Bills & Finance");
    }

    #[test]
    fn auth_failure_finishes_run_as_failed_before_any_fetch() {
        let repo = SqliteRepo::open_in_memory().unwrap();
        let rules = Rules::default();
        let pipeline = Pipeline {
            credentials: &NoToken,
            gmail: &NoFetch,
            summarizer: &NoSummaries,
            repo: &repo,
            notifier: &NoSend,
            notion: None,
            rules: &rules,
            filter: MessageFilter::default(),
            window_hours: 24,
            desktop_notification: false,
            deliver: true,
        };

        let run = pipeline.run().unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.message_count, 0);
        // the terminal state is persisted, not just returned
        assert_eq!(repo.recent_runs(1).unwrap()[0].status, RunStatus::Failed);
    }

    #[test]
    fn delivery_failure_degrades_to_partial_and_keeps_entries() {
        let repo = SqliteRepo::open_in_memory().unwrap();
        let rules = Rules::default();
        let source = Messages(vec![msg("a", "s1"), msg("b", "s2")]);
        let pipeline = Pipeline {
            credentials: &Token,
            gmail: &source,
            summarizer: &EchoSummaries,
            repo: &repo,
            notifier: &RejectingSender,
            notion: None,
            rules: &rules,
            filter: MessageFilter::default(),
            window_hours: 24,
            desktop_notification: false,
            deliver: true,
        };

        let run = pipeline.run().unwrap();
        assert_eq!(run.status, RunStatus::Partial);
        assert_eq!(run.message_count, 2);
        assert_eq!(run.skipped_count, 0);
        assert_eq!(repo.entries_for_run(run.run_id).unwrap().len(), 2);
        assert_eq!(repo.recent_runs(1).unwrap()[0].status, RunStatus::Partial);
    }

    #[test]
    fn empty_window_is_success_and_delivery_is_skipped() {
        let repo = SqliteRepo::open_in_memory().unwrap();
        let rules = Rules::default();
        let source = Messages(vec![]);
        let pipeline = Pipeline {
            credentials: &Token,
            gmail: &source,
            summarizer: &NoSummaries,
            repo: &repo,
            notifier: &NoSend,
            notion: None,
            rules: &rules,
            filter: MessageFilter::default(),
            window_hours: 24,
            desktop_notification: false,
            deliver: true,
        };

        let run = pipeline.run().unwrap();
        assert_eq!(run.status, RunStatus::Success);
        assert_eq!(run.message_count, 0);
        assert_eq!(run.skipped_count, 0);
    }

    #[test]
    fn happy_path_delivers_once_and_succeeds() {
        let repo = SqliteRepo::open_in_memory().unwrap();
        let rules = Rules::default();
        let source = Messages(vec![msg("a", "s1"), msg("b", "s2"), msg("c", "s3")]);
        let sender = CountingSender { sent: Cell::new(0) };
        let pipeline = Pipeline {
            credentials: &Token,
            gmail: &source,
            summarizer: &EchoSummaries,
            repo: &repo,
            notifier: &sender,
            notion: None,
            rules: &rules,
            filter: MessageFilter::default(),
            window_hours: 24,
            desktop_notification: false,
            deliver: true,
        };

        let run = pipeline.run().unwrap();
        assert_eq!(run.status, RunStatus::Success);
        assert_eq!(run.message_count, 3);
        assert_eq!(sender.sent.get(), 1);
    }
}
