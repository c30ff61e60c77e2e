//! In-memory collaborators shared by unit tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{GeneratorError, MailboxError};
use crate::generator::{JobId, JobStatus, ResponseGenerator, Sleeper};
use crate::mailbox::{Header, Label, MailboxGateway, MessageRef, RawMessage, UNREAD_LABEL};

// ── Mailbox ─────────────────────────────────────────────────────────

#[derive(Default)]
struct MailboxState {
    labels: Vec<Label>,
    messages: HashMap<String, RawMessage>,
    order: Vec<String>,
    sent: Vec<(Vec<u8>, String)>,
    modifications: Vec<(String, Vec<String>, Vec<String>)>,
    failing_listings: HashSet<String>,
}

/// Mailbox whose unread state lives in each message's label ids.
#[derive(Default)]
pub(crate) struct MockMailbox {
    state: Mutex<MailboxState>,
    pub fail_list_labels: AtomicBool,
    pub fail_send: AtomicBool,
    pub fail_modify: AtomicBool,
    pub fail_create_label: AtomicBool,
}

impl MockMailbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_label(self, id: &str, name: &str) -> Self {
        self.state.lock().unwrap().labels.push(Label {
            id: id.into(),
            name: name.into(),
        });
        self
    }

    /// Add an unread message carrying `label_id` (plus INBOX and UNREAD).
    pub fn add_unread(&self, id: &str, label_id: &str, from: &str, subject: &str, body: &str) {
        let message = RawMessage {
            id: id.into(),
            thread_id: format!("thread-{id}"),
            headers: vec![
                header("From", from),
                header("Subject", subject),
                header("Date", "Tue, 7 Jan 2025 09:30:00 +0000"),
                header("Message-ID", &format!("<{id}@mail.example.com>")),
            ],
            body: body.as_bytes().to_vec(),
            label_ids: vec![label_id.into(), "INBOX".into(), UNREAD_LABEL.into()],
        };
        let mut state = self.state.lock().unwrap();
        state.order.push(id.into());
        state.messages.insert(id.into(), message);
    }

    pub fn fail_listing_for(&self, label_id: &str) {
        self.state
            .lock()
            .unwrap()
            .failing_listings
            .insert(label_id.into());
    }

    pub fn label_ids_of(&self, id: &str) -> Vec<String> {
        self.state.lock().unwrap().messages[id].label_ids.clone()
    }

    pub fn is_unread(&self, id: &str) -> bool {
        self.label_ids_of(id).iter().any(|l| l == UNREAD_LABEL)
    }

    pub fn labels(&self) -> Vec<Label> {
        self.state.lock().unwrap().labels.clone()
    }

    /// `(raw message, thread id)` of every send, in order.
    pub fn sent(&self) -> Vec<(Vec<u8>, String)> {
        self.state.lock().unwrap().sent.clone()
    }

    pub fn modifications(&self) -> Vec<(String, Vec<String>, Vec<String>)> {
        self.state.lock().unwrap().modifications.clone()
    }
}

fn header(name: &str, value: &str) -> Header {
    Header {
        name: name.into(),
        value: value.into(),
    }
}

fn unavailable() -> MailboxError {
    MailboxError::RequestFailed {
        reason: "mock failure".into(),
    }
}

#[async_trait]
impl MailboxGateway for MockMailbox {
    async fn list_labels(&self) -> Result<Vec<Label>, MailboxError> {
        if self.fail_list_labels.load(Ordering::SeqCst) {
            return Err(unavailable());
        }
        Ok(self.labels())
    }

    async fn create_label(&self, name: &str) -> Result<String, MailboxError> {
        if self.fail_create_label.load(Ordering::SeqCst) {
            return Err(unavailable());
        }
        let mut state = self.state.lock().unwrap();
        let id = format!("Label_{}", state.labels.len() + 100);
        state.labels.push(Label {
            id: id.clone(),
            name: name.into(),
        });
        Ok(id)
    }

    async fn list_unread_by_label(&self, label_id: &str) -> Result<Vec<MessageRef>, MailboxError> {
        let state = self.state.lock().unwrap();
        if state.failing_listings.contains(label_id) {
            return Err(unavailable());
        }
        Ok(state
            .order
            .iter()
            .filter_map(|id| state.messages.get(id))
            .filter(|m| {
                m.label_ids.iter().any(|l| l == label_id)
                    && m.label_ids.iter().any(|l| l == UNREAD_LABEL)
            })
            .map(|m| MessageRef {
                id: m.id.clone(),
                thread_id: m.thread_id.clone(),
            })
            .collect())
    }

    async fn get_message(&self, id: &str) -> Result<RawMessage, MailboxError> {
        self.state
            .lock()
            .unwrap()
            .messages
            .get(id)
            .cloned()
            .ok_or_else(|| MailboxError::RequestFailed {
                reason: format!("no message {id}"),
            })
    }

    async fn modify_labels(
        &self,
        id: &str,
        add: &[String],
        remove: &[String],
    ) -> Result<(), MailboxError> {
        if self.fail_modify.load(Ordering::SeqCst) {
            return Err(unavailable());
        }
        let mut state = self.state.lock().unwrap();
        state
            .modifications
            .push((id.into(), add.to_vec(), remove.to_vec()));
        if let Some(message) = state.messages.get_mut(id) {
            message.label_ids.retain(|l| !remove.contains(l));
            for label in add {
                if !message.label_ids.contains(label) {
                    message.label_ids.push(label.clone());
                }
            }
        }
        Ok(())
    }

    async fn send(&self, raw: &[u8], thread_id: &str) -> Result<String, MailboxError> {
        if self.fail_send.load(Ordering::SeqCst) {
            return Err(unavailable());
        }
        let mut state = self.state.lock().unwrap();
        state.sent.push((raw.to_vec(), thread_id.into()));
        Ok(format!("sent-{}", state.sent.len()))
    }
}

// ── Generator ───────────────────────────────────────────────────────

/// Generator that plays back scripted statuses, then completes with
/// a fixed reply.
pub(crate) struct ScriptedGenerator {
    reply: String,
    statuses: Mutex<VecDeque<JobStatus>>,
    submissions: Mutex<Vec<String>>,
    polls: AtomicU32,
    fail_submit: bool,
}

impl ScriptedGenerator {
    pub fn replying(reply: &str) -> Self {
        Self {
            reply: reply.into(),
            statuses: Mutex::new(VecDeque::new()),
            submissions: Mutex::new(Vec::new()),
            polls: AtomicU32::new(0),
            fail_submit: false,
        }
    }

    /// Statuses returned by the first polls, across all jobs.
    pub fn with_statuses(self, statuses: Vec<JobStatus>) -> Self {
        *self.statuses.lock().unwrap() = statuses.into();
        self
    }

    pub fn failing_submit(mut self) -> Self {
        self.fail_submit = true;
        self
    }

    pub fn submissions(&self) -> Vec<String> {
        self.submissions.lock().unwrap().clone()
    }

    pub fn poll_count(&self) -> u32 {
        self.polls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ResponseGenerator for ScriptedGenerator {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn submit(&self, prompt: &str) -> Result<JobId, GeneratorError> {
        if self.fail_submit {
            return Err(GeneratorError::RequestFailed {
                provider: "scripted".into(),
                reason: "submit refused".into(),
            });
        }
        let mut submissions = self.submissions.lock().unwrap();
        submissions.push(prompt.into());
        Ok(JobId(format!("job-{}", submissions.len())))
    }

    async fn poll(&self, _job: &JobId) -> Result<JobStatus, GeneratorError> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        let next = self.statuses.lock().unwrap().pop_front();
        Ok(next.unwrap_or_else(|| JobStatus::Completed(self.reply.clone())))
    }
}

// ── Sleeper ─────────────────────────────────────────────────────────

#[derive(Default)]
pub(crate) struct RecordingSleeper {
    sleeps: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap().clone()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.sleeps.lock().unwrap().push(duration);
    }
}
