//! Mailbox collaborator: the operations the pipeline needs from a mail
//! provider, plus the Gmail implementation.

pub mod auth;
pub mod compose;
pub mod gmail;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::MailboxError;

pub use auth::{GoogleAuth, GoogleAuthConfig};
pub use compose::{ReplyDraft, compose_reply, reply_subject};
pub use gmail::{GmailConfig, GmailGateway};

/// System label kept on a message when routing strips the others.
pub const INBOX_LABEL: &str = "INBOX";

/// System label marking a message as unread.
pub const UNREAD_LABEL: &str = "UNREAD";

/// A provider label (name and opaque id).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Label {
    pub id: String,
    pub name: String,
}

/// A message reference returned by listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRef {
    pub id: String,
    pub thread_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub name: String,
    pub value: String,
}

/// Full message content as fetched from the provider.
#[derive(Debug, Clone, Default)]
pub struct RawMessage {
    pub id: String,
    pub thread_id: String,
    pub headers: Vec<Header>,
    /// Decoded body bytes. Not guaranteed to be valid UTF-8.
    pub body: Vec<u8>,
    pub label_ids: Vec<String>,
}

impl RawMessage {
    /// Case-insensitive header lookup; missing headers read as empty.
    pub fn header(&self, name: &str) -> &str {
        self.headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
            .unwrap_or("")
    }
}

/// Mail provider operations used by ingestion and dispatch.
#[async_trait]
pub trait MailboxGateway: Send + Sync {
    async fn list_labels(&self) -> Result<Vec<Label>, MailboxError>;

    /// Create a user-visible label and return its id.
    async fn create_label(&self, name: &str) -> Result<String, MailboxError>;

    /// Unread messages carrying `label_id`.
    async fn list_unread_by_label(&self, label_id: &str) -> Result<Vec<MessageRef>, MailboxError>;

    async fn get_message(&self, id: &str) -> Result<RawMessage, MailboxError>;

    async fn modify_labels(
        &self,
        id: &str,
        add: &[String],
        remove: &[String],
    ) -> Result<(), MailboxError>;

    /// Send a raw RFC 5322 message on `thread_id`; returns the sent message id.
    async fn send(&self, raw: &[u8], thread_id: &str) -> Result<String, MailboxError>;
}
