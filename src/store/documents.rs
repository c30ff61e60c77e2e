//! On-disk document shapes for the received and pending stores.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// A JSON document that lives in a store scope under its own id.
pub trait Document: Serialize + DeserializeOwned + Send + Sync {
    /// Identity encoded into the filename.
    fn document_id(&self) -> &str;
}

/// A received email waiting for a generated reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    /// Provider message id.
    pub id: String,
    #[serde(default)]
    pub thread_id: String,
    /// RFC 5322 `Message-Id` header, used for reply threading.
    #[serde(default)]
    pub message_id: String,
    pub body: String,
    pub sender: String,
    pub subject: String,
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub labels: Vec<String>,
}

impl Document for WorkItem {
    fn document_id(&self) -> &str {
        &self.id
    }
}

/// The subset of the original email needed to thread a reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OriginalEmail {
    pub sender: String,
    pub subject: String,
    pub body: String,
    #[serde(default)]
    pub message_id: String,
}

/// A generated reply waiting to be dispatched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseItem {
    /// Equal to the originating [`WorkItem::id`].
    pub email_id: String,
    pub thread_id: String,
    pub original_email: OriginalEmail,
    /// Generated text, possibly prefixed with a `$LABEL$` directive.
    pub response: String,
    pub timestamp: String,
    /// Provider id of the sent reply. Written after a successful send and
    /// before the file is archived.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sent_message_id: Option<String>,
}

impl ResponseItem {
    pub fn for_work_item(item: &WorkItem, response: String, timestamp: String) -> Self {
        Self {
            email_id: item.id.clone(),
            thread_id: item.thread_id.clone(),
            original_email: OriginalEmail {
                sender: item.sender.clone(),
                subject: item.subject.clone(),
                body: item.body.clone(),
                message_id: item.message_id.clone(),
            },
            response,
            timestamp,
            sent_message_id: None,
        }
    }
}

impl Document for ResponseItem {
    fn document_id(&self) -> &str {
        &self.email_id
    }
}
