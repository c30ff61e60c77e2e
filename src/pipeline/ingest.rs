//! Ingestion: unread labeled mail → received work items.
//!
//! The unread flag is cleared only after the item is on disk, so a crash
//! in between re-fetches the message next run and the store dedups it.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::{PipelineError, StoreError};
use crate::mailbox::{MailboxGateway, MessageRef, RawMessage, UNREAD_LABEL};
use crate::pipeline::types::{IngestReport, ItemOutcome, SkipReason};
use crate::store::{Scope, Store, WorkItem};

pub struct IngestionStage {
    mailbox: Arc<dyn MailboxGateway>,
    store: Store,
    labels: Vec<String>,
}

impl IngestionStage {
    pub fn new(mailbox: Arc<dyn MailboxGateway>, store: Store, labels: Vec<String>) -> Self {
        Self {
            mailbox,
            store,
            labels,
        }
    }

    pub async fn run(&self) -> Result<IngestReport, PipelineError> {
        info!(labels = ?self.labels, "Ingesting unread mail");

        let label_ids = self.resolve_labels().await?;
        let refs = self.collect_unread(&label_ids).await;
        let mut known = self.store.derive_known_ids(Scope::Received).await?;

        let mut report = IngestReport::default();
        for message in refs {
            let outcome = self.ingest_one(&message, &mut known).await;
            report.push(message.id, outcome);
        }

        info!(
            stored = report.succeeded(),
            skipped = report.skipped(),
            failed = report.failed(),
            "Ingestion finished"
        );
        Ok(report)
    }

    /// Map configured label names to provider ids. Unknown names are
    /// logged and dropped.
    async fn resolve_labels(&self) -> Result<Vec<String>, PipelineError> {
        let available = self.mailbox.list_labels().await?;
        debug!(
            labels = ?available.iter().map(|l| l.name.as_str()).collect::<Vec<_>>(),
            "Mailbox labels"
        );

        let mut ids = Vec::new();
        for name in &self.labels {
            match available.iter().find(|l| &l.name == name) {
                Some(label) => ids.push(label.id.clone()),
                None => warn!(label = %name, "Label not found in mailbox, skipping"),
            }
        }
        Ok(ids)
    }

    /// Unread messages across all labels, first occurrence wins.
    async fn collect_unread(&self, label_ids: &[String]) -> Vec<MessageRef> {
        let mut seen = HashSet::new();
        let mut merged = Vec::new();

        for label_id in label_ids {
            match self.mailbox.list_unread_by_label(label_id).await {
                Ok(refs) => {
                    debug!(label_id = %label_id, count = refs.len(), "Unread messages");
                    merged.extend(refs.into_iter().filter(|r| seen.insert(r.id.clone())));
                }
                Err(e) => warn!(label_id = %label_id, error = %e, "Failed to list unread messages"),
            }
        }
        merged
    }

    async fn ingest_one(
        &self,
        message: &MessageRef,
        known: &mut HashSet<String>,
    ) -> ItemOutcome<std::path::PathBuf> {
        if known.contains(&message.id) {
            debug!(id = %message.id, "Already stored, skipping");
            self.mark_read(&message.id).await;
            return ItemOutcome::Skipped(SkipReason::AlreadyStored);
        }

        let raw = match self.mailbox.get_message(&message.id).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(id = %message.id, error = %e, "Failed to fetch message");
                return ItemOutcome::Failed(e.to_string());
            }
        };

        let item = work_item_from_message(message, raw);
        match self.store.put(Scope::Received, None, &item).await {
            Ok(path) => {
                info!(id = %item.id, sender = %item.sender, subject = %item.subject, "Stored email");
                known.insert(item.id.clone());
                self.mark_read(&item.id).await;
                ItemOutcome::Success(path)
            }
            Err(StoreError::Duplicate { .. }) => {
                known.insert(item.id.clone());
                self.mark_read(&item.id).await;
                ItemOutcome::Skipped(SkipReason::AlreadyStored)
            }
            Err(e) => {
                warn!(id = %item.id, error = %e, "Failed to store email");
                ItemOutcome::Failed(e.to_string())
            }
        }
    }

    async fn mark_read(&self, id: &str) {
        if let Err(e) = self
            .mailbox
            .modify_labels(id, &[], &[UNREAD_LABEL.to_string()])
            .await
        {
            warn!(id = %id, error = %e, "Failed to mark message read");
        }
    }
}

/// Build the received work item for a fetched message.
pub fn work_item_from_message(message: &MessageRef, raw: RawMessage) -> WorkItem {
    let thread_id = if message.thread_id.is_empty() {
        raw.thread_id.clone()
    } else {
        message.thread_id.clone()
    };
    WorkItem {
        id: message.id.clone(),
        thread_id,
        message_id: raw.header("Message-Id").to_string(),
        body: String::from_utf8_lossy(&raw.body).into_owned(),
        sender: raw.header("From").to_string(),
        subject: raw.header("Subject").to_string(),
        date: raw.header("Date").to_string(),
        labels: raw.label_ids,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;
    use tempfile::TempDir;

    use crate::mailbox::Header;
    use crate::test_support::MockMailbox;

    fn setup(mailbox: MockMailbox, labels: &[&str]) -> (IngestionStage, Arc<MockMailbox>, Store, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = Store::new(dir.path());
        let mailbox = Arc::new(mailbox);
        let stage = IngestionStage::new(
            mailbox.clone(),
            store.clone(),
            labels.iter().map(|s| s.to_string()).collect(),
        );
        (stage, mailbox, store, dir)
    }

    fn two_labels() -> MockMailbox {
        MockMailbox::new()
            .with_label("INBOX", "INBOX")
            .with_label("Label_1", "Beginner")
            .with_label("Label_2", "Transfers")
    }

    #[tokio::test]
    async fn stores_unread_and_marks_read() {
        let (stage, mailbox, store, _dir) = setup(two_labels(), &["Beginner", "Transfers"]);
        mailbox.add_unread("m1", "Label_1", "Alice <alice@example.com>", "Schedule", "Hi!");
        mailbox.add_unread("m2", "Label_2", "bob@example.com", "Transfer", "Hello");

        let report = stage.run().await.unwrap();

        assert_eq!(report.succeeded(), 2);
        assert!(store.exists(Scope::Received, "m1").await.unwrap());
        assert!(store.exists(Scope::Received, "m2").await.unwrap());
        assert!(!mailbox.is_unread("m1"));
        assert!(!mailbox.is_unread("m2"));
    }

    #[tokio::test]
    async fn second_run_is_idempotent() {
        let (stage, mailbox, store, _dir) = setup(two_labels(), &["Beginner"]);
        mailbox.add_unread("m1", "Label_1", "alice@example.com", "Schedule", "Hi!");

        stage.run().await.unwrap();
        let report = stage.run().await.unwrap();

        assert!(report.items.is_empty());
        assert_eq!(store.document_names(Scope::Received).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn known_id_still_unread_is_skipped_and_marked() {
        let (stage, mailbox, store, _dir) = setup(two_labels(), &["Beginner"]);
        mailbox.add_unread("m1", "Label_1", "alice@example.com", "Schedule", "Hi!");
        mailbox.fail_modify.store(true, Ordering::SeqCst);

        let first = stage.run().await.unwrap();
        assert_eq!(first.succeeded(), 1);
        assert!(mailbox.is_unread("m1"));

        mailbox.fail_modify.store(false, Ordering::SeqCst);
        let second = stage.run().await.unwrap();
        assert_eq!(
            second.outcome_of("m1"),
            Some(&ItemOutcome::Skipped(SkipReason::AlreadyStored))
        );
        assert!(!mailbox.is_unread("m1"));
        assert_eq!(store.document_names(Scope::Received).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn message_under_two_labels_is_stored_once() {
        let (stage, mailbox, _store, _dir) = setup(two_labels(), &["Beginner", "Transfers"]);
        mailbox.add_unread("m1", "Label_1", "alice@example.com", "Schedule", "Hi!");
        mailbox
            .modify_labels("m1", &["Label_2".to_string()], &[])
            .await
            .unwrap();

        let report = stage.run().await.unwrap();
        assert_eq!(report.items.len(), 1);
        assert_eq!(report.succeeded(), 1);
    }

    #[tokio::test]
    async fn unresolved_label_proceeds_with_rest() {
        let (stage, mailbox, _store, _dir) = setup(two_labels(), &["Missing", "Beginner"]);
        mailbox.add_unread("m1", "Label_1", "alice@example.com", "Schedule", "Hi!");

        let report = stage.run().await.unwrap();
        assert_eq!(report.succeeded(), 1);
    }

    #[tokio::test]
    async fn failed_listing_for_one_label_keeps_others() {
        let (stage, mailbox, _store, _dir) = setup(two_labels(), &["Beginner", "Transfers"]);
        mailbox.add_unread("m1", "Label_1", "alice@example.com", "Schedule", "Hi!");
        mailbox.add_unread("m2", "Label_2", "bob@example.com", "Transfer", "Hello");
        mailbox.fail_listing_for("Label_1");

        let report = stage.run().await.unwrap();
        assert_eq!(report.items.len(), 1);
        assert!(report.outcome_of("m2").is_some_and(ItemOutcome::is_success));
    }

    #[tokio::test]
    async fn label_listing_failure_is_stage_error() {
        let (stage, mailbox, _store, _dir) = setup(two_labels(), &["Beginner"]);
        mailbox.fail_list_labels.store(true, Ordering::SeqCst);
        assert!(matches!(stage.run().await, Err(PipelineError::Mailbox(_))));
    }

    #[tokio::test]
    async fn unstorable_message_stays_unread() {
        let (stage, mailbox, _store, _dir) = setup(two_labels(), &["Beginner"]);
        mailbox.add_unread("bad_id", "Label_1", "alice@example.com", "Schedule", "Hi!");

        let report = stage.run().await.unwrap();
        assert!(matches!(report.outcome_of("bad_id"), Some(ItemOutcome::Failed(_))));
        assert!(mailbox.is_unread("bad_id"));
    }

    #[test]
    fn work_item_takes_headers_and_lossy_body() {
        let message = MessageRef {
            id: "m1".into(),
            thread_id: String::new(),
        };
        let raw = RawMessage {
            id: "m1".into(),
            thread_id: "t9".into(),
            headers: vec![
                Header {
                    name: "FROM".into(),
                    value: "alice@example.com".into(),
                },
                Header {
                    name: "message-id".into(),
                    value: "<x@y>".into(),
                },
            ],
            body: vec![b'h', b'i', 0xff],
            label_ids: vec!["Label_1".into()],
        };

        let item = work_item_from_message(&message, raw);
        assert_eq!(item.thread_id, "t9");
        assert_eq!(item.sender, "alice@example.com");
        assert_eq!(item.message_id, "<x@y>");
        assert_eq!(item.subject, "");
        assert!(item.body.starts_with("hi"));
        assert_eq!(item.labels, vec!["Label_1".to_string()]);
    }
}
