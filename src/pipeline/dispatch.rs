//! Dispatch: pending responses → sent replies → archive.
//!
//! Moving a file into the archive is the only completion marker. The
//! provider's sent id is written into the pending document before the
//! move, so an item that was sent but never archived is archived on the
//! next run without a second send.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::error::{MailboxError, PipelineError, StoreError};
use crate::mailbox::{INBOX_LABEL, MailboxGateway, ReplyDraft, compose_reply};
use crate::pipeline::directive::parse_directive;
use crate::pipeline::types::{Delivery, DispatchReport, ItemOutcome, SkipReason};
use crate::store::{ResponseItem, Scope, Store, Stored};

pub struct DispatchStage {
    mailbox: Arc<dyn MailboxGateway>,
    store: Store,
    from_address: String,
}

impl DispatchStage {
    pub fn new(mailbox: Arc<dyn MailboxGateway>, store: Store, from_address: impl Into<String>) -> Self {
        Self {
            mailbox,
            store,
            from_address: from_address.into(),
        }
    }

    pub async fn run(&self) -> Result<DispatchReport, PipelineError> {
        let archived = self.store.derive_known_ids(Scope::Archive).await?;
        let items: Vec<Stored<ResponseItem>> = self.store.list_new(Scope::Pending, &archived).await?;
        info!(count = items.len(), "Dispatching responses");

        let mut report = DispatchReport::default();
        for stored in items {
            let id = stored.document.email_id.clone();
            let outcome = self.dispatch_one(stored).await;
            report.push(id, outcome);
        }

        info!(
            dispatched = report.succeeded(),
            skipped = report.skipped(),
            failed = report.failed(),
            "Dispatch finished"
        );
        Ok(report)
    }

    async fn dispatch_one(&self, stored: Stored<ResponseItem>) -> ItemOutcome<Delivery> {
        let Stored {
            path,
            document: mut response,
        } = stored;
        let id = response.email_id.clone();

        let _claim = match self.store.claim(Scope::Archive, &id).await {
            Ok(guard) => guard,
            Err(StoreError::AlreadyClaimed { .. }) => {
                debug!(id = %id, "Claimed elsewhere, skipping");
                return ItemOutcome::Skipped(SkipReason::Claimed);
            }
            Err(e) => return ItemOutcome::Failed(e.to_string()),
        };
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return ItemOutcome::Skipped(SkipReason::AlreadyDispatched);
        }

        if let Some(sent_id) = response.sent_message_id.clone() {
            info!(id = %id, sent_id = %sent_id, "Already sent, archiving");
            return match self.store.relocate(&path, Scope::Archive).await {
                Ok(_) => ItemOutcome::Success(Delivery::Recovered { sent_id }),
                Err(e) => {
                    warn!(id = %id, error = %e, "Failed to archive sent response");
                    ItemOutcome::Failed(e.to_string())
                }
            };
        }

        let directive = parse_directive(&response.response);
        let label = directive.label.map(str::to_string);
        let body = directive.body.to_string();
        let has_content = directive.has_content();

        if let Some(label) = &label {
            if let Err(e) = self.apply_routing_label(&id, label).await {
                if !has_content {
                    warn!(id = %id, label = %label, error = %e, "Failed to apply label");
                    return ItemOutcome::Failed(e.to_string());
                }
                warn!(id = %id, label = %label, error = %e, "Failed to apply label, sending reply anyway");
            }
        }

        if !has_content {
            info!(id = %id, label = ?label, "No reply body, archiving without sending");
            return match self.store.relocate(&path, Scope::Archive).await {
                Ok(_) => ItemOutcome::Success(Delivery::LabelOnly { label }),
                Err(e) => {
                    warn!(id = %id, error = %e, "Failed to archive response");
                    ItemOutcome::Failed(e.to_string())
                }
            };
        }

        let draft = ReplyDraft {
            from: &self.from_address,
            to: &response.original_email.sender,
            original_subject: &response.original_email.subject,
            in_reply_to: &response.original_email.message_id,
            body: &body,
        };
        let raw = match compose_reply(&draft) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(id = %id, error = %e, "Failed to compose reply");
                return ItemOutcome::Failed(e.to_string());
            }
        };

        let sent_id = match self.mailbox.send(&raw, &response.thread_id).await {
            Ok(sent_id) => sent_id,
            Err(e) => {
                warn!(id = %id, error = %e, "Failed to send reply, will retry next run");
                return ItemOutcome::Failed(e.to_string());
            }
        };
        info!(id = %id, sent_id = %sent_id, to = %response.original_email.sender, "Reply sent");

        response.sent_message_id = Some(sent_id.clone());
        if let Err(e) = self.store.rewrite(&path, &response).await {
            warn!(id = %id, error = %e, "Failed to record sent id");
        }
        if let Err(e) = self.store.relocate(&path, Scope::Archive).await {
            error!(id = %id, sent_id = %sent_id, error = %e, "Reply sent but not archived");
        }

        ItemOutcome::Success(Delivery::Sent { sent_id, label })
    }

    /// Resolve or create `label`, add it to the original message and strip
    /// every other label except the inbox marker.
    async fn apply_routing_label(&self, message_id: &str, label: &str) -> Result<(), MailboxError> {
        let labels = self.mailbox.list_labels().await?;
        let label_id = match labels.iter().find(|l| l.name == label) {
            Some(existing) => existing.id.clone(),
            None => {
                info!(label = %label, "Creating label");
                self.mailbox.create_label(label).await?
            }
        };

        let message = self.mailbox.get_message(message_id).await?;
        let remove: Vec<String> = message
            .label_ids
            .into_iter()
            .filter(|l| l != INBOX_LABEL && *l != label_id)
            .collect();

        self.mailbox
            .modify_labels(message_id, std::slice::from_ref(&label_id), &remove)
            .await?;
        debug!(id = %message_id, label = %label, removed = ?remove, "Applied routing label");
        Ok(())
    }
}
