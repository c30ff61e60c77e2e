//! Generation: received work items → pending responses.

use std::path::PathBuf;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};

use crate::error::{PipelineError, StoreError};
use crate::generator::{PollPolicy, ResponseGenerator, Sleeper, await_completion, build_prompt};
use crate::pipeline::types::{GenerateReport, ItemOutcome, SkipReason};
use crate::store::{ResponseItem, Scope, Store, Stored, WorkItem, naming};

/// Filename tag of pending response documents.
pub const RESPONSE_TAG: &str = "response";

const PREVIEW_CHARS: usize = 100;

pub struct GenerationStage {
    generator: Arc<dyn ResponseGenerator>,
    sleeper: Arc<dyn Sleeper>,
    store: Store,
    policy: PollPolicy,
    concurrency: usize,
}

impl GenerationStage {
    pub fn new(
        generator: Arc<dyn ResponseGenerator>,
        sleeper: Arc<dyn Sleeper>,
        store: Store,
        policy: PollPolicy,
        concurrency: usize,
    ) -> Self {
        Self {
            generator,
            sleeper,
            store,
            policy,
            concurrency: concurrency.max(1),
        }
    }

    pub async fn run(&self) -> Result<GenerateReport, PipelineError> {
        let mut known = self.store.derive_known_ids(Scope::Pending).await?;
        known.extend(self.store.derive_known_ids(Scope::Archive).await?);

        let items: Vec<Stored<WorkItem>> = self.store.list_new(Scope::Received, &known).await?;
        info!(
            count = items.len(),
            concurrency = self.concurrency,
            provider = self.generator.name(),
            "Generating responses"
        );

        let results: Vec<(String, ItemOutcome<PathBuf>)> = stream::iter(items)
            .map(|stored| async move {
                let outcome = self.generate_one(&stored.document).await;
                (stored.document.id, outcome)
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let mut report = GenerateReport::default();
        for (id, outcome) in results {
            report.push(id, outcome);
        }

        info!(
            generated = report.succeeded(),
            skipped = report.skipped(),
            failed = report.failed(),
            "Generation finished"
        );
        Ok(report)
    }

    async fn generate_one(&self, item: &WorkItem) -> ItemOutcome<PathBuf> {
        let _claim = match self.store.claim(Scope::Pending, &item.id).await {
            Ok(guard) => guard,
            Err(StoreError::AlreadyClaimed { .. }) => {
                debug!(id = %item.id, "Claimed elsewhere, skipping");
                return ItemOutcome::Skipped(SkipReason::Claimed);
            }
            Err(e) => return ItemOutcome::Failed(e.to_string()),
        };

        // Another worker may have finished between the scan and the claim.
        match self.already_responded(&item.id).await {
            Ok(true) => return ItemOutcome::Skipped(SkipReason::AlreadyResponded),
            Ok(false) => {}
            Err(e) => return ItemOutcome::Failed(e.to_string()),
        }

        let prompt = build_prompt(item);
        let reply = match await_completion(
            self.generator.as_ref(),
            self.sleeper.as_ref(),
            self.policy,
            &prompt,
        )
        .await
        {
            Ok(reply) => reply,
            Err(e) => {
                warn!(id = %item.id, error = %e, "Generation failed, will retry next run");
                return ItemOutcome::Failed(e.to_string());
            }
        };
        debug!(id = %item.id, preview = %preview(&reply), "Generated reply");

        let response = ResponseItem::for_work_item(item, reply, naming::timestamp_now());
        match self.store.put(Scope::Pending, Some(RESPONSE_TAG), &response).await {
            Ok(path) => {
                info!(id = %item.id, subject = %item.subject, "Response queued");
                ItemOutcome::Success(path)
            }
            Err(StoreError::Duplicate { .. }) => ItemOutcome::Skipped(SkipReason::AlreadyResponded),
            Err(e) => {
                warn!(id = %item.id, error = %e, "Failed to store response");
                ItemOutcome::Failed(e.to_string())
            }
        }
    }

    async fn already_responded(&self, id: &str) -> Result<bool, StoreError> {
        Ok(self.store.exists(Scope::Pending, id).await? || self.store.exists(Scope::Archive, id).await?)
    }
}

fn preview(text: &str) -> String {
    match text.char_indices().nth(PREVIEW_CHARS) {
        Some((end, _)) => format!("{}...", &text[..end]),
        None => text.to_string(),
    }
}
