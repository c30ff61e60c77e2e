//! Shared types for the pipeline stages.

use std::fmt;
use std::path::PathBuf;

// ── Per-item outcomes ───────────────────────────────────────────────

/// Why an item was left alone this run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Ingestion: the message is already in the received store.
    AlreadyStored,
    /// Generation: a response exists (pending or archived).
    AlreadyResponded,
    /// Another worker holds the item's claim.
    Claimed,
    /// Dispatch: the pending file was archived by someone else.
    AlreadyDispatched,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::AlreadyStored => "already stored",
            Self::AlreadyResponded => "already responded",
            Self::Claimed => "claimed by another worker",
            Self::AlreadyDispatched => "already dispatched",
        };
        write!(f, "{s}")
    }
}

/// Result of processing one work item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOutcome<T> {
    Success(T),
    Skipped(SkipReason),
    /// The item stays where it is and is retried next run.
    Failed(String),
}

impl<T> ItemOutcome<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemResult<T> {
    pub id: String,
    pub outcome: ItemOutcome<T>,
}

/// Per-item results of one stage run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageReport<T> {
    pub items: Vec<ItemResult<T>>,
}

impl<T> Default for StageReport<T> {
    fn default() -> Self {
        Self { items: Vec::new() }
    }
}

impl<T> StageReport<T> {
    pub fn push(&mut self, id: impl Into<String>, outcome: ItemOutcome<T>) {
        self.items.push(ItemResult {
            id: id.into(),
            outcome,
        });
    }

    pub fn succeeded(&self) -> usize {
        self.items.iter().filter(|i| i.outcome.is_success()).count()
    }

    pub fn skipped(&self) -> usize {
        self.items
            .iter()
            .filter(|i| matches!(i.outcome, ItemOutcome::Skipped(_)))
            .count()
    }

    pub fn failed(&self) -> usize {
        self.items
            .iter()
            .filter(|i| matches!(i.outcome, ItemOutcome::Failed(_)))
            .count()
    }

    pub fn outcome_of(&self, id: &str) -> Option<&ItemOutcome<T>> {
        self.items.iter().find(|i| i.id == id).map(|i| &i.outcome)
    }
}

// ── Stage payloads ──────────────────────────────────────────────────

/// What dispatch did with a pending response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// Reply sent (label applied first when a directive named one).
    Sent {
        sent_id: String,
        label: Option<String>,
    },
    /// Directive with no body: label applied, nothing sent.
    LabelOnly { label: Option<String> },
    /// Already sent on an earlier run; only the archive move was missing.
    Recovered { sent_id: String },
}

/// Received work items persisted this run, keyed by message id.
pub type IngestReport = StageReport<PathBuf>;

/// Pending responses written this run.
pub type GenerateReport = StageReport<PathBuf>;

pub type DispatchReport = StageReport<Delivery>;

/// Files removed from each scope by the retention stage.
#[derive(Debug, Default)]
pub struct RetentionReport {
    pub deleted: usize,
    pub failures: Vec<(PathBuf, String)>,
}

impl RetentionReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}
