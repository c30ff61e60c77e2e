//! Staged file-queue pipeline.
//!
//! Each run moves work forward through the store:
//! 1. `IngestionStage`: unread labeled mail → `Emails_Received/`
//! 2. `GenerationStage`: received items → generated replies in `Emails_To_Send/`
//! 3. `DispatchStage`: replies sent (or label-routed) → `Emails_To_Send/Sent/`
//! 4. `RetentionStage`: every scope emptied
//!
//! No stage keeps an in-memory "processed" set between runs. Progress is
//! whatever the directories say it is.

pub mod directive;
pub mod dispatch;
pub mod driver;
pub mod generate;
pub mod ingest;
pub mod retention;
pub mod types;

pub use directive::{Directive, parse_directive};
pub use dispatch::DispatchStage;
pub use driver::{Pipeline, PipelineDeps, PipelineState, PipelineSummary, StageSummary};
pub use generate::GenerationStage;
pub use ingest::IngestionStage;
pub use retention::RetentionStage;
pub use types::{Delivery, ItemOutcome, SkipReason, StageReport};
