//! Runs the four stages once, in order.

use std::fmt;
use std::sync::Arc;

use tracing::{error, info};

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::generator::{ResponseGenerator, Sleeper};
use crate::mailbox::MailboxGateway;
use crate::pipeline::dispatch::DispatchStage;
use crate::pipeline::generate::GenerationStage;
use crate::pipeline::ingest::IngestionStage;
use crate::pipeline::retention::RetentionStage;
use crate::store::Store;

/// Position of the driver in one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Ingest,
    Generate,
    Dispatch,
    Cleanup,
    Done,
}

impl PipelineState {
    pub fn next(self) -> Self {
        match self {
            Self::Ingest => Self::Generate,
            Self::Generate => Self::Dispatch,
            Self::Dispatch => Self::Cleanup,
            Self::Cleanup | Self::Done => Self::Done,
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Ingest => "ingest",
            Self::Generate => "generate",
            Self::Dispatch => "dispatch",
            Self::Cleanup => "cleanup",
            Self::Done => "done",
        };
        write!(f, "{s}")
    }
}

/// Outcome of one stage within a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageSummary {
    pub stage: PipelineState,
    /// False when the stage failed as a whole (or, for cleanup, when any
    /// deletion failed).
    pub completed: bool,
    /// Items stored, generated, dispatched, or deleted.
    pub count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineSummary {
    pub stages: Vec<StageSummary>,
}

impl PipelineSummary {
    pub fn stage(&self, stage: PipelineState) -> Option<&StageSummary> {
        self.stages.iter().find(|s| s.stage == stage)
    }

    pub fn count(&self, stage: PipelineState) -> usize {
        self.stage(stage).map(|s| s.count).unwrap_or(0)
    }

    pub fn all_completed(&self) -> bool {
        self.stages.iter().all(|s| s.completed)
    }
}

impl fmt::Display for PipelineSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, s) in self.stages.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            let mark = if s.completed { "" } else { " (incomplete)" };
            write!(f, "{}: {}{}", s.stage, s.count, mark)?;
        }
        Ok(())
    }
}

/// Collaborators the pipeline drives.
pub struct PipelineDeps {
    pub mailbox: Arc<dyn MailboxGateway>,
    pub generator: Arc<dyn ResponseGenerator>,
    pub sleeper: Arc<dyn Sleeper>,
}

/// One-shot pipeline: Ingest → Generate → Dispatch → Cleanup.
pub struct Pipeline {
    store: Store,
    ingest: IngestionStage,
    generate: GenerationStage,
    dispatch: DispatchStage,
    retention: RetentionStage,
}

impl Pipeline {
    pub fn new(config: &PipelineConfig, deps: PipelineDeps) -> Self {
        let store = Store::new(&config.root_dir);
        Self {
            ingest: IngestionStage::new(deps.mailbox.clone(), store.clone(), config.labels.clone()),
            generate: GenerationStage::new(
                deps.generator,
                deps.sleeper,
                store.clone(),
                config.poll,
                config.generation_concurrency,
            ),
            dispatch: DispatchStage::new(deps.mailbox, store.clone(), config.from_address.clone()),
            retention: RetentionStage::new(store.clone()),
            store,
        }
    }

    /// Run every stage once. Never fails: a stage error is logged and the
    /// next stage still runs.
    pub async fn run_once(&self) -> PipelineSummary {
        info!(root = %self.store.root().display(), "Pipeline run starting");
        if let Err(e) = self.store.ensure_dirs().await {
            error!(error = %e, "Failed to create store directories");
        }

        let mut summary = PipelineSummary::default();
        let mut state = PipelineState::Ingest;
        while state != PipelineState::Done {
            let stage = match state {
                PipelineState::Ingest => {
                    finish(state, self.ingest.run().await.map(|r| r.succeeded()))
                }
                PipelineState::Generate => {
                    finish(state, self.generate.run().await.map(|r| r.succeeded()))
                }
                PipelineState::Dispatch => {
                    finish(state, self.dispatch.run().await.map(|r| r.succeeded()))
                }
                PipelineState::Cleanup => {
                    let report = self.retention.run().await;
                    StageSummary {
                        stage: state,
                        completed: report.is_clean(),
                        count: report.deleted,
                    }
                }
                PipelineState::Done => break,
            };
            summary.stages.push(stage);
            state = state.next();
        }

        info!(summary = %summary, "Pipeline run finished");
        summary
    }
}

fn finish(stage: PipelineState, result: Result<usize, PipelineError>) -> StageSummary {
    match result {
        Ok(count) => StageSummary {
            stage,
            completed: true,
            count,
        },
        Err(e) => {
            error!(stage = %stage, error = %e, "Stage failed, continuing");
            StageSummary {
                stage,
                completed: false,
                count: 0,
            }
        }
    }
}
