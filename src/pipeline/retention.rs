//! Retention: clear every scope once the cycle has been dispatched.

use tracing::{info, warn};

use crate::pipeline::types::RetentionReport;
use crate::store::{Scope, Store};

pub struct RetentionStage {
    store: Store,
}

impl RetentionStage {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Best-effort purge of received, pending and archived items.
    pub async fn run(&self) -> RetentionReport {
        let mut report = RetentionReport::default();

        for scope in [Scope::Received, Scope::Pending, Scope::Archive] {
            let purge = self.store.delete_all(scope).await;
            for (path, reason) in &purge.failures {
                warn!(scope = %scope, path = %path.display(), error = %reason, "Failed to delete");
            }
            info!(scope = %scope, deleted = purge.deleted, "Purged scope");
            report.deleted += purge.deleted;
            report.failures.extend(purge.failures);
        }

        report
    }
}
