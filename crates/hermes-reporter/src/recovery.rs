//! Crash recovery for reports left open by a previous process.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use hermes_core::Clock;
use hermes_store::{ReportStore, StoreError};
use hermes_types::{ContextId, Report};
use tracing::{info, warn};

use crate::session_policy::{SessionDecision, SessionPolicy};

/// Collapses the open reports of a context to at most one before a session
/// starts.
///
/// The most recently started report that the policy would not yet close is
/// resumed; every other open report is finished at the current wall time.
/// The resolver never creates rows, so resolving twice without intervening
/// activity yields the same report.
#[derive(Clone)]
pub struct RecoveryResolver {
    store: Arc<dyn ReportStore>,
    policy: SessionPolicy,
    clock: Arc<dyn Clock>,
}

impl RecoveryResolver {
    pub fn new(store: Arc<dyn ReportStore>, policy: SessionPolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            policy,
            clock,
        }
    }

    /// Returns the report a new session should own and whether it already
    /// existed in the store.
    ///
    /// A fresh report is seeded with `seed_at` and left unpersisted. Store
    /// failures degrade to a fresh report.
    pub async fn resolve(&self, context_id: ContextId, seed_at: DateTime<Utc>) -> (Report, bool) {
        let candidates = match self.store.list_not_finished(context_id).await {
            Ok(candidates) => candidates,
            Err(error) => {
                warn!(context_id, %error, "listing open reports failed; starting fresh");
                return (Report::fresh(context_id, seed_at), false);
            }
        };
        if candidates.is_empty() {
            return (Report::fresh(context_id, seed_at), false);
        }

        let now = self.clock.now();
        let resume_index = candidates
            .iter()
            .enumerate()
            .filter(|(_, report)| self.policy.decide(report, now) == SessionDecision::Extend)
            .max_by_key(|(_, report)| (report.started_at, report.id))
            .map(|(index, _)| index);

        let mut resumed = None;
        for (index, report) in candidates.into_iter().enumerate() {
            if Some(index) == resume_index {
                resumed = Some(report);
                continue;
            }
            self.force_finish(&report, now).await;
        }

        match resumed {
            Some(report) => {
                info!(
                    context_id,
                    report_id = report.id,
                    started_at = %report.started_at,
                    "resuming open report"
                );
                (report, true)
            }
            None => (Report::fresh(context_id, seed_at), false),
        }
    }

    async fn force_finish(&self, report: &Report, now: DateTime<Utc>) {
        let Some(report_id) = report.id else {
            return;
        };
        match self.store.finish_report(report_id, now).await {
            Ok(()) => info!(
                context_id = report.context_id,
                report_id,
                "finished stale open report"
            ),
            Err(StoreError::ReportAlreadyFinished(_)) => {}
            Err(error) => warn!(
                context_id = report.context_id,
                report_id,
                %error,
                "failed to finish stale open report"
            ),
        }
    }
}
