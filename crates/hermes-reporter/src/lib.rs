//! Report window management: per-context reporting sessions opened by chat
//! activity, extended on idle gaps before the daily cutoff, and closed with
//! a report link pushed to every chat of the context.

use std::sync::Arc;

use hermes_outbound::{ArtifactResolver, Notifier};
use hermes_store::{ChatDirectory, ReportStore};

mod config;
mod recovery;
mod report_notify;
mod session_policy;
mod window_manager;

#[cfg(test)]
mod test_support;

pub use config::ReporterConfig;
pub use recovery::RecoveryResolver;
pub use report_notify::{ChatDeliveryError, NotifyError, NotifyOutcome};
pub use session_policy::{SessionDecision, SessionPolicy};
pub use window_manager::WindowManager;

/// External services a window manager talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn ReportStore>,
    pub directory: Arc<dyn ChatDirectory>,
    pub artifacts: Arc<dyn ArtifactResolver>,
    pub notifier: Arc<dyn Notifier>,
}
