//! Per-context report sessions.
//!
//! The manager keeps a registry from context id to the activity channel of
//! the single task that owns that context's open report. A session is
//! inserted and its task spawned under the registry lock, so concurrent
//! callers for one context always meet the same task. When a session closes
//! it first leaves the registry, then closes and drains its channel;
//! anything still queued is re-dispatched to a fresh session for the same
//! context, so no registered activity is lost at the boundary.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use hermes_core::Clock;
use hermes_types::{ContextId, Report};
use tokio::sync::mpsc::error::SendError;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::recovery::RecoveryResolver;
use crate::report_notify::{notify_logged, notify_report, NotifyError, NotifyOutcome};
use crate::session_policy::{SessionDecision, SessionPolicy};
use crate::{Collaborators, ReporterConfig};

/// One registered activity travelling to a session task.
///
/// The task answers on `ack` with the start time of the report that
/// accepted the activity. A drained activity carries its ack to the next
/// session, so the caller always learns the session that actually owns it.
#[derive(Debug)]
struct Activity {
    occurred_at: DateTime<Utc>,
    ack: oneshot::Sender<DateTime<Utc>>,
}

#[derive(Debug)]
struct SessionHandle {
    generation: u64,
    sender: mpsc::Sender<Activity>,
}

struct SessionSeed {
    context_id: ContextId,
    context_name: String,
    seed_at: DateTime<Utc>,
    generation: u64,
}

/// Coordinates report sessions for every context.
pub struct WindowManager {
    shared: Arc<Shared>,
}

struct Shared {
    config: ReporterConfig,
    collaborators: Collaborators,
    clock: Arc<dyn Clock>,
    policy: SessionPolicy,
    recovery: RecoveryResolver,
    registry: Mutex<HashMap<ContextId, SessionHandle>>,
    next_generation: AtomicU64,
    shutdown: CancellationToken,
}

impl WindowManager {
    pub fn new(
        config: ReporterConfig,
        collaborators: Collaborators,
        clock: Arc<dyn Clock>,
    ) -> Arc<Self> {
        let policy = SessionPolicy::from_config(&config);
        let recovery = RecoveryResolver::new(collaborators.store.clone(), policy, clock.clone());
        Arc::new(Self {
            shared: Arc::new(Shared {
                config,
                collaborators,
                clock,
                policy,
                recovery,
                registry: Mutex::new(HashMap::new()),
                next_generation: AtomicU64::new(1),
                shutdown: CancellationToken::new(),
            }),
        })
    }

    pub fn config(&self) -> &ReporterConfig {
        &self.shared.config
    }

    /// Registers activity for `context_id` and returns the start time of the
    /// report session that accepted it.
    ///
    /// Joins the live session of the context or starts one. If `cancel`
    /// fires or the manager shuts down before a session accepts the
    /// activity, the current wall time is returned instead.
    pub async fn register_activity(
        &self,
        cancel: &CancellationToken,
        context_id: ContextId,
        context_name: &str,
        occurred_at: DateTime<Utc>,
    ) -> DateTime<Utc> {
        self.shared
            .register(cancel, context_id, context_name, occurred_at)
            .await
    }

    /// Stops every session task without finishing its report. Open reports
    /// are picked up by recovery on the next start.
    pub fn shutdown(&self) {
        if !self.shared.shutdown.is_cancelled() {
            info!(
                active_sessions = self.active_sessions(),
                "report window manager shutting down"
            );
        }
        self.shared.shutdown.cancel();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shared.shutdown.is_cancelled()
    }

    /// Number of contexts with a live session.
    pub fn active_sessions(&self) -> usize {
        lock_registry(&self.shared.registry)
            .values()
            .filter(|handle| !handle.sender.is_closed())
            .count()
    }

    /// Sends the artifact link of `report` to every chat of its context.
    pub async fn notify(
        &self,
        report: &Report,
        context_name: &str,
    ) -> Result<NotifyOutcome, NotifyError> {
        notify_report(
            &self.shared.collaborators,
            report,
            self.shared.artifact_context_name(context_name),
        )
        .await
    }
}

impl Drop for WindowManager {
    fn drop(&mut self) {
        self.shared.shutdown.cancel();
    }
}

impl Shared {
    async fn register(
        self: &Arc<Self>,
        cancel: &CancellationToken,
        context_id: ContextId,
        context_name: &str,
        occurred_at: DateTime<Utc>,
    ) -> DateTime<Utc> {
        if cancel.is_cancelled() || self.shutdown.is_cancelled() {
            return self.clock.now();
        }

        let (ack, accepted) = oneshot::channel();
        let activity = Activity { occurred_at, ack };
        if !self
            .dispatch(cancel, context_id, context_name, activity)
            .await
        {
            debug!(context_id, "activity registration aborted");
            return self.clock.now();
        }

        tokio::select! {
            started_at = accepted => match started_at {
                Ok(started_at) => started_at,
                Err(_) => self.clock.now(),
            },
            _ = cancel.cancelled() => self.clock.now(),
            _ = self.shutdown.cancelled() => self.clock.now(),
        }
    }

    /// Hands `activity` to the live session of `context_id`, starting one if
    /// needed. Returns `false` when cancellation or shutdown won the race.
    async fn dispatch(
        self: &Arc<Self>,
        cancel: &CancellationToken,
        context_id: ContextId,
        context_name: &str,
        mut activity: Activity,
    ) -> bool {
        loop {
            if self.shutdown.is_cancelled() {
                return false;
            }
            let sender = self.session_sender(context_id, context_name, activity.occurred_at);
            let sent = tokio::select! {
                sent = sender.send(activity) => sent,
                _ = cancel.cancelled() => return false,
                _ = self.shutdown.cancelled() => return false,
            };
            match sent {
                Ok(()) => return true,
                // The session closed between lookup and send; retry against
                // its successor.
                Err(SendError(returned)) => activity = returned,
            }
        }
    }

    /// Returns the sender of the live session for `context_id`, inserting a
    /// new session and spawning its task while the registry lock is held.
    fn session_sender(
        self: &Arc<Self>,
        context_id: ContextId,
        context_name: &str,
        seed_at: DateTime<Utc>,
    ) -> mpsc::Sender<Activity> {
        let mut registry = lock_registry(&self.registry);
        if let Some(handle) = registry.get(&context_id) {
            if !handle.sender.is_closed() {
                return handle.sender.clone();
            }
        }

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::channel(1);
        registry.insert(
            context_id,
            SessionHandle {
                generation,
                sender: sender.clone(),
            },
        );
        spawn_session(
            Arc::clone(self),
            SessionSeed {
                context_id,
                context_name: context_name.to_string(),
                seed_at,
                generation,
            },
            receiver,
        );
        debug!(context_id, generation, "report session registered");
        sender
    }

    /// Removes the registry entry of `context_id` if it still belongs to
    /// `generation`.
    fn release(&self, context_id: ContextId, generation: u64) {
        let mut registry = lock_registry(&self.registry);
        match registry.get(&context_id) {
            Some(handle) if handle.generation == generation => {
                registry.remove(&context_id);
            }
            Some(handle) => warn!(
                context_id,
                generation,
                registered_generation = handle.generation,
                "registry already points at a newer session"
            ),
            None => warn!(context_id, generation, "session missing from registry at close"),
        }
    }

    fn artifact_context_name<'a>(&self, context_name: &'a str) -> &'a str {
        if self.config.include_context_name {
            context_name
        } else {
            ""
        }
    }

    async fn ensure_persisted(&self, report: &mut Report) {
        if report.is_persisted() {
            return;
        }
        match self
            .collaborators
            .store
            .create_report(report.context_id, report.started_at)
            .await
        {
            Ok(report_id) => {
                report.id = Some(report_id);
                info!(
                    context_id = report.context_id,
                    report_id,
                    started_at = %report.started_at,
                    "report created"
                );
            }
            Err(error) => warn!(
                context_id = report.context_id,
                %error,
                "failed to create report; will retry on next activity"
            ),
        }
    }

    async fn record_activity(&self, report: &mut Report, activity: Activity) {
        let Activity { occurred_at, ack } = activity;
        let _ = ack.send(report.started_at);
        report.touch(occurred_at);

        self.ensure_persisted(report).await;
        let Some(report_id) = report.id else {
            return;
        };
        if let Err(error) = self
            .collaborators
            .store
            .update_activity(report_id, occurred_at)
            .await
        {
            warn!(
                context_id = report.context_id,
                report_id,
                %error,
                "failed to record report activity"
            );
        }
    }

    async fn close(
        self: &Arc<Self>,
        mut report: Report,
        context_name: &str,
        generation: u64,
        mut receiver: mpsc::Receiver<Activity>,
        now: DateTime<Utc>,
    ) {
        let context_id = report.context_id;
        match report.id {
            Some(report_id) => {
                if let Err(error) = self.collaborators.store.finish_report(report_id, now).await {
                    warn!(context_id, report_id, %error, "failed to finish report");
                }
            }
            None => warn!(context_id, "closing a report that was never persisted"),
        }
        report.finished_at = Some(now);

        self.release(context_id, generation);
        receiver.close();

        let mut redispatched = 0usize;
        let detached = CancellationToken::new();
        while let Some(activity) = receiver.recv().await {
            redispatched += 1;
            if !self
                .dispatch(&detached, context_id, context_name, activity)
                .await
            {
                debug!(context_id, "drained activity dropped by shutdown");
            }
        }

        info!(
            context_id,
            report_id = report.id,
            started_at = %report.started_at,
            redispatched,
            "report session closed"
        );
        notify_logged(
            &self.collaborators,
            &report,
            self.artifact_context_name(context_name),
            "final",
        )
        .await;
    }
}

fn spawn_session(shared: Arc<Shared>, seed: SessionSeed, receiver: mpsc::Receiver<Activity>) {
    tokio::spawn(run_session(shared, seed, receiver));
}

async fn run_session(shared: Arc<Shared>, seed: SessionSeed, mut receiver: mpsc::Receiver<Activity>) {
    let SessionSeed {
        context_id,
        context_name,
        seed_at,
        generation,
    } = seed;

    let (mut report, resumed) = shared.recovery.resolve(context_id, seed_at).await;
    info!(
        context_id,
        generation,
        resumed,
        started_at = %report.started_at,
        "report session opened"
    );
    shared.ensure_persisted(&mut report).await;

    // Set by activity, cleared by an interim notify: one interim link per
    // idle gap.
    let mut pending_interim = false;
    loop {
        tokio::select! {
            _ = shared.shutdown.cancelled() => {
                info!(
                    context_id,
                    report_id = report.id,
                    "report session stopped by shutdown; report left open"
                );
                return;
            }
            received = receiver.recv() => match received {
                Some(activity) => {
                    shared.record_activity(&mut report, activity).await;
                    pending_interim = true;
                }
                None => {
                    warn!(context_id, generation, "activity channel closed unexpectedly");
                    return;
                }
            },
            _ = tokio::time::sleep(shared.config.idle_timeout) => {
                let now = shared.clock.now();
                match shared.policy.decide(&report, now) {
                    SessionDecision::Extend => {
                        debug!(
                            context_id,
                            report_id = report.id,
                            pending_interim,
                            "idle before cutoff; extending"
                        );
                        if pending_interim {
                            notify_logged(
                                &shared.collaborators,
                                &report,
                                shared.artifact_context_name(&context_name),
                                "interim",
                            )
                            .await;
                            pending_interim = false;
                        }
                    }
                    SessionDecision::Close => {
                        shared
                            .close(report, &context_name, generation, receiver, now)
                            .await;
                        return;
                    }
                }
            }
        }
    }
}

fn lock_registry(
    registry: &Mutex<HashMap<ContextId, SessionHandle>>,
) -> MutexGuard<'_, HashMap<ContextId, SessionHandle>> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}
