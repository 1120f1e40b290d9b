//! Periodic reminder scheduler.
//!
//! Wakes every `poll_interval`, and when the local wall clock sits on one of
//! the configured checkpoints, scans open tasks and sends at most one
//! reminder per task per cooldown window.

use crate::error::AppError;
use crate::mail::Mailer;
use crate::model::{Task, User};
use crate::notify::{Notifier, activation_argument};
use crate::reminder::checkpoint::matching_checkpoint;
use crate::reminder::clock::Clock;
use crate::reminder::due::{ReminderState, evaluate};
use crate::reminder::message::ReminderMessage;
use crate::reminder::settings::ReminderSettings;
use crate::storage::{OwnedTask, TaskStore};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use time::OffsetDateTime;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub scanned: usize,
    /// Tasks whose reminder was recorded during this cycle.
    pub dispatched: Vec<String>,
    pub cooling_down: usize,
    pub not_due: usize,
    pub invalid: usize,
    pub orphaned: usize,
    pub failures: Vec<DeliveryFailure>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryFailure {
    pub task_id: String,
    pub error: AppError,
}

#[derive(Debug)]
pub enum CycleOutcome {
    /// The current minute is not a checkpoint.
    Idle,
    /// A previous cycle is still running.
    Busy,
    Ran(CycleReport),
    Failed(AppError),
}

pub struct ReminderScheduler {
    store: Arc<dyn TaskStore>,
    mailer: Arc<dyn Mailer>,
    notifier: Option<Arc<dyn Notifier>>,
    clock: Arc<dyn Clock>,
    settings: ReminderSettings,
    in_progress: AtomicBool,
}

struct CycleGuard<'a>(&'a AtomicBool);

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl ReminderScheduler {
    pub fn new(
        store: Arc<dyn TaskStore>,
        mailer: Arc<dyn Mailer>,
        clock: Arc<dyn Clock>,
        settings: ReminderSettings,
    ) -> Self {
        Self {
            store,
            mailer,
            notifier: None,
            clock,
            settings,
            in_progress: AtomicBool::new(false),
        }
    }

    /// Also raise a desktop notification for owners that opted in.
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn settings(&self) -> &ReminderSettings {
        &self.settings
    }

    /// Spawn the timer loop. The first poll happens immediately.
    pub fn start(self: Arc<Self>) -> SchedulerHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let period = self.settings.poll_interval;

        let join = tokio::spawn(async move {
            info!(
                checkpoints = ?self.settings.checkpoint_labels(),
                interval_secs = period.as_secs(),
                "reminder scheduler started"
            );
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        self.poll().await;
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            info!("reminder scheduler stopped");
        });

        SchedulerHandle {
            shutdown: shutdown_tx,
            join,
        }
    }

    /// One timer wake: scan only when the clock is on a checkpoint and no
    /// other cycle is running. Errors are logged, never propagated.
    pub async fn poll(&self) -> CycleOutcome {
        let Some(_guard) = self.try_begin() else {
            debug!("previous reminder cycle still running, skipping wake");
            return CycleOutcome::Busy;
        };

        let now = self.clock.now();
        let Some(checkpoint) = matching_checkpoint(&self.settings.checkpoints, now) else {
            debug!(time = %format_hh_mm(now), "not a reminder checkpoint");
            return CycleOutcome::Idle;
        };

        info!(%checkpoint, "checkpoint reached, scanning tasks");
        match self.scan(now).await {
            Ok(report) => {
                info!(
                    scanned = report.scanned,
                    dispatched = report.dispatched.len(),
                    cooling_down = report.cooling_down,
                    failures = report.failures.len(),
                    "reminder cycle finished"
                );
                CycleOutcome::Ran(report)
            }
            Err(err) => {
                error!(error = %err, "reminder cycle aborted");
                CycleOutcome::Failed(err)
            }
        }
    }

    /// Scan open tasks as of `now`, ignoring checkpoints.
    pub async fn run_cycle(&self, now: OffsetDateTime) -> Result<CycleReport, AppError> {
        let Some(_guard) = self.try_begin() else {
            return Err(AppError::invalid_input("a reminder cycle is already running"));
        };
        self.scan(now).await
    }

    fn try_begin(&self) -> Option<CycleGuard<'_>> {
        self.in_progress
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| CycleGuard(&self.in_progress))
    }

    async fn scan(&self, now: OffsetDateTime) -> Result<CycleReport, AppError> {
        let open = self.store.open_tasks_with_owner()?;
        let mut report = CycleReport::default();

        for OwnedTask { task, owner } in open {
            report.scanned += 1;

            let Some(owner) = owner else {
                debug!(task_id = %task.id, "task has no owner, skipping");
                report.orphaned += 1;
                continue;
            };

            match evaluate(&task, now, self.settings.cooldown) {
                ReminderState::Completed | ReminderState::NoDueDate | ReminderState::NotDue => {
                    report.not_due += 1;
                }
                ReminderState::InvalidDueDate => {
                    debug!(task_id = %task.id, due_date = %task.due_date, "unparseable due date, skipping");
                    report.invalid += 1;
                }
                ReminderState::CoolingDown { last_sent } => {
                    info!(
                        task_id = %task.id,
                        last_sent = %format_hh_mm(last_sent),
                        "reminder sent recently, skipping"
                    );
                    report.cooling_down += 1;
                }
                ReminderState::Eligible => {
                    self.remind(&task, &owner, now, &mut report).await;
                }
            }
        }

        Ok(report)
    }

    async fn remind(&self, task: &Task, owner: &User, now: OffsetDateTime, report: &mut CycleReport) {
        let mut delivered = true;

        if owner.email_notifications {
            let message = ReminderMessage::for_task(task, &owner.email, &self.settings.app_url);
            match self.mailer.send(&message).await {
                Ok(()) => info!(task_id = %task.id, recipient = %owner.email, "reminder email sent"),
                Err(err) => {
                    warn!(task_id = %task.id, recipient = %owner.email, error = %err, "reminder email failed");
                    report.failures.push(DeliveryFailure {
                        task_id: task.id.clone(),
                        error: err,
                    });
                    delivered = false;
                }
            }
        }

        if owner.desktop_notifications
            && let Some(notifier) = self.notifier.as_ref()
            && let Err(err) = notifier.notify_with_action(task, &activation_argument(&task.id))
        {
            warn!(task_id = %task.id, error = %err, "desktop notification failed");
        }

        if !delivered && !self.settings.mark_sent_on_failure {
            return;
        }

        match self.store.record_reminder(&task.id, now) {
            Ok(()) => report.dispatched.push(task.id.clone()),
            Err(err) => {
                warn!(task_id = %task.id, error = %err, "failed to record reminder");
                report.failures.push(DeliveryFailure {
                    task_id: task.id.clone(),
                    error: err,
                });
            }
        }
    }
}

fn format_hh_mm(instant: OffsetDateTime) -> String {
    format!("{:02}:{:02}", instant.hour(), instant.minute())
}

/// Owns the spawned scheduler loop. Dropping it also stops the loop.
pub struct SchedulerHandle {
    shutdown: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl SchedulerHandle {
    pub async fn shutdown(self) -> Result<(), AppError> {
        let _ = self.shutdown.send(true);
        self.join
            .await
            .map_err(|err| AppError::io(format!("reminder scheduler task failed: {err}")))
    }
}

#[cfg(test)]
mod tests {
    use super::{CycleOutcome, ReminderScheduler};
    use crate::error::AppError;
    use crate::mail::Mailer;
    use crate::model::{Priority, Task, TaskStatus, User};
    use crate::notify::Notifier;
    use crate::reminder::clock::{Clock, FixedClock};
    use crate::reminder::message::ReminderMessage;
    use crate::reminder::settings::ReminderSettings;
    use crate::storage::{OwnedTask, TaskStore};
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::sync::Mutex;
    use std::sync::atomic::Ordering;
    use time::format_description::well_known::Rfc3339;
    use time::macros::datetime;
    use time::{Duration, OffsetDateTime};

    /// Returns every stored task, completed ones included, so the scheduler's
    /// own status check is exercised.
    #[derive(Default)]
    struct MemoryStore {
        tasks: Mutex<Vec<OwnedTask>>,
        fail_reads: bool,
    }

    impl MemoryStore {
        fn with(tasks: Vec<OwnedTask>) -> Self {
            Self {
                tasks: Mutex::new(tasks),
                fail_reads: false,
            }
        }

        fn task(&self, id: &str) -> Task {
            self.tasks
                .lock()
                .unwrap()
                .iter()
                .find(|owned| owned.task.id == id)
                .map(|owned| owned.task.clone())
                .unwrap()
        }
    }

    impl TaskStore for MemoryStore {
        fn open_tasks_with_owner(&self) -> Result<Vec<OwnedTask>, AppError> {
            if self.fail_reads {
                return Err(AppError::io("store offline"));
            }
            Ok(self.tasks.lock().unwrap().clone())
        }

        fn record_reminder(&self, task_id: &str, sent_at: OffsetDateTime) -> Result<(), AppError> {
            let mut tasks = self.tasks.lock().unwrap();
            let owned = tasks
                .iter_mut()
                .find(|owned| owned.task.id == task_id)
                .ok_or_else(|| AppError::invalid_input("task not found"))?;
            owned.task.reminder_sent = true;
            owned.task.last_reminder_sent = Some(sent_at.format(&Rfc3339).unwrap());
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingMailer {
        sent: Mutex<Vec<ReminderMessage>>,
        fail: bool,
    }

    impl RecordingMailer {
        fn failing() -> Self {
            Self {
                sent: Mutex::new(Vec::new()),
                fail: true,
            }
        }

        fn sent(&self) -> Vec<ReminderMessage> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Mailer for RecordingMailer {
        async fn send(&self, message: &ReminderMessage) -> Result<(), AppError> {
            if self.fail {
                return Err(AppError::delivery("smtp unavailable"));
            }
            self.sent.lock().unwrap().push(message.clone());
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        notified: Mutex<Vec<String>>,
    }

    impl Notifier for RecordingNotifier {
        fn notify(&self, task: &Task) -> Result<(), AppError> {
            self.notified.lock().unwrap().push(task.id.clone());
            Ok(())
        }
    }

    fn user(email_notifications: bool) -> User {
        User {
            id: "user-1".to_string(),
            name: "Ada".to_string(),
            email: "ada@example.com".to_string(),
            email_notifications,
            desktop_notifications: true,
        }
    }

    fn task(id: &str, status: TaskStatus, due_date: &str) -> Task {
        Task {
            id: id.to_string(),
            title: format!("title {id}"),
            description: "description".to_string(),
            status,
            priority: Priority::High,
            due_date: due_date.to_string(),
            tags: Vec::new(),
            user_id: "user-1".to_string(),
            reminder_sent: false,
            last_reminder_sent: None,
            created_at: "2025-05-20T00:00:00Z".to_string(),
            updated_at: "2025-05-20T00:00:00Z".to_string(),
        }
    }

    fn owned(task: Task, owner: Option<User>) -> OwnedTask {
        OwnedTask { task, owner }
    }

    struct Harness {
        store: Arc<MemoryStore>,
        mailer: Arc<RecordingMailer>,
        clock: Arc<FixedClock>,
        scheduler: ReminderScheduler,
    }

    fn harness(
        store: MemoryStore,
        mailer: RecordingMailer,
        now: OffsetDateTime,
        settings: ReminderSettings,
    ) -> Harness {
        let store = Arc::new(store);
        let mailer = Arc::new(mailer);
        let clock = Arc::new(FixedClock::new(now));
        let scheduler =
            ReminderScheduler::new(store.clone(), mailer.clone(), clock.clone(), settings);
        Harness {
            store,
            mailer,
            clock,
            scheduler,
        }
    }

    fn ran(outcome: CycleOutcome) -> super::CycleReport {
        match outcome {
            CycleOutcome::Ran(report) => report,
            other => panic!("expected a cycle to run, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn due_task_at_checkpoint_sends_one_email_and_records_it() {
        let h = harness(
            MemoryStore::with(vec![owned(
                task("task-1", TaskStatus::Pending, "2025-06-01"),
                Some(user(true)),
            )]),
            RecordingMailer::default(),
            datetime!(2025-06-01 00:01 UTC),
            ReminderSettings::default(),
        );

        let report = ran(h.scheduler.poll().await);

        assert_eq!(report.dispatched, vec!["task-1".to_string()]);
        let sent = h.mailer.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].recipient, "ada@example.com");
        assert_eq!(sent[0].subject, "Task Reminder: title task-1");
        let stored = h.store.task("task-1");
        assert!(stored.reminder_sent);
        assert_eq!(
            stored.last_reminder_sent.as_deref(),
            Some("2025-06-01T00:01:00Z")
        );
    }

    #[tokio::test]
    async fn second_cycle_inside_cooldown_sends_nothing() {
        let h = harness(
            MemoryStore::with(vec![owned(
                task("task-1", TaskStatus::Pending, "2025-06-01"),
                Some(user(true)),
            )]),
            RecordingMailer::default(),
            datetime!(2025-06-01 00:01 UTC),
            ReminderSettings::default(),
        );

        ran(h.scheduler.poll().await);
        h.clock.advance(Duration::minutes(5));
        let second = h
            .scheduler
            .run_cycle(h.clock.now())
            .await
            .unwrap();

        assert!(second.dispatched.is_empty());
        assert_eq!(second.cooling_down, 1);
        assert_eq!(h.mailer.sent().len(), 1);
    }

    #[tokio::test]
    async fn repeated_polls_in_the_same_minute_dispatch_once() {
        let h = harness(
            MemoryStore::with(vec![
                owned(task("task-1", TaskStatus::Pending, "2025-06-01"), Some(user(true))),
                owned(task("task-2", TaskStatus::InProgress, "2025-06-01"), Some(user(true))),
            ]),
            RecordingMailer::default(),
            datetime!(2025-06-01 12:01:05 UTC),
            ReminderSettings::default(),
        );

        ran(h.scheduler.poll().await);
        h.clock.advance(Duration::seconds(40));
        let second = ran(h.scheduler.poll().await);

        assert!(second.dispatched.is_empty());
        assert_eq!(h.mailer.sent().len(), 2);
    }

    #[tokio::test]
    async fn later_checkpoint_reminds_again_after_cooldown() {
        let h = harness(
            MemoryStore::with(vec![owned(
                task("task-1", TaskStatus::Pending, "2025-06-01"),
                Some(user(true)),
            )]),
            RecordingMailer::default(),
            datetime!(2025-06-01 00:01 UTC),
            ReminderSettings::default(),
        );

        ran(h.scheduler.poll().await);
        h.clock.set(datetime!(2025-06-01 12:01 UTC));
        let second = ran(h.scheduler.poll().await);

        assert_eq!(second.dispatched, vec!["task-1".to_string()]);
        assert_eq!(h.mailer.sent().len(), 2);
    }

    #[tokio::test]
    async fn completed_tasks_never_trigger_reminders() {
        let h = harness(
            MemoryStore::with(vec![
                owned(task("task-1", TaskStatus::Completed, "2025-06-01"), Some(user(true))),
                owned(
                    Task {
                        status: "completed".parse().unwrap(),
                        ..task("task-2", TaskStatus::Pending, "2025-06-01")
                    },
                    Some(user(true)),
                ),
            ]),
            RecordingMailer::default(),
            datetime!(2025-06-01 20:00 UTC),
            ReminderSettings::default(),
        );

        let report = ran(h.scheduler.poll().await);

        assert!(report.dispatched.is_empty());
        assert!(h.mailer.sent().is_empty());
        assert!(h.store.task("task-1").last_reminder_sent.is_none());
    }

    #[tokio::test]
    async fn malformed_due_date_is_skipped_without_aborting_cycle() {
        let h = harness(
            MemoryStore::with(vec![
                owned(task("task-1", TaskStatus::Pending, "not-a-date"), Some(user(true))),
                owned(task("task-2", TaskStatus::Pending, "2025-06-01"), Some(user(true))),
            ]),
            RecordingMailer::default(),
            datetime!(2025-06-01 00:01 UTC),
            ReminderSettings::default(),
        );

        let report = ran(h.scheduler.poll().await);

        assert_eq!(report.invalid, 1);
        assert_eq!(report.dispatched, vec!["task-2".to_string()]);
        assert!(report.failures.is_empty());
    }

    #[tokio::test]
    async fn email_opt_out_still_updates_ledger() {
        let h = harness(
            MemoryStore::with(vec![owned(
                task("task-1", TaskStatus::Pending, "2025-06-01"),
                Some(user(false)),
            )]),
            RecordingMailer::default(),
            datetime!(2025-06-01 00:01 UTC),
            ReminderSettings::default(),
        );

        let report = ran(h.scheduler.poll().await);

        assert_eq!(report.dispatched, vec!["task-1".to_string()]);
        assert!(h.mailer.sent().is_empty());
        let stored = h.store.task("task-1");
        assert!(stored.reminder_sent);
        assert!(stored.last_reminder_sent.is_some());
    }

    #[tokio::test]
    async fn off_checkpoint_minute_is_a_no_op() {
        let store = MemoryStore {
            fail_reads: true,
            ..MemoryStore::default()
        };
        let h = harness(
            store,
            RecordingMailer::default(),
            datetime!(2025-06-01 00:02 UTC),
            ReminderSettings::default(),
        );

        assert!(matches!(h.scheduler.poll().await, CycleOutcome::Idle));
    }

    #[tokio::test]
    async fn store_failure_aborts_only_the_cycle() {
        let store = MemoryStore {
            fail_reads: true,
            ..MemoryStore::default()
        };
        let h = harness(
            store,
            RecordingMailer::default(),
            datetime!(2025-06-01 00:01 UTC),
            ReminderSettings::default(),
        );

        match h.scheduler.poll().await {
            CycleOutcome::Failed(err) => assert_eq!(err.code(), "io_error"),
            other => panic!("expected failure, got {other:?}"),
        }
        assert!(!h.scheduler.in_progress.load(Ordering::Acquire));
    }

    #[tokio::test]
    async fn failed_send_is_recorded_when_configured() {
        let h = harness(
            MemoryStore::with(vec![owned(
                task("task-1", TaskStatus::Pending, "2025-06-01"),
                Some(user(true)),
            )]),
            RecordingMailer::failing(),
            datetime!(2025-06-01 00:01 UTC),
            ReminderSettings::default(),
        );

        let report = ran(h.scheduler.poll().await);

        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].error.code(), "delivery_error");
        assert_eq!(report.dispatched, vec!["task-1".to_string()]);
        assert!(h.store.task("task-1").last_reminder_sent.is_some());
    }

    #[tokio::test]
    async fn failed_send_is_retried_when_not_marking_on_failure() {
        let settings = ReminderSettings {
            mark_sent_on_failure: false,
            ..ReminderSettings::default()
        };
        let h = harness(
            MemoryStore::with(vec![owned(
                task("task-1", TaskStatus::Pending, "2025-06-01"),
                Some(user(true)),
            )]),
            RecordingMailer::failing(),
            datetime!(2025-06-01 00:01 UTC),
            settings,
        );

        let report = ran(h.scheduler.poll().await);

        assert_eq!(report.failures.len(), 1);
        assert!(report.dispatched.is_empty());
        let stored = h.store.task("task-1");
        assert!(!stored.reminder_sent);
        assert!(stored.last_reminder_sent.is_none());
    }

    #[tokio::test]
    async fn tasks_without_owner_are_skipped() {
        let h = harness(
            MemoryStore::with(vec![owned(
                task("task-1", TaskStatus::Pending, "2025-06-01"),
                None,
            )]),
            RecordingMailer::default(),
            datetime!(2025-06-01 00:01 UTC),
            ReminderSettings::default(),
        );

        let report = ran(h.scheduler.poll().await);

        assert_eq!(report.orphaned, 1);
        assert!(report.dispatched.is_empty());
    }

    #[tokio::test]
    async fn day_rollover_stops_reminders_for_old_date() {
        let h = harness(
            MemoryStore::with(vec![owned(
                task("task-1", TaskStatus::Pending, "2025-06-01"),
                Some(user(true)),
            )]),
            RecordingMailer::default(),
            datetime!(2025-06-02 00:01 UTC),
            ReminderSettings::default(),
        );

        let report = ran(h.scheduler.poll().await);

        assert_eq!(report.not_due, 1);
        assert!(h.mailer.sent().is_empty());
    }

    #[tokio::test]
    async fn overlapping_poll_reports_busy() {
        let h = harness(
            MemoryStore::default(),
            RecordingMailer::default(),
            datetime!(2025-06-01 00:01 UTC),
            ReminderSettings::default(),
        );

        h.scheduler.in_progress.store(true, Ordering::Release);
        assert!(matches!(h.scheduler.poll().await, CycleOutcome::Busy));
        assert!(h.scheduler.run_cycle(h.clock.now()).await.is_err());
    }

    #[tokio::test]
    async fn desktop_notifier_fires_for_opted_in_owner() {
        let h = harness(
            MemoryStore::with(vec![owned(
                task("task-1", TaskStatus::Pending, "2025-06-01"),
                Some(user(false)),
            )]),
            RecordingMailer::default(),
            datetime!(2025-06-01 00:01 UTC),
            ReminderSettings::default(),
        );
        let notifier = Arc::new(RecordingNotifier::default());
        let scheduler = h.scheduler.with_notifier(notifier.clone());

        ran(scheduler.poll().await);

        assert_eq!(*notifier.notified.lock().unwrap(), vec!["task-1".to_string()]);
        assert!(h.mailer.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn started_scheduler_polls_until_shutdown() {
        let h = harness(
            MemoryStore::with(vec![owned(
                task("task-1", TaskStatus::Pending, "2025-06-01"),
                Some(user(true)),
            )]),
            RecordingMailer::default(),
            datetime!(2025-06-01 00:01 UTC),
            ReminderSettings::default(),
        );

        let handle = Arc::new(h.scheduler).start();
        tokio::time::sleep(std::time::Duration::from_secs(150)).await;
        handle.shutdown().await.unwrap();

        assert_eq!(h.mailer.sent().len(), 1);
        assert!(h.store.task("task-1").reminder_sent);
    }
}
