//! Calendar-driven settlement scheduler.
//!
//! The scheduler owns at most one armed timer. Each armed timer runs as its
//! own Tokio task that sleeps until the next fire time, drains the work
//! ledger, and either re-arms (recurring) or goes idle (one-shot).

use std::sync::atomic::Ordering;
use std::sync::Arc;

use batchsettle_common::{AuditKind, AuditLog, Clock, Result, SettleError, Timestamp};
use batchsettle_ledger::{DrainReport, WorkLedger, WorkProcessor};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tracing::{debug, error, info, instrument, warn};

use crate::calendar::{CalendarEvaluator, CalendarExpression};
use crate::metrics::{Metrics, SharedMetrics};
use crate::state::{FireTrigger, SchedulerState, TimerKind};

/// Result of one fire, kept for status reporting.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FireOutcome {
    pub trigger: FireTrigger,
    pub at: Timestamp,
    /// Items settled; zero when the drain failed.
    pub settled: usize,
    pub error: Option<String>,
}

impl FireOutcome {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Point-in-time view of the scheduler.
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub state: SchedulerState,
    pub timer: Option<TimerKind>,
    pub next_fire: Option<Timestamp>,
    pub last_outcome: Option<FireOutcome>,
}

struct ArmedTimer {
    kind: TimerKind,
    expression: Option<CalendarExpression>,
    next_fire: Timestamp,
    generation: u64,
    cancel: Option<oneshot::Sender<()>>,
}

impl ArmedTimer {
    fn stop(mut self) {
        if let Some(tx) = self.cancel.take() {
            let _ = tx.send(());
        }
    }
}

#[derive(Default)]
struct Shared {
    armed: Option<ArmedTimer>,
    generation: u64,
    last_outcome: Option<FireOutcome>,
}

struct SchedulerCore {
    ledger: Arc<WorkLedger>,
    processor: Arc<dyn WorkProcessor>,
    calendar: Arc<dyn CalendarEvaluator>,
    clock: Arc<dyn Clock>,
    audit: Arc<AuditLog>,
    metrics: SharedMetrics,
    shared: Mutex<Shared>,
}

/// Counts a fire as in flight until dropped, so an abandoned `fire_now`
/// future does not leave the scheduler reporting `Firing`.
struct InFlight<'a> {
    metrics: &'a Metrics,
}

impl<'a> InFlight<'a> {
    fn start(metrics: &'a Metrics, trigger: FireTrigger) -> Self {
        metrics.fire_started(trigger == FireTrigger::Timer);
        Self { metrics }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.metrics.fire_finished();
    }
}

/// Drains a [`WorkLedger`] on a calendar schedule or on demand.
pub struct SettlementScheduler {
    core: Arc<SchedulerCore>,
}

impl SettlementScheduler {
    /// Create an idle scheduler.
    pub fn new(
        ledger: Arc<WorkLedger>,
        processor: Arc<dyn WorkProcessor>,
        calendar: Arc<dyn CalendarEvaluator>,
        clock: Arc<dyn Clock>,
        audit: Arc<AuditLog>,
    ) -> Self {
        Self {
            core: Arc::new(SchedulerCore {
                ledger,
                processor,
                calendar,
                clock,
                audit,
                metrics: Arc::new(Metrics::new()),
                shared: Mutex::new(Shared::default()),
            }),
        }
    }

    /// Arm a recurring timer, replacing any armed timer.
    ///
    /// Returns the first fire time, strictly after the clock's current time.
    /// Must be called from within a Tokio runtime.
    #[instrument(skip(self))]
    pub fn schedule_recurring(&self, expression: &str) -> Result<Timestamp> {
        if expression.trim().is_empty() {
            return Err(SettleError::invalid(
                "expression",
                "Calendar expression must not be empty",
            ));
        }

        let parsed = CalendarExpression::parse(expression)?;
        let now = self.core.clock.now();
        let next = self.core.calendar.next_after(&parsed, now).ok_or_else(|| {
            SettleError::invalid(
                "expression",
                format!("Calendar expression '{parsed}' has no fire time after {now}"),
            )
        })?;

        let handle = runtime()?;
        self.arm(
            &handle,
            TimerKind::Recurring {
                expression: parsed.to_string(),
            },
            Some(parsed),
            next,
        );

        info!(next_fire = %next, "Recurring settlement armed");
        Ok(next)
    }

    /// Arm a one-shot timer, replacing any armed timer. A time in the past
    /// fires immediately.
    #[instrument(skip(self))]
    pub fn schedule_once(&self, at: Timestamp) -> Result<Timestamp> {
        let handle = runtime()?;
        self.arm(&handle, TimerKind::Once, None, at);

        info!(fire_at = %at, "One-shot settlement armed");
        Ok(at)
    }

    /// Drain the ledger now. The armed timer, if any, is left alone.
    pub async fn fire_now(&self) -> Result<DrainReport> {
        self.core.fire(FireTrigger::Manual).await
    }

    /// Disarm the timer. A fire already in progress still completes.
    ///
    /// Returns false if nothing was armed.
    pub fn cancel(&self) -> bool {
        let armed = self.core.shared.lock().armed.take();
        match armed {
            Some(timer) => {
                info!(timer = ?timer.kind, "Settlement timer cancelled");
                timer.stop();
                true
            }
            None => false,
        }
    }

    /// When the armed timer fires next.
    pub fn next_fire(&self) -> Option<Timestamp> {
        self.core.shared.lock().armed.as_ref().map(|t| t.next_fire)
    }

    pub fn state(&self) -> SchedulerState {
        self.core.state()
    }

    pub fn status(&self) -> SchedulerStatus {
        let state = self.core.state();
        let shared = self.core.shared.lock();
        SchedulerStatus {
            state,
            timer: shared.armed.as_ref().map(|t| t.kind.clone()),
            next_fire: shared.armed.as_ref().map(|t| t.next_fire),
            last_outcome: shared.last_outcome.clone(),
        }
    }

    pub fn metrics(&self) -> SharedMetrics {
        self.core.metrics.clone()
    }

    fn arm(
        &self,
        handle: &Handle,
        kind: TimerKind,
        expression: Option<CalendarExpression>,
        next_fire: Timestamp,
    ) {
        let (tx, rx) = oneshot::channel();

        let (generation, replaced) = {
            let mut shared = self.core.shared.lock();
            shared.generation += 1;
            let generation = shared.generation;
            let replaced = shared.armed.replace(ArmedTimer {
                kind,
                expression,
                next_fire,
                generation,
                cancel: Some(tx),
            });
            (generation, replaced)
        };

        if let Some(old) = replaced {
            debug!(timer = ?old.kind, "Replacing armed timer");
            old.stop();
        }

        handle.spawn(run_timer(self.core.clone(), generation, next_fire, rx));
    }
}

impl Drop for SettlementScheduler {
    fn drop(&mut self) {
        if let Some(timer) = self.core.shared.lock().armed.take() {
            timer.stop();
        }
    }
}

fn runtime() -> Result<Handle> {
    Handle::try_current().map_err(|e| SettleError::SchedulerUnavailable(e.to_string()))
}

async fn run_timer(
    core: Arc<SchedulerCore>,
    generation: u64,
    mut next_fire: Timestamp,
    mut cancel: oneshot::Receiver<()>,
) {
    loop {
        let wait = core.clock.until(next_fire);
        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = &mut cancel => {
                debug!(generation, "Timer task stopped");
                return;
            }
        }

        if !core.is_current(generation) {
            return;
        }

        // Failures are logged and audited inside `fire`; the timer carries on.
        let _ = core.fire(FireTrigger::Timer).await;

        match core.rearm(generation, next_fire) {
            Some(next) => next_fire = next,
            None => return,
        }
    }
}

impl SchedulerCore {
    fn state(&self) -> SchedulerState {
        if self.metrics.fires_in_flight.load(Ordering::Relaxed) > 0 {
            SchedulerState::Firing
        } else if self.shared.lock().armed.is_some() {
            SchedulerState::Armed
        } else {
            SchedulerState::Idle
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.shared
            .lock()
            .armed
            .as_ref()
            .is_some_and(|t| t.generation == generation)
    }

    async fn fire(&self, trigger: FireTrigger) -> Result<DrainReport> {
        let at = self.clock.now();
        let in_flight = InFlight::start(&self.metrics, trigger);

        let result = self.ledger.drain_and_process(self.processor.as_ref()).await;

        drop(in_flight);

        let outcome = match &result {
            Ok(report) => {
                self.metrics.drain_succeeded(report.processed() as u64);
                info!(
                    trigger = trigger.as_str(),
                    settled = report.processed(),
                    total = %report.total,
                    "Settlement fire complete"
                );
                FireOutcome {
                    trigger,
                    at,
                    settled: report.processed(),
                    error: None,
                }
            }
            Err(e) => {
                self.metrics.drain_failed();
                let item = match e {
                    SettleError::ProcessingFailure { item, .. } => item.as_str(),
                    _ => "",
                };
                error!(
                    trigger = trigger.as_str(),
                    item = %item,
                    at = %at,
                    reason = %e,
                    "Settlement fire failed, items left pending"
                );
                self.audit.record(AuditKind::FireFailed {
                    trigger: trigger.as_str().to_string(),
                    reason: e.to_string(),
                });
                FireOutcome {
                    trigger,
                    at,
                    settled: 0,
                    error: Some(e.to_string()),
                }
            }
        };

        self.shared.lock().last_outcome = Some(outcome);
        result
    }

    /// Compute the fire after `fired`, or disarm. Returns None when the
    /// timer task should exit.
    fn rearm(&self, generation: u64, fired: Timestamp) -> Option<Timestamp> {
        let mut shared = self.shared.lock();
        let timer = shared.armed.as_mut().filter(|t| t.generation == generation)?;

        let Some(expression) = timer.expression.clone() else {
            debug!("One-shot timer complete");
            shared.armed = None;
            return None;
        };

        // A slow drain can overrun the next slot; skip ahead rather than fire back to back.
        let after = fired.max(self.clock.now());
        match self.calendar.next_after(&expression, after) {
            Some(next) => {
                timer.next_fire = next;
                debug!(next_fire = %next, "Recurring timer re-armed");
                Some(next)
            }
            None => {
                warn!(expression = %expression, "No further fire times, disarming");
                shared.armed = None;
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::CronCalendar;
    use batchsettle_common::{Amount, ManualClock};
    use batchsettle_ledger::{FnProcessor, WorkItem};
    use chrono::{Duration, TimeZone, Utc};
    use rust_decimal_macros::dec;
    use tokio_test::assert_ok;

    fn at(h: u32, m: u32, s: u32) -> Timestamp {
        Utc.with_ymd_and_hms(2024, 3, 1, h, m, s).unwrap()
    }

    struct Fixture {
        ledger: Arc<WorkLedger>,
        audit: Arc<AuditLog>,
        scheduler: SettlementScheduler,
    }

    fn setup_with(clock: Arc<dyn Clock>, processor: Arc<dyn WorkProcessor>) -> Fixture {
        let audit = Arc::new(AuditLog::new());
        let ledger = Arc::new(WorkLedger::new(audit.clone()));
        let scheduler = SettlementScheduler::new(
            ledger.clone(),
            processor,
            Arc::new(CronCalendar),
            clock,
            audit.clone(),
        );
        Fixture {
            ledger,
            audit,
            scheduler,
        }
    }

    fn setup(clock: Arc<dyn Clock>) -> Fixture {
        setup_with(clock, Arc::new(FnProcessor::new(|_: &WorkItem| Ok(()))))
    }

    fn add(ledger: &WorkLedger, id: &str, amount: Amount) {
        ledger.add(WorkItem::new(id, amount)).unwrap();
    }

    #[tokio::test]
    async fn test_hourly_next_fire_unaffected_by_fire_now() {
        let f = setup(Arc::new(ManualClock::new(at(10, 15, 30))));

        let next = f.scheduler.schedule_recurring("@hourly").unwrap();
        assert_eq!(next, at(11, 0, 0));
        assert_eq!(f.scheduler.state(), SchedulerState::Armed);

        add(&f.ledger, "tx1", Amount::new(dec!(10.00)));
        add(&f.ledger, "tx2", Amount::new(dec!(25.50)));

        let report = assert_ok!(f.scheduler.fire_now().await);
        assert_eq!(report.items, vec!["tx1", "tx2"]);
        assert!(f.ledger.is_empty());

        assert_eq!(f.scheduler.next_fire(), Some(at(11, 0, 0)));
        assert_eq!(f.scheduler.state(), SchedulerState::Armed);

        let snapshot = f.scheduler.metrics().snapshot();
        assert_eq!(snapshot.fires_manual, 1);
        assert_eq!(snapshot.fires_scheduled, 0);
        assert_eq!(snapshot.items_settled, 2);

        let outcome = f.scheduler.status().last_outcome.unwrap();
        assert_eq!(outcome.trigger, FireTrigger::Manual);
        assert_eq!(outcome.settled, 2);
        assert!(outcome.is_success());
    }

    #[tokio::test]
    async fn test_rejects_bad_expressions() {
        let f = setup(Arc::new(ManualClock::new(at(10, 0, 0))));

        for expr in ["", "   ", "61 * * * *", "0 0 30 2 *", "every hour"] {
            let err = f.scheduler.schedule_recurring(expr).unwrap_err();
            assert_eq!(err.error_code(), "INVALID_ARGUMENT", "{expr}");
        }
        assert_eq!(f.scheduler.state(), SchedulerState::Idle);
        assert_eq!(f.scheduler.next_fire(), None);
    }

    #[test]
    fn test_requires_runtime() {
        let f = setup(Arc::new(ManualClock::new(at(10, 0, 0))));
        let err = f.scheduler.schedule_recurring("@hourly").unwrap_err();
        assert!(matches!(err, SettleError::SchedulerUnavailable(_)));
        assert_eq!(f.scheduler.state(), SchedulerState::Idle);
    }

    #[tokio::test]
    async fn test_cancel_returns_to_idle() {
        let f = setup(Arc::new(ManualClock::new(at(10, 15, 30))));
        f.scheduler.schedule_recurring("0 * * * *").unwrap();

        assert!(f.scheduler.cancel());
        assert_eq!(f.scheduler.state(), SchedulerState::Idle);
        assert_eq!(f.scheduler.next_fire(), None);
        assert!(!f.scheduler.cancel());
    }

    #[tokio::test]
    async fn test_reschedule_replaces_timer() {
        let f = setup(Arc::new(ManualClock::new(at(10, 15, 30))));
        f.scheduler.schedule_recurring("@hourly").unwrap();
        let next = f.scheduler.schedule_recurring("30 * * * *").unwrap();
        assert_eq!(next, at(10, 30, 0));

        let status = f.scheduler.status();
        assert_eq!(
            status.timer,
            Some(TimerKind::Recurring {
                expression: "30 * * * *".to_string()
            })
        );
        assert_eq!(status.next_fire, Some(at(10, 30, 0)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_fires_and_rearms() {
        let f = setup(Arc::new(ManualClock::new(at(10, 15, 30))));
        f.scheduler.schedule_recurring("@hourly").unwrap();
        add(&f.ledger, "tx1", Amount::new(dec!(10.00)));

        tokio::time::sleep(std::time::Duration::from_secs(45 * 60)).await;

        assert!(f.ledger.is_empty());
        assert_eq!(f.scheduler.state(), SchedulerState::Armed);
        assert_eq!(f.scheduler.next_fire(), Some(at(12, 0, 0)));

        let snapshot = f.scheduler.metrics().snapshot();
        assert_eq!(snapshot.fires_scheduled, 1);
        assert_eq!(snapshot.drains_succeeded, 1);

        let outcome = f.scheduler.status().last_outcome.unwrap();
        assert_eq!(outcome.trigger, FireTrigger::Timer);
        assert_eq!(outcome.settled, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_fire_stays_armed() {
        let processor = FnProcessor::new(|item: &WorkItem| {
            if item.identifier() == "bad" {
                Err(SettleError::invalid("account", "unknown account"))
            } else {
                Ok(())
            }
        });
        let f = setup_with(
            Arc::new(ManualClock::new(at(10, 15, 30))),
            Arc::new(processor),
        );
        f.scheduler.schedule_recurring("@hourly").unwrap();
        add(&f.ledger, "good", Amount::new(dec!(1.00)));
        add(&f.ledger, "bad", Amount::new(dec!(2.00)));

        tokio::time::sleep(std::time::Duration::from_secs(45 * 60)).await;

        assert_eq!(f.ledger.len(), 2);
        assert_eq!(f.scheduler.state(), SchedulerState::Armed);
        assert_eq!(f.scheduler.next_fire(), Some(at(12, 0, 0)));
        assert_eq!(f.scheduler.metrics().snapshot().drains_failed, 1);

        let outcome = f.scheduler.status().last_outcome.unwrap();
        assert!(!outcome.is_success());
        assert!(outcome.error.unwrap().contains("bad"));

        let failures = f
            .audit
            .filter(|k| matches!(k, AuditKind::FireFailed { .. }));
        assert_eq!(failures.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_shot_fires_then_idle() {
        let f = setup(Arc::new(ManualClock::new(at(10, 0, 0))));
        add(&f.ledger, "tx1", Amount::new(dec!(5.00)));

        let fire_at = at(10, 0, 0) + Duration::minutes(30);
        assert_eq!(f.scheduler.schedule_once(fire_at).unwrap(), fire_at);
        assert_eq!(f.scheduler.state(), SchedulerState::Armed);
        assert_eq!(f.scheduler.next_fire(), Some(fire_at));

        tokio::time::sleep(std::time::Duration::from_secs(31 * 60)).await;

        assert!(f.ledger.is_empty());
        assert_eq!(f.scheduler.state(), SchedulerState::Idle);
        assert_eq!(f.scheduler.next_fire(), None);
        assert_eq!(f.scheduler.metrics().snapshot().fires_scheduled, 1);
    }

    #[tokio::test]
    async fn test_one_shot_in_past_fires_immediately() {
        let clock = Arc::new(ManualClock::new(at(10, 0, 0)));
        let f = setup(clock);
        add(&f.ledger, "tx1", Amount::new(dec!(5.00)));

        f.scheduler.schedule_once(at(9, 0, 0)).unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        assert!(f.ledger.is_empty());
        assert_eq!(f.scheduler.state(), SchedulerState::Idle);
    }

    struct SlowProcessor;

    #[async_trait::async_trait]
    impl WorkProcessor for SlowProcessor {
        async fn process(&self, _item: &WorkItem) -> Result<()> {
            tokio::time::sleep(std::time::Duration::from_secs(10)).await;
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_fire_does_not_stay_firing() {
        let f = setup_with(
            Arc::new(ManualClock::new(at(10, 0, 0))),
            Arc::new(SlowProcessor),
        );
        add(&f.ledger, "tx1", Amount::new(dec!(5.00)));

        let timed_out = tokio::time::timeout(
            std::time::Duration::from_secs(1),
            f.scheduler.fire_now(),
        )
        .await;
        assert!(timed_out.is_err());

        assert_eq!(f.scheduler.state(), SchedulerState::Idle);
        assert_eq!(f.scheduler.metrics().snapshot().fires_in_flight, 0);
        assert_eq!(f.ledger.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_timer_never_fires() {
        let f = setup(Arc::new(ManualClock::new(at(10, 15, 30))));
        f.scheduler.schedule_recurring("@hourly").unwrap();
        add(&f.ledger, "tx1", Amount::new(dec!(10.00)));
        f.scheduler.cancel();

        tokio::time::sleep(std::time::Duration::from_secs(2 * 60 * 60)).await;

        assert_eq!(f.ledger.len(), 1);
        assert_eq!(f.scheduler.metrics().snapshot().fires_scheduled, 0);
    }
}
