//! BatchSettle Scheduler
//!
//! Drains the pending work ledger on a calendar schedule, on a one-shot
//! timer, or on demand.

pub mod calendar;
pub mod config;
pub mod metrics;
pub mod scheduler;
pub mod state;

pub use calendar::{CalendarError, CalendarEvaluator, CalendarExpression, CronCalendar};
pub use config::SchedulerConfig;
pub use scheduler::{FireOutcome, SchedulerStatus, SettlementScheduler};
pub use state::{FireTrigger, SchedulerState, TimerKind};
