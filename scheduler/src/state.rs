//! Scheduler state definitions.

use serde::Serialize;

/// Scheduler operational state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SchedulerState {
    /// No timer armed.
    Idle,
    /// Timer registered, waiting for the next fire.
    Armed,
    /// A drain is in progress.
    Firing,
}

/// What armed the current timer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TimerKind {
    /// Re-arms after every fire.
    Recurring { expression: String },
    /// Fires once, then the scheduler returns to idle.
    Once,
}

/// What triggered a fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FireTrigger {
    Timer,
    Manual,
}

impl FireTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            FireTrigger::Timer => "timer",
            FireTrigger::Manual => "manual",
        }
    }
}
