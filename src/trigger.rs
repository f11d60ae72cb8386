//! Run trigger
//!
//! Fixed-interval scheduler with an out-of-band "run now" request. The
//! orchestrator only sees the [`RerunTrigger`] side of it.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local};
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;

/// Control surface the orchestrator uses to reschedule itself
pub trait RerunTrigger: Send + Sync {
    /// Wake the scheduler as soon as the current run ends
    fn request_rerun(&self);

    /// When the next scheduled run is due, if known
    fn next_run(&self) -> Option<DateTime<Local>> {
        None
    }
}

#[derive(Debug, Default)]
struct TriggerState {
    wake: Notify,
    next_run: Mutex<Option<DateTime<Local>>>,
}

/// Cloneable handle onto a [`Scheduler`]
#[derive(Debug, Clone, Default)]
pub struct TriggerHandle {
    state: Arc<TriggerState>,
}

impl RerunTrigger for TriggerHandle {
    fn request_rerun(&self) {
        tracing::debug!("Re-run requested");
        self.state.wake.notify_one();
    }

    fn next_run(&self) -> Option<DateTime<Local>> {
        *self.state.next_run.lock()
    }
}

/// Why the scheduler woke up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeReason {
    Scheduled,
    Rerun,
}

pub struct Scheduler {
    interval: Duration,
    handle: TriggerHandle,
    deadline: Instant,
}

impl Scheduler {
    /// The first tick fires immediately
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            handle: TriggerHandle::default(),
            deadline: Instant::now(),
        }
    }

    pub fn handle(&self) -> TriggerHandle {
        self.handle.clone()
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Wait for the next deadline or a re-run request, whichever comes first.
    /// Either way the following deadline is one interval from now.
    pub async fn tick(&mut self) -> WakeReason {
        let reason = tokio::select! {
            _ = tokio::time::sleep_until(self.deadline) => WakeReason::Scheduled,
            _ = self.handle.state.wake.notified() => WakeReason::Rerun,
        };

        self.deadline = Instant::now() + self.interval;
        let next = chrono::Duration::from_std(self.interval)
            .ok()
            .and_then(|interval| Local::now().checked_add_signed(interval));
        *self.handle.state.next_run.lock() = next;

        reason
    }
}

/// Status line published at the start of each run
pub fn status_line(next_run: DateTime<Local>) -> String {
    format!("Next OCR run on: {}", next_run.format("%B %d, %H:%M:%S"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[tokio::test]
    async fn test_first_tick_is_immediate() {
        let mut scheduler = Scheduler::new(Duration::from_secs(3_600));
        let reason = tokio::time::timeout(Duration::from_secs(5), scheduler.tick())
            .await
            .unwrap();
        assert_eq!(reason, WakeReason::Scheduled);

        let next = scheduler.handle().next_run().unwrap();
        assert!(next > Local::now() + chrono::Duration::minutes(59));
    }

    #[tokio::test]
    async fn test_rerun_request_wakes_scheduler() {
        let mut scheduler = Scheduler::new(Duration::from_secs(3_600));
        scheduler.tick().await;

        // Requested while no one waits: kept until the next tick
        scheduler.handle().request_rerun();
        let reason = tokio::time::timeout(Duration::from_secs(5), scheduler.tick())
            .await
            .unwrap();
        assert_eq!(reason, WakeReason::Rerun);
    }

    #[tokio::test]
    async fn test_short_interval_fires() {
        let mut scheduler = Scheduler::new(Duration::from_millis(20));
        scheduler.tick().await;
        let reason = tokio::time::timeout(Duration::from_secs(5), scheduler.tick())
            .await
            .unwrap();
        assert_eq!(reason, WakeReason::Scheduled);
    }

    #[test]
    fn test_status_line() {
        let at = Local.with_ymd_and_hms(2024, 5, 1, 9, 30, 0).unwrap();
        assert_eq!(status_line(at), "Next OCR run on: May 01, 09:30:00");
    }
}
