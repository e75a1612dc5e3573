use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDateTime, NaiveTime, Utc};
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;

use crate::db::Repository;
use crate::error::{AppError, Result};
use crate::models::BatchKind;

use super::coordinator::BatchCoordinator;

pub const MORNING_TIME_KEY: &str = "morning_time";
pub const EVENING_TIME_KEY: &str = "evening_time";

/// Parse a 24-hour `HH:MM` time of day.
pub fn parse_hhmm(value: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(value.trim(), "%H:%M")
        .map_err(|_| AppError::Config(format!("invalid time '{value}', expected HH:MM")))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleTimes {
    pub morning: NaiveTime,
    pub evening: NaiveTime,
}

impl ScheduleTimes {
    pub fn parse(morning: &str, evening: &str) -> Result<Self> {
        Ok(Self {
            morning: parse_hhmm(morning)?,
            evening: parse_hhmm(evening)?,
        })
    }

    /// Read both times from settings, falling back to `defaults` for missing
    /// or unparseable values.
    pub async fn load(repo: &Repository, defaults: ScheduleTimes) -> Result<Self> {
        let read = |value: Option<String>, fallback: NaiveTime, key: &str| match value {
            Some(raw) => parse_hhmm(&raw).unwrap_or_else(|e| {
                tracing::warn!(key, error = %e, "ignoring invalid schedule setting");
                fallback
            }),
            None => fallback,
        };
        Ok(Self {
            morning: read(repo.get_setting(MORNING_TIME_KEY).await?, defaults.morning, MORNING_TIME_KEY),
            evening: read(repo.get_setting(EVENING_TIME_KEY).await?, defaults.evening, EVENING_TIME_KEY),
        })
    }
}

/// Scheduled batches whose fire time falls in `(last, now]`, in firing
/// order. Times are local wall-clock times.
pub fn due_runs(times: ScheduleTimes, last: NaiveDateTime, now: NaiveDateTime) -> Vec<BatchKind> {
    if now <= last {
        return Vec::new();
    }
    let mut dates = vec![last.date()];
    if now.date() != last.date() {
        dates.push(now.date());
    }

    let mut due: Vec<(NaiveDateTime, BatchKind)> = Vec::new();
    for (time, kind) in [(times.morning, BatchKind::Morning), (times.evening, BatchKind::Evening)] {
        let fire = dates
            .iter()
            .map(|d| d.and_time(time))
            .filter(|at| *at > last && *at <= now)
            .last();
        if let Some(at) = fire {
            due.push((at, kind));
        }
    }
    due.sort_by_key(|(at, _)| *at);
    due.into_iter().map(|(_, kind)| kind).collect()
}

/// Runs due on one tick plus the new watermark. A tick without schedule
/// times keeps the old watermark, so its window is checked again next tick.
fn tick_runs(
    times: Option<ScheduleTimes>,
    last: NaiveDateTime,
    now: NaiveDateTime,
) -> (Vec<BatchKind>, NaiveDateTime) {
    match times {
        Some(times) => (due_runs(times, last, now), now),
        None => (Vec::new(), last),
    }
}

/// Fires the coordinator at the configured times and on manual request.
/// Schedule times are re-read from settings on every tick.
pub struct Scheduler {
    coordinator: Arc<BatchCoordinator>,
    repo: Repository,
    defaults: ScheduleTimes,
    tick: Duration,
}

impl Scheduler {
    pub fn new(
        coordinator: Arc<BatchCoordinator>,
        repo: Repository,
        defaults: ScheduleTimes,
        tick: Duration,
    ) -> Self {
        Self {
            coordinator,
            repo,
            defaults,
            tick,
        }
    }

    pub fn start(self) -> SchedulerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (trigger_tx, trigger_rx) = mpsc::channel(8);
        let coordinator = self.coordinator.clone();
        let task = tokio::spawn(self.run_loop(shutdown_rx, trigger_rx));
        SchedulerHandle {
            shutdown: shutdown_tx,
            trigger: trigger_tx,
            coordinator,
            task,
        }
    }

    async fn run_loop(self, mut shutdown: watch::Receiver<bool>, mut triggers: mpsc::Receiver<BatchKind>) {
        let tz = self.coordinator.timezone();
        let mut interval = tokio::time::interval(self.tick);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut last = Utc::now().with_timezone(&tz).naive_local();
        let mut running = JoinSet::new();

        tracing::info!(tick = ?self.tick, "scheduler started");
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                Some(kind) = triggers.recv() => {
                    self.spawn_batch(&mut running, kind);
                }
                _ = interval.tick() => {
                    let now = Utc::now().with_timezone(&tz).naive_local();
                    let times = match ScheduleTimes::load(&self.repo, self.defaults).await {
                        Ok(times) => Some(times),
                        Err(e) => {
                            tracing::error!(error = %e, "failed to read schedule settings");
                            None
                        }
                    };
                    let (due, watermark) = tick_runs(times, last, now);
                    for kind in due {
                        self.spawn_batch(&mut running, kind);
                    }
                    last = watermark;
                }
                Some(_) = running.join_next(), if !running.is_empty() => {}
            }
        }

        // Abort in-flight batches; the lock is released by the handle.
        running.shutdown().await;
        tracing::info!("scheduler stopped");
    }

    fn spawn_batch(&self, running: &mut JoinSet<()>, kind: BatchKind) {
        let coordinator = self.coordinator.clone();
        running.spawn(async move {
            match coordinator.run(kind).await {
                Ok(report) => tracing::info!("{report}"),
                Err(AppError::AlreadyRunning) => {
                    tracing::info!(%kind, "batch already running, trigger skipped")
                }
                Err(e) => tracing::error!(%kind, error = %e, "batch did not run"),
            }
        });
    }
}

pub struct SchedulerHandle {
    shutdown: watch::Sender<bool>,
    trigger: mpsc::Sender<BatchKind>,
    coordinator: Arc<BatchCoordinator>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Request an immediate batch outside the schedule.
    pub async fn trigger(&self, kind: BatchKind) -> Result<()> {
        self.trigger
            .send(kind)
            .await
            .map_err(|_| AppError::Other(anyhow::anyhow!("scheduler is not running")))
    }

    /// Stop the loop, cancel running batches and release the run lock if
    /// this process holds it.
    pub async fn stop(self) -> Result<()> {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            tracing::error!(error = %e, "scheduler task ended abnormally");
        }
        if self.coordinator.lock().release_if_held().await? {
            tracing::info!("released run lock on shutdown");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(day: u32, h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 10, day).unwrap().and_hms_opt(h, m, 0).unwrap()
    }

    fn times() -> ScheduleTimes {
        ScheduleTimes::parse("09:00", "21:00").unwrap()
    }

    #[test]
    fn parses_hhmm() {
        assert_eq!(parse_hhmm("07:30").unwrap(), NaiveTime::from_hms_opt(7, 30, 0).unwrap());
        assert!(parse_hhmm("25:00").is_err());
        assert!(parse_hhmm("9am").is_err());
    }

    #[test]
    fn fires_when_crossing_a_time() {
        assert_eq!(due_runs(times(), at(18, 8, 59), at(18, 9, 0)), vec![BatchKind::Morning]);
        assert!(due_runs(times(), at(18, 9, 0), at(18, 9, 1)).is_empty());
        assert!(due_runs(times(), at(18, 10, 0), at(18, 10, 0)).is_empty());
    }

    #[test]
    fn failed_settings_read_does_not_skip_a_fire_time() {
        let (due, last) = tick_runs(None, at(18, 8, 59), at(18, 9, 0));
        assert!(due.is_empty());
        assert_eq!(last, at(18, 8, 59));

        let (due, last) = tick_runs(Some(times()), last, at(18, 9, 1));
        assert_eq!(due, vec![BatchKind::Morning]);
        assert_eq!(last, at(18, 9, 1));
    }

    #[test]
    fn handles_midnight_and_long_gaps() {
        assert_eq!(
            due_runs(times(), at(18, 20, 0), at(19, 9, 30)),
            vec![BatchKind::Evening, BatchKind::Morning]
        );
        assert!(due_runs(times(), at(18, 21, 30), at(19, 0, 30)).is_empty());
    }
}
