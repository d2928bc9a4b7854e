//! The polling loop that triggers an update cycle on the last day of the month.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Datelike, Local, NaiveDate};
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;

use crate::log_sink::{LogEntry, LogSink};
use crate::orchestrator::{CycleReport, SyncError};

pub trait Clock: Send + Sync {
    fn today(&self) -> NaiveDate;
}

/// The host's local calendar date.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalClock;

impl Clock for LocalClock {
    fn today(&self) -> NaiveDate {
        Local::now().date_naive()
    }
}

/// Work performed when the trigger fires.
#[async_trait]
pub trait UpdateCycle: Send + Sync {
    async fn run_update_cycle(&self) -> Result<CycleReport, SyncError>;
}

pub fn is_last_day_of_month(date: NaiveDate) -> bool {
    date.succ_opt()
        .map_or(true, |next| next.month() != date.month())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Stopped,
    Running,
}

pub struct Scheduler {
    interval: Duration,
    clock: Arc<dyn Clock>,
    cycle: Arc<dyn UpdateCycle>,
    sink: Arc<dyn LogSink>,
    /// (year, month) of the last attempted cycle.
    last_run: Option<(i32, u32)>,
}

impl Scheduler {
    pub fn new(
        interval: Duration,
        clock: Arc<dyn Clock>,
        cycle: Arc<dyn UpdateCycle>,
        sink: Arc<dyn LogSink>,
    ) -> Self {
        Self {
            interval,
            clock,
            cycle,
            sink,
            last_run: None,
        }
    }

    /// Spawns the polling loop. Cancelling `token` (directly or through
    /// [`SchedulerHandle::stop`]) ends the loop once any running cycle has
    /// finished.
    pub fn start(self, token: CancellationToken) -> SchedulerHandle {
        self.sink
            .log(LogEntry::information("tax rate sync service started."));
        tracing::info!(interval_ms = self.interval.as_millis() as u64, "scheduler started");

        let task = tokio::spawn(self.run(token.clone()));
        SchedulerHandle {
            token,
            task: Some(task),
        }
    }

    async fn run(mut self, token: CancellationToken) {
        loop {
            tokio::select! {
                () = token.cancelled() => break,
                () = tokio::time::sleep(self.interval) => {}
            }
            // The cycle itself is never raced against the token.
            self.tick().await;
        }

        self.sink
            .log(LogEntry::information("tax rate sync service stopped."));
        tracing::info!("scheduler stopped");
    }

    /// Runs one trigger check. Returns whether an update cycle was started.
    ///
    /// At most one cycle is attempted per calendar month, whether or not it
    /// succeeded.
    pub async fn tick(&mut self) -> bool {
        let today = self.clock.today();
        if !is_last_day_of_month(today) {
            tracing::trace!(%today, "not the last day of the month");
            return false;
        }
        let month = (today.year(), today.month());
        if self.last_run == Some(month) {
            tracing::trace!(%today, "update already attempted this month");
            return false;
        }
        self.last_run = Some(month);

        tracing::info!(%today, "last day of the month, running tax rate update");
        match self.cycle.run_update_cycle().await {
            Ok(report) => tracing::info!(
                candidates = report.candidates,
                succeeded = report.succeeded,
                failed = report.failed,
                "tax rate update cycle finished"
            ),
            Err(e) => self.sink.log(LogEntry::from_error(&e)),
        }
        true
    }
}

pub struct SchedulerHandle {
    token: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl SchedulerHandle {
    pub fn state(&self) -> SchedulerState {
        match &self.task {
            Some(task) if !task.is_finished() => SchedulerState::Running,
            _ => SchedulerState::Stopped,
        }
    }

    /// Requests a stop and waits for the loop to exit.
    pub async fn stop(&mut self) -> Result<(), JoinError> {
        self.token.cancel();
        self.join().await
    }

    /// Waits for the loop to exit without requesting a stop.
    pub async fn join(&mut self) -> Result<(), JoinError> {
        match self.task.take() {
            Some(task) => task.await,
            None => Ok(()),
        }
    }
}
