use chrono::{FixedOffset, NaiveTime, Utc};
use std::time::Duration;
use tracing::{debug, error, info};

use crate::engine::run_cycle;
use crate::registry::AccountRegistry;
use crate::service::MailService;

/// Daily range of wall-clock times during which no cycle starts.
///
/// `end` is exclusive. A window whose end comes before its start wraps past
/// midnight; equal bounds describe an empty window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CutoffWindow {
    start: NaiveTime,
    end: NaiveTime,
}

impl CutoffWindow {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        Self { start, end }
    }

    pub fn start(&self) -> NaiveTime {
        self.start
    }

    pub fn end(&self) -> NaiveTime {
        self.end
    }

    pub fn contains(&self, time: NaiveTime) -> bool {
        if self.start <= self.end {
            self.start <= time && time < self.end
        } else {
            time >= self.start || time < self.end
        }
    }
}

/// Time of day in the reference timezone.
pub trait Clock {
    fn now(&self) -> NaiveTime;
}

pub struct SystemClock {
    offset: FixedOffset,
}

impl SystemClock {
    pub fn new(offset: FixedOffset) -> Self {
        Self { offset }
    }
}

impl Clock for SystemClock {
    fn now(&self) -> NaiveTime {
        Utc::now().with_timezone(&self.offset).time()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Running,
    Stopped,
}

pub struct Scheduler<S, C> {
    registry: AccountRegistry<S>,
    window: CutoffWindow,
    interval: Duration,
    clock: C,
    state: SchedulerState,
}

impl<S: MailService, C: Clock> Scheduler<S, C> {
    /// Starts in `Running`; the registry is fixed for the scheduler's lifetime.
    pub fn new(registry: AccountRegistry<S>, window: CutoffWindow, interval: Duration, clock: C) -> Self {
        Self {
            registry,
            window,
            interval,
            clock,
            state: SchedulerState::Running,
        }
    }

    /// Ticks until the clock enters the cutoff window. Returns the number of
    /// ticks run. Once stopped, further calls return immediately.
    pub async fn run(&mut self) -> u64 {
        let mut ticks = 0;
        while self.state == SchedulerState::Running {
            let now = self.clock.now();
            if self.window.contains(now) {
                info!(
                    time = %now.format("%H:%M:%S"),
                    ticks,
                    "Cutoff window reached, stopping"
                );
                self.state = SchedulerState::Stopped;
                break;
            }

            self.tick().await;
            ticks += 1;
            tokio::time::sleep(self.interval).await;
        }
        ticks
    }

    /// One cycle per account, in registry order. A failed cycle never stops
    /// the accounts after it.
    pub async fn tick(&self) {
        for account in self.registry.iter() {
            match run_cycle(&account.address, &account.rule, &account.service).await {
                Ok(result) if result.is_empty() => {}
                Ok(result) => debug!(
                    account = %account.address,
                    forwarded = result.forwarded.len(),
                    skipped = result.skipped.len(),
                    "Cycle finished"
                ),
                Err(e) => error!(account = %account.address, error = %e, "Cycle aborted"),
            }
        }
    }
}
