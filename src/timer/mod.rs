//! The public recurring timer: a cron schedule plus the driver that arms a
//! one-shot deadline for every occurrence.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::deadline::DeadlineTimer;
use crate::error::TimerError;
use crate::schedule::Schedule;
use crate::signal::{Wake, WaitSignal};


/// A recurring timer driven by a cron schedule.
///
/// The timer has exactly one consumer-facing operation,
/// [`wait_next_tick`](CronTimer::wait_next_tick), which suspends until the
/// next scheduled occurrence and resolves `true`, and one lifecycle
/// operation, [`stop`](CronTimer::stop), after which every wait resolves
/// `false` forever. Dropping the timer stops it.
///
/// # Example
///
/// ```no_run
/// use cron_timer::timer::CronTimer;
/// use tokio_util::sync::CancellationToken;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), cron_timer::error::TimerError> {
/// let timer = CronTimer::new("0 * * * * *")?;
/// let cancel = CancellationToken::new();
/// while timer.wait_next_tick(&cancel).await? {
///     println!("tick");
/// }
/// # Ok(())
/// # }
/// ```
pub struct CronTimer {
    schedule: Schedule,
    driver: TimerDriver,
}

impl CronTimer {
    /// Creates a timer from a cron expression, evaluated in UTC.
    ///
    /// # Errors
    ///
    /// Returns [`TimerError::InvalidExpression`] when the expression cannot
    /// be parsed.
    pub fn new(expression: impl Into<String>) -> Result<Self, TimerError> {
        Ok(Self::with_schedule(Schedule::parse_utc(expression)?))
    }

    /// Creates a timer from a cron expression evaluated in `zone`.
    ///
    /// # Errors
    ///
    /// Returns [`TimerError::InvalidExpression`] when the expression cannot
    /// be parsed.
    pub fn with_timezone(expression: impl Into<String>, zone: Tz) -> Result<Self, TimerError> {
        Ok(Self::with_schedule(Schedule::parse(expression, zone)?))
    }

    /// Creates a timer from an already parsed [`Schedule`].
    pub fn with_schedule(schedule: Schedule) -> Self {
        CronTimer {
            schedule,
            driver: TimerDriver::new(),
        }
    }

    /// Suspends until the next scheduled occurrence.
    ///
    /// Resolves `Ok(true)` when the occurrence is reached and `Ok(false)`
    /// once the timer has been [`stop`](CronTimer::stop)ped or the schedule
    /// has no future occurrence. The schedule is evaluated fresh on every
    /// call, so a schedule without a future occurrence today is not barred
    /// from having one on a later call.
    ///
    /// # Errors
    ///
    /// * [`TimerError::WaitCanceled`] when `cancel` fires before the
    ///   occurrence. Only this call is affected; the timer keeps running
    ///   and the next call observes the schedule normally.
    /// * [`TimerError::ConcurrentWait`] when another `wait_next_tick` is
    ///   already pending on this instance. This is a usage error: the
    ///   timer has a single tick consumer by design.
    pub async fn wait_next_tick(&self, cancel: &CancellationToken) -> Result<bool, TimerError> {
        self.driver.wait_for_next(&self.schedule, cancel).await
    }

    /// Stops the timer. Irreversible and idempotent.
    ///
    /// A wait that is in flight resolves `false` promptly; every later
    /// wait resolves `false` immediately without arming a deadline.
    pub fn stop(&self) {
        self.driver.stop();
    }

    /// Whether [`stop`](CronTimer::stop) has been observed.
    pub fn is_stopped(&self) -> bool {
        self.driver.is_stopped()
    }

    /// The next upcoming occurrence in UTC, without waiting for it.
    pub fn next_occurrence(&self) -> Option<DateTime<Utc>> {
        self.schedule.next_after(Utc::now())
    }

    /// The schedule this timer was built from.
    pub fn schedule(&self) -> &Schedule {
        &self.schedule
    }
}

/// Arms the deadline for each wait and funnels suspension into the wait
/// signal. The `stopped` lock orders arming against `stop`: a deadline is
/// never armed after a stop has been observed.
struct TimerDriver {
    signal: Arc<WaitSignal>,
    deadline: DeadlineTimer,
    stopped: Mutex<bool>,
}

impl TimerDriver {
    fn new() -> Self {
        TimerDriver {
            signal: WaitSignal::new(),
            deadline: DeadlineTimer::new(),
            stopped: Mutex::new(false),
        }
    }

    async fn wait_for_next(
        &self,
        schedule: &Schedule,
        cancel: &CancellationToken,
    ) -> Result<bool, TimerError> {
        let now = Utc::now();
        let Some(next) = schedule.next_after(now) else {
            // An exhausted schedule is not a stop; it is re-evaluated on
            // the next call.
            return Ok(false);
        };
        // An occurrence at or before `now` is armed as immediately due.
        let delay = (next - now).to_std().unwrap_or(Duration::ZERO);
        {
            let stopped = self.stopped.lock().unwrap();
            if *stopped {
                return Ok(false);
            }
            debug!(occurrence = %next, ?delay, "arming deadline");
            let signal = Arc::clone(&self.signal);
            self.deadline.arm(delay, move || signal.notify(Wake::Tick));
        }
        self.signal.wait(cancel).await
    }

    fn stop(&self) {
        {
            let mut stopped = self.stopped.lock().unwrap();
            if !*stopped {
                *stopped = true;
                self.deadline.cancel();
                debug!("timer stopped");
            }
        }
        // Deliver the stop signal even when an earlier stop already
        // released the deadline: a consumer may still be mid-wait.
        self.signal.notify(Wake::Stop);
    }

    fn is_stopped(&self) -> bool {
        *self.stopped.lock().unwrap()
    }
}

impl Drop for TimerDriver {
    fn drop(&mut self) {
        self.stop();
    }
}
