use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::TimerError;
use crate::schedule::Schedule;
use crate::timer::CronTimer;

static ACTIVE_TIMERS: OnceLock<Mutex<HashMap<String, EventTimer>>> = OnceLock::new();

/// A named recurring timer that broadcasts the timestamp of every tick to
/// all subscribers.
///
/// Where [`CronTimer`] hands each tick to a single waiting consumer, an
/// `EventTimer` drives the wait loop itself in a background task and fans
/// the ticks out over a broadcast channel. Timers are registered in a
/// process-wide registry under their name, so unrelated parts of an
/// application can look them up with
/// [`get_timer_by_name`](EventTimer::get_timer_by_name).
#[derive(Clone)]
pub struct EventTimer {
    pub name: String,
    timer: Arc<CronTimer>,
    sender: broadcast::Sender<DateTime<Utc>>,
    handle: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl EventTimer {
    /// Creates a new `EventTimer` for a cron expression evaluated in UTC
    /// and registers it under `name`.
    ///
    /// # Arguments
    ///
    /// * `name` - A value that can be converted into a `String`, used as
    ///   the registry key for this timer.
    /// * `expression` - The cron expression that defines the tick times.
    ///
    /// # Errors
    ///
    /// Returns [`TimerError::InvalidExpression`] when the expression cannot
    /// be parsed, or [`TimerError::TimerAlreadyExists`] when a timer with
    /// the same name is already registered.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use cron_timer::event::EventTimer;
    ///
    /// # #[tokio::main(flavor = "current_thread")]
    /// # async fn main() -> Result<(), cron_timer::error::TimerError> {
    /// let timer = EventTimer::new("heartbeat", "*/5 * * * * *").await?;
    /// timer.start().await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn new(
        name: impl Into<String>,
        expression: impl Into<String>,
    ) -> Result<Self, TimerError> {
        Self::with_timezone(name, expression, chrono_tz::UTC).await
    }

    /// Creates and registers an `EventTimer` whose expression is evaluated
    /// in `zone`.
    ///
    /// # Errors
    ///
    /// Same as [`EventTimer::new`].
    pub async fn with_timezone(
        name: impl Into<String>,
        expression: impl Into<String>,
        zone: Tz,
    ) -> Result<Self, TimerError> {
        let (sender, _) = broadcast::channel(100);
        let timer = EventTimer {
            name: name.into(),
            timer: Arc::new(CronTimer::with_schedule(Schedule::parse(expression, zone)?)),
            sender,
            handle: Arc::new(Mutex::new(None)),
        };
        timer.register().await?;

        Ok(timer)
    }

    /// Subscribes to the broadcast channel and returns a receiver for it.
    ///
    /// Each subscriber gets its own `broadcast::Receiver`; every tick is
    /// delivered to all receivers that exist when it fires. Ticks that fire
    /// while no receiver exists are dropped.
    pub fn subscribe(&self) -> broadcast::Receiver<DateTime<Utc>> {
        self.sender.subscribe()
    }

    /// Starts the broadcast loop.
    ///
    /// A background task repeatedly waits for the next occurrence of the
    /// schedule and sends its timestamp to all subscribers. The loop ends
    /// when the timer is [`stop`](EventTimer::stop)ped.
    ///
    /// # Errors
    ///
    /// Returns [`TimerError::TimerAlreadyExists`] when the loop is already
    /// running, or [`TimerError::TimerNotRunning`] when the timer was
    /// already stopped (stopping is irreversible).
    pub async fn start(&self) -> Result<(), TimerError> {
        // Acquire the lock first so check-and-start is atomic.
        let mut handle = self.handle.lock().await;
        if handle.is_some() {
            return Err(TimerError::TimerAlreadyExists(self.name.clone()));
        }
        if self.timer.is_stopped() {
            return Err(TimerError::TimerNotRunning(self.name.clone()));
        }

        let timer = Arc::clone(&self.timer);
        let sender = self.sender.clone();
        let name = self.name.clone();
        let task = tokio::spawn(async move {
            let cancel = CancellationToken::new();
            info!(timer = %name, "event timer started");
            loop {
                match timer.wait_next_tick(&cancel).await {
                    Ok(true) => {
                        // Send errors only mean nobody is subscribed right now.
                        let _ = sender.send(Utc::now());
                    }
                    Ok(false) | Err(_) => break,
                }
            }
            info!(timer = %name, "event timer stopped");
        });

        *handle = Some(task);
        Ok(())
    }

    /// Stops the timer and waits for the broadcast loop to end.
    ///
    /// Stopping is irreversible; a stopped `EventTimer` cannot be started
    /// again.
    ///
    /// # Errors
    ///
    /// Returns [`TimerError::TimerNotRunning`] when no loop is running.
    pub async fn stop(&self) -> Result<(), TimerError> {
        let task = {
            let mut handle = self.handle.lock().await;
            match handle.take() {
                Some(task) => task,
                None => return Err(TimerError::TimerNotRunning(self.name.clone())),
            }
        };
        // Stopping the underlying timer resolves the in-flight wait to
        // `false`, which ends the loop; no abort needed.
        self.timer.stop();
        let _ = task.await;
        Ok(())
    }

    /// Whether the broadcast loop is currently running.
    pub async fn is_running(&self) -> bool {
        self.handle.lock().await.is_some()
    }

    /// Registers this timer in the process-wide registry.
    async fn register(&self) -> Result<(), TimerError> {
        let timers = ACTIVE_TIMERS.get_or_init(|| Mutex::new(HashMap::new()));
        let mut timers = timers.lock().await;
        if timers.contains_key(&self.name) {
            return Err(TimerError::TimerAlreadyExists(self.name.clone()));
        }
        timers.insert(self.name.clone(), self.clone());

        Ok(())
    }

    /// Removes this timer from the registry, so stopped timers do not
    /// accumulate there.
    pub async fn unregister(&self) {
        let timers = ACTIVE_TIMERS.get_or_init(|| Mutex::new(HashMap::new()));
        let mut timers = timers.lock().await;
        timers.remove(&self.name);
    }

    /// Retrieves a registered timer by its name.
    ///
    /// Returns a clone of the registered `EventTimer`, or `None` when no
    /// timer with that name exists.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use cron_timer::event::EventTimer;
    ///
    /// # #[tokio::main(flavor = "current_thread")]
    /// # async fn main() {
    /// if let Some(timer) = EventTimer::get_timer_by_name("heartbeat").await {
    ///     let mut ticks = timer.subscribe();
    ///     println!("next tick: {:?}", ticks.recv().await);
    /// }
    /// # }
    /// ```
    pub async fn get_timer_by_name(name: impl AsRef<str>) -> Option<EventTimer> {
        let timers = ACTIVE_TIMERS.get_or_init(|| Mutex::new(HashMap::new()));
        let timers = timers.lock().await;
        timers.get(name.as_ref()).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn subscribers_receive_ticks() {
        let timer = EventTimer::new("sub-test", "* * * * * *").await.unwrap();
        let mut ticks = timer.subscribe();
        timer.start().await.unwrap();
        assert!(ticks.recv().await.is_ok());
        timer.stop().await.unwrap();
        timer.unregister().await;
    }

    #[tokio::test]
    async fn duplicate_names_are_rejected() {
        let timer = EventTimer::new("dup-test", "* * * * * *").await.unwrap();
        assert!(matches!(
            EventTimer::new("dup-test", "* * * * * *").await,
            Err(TimerError::TimerAlreadyExists(_))
        ));
        timer.unregister().await;
    }

    #[tokio::test]
    async fn lookup_by_name() {
        let timer = EventTimer::new("lookup-test", "* * * * * *").await.unwrap();
        let found = EventTimer::get_timer_by_name("lookup-test").await;
        assert!(found.is_some());
        timer.unregister().await;
        assert!(EventTimer::get_timer_by_name("lookup-test").await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_ends_the_loop_and_is_terminal() {
        let timer = EventTimer::new("stop-test", "* * * * * *").await.unwrap();
        assert!(matches!(
            timer.stop().await,
            Err(TimerError::TimerNotRunning(_))
        ));
        timer.start().await.unwrap();
        assert!(timer.is_running().await);
        timer.stop().await.unwrap();
        assert!(!timer.is_running().await);
        // Stopping is irreversible; the loop cannot be started again.
        assert!(matches!(
            timer.start().await,
            Err(TimerError::TimerNotRunning(_))
        ));
        timer.unregister().await;
    }

    #[tokio::test]
    async fn double_start_is_rejected() {
        let timer = EventTimer::new("double-start-test", "* * * * * *")
            .await
            .unwrap();
        timer.start().await.unwrap();
        assert!(matches!(
            timer.start().await,
            Err(TimerError::TimerAlreadyExists(_))
        ));
        timer.stop().await.unwrap();
        timer.unregister().await;
    }
}
