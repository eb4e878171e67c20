//! Wait/signal core shared by the deadline timer, the stop path and the
//! per-call cancellation path.

use std::sync::{Arc, Mutex};

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::TimerError;

/// Why a pending wait is being completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Wake {
    /// The deadline timer fired.
    Tick,
    /// The timer was stopped; terminal for the whole instance.
    Stop,
}

/// Value delivered through the completion slot of one wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Completion {
    Fired,
    Canceled,
}

#[derive(Debug, Default)]
struct SignalState {
    /// Monotonic; never reset once set.
    stopped: bool,
    /// A completion is pending delivery. Latched forever once `stopped`.
    signaled: bool,
    /// A consumer is currently suspended. At most one.
    active: bool,
    /// Completion slot of the active wait.
    slot: Option<oneshot::Sender<Completion>>,
    /// Bumped on every suspension; lets a stale cancellation watcher from a
    /// consumed wait recognize that its wait is gone.
    epoch: u64,
}

/// The synchronization primitive behind `wait_next_tick`. One instance per
/// timer, reused across all ticks; completions may arrive concurrently from
/// the timer task, the stop path and the cancellation watcher.
pub(crate) struct WaitSignal {
    state: Mutex<SignalState>,
}

/// Owns the cancellation subscription of one suspended wait. Dropping it
/// before consumption clears the wait, so an abandoned `wait` future cannot
/// wedge the timer.
struct WaitGuard<'a> {
    signal: &'a WaitSignal,
    watch: Option<JoinHandle<()>>,
}

impl WaitGuard<'_> {
    fn teardown(&mut self) -> Option<JoinHandle<()>> {
        self.watch.take()
    }
}

impl Drop for WaitGuard<'_> {
    fn drop(&mut self) {
        if let Some(watch) = self.watch.take() {
            watch.abort();
            let mut state = self.signal.state.lock().unwrap();
            state.active = false;
            state.slot = None;
        }
    }
}

enum Begun<'a> {
    /// The outcome was already decided; `true` is a tick, `false` stopped.
    Immediate(bool),
    Pending {
        slot: oneshot::Receiver<Completion>,
        guard: WaitGuard<'a>,
    },
}

impl WaitSignal {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(WaitSignal {
            state: Mutex::new(SignalState::default()),
        })
    }

    /// Suspend until the next `notify`, or resolve immediately when a
    /// completion is already latched. `Ok(true)` is a tick, `Ok(false)`
    /// means the timer was stopped for good.
    ///
    /// # Errors
    ///
    /// [`TimerError::ConcurrentWait`] when another wait is already pending,
    /// [`TimerError::WaitCanceled`] when `cancel` fires first.
    pub(crate) async fn wait(
        self: &Arc<Self>,
        cancel: &CancellationToken,
    ) -> Result<bool, TimerError> {
        let (slot, guard) = match self.begin_wait(cancel)? {
            Begun::Immediate(tick) => return Ok(tick),
            Begun::Pending { slot, guard } => (slot, guard),
        };
        // The sender stays in the state until a notify sends through it, so
        // the slot cannot observe a dropped sender; treat that as a wake.
        let completion = slot.await.unwrap_or(Completion::Fired);
        self.finish_wait(guard, completion)
    }

    fn begin_wait<'a>(
        self: &'a Arc<Self>,
        cancel: &CancellationToken,
    ) -> Result<Begun<'a>, TimerError> {
        let (slot, epoch) = {
            let mut state = self.state.lock().unwrap();
            if state.active {
                return Err(TimerError::ConcurrentWait);
            }
            if cancel.is_cancelled() {
                return Err(TimerError::WaitCanceled);
            }
            if state.signaled {
                // Completed before this wait started; consume synchronously.
                if !state.stopped {
                    state.signaled = false;
                }
                return Ok(Begun::Immediate(!state.stopped));
            }
            let (tx, rx) = oneshot::channel();
            state.active = true;
            state.slot = Some(tx);
            state.epoch += 1;
            (rx, state.epoch)
        };
        // Subscribe the cancellation token outside the lock. If the token
        // fired in the meantime the watcher resolves right away.
        let signal = Arc::clone(self);
        let token = cancel.clone();
        let watch = tokio::spawn(async move {
            token.cancelled().await;
            signal.notify_cancel(epoch);
        });
        Ok(Begun::Pending {
            slot,
            guard: WaitGuard {
                signal: self.as_ref(),
                watch: Some(watch),
            },
        })
    }

    /// Mark a completion. Only the first call before consumption delivers a
    /// wake; later calls are no-ops beyond the `stopped` update.
    pub(crate) fn notify(&self, wake: Wake) {
        let slot = {
            let mut state = self.state.lock().unwrap();
            if wake == Wake::Stop {
                state.stopped = true;
            }
            if state.signaled {
                None
            } else {
                state.signaled = true;
                state.slot.take()
            }
        };
        // Wake the consumer only after the lock is released; its
        // continuation may immediately begin the next wait.
        if let Some(slot) = slot {
            let _ = slot.send(Completion::Fired);
        }
    }

    /// Completion path of the cancellation watcher. Unlike ticks and stops,
    /// a cancellation is scoped to one wait: it never latches, and a stale
    /// watcher that outlived its wait must not touch the current one.
    fn notify_cancel(&self, epoch: u64) {
        let slot = {
            let mut state = self.state.lock().unwrap();
            if !state.active || state.epoch != epoch || state.signaled {
                None
            } else {
                state.signaled = true;
                state.slot.take()
            }
        };
        if let Some(slot) = slot {
            let _ = slot.send(Completion::Canceled);
        }
    }

    fn finish_wait(
        &self,
        mut guard: WaitGuard<'_>,
        completion: Completion,
    ) -> Result<bool, TimerError> {
        // Tear down the cancellation subscription first, outside the state
        // lock; a watcher that is mid-notify wants that lock.
        if let Some(watch) = guard.teardown() {
            watch.abort();
        }
        let stopped = {
            let mut state = self.state.lock().unwrap();
            state.active = false;
            state.slot = None;
            if !state.stopped {
                state.signaled = false;
            }
            state.stopped
        };
        match completion {
            Completion::Canceled => Err(TimerError::WaitCanceled),
            Completion::Fired => Ok(!stopped),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn tick_before_wait_is_latched() {
        let signal = WaitSignal::new();
        signal.notify(Wake::Tick);
        assert!(signal.wait(&CancellationToken::new()).await.unwrap());
    }

    #[tokio::test]
    async fn stop_is_latched_forever() {
        let signal = WaitSignal::new();
        signal.notify(Wake::Stop);
        assert!(!signal.wait(&CancellationToken::new()).await.unwrap());
        assert!(!signal.wait(&CancellationToken::new()).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn double_notify_wakes_once() {
        let signal = WaitSignal::new();
        signal.notify(Wake::Tick);
        signal.notify(Wake::Tick);
        assert!(signal.wait(&CancellationToken::new()).await.unwrap());
        // The second notify must not have latched a second completion.
        let token = CancellationToken::new();
        let second = tokio::time::timeout(
            Duration::from_millis(50),
            signal.wait(&token),
        );
        assert!(second.await.is_err());
    }

    #[tokio::test]
    async fn stop_resolves_pending_wait() {
        let signal = WaitSignal::new();
        let waiter = {
            let signal = Arc::clone(&signal);
            tokio::spawn(async move { signal.wait(&CancellationToken::new()).await })
        };
        tokio::task::yield_now().await;
        signal.notify(Wake::Stop);
        assert!(!waiter.await.unwrap().unwrap());
    }

    #[tokio::test]
    async fn cancel_resolves_only_that_wait() {
        let signal = WaitSignal::new();
        let cancel = CancellationToken::new();
        let waiter = {
            let signal = Arc::clone(&signal);
            let cancel = cancel.clone();
            tokio::spawn(async move { signal.wait(&cancel).await })
        };
        tokio::task::yield_now().await;
        cancel.cancel();
        assert!(matches!(
            waiter.await.unwrap(),
            Err(TimerError::WaitCanceled)
        ));
        // The signal is reusable afterwards.
        signal.notify(Wake::Tick);
        assert!(signal.wait(&CancellationToken::new()).await.unwrap());
    }

    #[tokio::test]
    async fn pre_canceled_token_resolves_immediately() {
        let signal = WaitSignal::new();
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(matches!(
            signal.wait(&cancel).await,
            Err(TimerError::WaitCanceled)
        ));
        // The refused wait must not have latched any state.
        signal.notify(Wake::Tick);
        assert!(signal.wait(&CancellationToken::new()).await.unwrap());
    }

    #[tokio::test]
    async fn second_wait_is_rejected() {
        let signal = WaitSignal::new();
        let first = {
            let signal = Arc::clone(&signal);
            tokio::spawn(async move { signal.wait(&CancellationToken::new()).await })
        };
        tokio::task::yield_now().await;
        assert!(matches!(
            signal.wait(&CancellationToken::new()).await,
            Err(TimerError::ConcurrentWait)
        ));
        // The first wait is unaffected by the rejected one.
        signal.notify(Wake::Tick);
        assert!(first.await.unwrap().unwrap());
    }

    #[tokio::test]
    async fn stop_after_tick_wins_on_consumption() {
        let signal = WaitSignal::new();
        let waiter = {
            let signal = Arc::clone(&signal);
            tokio::spawn(async move { signal.wait(&CancellationToken::new()).await })
        };
        tokio::task::yield_now().await;
        signal.notify(Wake::Tick);
        signal.notify(Wake::Stop);
        // A stop observed before consumption overrides the tick.
        assert!(!waiter.await.unwrap().unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_wait_does_not_wedge() {
        let signal = WaitSignal::new();
        let token = CancellationToken::new();
        let abandoned = tokio::time::timeout(
            Duration::from_millis(10),
            signal.wait(&token),
        );
        assert!(abandoned.await.is_err());
        // The dropped wait released its slot; the next one works normally.
        signal.notify(Wake::Tick);
        assert!(signal.wait(&CancellationToken::new()).await.unwrap());
    }
}
