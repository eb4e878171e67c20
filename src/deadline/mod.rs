use std::sync::Mutex;
use std::time::Duration;

use tokio::task::JoinHandle;

/// One-shot deadline timer backed by a spawned sleep task. Re-armable;
/// knows nothing about schedules or wait state.
pub(crate) struct DeadlineTimer {
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl DeadlineTimer {
    pub(crate) fn new() -> Self {
        DeadlineTimer {
            handle: Mutex::new(None),
        }
    }

    /// Arm the timer to invoke `on_fire` once after `delay`. A zero delay
    /// fires on the next scheduler turn.
    pub(crate) fn arm<F>(&self, delay: Duration, on_fire: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            on_fire();
        });
        let mut handle = self.handle.lock().unwrap();
        // A previous arming is either spent or superseded; abort it so a
        // stale deadline can never fire.
        if let Some(stale) = handle.replace(task) {
            stale.abort();
        }
    }

    /// Release whatever is currently armed.
    pub(crate) fn cancel(&self) {
        if let Some(task) = self.handle.lock().unwrap().take() {
            task.abort();
        }
    }
}
