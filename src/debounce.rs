use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::trace;

pub const DEFAULT_QUIET_INTERVAL: Duration = Duration::from_millis(100);

/// Field-wise merge of a later payload into an earlier one.
pub trait Coalesce {
    fn coalesce(&mut self, later: Self);
}

struct Armed<P> {
    payload: P,
    timer: JoinHandle<()>,
    generation: u64,
}

/// Trailing-edge debounce over a pending payload.
///
/// The payload and its timer live in one slot, so a timer is armed exactly
/// when a payload is pending and there is never more than one timer.
pub(crate) struct Debouncer<P> {
    quiet: Duration,
    armed: Option<Armed<P>>,
    generation: u64,
}

impl<P: Coalesce> Debouncer<P> {
    pub fn new(quiet: Duration) -> Self {
        Self {
            quiet,
            armed: None,
            generation: 0,
        }
    }

    /// Merges `payload` into the pending one and restarts the quiet interval.
    ///
    /// `on_fire` receives the generation of the new timer and builds the
    /// future that runs once the interval elapses. That future should call
    /// [`Debouncer::fire`] with the same generation to claim the payload.
    /// Must be called from within a tokio runtime.
    pub fn arm<F, Fut>(&mut self, payload: P, on_fire: F) -> u64
    where
        F: FnOnce(u64) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.generation = self.generation.wrapping_add(1);
        let generation = self.generation;
        let quiet = self.quiet;
        let fire = on_fire(generation);
        let timer = tokio::spawn(async move {
            tokio::time::sleep(quiet).await;
            fire.await;
        });

        let payload = match self.armed.take() {
            Some(previous) => {
                previous.timer.abort();
                trace!(generation, "debounce timer restarted");
                let mut merged = previous.payload;
                merged.coalesce(payload);
                merged
            }
            None => payload,
        };

        self.armed = Some(Armed {
            payload,
            timer,
            generation,
        });
        generation
    }

    /// Claims the pending payload for the timer of `generation`. A timer that
    /// was superseded after it woke up gets `None`.
    pub fn fire(&mut self, generation: u64) -> Option<P> {
        if self.armed.as_ref().is_some_and(|a| a.generation == generation) {
            self.armed.take().map(|armed| armed.payload)
        } else {
            None
        }
    }

    /// Cancels the armed timer and drops the payload without dispatching it.
    pub fn cancel(&mut self) -> Option<P> {
        self.armed.take().map(|armed| {
            armed.timer.abort();
            armed.payload
        })
    }

    pub fn is_armed(&self) -> bool {
        self.armed.is_some()
    }

    pub fn pending(&self) -> Option<&P> {
        self.armed.as_ref().map(|armed| &armed.payload)
    }

    pub fn quiet_interval(&self) -> Duration {
        self.quiet
    }
}

impl<P> Drop for Debouncer<P> {
    fn drop(&mut self) {
        if let Some(armed) = self.armed.take() {
            armed.timer.abort();
        }
    }
}
