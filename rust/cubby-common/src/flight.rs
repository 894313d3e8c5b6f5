use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::Mutex;

/// A single-slot cache whose refills are coalesced.
///
/// At most one refill runs at a time. Callers that arrive while a refill is
/// in flight wait for it and then observe its outcome: the landed value if it
/// succeeded, or the same error if it failed. A refill that is abandoned
/// (its future dropped) leaves the slot as it was.
///
/// [Flight::invalidate] never waits. It bumps a generation counter, so a
/// value landed under an older generation is never handed out again and a
/// refill that was already in flight when the invalidation happened returns
/// its value to its own callers without caching it.
///
/// ```rust
/// # async fn example() {
/// use cubby_common::Flight;
///
/// let flight = Flight::<u32, String>::default();
/// let value = flight.run(|_| true, || async { Ok(42) }).await;
/// assert_eq!(value, Ok(42));
///
/// // Cached now, so the second refill never runs
/// let value = flight.run(|_| true, || async { Ok(7) }).await;
/// assert_eq!(value, Ok(42));
/// # }
/// ```
#[derive(Debug)]
pub struct Flight<T, E> {
    generation: AtomicU64,
    attempts: AtomicU64,
    slot: Mutex<Slot<T, E>>,
}

#[derive(Debug)]
struct Slot<T, E> {
    landed: Option<(T, u64)>,
    failure: Option<(E, u64)>,
}

impl<T, E> Default for Flight<T, E> {
    fn default() -> Self {
        Self {
            generation: AtomicU64::new(0),
            attempts: AtomicU64::new(0),
            slot: Mutex::new(Slot {
                landed: None,
                failure: None,
            }),
        }
    }
}

impl<T, E> Flight<T, E>
where
    T: Clone,
    E: Clone,
{
    /// Return the cached value if `fresh` accepts it, otherwise run `refill`
    /// (or join the refill that is already running) and cache its value.
    pub async fn run<Fresh, Refill, Fut>(&self, fresh: Fresh, refill: Refill) -> Result<T, E>
    where
        Fresh: Fn(&T) -> bool,
        Refill: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let observed = self.attempts.load(Ordering::Acquire);
        let mut slot = self.slot.lock().await;
        let generation = self.generation.load(Ordering::Acquire);

        if let Some((value, landed_at)) = &slot.landed {
            if *landed_at == generation && fresh(value) {
                return Ok(value.clone());
            }
        }

        // A refill that finished while we were queued failed; share its error
        // rather than hammering the same collaborator again.
        if let Some((error, attempt)) = &slot.failure {
            if *attempt > observed {
                return Err(error.clone());
            }
        }

        let outcome = refill().await;
        let attempt = self.attempts.fetch_add(1, Ordering::AcqRel) + 1;

        match &outcome {
            Ok(value) => {
                slot.failure = None;
                slot.landed = if self.generation.load(Ordering::Acquire) == generation {
                    Some((value.clone(), generation))
                } else {
                    None
                };
            }
            Err(error) => {
                slot.landed = None;
                slot.failure = Some((error.clone(), attempt));
            }
        }

        outcome
    }

    /// The cached value, if one is held for the current generation.
    pub async fn peek(&self) -> Option<T> {
        let slot = self.slot.lock().await;
        let generation = self.generation.load(Ordering::Acquire);
        slot.landed
            .as_ref()
            .filter(|(_, landed_at)| *landed_at == generation)
            .map(|(value, _)| value.clone())
    }

    /// Expire whatever is cached; the next [Flight::run] refills.
    pub fn invalidate(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
    }
}
