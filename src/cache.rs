//! Single-flight cache for expensive one-time loads.
//!
//! The first caller starts the load; every caller that arrives while it is
//! in flight awaits the same shared future and observes the same result.
//! A successful value is kept for the life of the cache. A failed load
//! clears the slot, so the next caller starts a fresh attempt.

use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use tokio::sync::Mutex;

type Flight<T, E> = Shared<BoxFuture<'static, Result<Arc<T>, Arc<E>>>>;

/// Cache slot shared by clones.
///
/// ```
/// use pfs_locality::cache::SingleFlight;
///
/// # #[tokio::main]
/// # async fn main() {
/// let cache: SingleFlight<u32, String> = SingleFlight::new();
/// let value = cache.get_or_load(|| async { Ok(42) }).await.unwrap();
/// assert_eq!(*value, 42);
/// # }
/// ```
pub struct SingleFlight<T, E> {
    slot: Arc<Mutex<Option<Flight<T, E>>>>,
}

impl<T, E> Clone for SingleFlight<T, E> {
    fn clone(&self) -> Self {
        Self {
            slot: Arc::clone(&self.slot),
        }
    }
}

impl<T, E> SingleFlight<T, E>
where
    T: Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            slot: Arc::new(Mutex::new(None)),
        }
    }

    /// Return the cached value, joining or starting a load as needed.
    ///
    /// `load` is only invoked when no load is cached or in flight.
    pub async fn get_or_load<F, Fut>(&self, load: F) -> Result<Arc<T>, Arc<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let flight = {
            let mut slot = self.slot.lock().await;
            // A failed flight whose waiters all went away is still in the slot
            let settled_failure = slot
                .as_ref()
                .is_some_and(|existing| matches!(existing.peek(), Some(Err(_))));
            match slot.as_ref() {
                Some(existing) if !settled_failure => {
                    tracing::debug!("joining cached or in-flight load");
                    existing.clone()
                }
                _ => {
                    let flight = load()
                        .map(|result| result.map(Arc::new).map_err(Arc::new))
                        .boxed()
                        .shared();
                    *slot = Some(flight.clone());
                    flight
                }
            }
        }; // Lock released before awaiting the load

        let result = flight.clone().await;

        if result.is_err() {
            let mut slot = self.slot.lock().await;
            // Only clear our own failed flight, not a retry someone already started
            if slot.as_ref().is_some_and(|current| current.ptr_eq(&flight)) {
                *slot = None;
            }
        }

        result
    }

    /// The loaded value, if a load has already succeeded.
    pub async fn peek(&self) -> Option<Arc<T>> {
        let slot = self.slot.lock().await;
        match slot.as_ref()?.peek()? {
            Ok(value) => Some(Arc::clone(value)),
            Err(_) => None,
        }
    }

    /// Forget any cached or in-flight load.
    ///
    /// Callers already awaiting an in-flight load still receive its result.
    pub async fn reset(&self) {
        let mut slot = self.slot.lock().await;
        *slot = None;
    }
}

impl<T, E> Default for SingleFlight<T, E>
where
    T: Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
