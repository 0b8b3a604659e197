use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use tokio::task::JoinError;

/// Output of a flight. `Err` when the task panicked or the runtime shut down.
pub type FlightResult<T> = std::result::Result<T, Arc<JoinError>>;

struct Flight<T> {
    id: u64,
    future: Shared<BoxFuture<'static, FlightResult<T>>>,
}

type Slot<T> = Arc<Mutex<Option<Flight<T>>>>;

/// Coalesces concurrent calls into one execution whose output every caller receives.
///
/// The operation runs on its own task, so it completes even when every caller
/// has stopped waiting. The slot is released when the task ends, successful or not.
pub struct SingleFlight<T> {
    slot: Slot<T>,
    next_id: AtomicU64,
}

impl<T> Default for SingleFlight<T> {
    fn default() -> Self {
        Self {
            slot: Arc::new(Mutex::new(None)),
            next_id: AtomicU64::new(0),
        }
    }
}

struct Release<T> {
    slot: Slot<T>,
    id: u64,
}

impl<T> Drop for Release<T> {
    fn drop(&mut self) {
        let finished = {
            let mut slot = self.slot.lock();
            match slot.as_ref() {
                Some(flight) if flight.id == self.id => slot.take(),
                _ => None,
            }
        };
        drop(finished);
    }
}

impl<T> SingleFlight<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub fn in_flight(&self) -> bool {
        self.slot.lock().is_some()
    }

    /// Joins the running flight, or spawns `operation` if none is running.
    pub async fn run<F, Fut>(&self, operation: F) -> FlightResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        let future = {
            let mut slot = self.slot.lock();
            match slot.as_ref() {
                Some(flight) => flight.future.clone(),
                None => {
                    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                    let release = Release {
                        slot: self.slot.clone(),
                        id,
                    };
                    let pending = operation();
                    let task = tokio::spawn(async move {
                        let _release = release;
                        pending.await
                    });
                    let future = async move { task.await.map_err(Arc::new) }
                        .boxed()
                        .shared();
                    *slot = Some(Flight {
                        id,
                        future: future.clone(),
                    });
                    future
                }
            }
        };
        future.await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize};
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn concurrent_calls_share_one_execution() {
        let flight = SingleFlight::<u32>::new();
        let runs = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = oneshot::channel::<u32>();

        let first = flight.run(|| {
            let runs = runs.clone();
            async move {
                runs.fetch_add(1, Ordering::SeqCst);
                rx.await.unwrap_or(0)
            }
        });
        let second = flight.run(|| {
            let runs = runs.clone();
            async move {
                runs.fetch_add(1, Ordering::SeqCst);
                99
            }
        });
        let release = async {
            tokio::task::yield_now().await;
            tx.send(7).expect("send");
        };

        let (a, b, ()) = tokio::join!(first, second, release);
        assert_eq!((a.expect("a"), b.expect("b")), (7, 7));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(!flight.in_flight());
    }

    #[tokio::test]
    async fn slot_clears_after_failure() {
        let flight = SingleFlight::<Result<(), String>>::new();
        let failed = flight
            .run(|| async { Err("boom".to_string()) })
            .await
            .expect("join");
        assert_eq!(failed, Err("boom".to_string()));
        assert!(!flight.in_flight());

        let next = flight.run(|| async { Ok(()) }).await.expect("join");
        assert_eq!(next, Ok(()));
    }

    #[tokio::test]
    async fn abandoned_flight_runs_to_completion() {
        let flight = SingleFlight::<u32>::new();
        let finished = Arc::new(AtomicBool::new(false));
        let (tx, rx) = oneshot::channel::<u32>();
        {
            let done = finished.clone();
            let pending = flight.run(move || async move {
                let value = rx.await.unwrap_or(0);
                done.store(true, Ordering::SeqCst);
                value
            });
            futures::pin_mut!(pending);
            assert!(futures::poll!(pending.as_mut()).is_pending());
        }
        assert!(flight.in_flight());

        tx.send(5).expect("send");
        let joined = flight.run(|| async { 0 }).await.expect("join");
        assert_eq!(joined, 5);
        assert!(finished.load(Ordering::SeqCst));
        assert!(!flight.in_flight());
    }

    #[tokio::test]
    async fn panicking_operation_releases_the_slot() {
        let flight = SingleFlight::<u32>::new();
        let err = flight
            .run(|| async {
                let missing: Option<u32> = None;
                missing.expect("operation panicked")
            })
            .await
            .unwrap_err();
        assert!(err.is_panic());
        assert!(!flight.in_flight());
        assert_eq!(flight.run(|| async { 1 }).await.expect("join"), 1);
    }
}
