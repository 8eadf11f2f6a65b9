//! Single-flight coalescing for token refreshes.
//!
//! The first caller to ask for a refresh starts it; everyone who asks while
//! it is running awaits the same shared future and receives the same
//! outcome. The slot is cleared as soon as the refresh completes, so the
//! next authorization failure starts a fresh one.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use tracing::debug;

use super::error::RefreshError;

/// New access token, or why it couldn't be obtained.
pub type RefreshOutcome = Result<String, RefreshError>;

type SharedRefresh = Shared<BoxFuture<'static, RefreshOutcome>>;

struct InFlight {
    id: u64,
    future: SharedRefresh,
}

pub(crate) struct SingleFlight {
    slot: Arc<Mutex<Option<InFlight>>>,
    next_id: AtomicU64,
}

impl SingleFlight {
    pub(crate) fn new() -> Self {
        Self {
            slot: Arc::new(Mutex::new(None)),
            next_id: AtomicU64::new(0),
        }
    }

    pub(crate) fn is_in_flight(&self) -> bool {
        self.slot.lock().is_some()
    }

    /// Join the refresh in progress, or start one with `start` if there is
    /// none. `start` is only called when this caller becomes the leader.
    pub(crate) async fn run<F>(&self, start: F) -> RefreshOutcome
    where
        F: FnOnce() -> BoxFuture<'static, RefreshOutcome>,
    {
        let future = {
            let mut slot = self.slot.lock();
            match slot.as_ref() {
                Some(in_flight) => {
                    debug!(refresh_id = in_flight.id, "Joining in-flight token refresh");
                    in_flight.future.clone()
                }
                None => {
                    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                    debug!(refresh_id = id, "Starting token refresh");
                    let work = start();
                    let owner = Arc::clone(&self.slot);
                    let future = async move {
                        let outcome = work.await;
                        // Clear before any waiter sees the outcome
                        let mut slot = owner.lock();
                        if slot.as_ref().is_some_and(|f| f.id == id) {
                            *slot = None;
                        }
                        outcome
                    }
                    .boxed()
                    .shared();
                    *slot = Some(InFlight {
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
