use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use tracing::debug;

use crate::error::{AppError, AppResult};

type Pending<T> = Shared<BoxFuture<'static, AppResult<T>>>;

struct InFlight<T: Clone> {
    id: u64,
    key: u64,
    pending: Pending<T>,
}

/// One shared in-flight round trip per purpose and key.
///
/// The first caller spawns the operation on the runtime; everyone who arrives with
/// the same key while it is pending awaits the same result. The operation runs to
/// completion even if every caller gives up, and it empties its own slot when it
/// settles. A caller with a different key (a newer credential epoch) never joins an
/// older operation; it replaces the slot with its own.
pub struct Coalescer<T>
where
    T: Clone + Send + Sync + 'static,
{
    name: &'static str,
    slot: Arc<Mutex<Option<InFlight<T>>>>,
    round_trips: AtomicU64,
}

impl<T> Coalescer<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(name: &'static str) -> Self {
        Self { name, slot: Arc::new(Mutex::new(None)), round_trips: AtomicU64::new(0) }
    }

    pub async fn run<F, Fut>(&self, key: u64, make: F) -> AppResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = AppResult<T>> + Send + 'static,
    {
        let pending = {
            let mut slot = self.slot.lock();
            match slot.as_ref() {
                Some(existing) if existing.key == key => {
                    debug!(target: "console::token", op = self.name, key, "joining in-flight round trip");
                    existing.pending.clone()
                }
                other => {
                    if let Some(stale) = other {
                        debug!(target: "console::token", op = self.name, stale = stale.key, key, "in-flight round trip belongs to an older epoch; starting anew");
                    }
                    let id = self.round_trips.fetch_add(1, Ordering::SeqCst) + 1;
                    let fresh = self.spawn(id, make());
                    *slot = Some(InFlight { id, key, pending: fresh.clone() });
                    fresh
                }
            }
        };
        pending.await
    }

    fn spawn<Fut>(&self, id: u64, op: Fut) -> Pending<T>
    where
        Fut: Future<Output = AppResult<T>> + Send + 'static,
    {
        let slot = self.slot.clone();
        let name = self.name;
        let handle = tokio::spawn(async move {
            let out = op.await;
            let mut slot = slot.lock();
            if slot.as_ref().is_some_and(|cur| cur.id == id) {
                *slot = None;
            }
            out
        });
        async move {
            match handle.await {
                Ok(out) => out,
                Err(e) => Err(AppError::network("aborted", format!("{} round trip did not complete: {}", name, e))),
            }
        }
        .boxed()
        .shared()
    }

    /// Number of operations actually started (joins are not counted).
    pub fn round_trips(&self) -> u64 { self.round_trips.load(Ordering::SeqCst) }

    pub fn in_flight(&self) -> bool { self.slot.lock().is_some() }
}
