//! One-shot asynchronous bootstrap shared between callers
//!
//! The first caller starts the bootstrap future; every caller that arrives
//! while it is in flight awaits the same future. A successful result is kept.
//! A failed one is cleared once observed, so only a later explicit call starts
//! a fresh attempt.

use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};

use futures::future::{BoxFuture, FutureExt, Shared};

type Pending<T, E> = Shared<BoxFuture<'static, Result<T, E>>>;

pub struct SharedBootstrap<T, E>
where
    T: Clone,
    E: Clone,
{
    slot: Mutex<Option<Pending<T, E>>>,
}

impl<T, E> SharedBootstrap<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(None),
        }
    }

    /// Join the in-flight bootstrap, or start one with `start`
    ///
    /// `start` is only invoked when no bootstrap is pending or completed.
    pub async fn get_or_start<F, Fut>(&self, start: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let pending = {
            let mut slot = self.lock();
            match slot.as_ref() {
                Some(pending) => pending.clone(),
                None => {
                    let pending = start().boxed().shared();
                    *slot = Some(pending.clone());
                    pending
                }
            }
        };

        let result = pending.clone().await;

        if result.is_err() {
            let mut slot = self.lock();
            if slot.as_ref().is_some_and(|current| current.ptr_eq(&pending)) {
                *slot = None;
            }
        }

        result
    }

    /// The bootstrapped value, if a bootstrap has completed successfully
    pub fn ready(&self) -> Option<T> {
        self.lock()
            .as_ref()
            .and_then(|pending| pending.peek().cloned())
            .and_then(Result::ok)
    }

    pub fn is_ready(&self) -> bool {
        self.ready().is_some()
    }

    /// Forget any pending or completed bootstrap
    pub fn reset(&self) {
        *self.lock() = None;
    }

    fn lock(&self) -> MutexGuard<'_, Option<Pending<T, E>>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T, E> Default for SharedBootstrap<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T, E> std::fmt::Debug for SharedBootstrap<T, E>
where
    T: Clone,
    E: Clone,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let pending = self
            .slot
            .lock()
            .map(|slot| slot.is_some())
            .unwrap_or_default();
        f.debug_struct("SharedBootstrap")
            .field("pending", &pending)
            .finish()
    }
}
