use std::sync::Arc;

use tokio::sync::Notify;

/// A one-shot handle resolved exactly once by an external writer and awaited
/// by any number of readers.
///
/// This is the binding between the Pull-Snapshot Scheduler and the
/// `RemoteSnapshot` placeholders it resolves: the scheduler task calls
/// `complete()` once its batched RPC returns, and any caller that accessed
/// the placeholder in the meantime is woken up. `complete()` is idempotent —
/// calling it twice is a no-op on the second call — and `get()` is safe to
/// call concurrently from many tasks.
#[derive(Clone)]
pub struct OnceHandle<T> {
    inner: Arc<Inner<T>>,
}

struct Inner<T> {
    value: std::sync::Mutex<Option<T>>,
    notify: Notify,
}

impl<T: Clone> OnceHandle<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                value: std::sync::Mutex::new(None),
                notify: Notify::new(),
            }),
        }
    }

    /// Resolves the handle. A second call is ignored: the first writer wins.
    pub fn complete(&self, value: T) {
        let mut guard = self.inner.value.lock().unwrap();
        if guard.is_none() {
            *guard = Some(value);
            drop(guard);
            self.inner.notify.notify_waiters();
        }
    }

    /// Returns immediately if already resolved, otherwise waits for
    /// `complete()` to be called by whichever task is responsible for it.
    pub async fn get(&self) -> T {
        loop {
            // Register interest before checking the value: if `complete()`
            // runs between the check and `notified().await`, the permit it
            // leaves behind would otherwise be lost and this task would
            // wait forever.
            let notified = self.inner.notify.notified();
            {
                let guard = self.inner.value.lock().unwrap();
                if let Some(value) = guard.as_ref() {
                    return value.clone();
                }
            }
            notified.await;
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.inner.value.lock().unwrap().is_some()
    }
}

impl<T: Clone> Default for OnceHandle<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolves_once_and_wakes_waiters() {
        let handle: OnceHandle<u32> = OnceHandle::new();
        let waiter = {
            let handle = handle.clone();
            tokio::spawn(async move { handle.get().await })
        };

        tokio::task::yield_now().await;
        handle.complete(42);
        handle.complete(7); // ignored: first writer wins

        assert_eq!(waiter.await.unwrap(), 42);
        assert_eq!(handle.get().await, 42);
    }
}
