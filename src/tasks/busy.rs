use std::future::Future;

use futures::future::{BoxFuture, join_all};
use tracing::{debug, warn};

use crate::events::Action;
use crate::store::Store;

/// One member of a bracketed operation set. Failures are reported to the
/// user inside the operation; the bracketer only logs them.
pub type Operation = BoxFuture<'static, anyhow::Result<()>>;

/// Shows the loading indicator around sets of concurrent operations.
#[derive(Clone)]
pub struct Bracketer {
    store: Store,
}

struct BusyGuard {
    store: Store,
}

impl BusyGuard {
    fn acquire(store: &Store) -> Self {
        store.dispatch(Action::ShowLoader);
        debug!(busy = store.read(|s| s.pending_loaders), "bracket opened");
        Self {
            store: store.clone(),
        }
    }
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.store.dispatch(Action::HideLoader);
        debug!(busy = self.store.read(|s| s.pending_loaders), "bracket closed");
    }
}

impl Bracketer {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Marks the editor busy, then calls `build` to create the operations so
    /// the indicator is up before any of them is issued. The returned future
    /// always completes once every operation has settled, and the indicator
    /// is cleared even if it is dropped early.
    pub fn run<F>(&self, build: F) -> impl Future<Output = ()> + Send + 'static
    where
        F: FnOnce() -> Vec<Operation>,
    {
        let guard = BusyGuard::acquire(&self.store);
        let operations = build();
        async move {
            let results = join_all(operations).await;
            for err in results.into_iter().filter_map(Result::err) {
                warn!(error = ?err, "bracketed operation failed");
            }
            drop(guard);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::unload_guard::UnsavedMirror;
    use crate::store::EditorState;
    use anyhow::anyhow;

    fn bracketer() -> (Bracketer, Store) {
        let store = Store::new(EditorState::default(), UnsavedMirror::default());
        (Bracketer::new(store.clone()), store)
    }

    #[tokio::test]
    async fn busy_is_raised_before_operations_are_built() {
        let (bracketer, store) = bracketer();
        let observed = {
            let store = store.clone();
            let mut observed = false;
            let run = bracketer.run(|| {
                observed = store.read(EditorState::is_loading_globally);
                Vec::new()
            });
            run.await;
            observed
        };
        assert!(observed);
        assert!(!store.read(EditorState::is_loading_globally));
    }

    #[tokio::test]
    async fn idle_after_every_operation_fails() {
        let (bracketer, store) = bracketer();
        bracketer
            .run(|| {
                vec![
                    Box::pin(async { Err::<(), _>(anyhow!("first")) }) as Operation,
                    Box::pin(async { Err::<(), _>(anyhow!("second")) }),
                ]
            })
            .await;
        assert_eq!(store.read(|s| s.pending_loaders), 0);
    }

    #[tokio::test]
    async fn overlapping_brackets_stay_busy_until_the_last_settles() {
        let (bracketer, store) = bracketer();
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let slow = tokio::spawn(bracketer.run(move || {
            vec![Box::pin(async move {
                let _ = rx.await;
                anyhow::Ok(())
            }) as Operation]
        }));
        bracketer.run(Vec::new).await;
        assert!(store.read(EditorState::is_loading_globally));
        let _ = tx.send(());
        slow.await.unwrap();
        assert!(!store.read(EditorState::is_loading_globally));
    }

    #[test]
    fn dropping_the_bracket_clears_the_indicator() {
        let (bracketer, store) = bracketer();
        let pending = bracketer.run(Vec::new);
        assert!(store.read(EditorState::is_loading_globally));
        drop(pending);
        assert!(!store.read(EditorState::is_loading_globally));
    }
}
