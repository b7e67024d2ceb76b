use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnloadDecision {
    Allow,
    Veto,
}

pub type UnloadHandler = Arc<dyn Fn() -> UnloadDecision + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// A platform "about to unload" notification that handlers may veto.
pub trait UnloadSignal: Send + Sync {
    fn subscribe(&self, handler: UnloadHandler) -> SubscriptionId;
    fn unsubscribe(&self, id: SubscriptionId);
}

/// Always holds the latest "has unsaved changes" flag. Written by the store on
/// every dispatch and read by the unload handler at unload time.
#[derive(Debug, Clone, Default)]
pub struct UnsavedMirror(Arc<AtomicBool>);

impl UnsavedMirror {
    pub fn set(&self, dirty: bool) {
        self.0.store(dirty, Ordering::SeqCst);
    }

    pub fn get(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Subscription to an [`UnloadSignal`] that vetoes while the mirror is dirty.
/// Released when dropped.
pub struct UnloadVeto {
    signal: Arc<dyn UnloadSignal>,
    id: SubscriptionId,
}

impl UnloadVeto {
    pub fn acquire(signal: Arc<dyn UnloadSignal>, mirror: UnsavedMirror) -> Self {
        let handler: UnloadHandler = Arc::new(move || {
            if mirror.get() {
                UnloadDecision::Veto
            } else {
                UnloadDecision::Allow
            }
        });
        let id = signal.subscribe(handler);
        debug!(?id, "unload veto installed");
        Self { signal, id }
    }
}

impl Drop for UnloadVeto {
    fn drop(&mut self) {
        self.signal.unsubscribe(self.id);
        debug!(id = ?self.id, "unload veto released");
    }
}

/// In-process unload signal: `request()` polls every subscriber.
#[derive(Clone, Default)]
pub struct ExitSignal {
    inner: Arc<ExitSignalInner>,
}

#[derive(Default)]
struct ExitSignalInner {
    next_id: AtomicU64,
    handlers: Mutex<Vec<(SubscriptionId, UnloadHandler)>>,
}

impl ExitSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) -> UnloadDecision {
        let handlers: Vec<UnloadHandler> = self
            .inner
            .handlers
            .lock()
            .iter()
            .map(|(_, handler)| Arc::clone(handler))
            .collect();
        let vetoed = handlers
            .iter()
            .any(|handler| handler() == UnloadDecision::Veto);
        if vetoed {
            info!("exit vetoed: there are unsaved changes");
            UnloadDecision::Veto
        } else {
            UnloadDecision::Allow
        }
    }

    /// Number of live unload handlers; non-zero while an editor guards
    /// unsaved work.
    pub fn subscriber_count(&self) -> usize {
        self.inner.handlers.lock().len()
    }
}

impl UnloadSignal for ExitSignal {
    fn subscribe(&self, handler: UnloadHandler) -> SubscriptionId {
        let id = SubscriptionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        self.inner.handlers.lock().push((id, handler));
        id
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        self.inner.handlers.lock().retain(|(existing, _)| *existing != id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn veto_follows_latest_mirror_value() {
        let signal = ExitSignal::new();
        let mirror = UnsavedMirror::default();
        let _veto = UnloadVeto::acquire(Arc::new(signal.clone()), mirror.clone());

        assert_eq!(signal.request(), UnloadDecision::Allow);
        mirror.set(true);
        assert_eq!(signal.request(), UnloadDecision::Veto);
        mirror.set(false);
        assert_eq!(signal.request(), UnloadDecision::Allow);
    }

    #[test]
    fn dropping_the_veto_unsubscribes() {
        let signal = ExitSignal::new();
        let mirror = UnsavedMirror::default();
        mirror.set(true);
        let veto = UnloadVeto::acquire(Arc::new(signal.clone()), mirror);
        assert_eq!(signal.subscriber_count(), 1);
        drop(veto);
        assert_eq!(signal.subscriber_count(), 0);
        assert_eq!(signal.request(), UnloadDecision::Allow);
    }
}
