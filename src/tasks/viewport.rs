use std::sync::Arc;

use parking_lot::Mutex;
use tokio::select;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::events::ViewportSize;

/// Republishes the host container's box size while enabled.
pub struct ViewportObserver {
    root_size: Arc<watch::Sender<ViewportSize>>,
    cancel: Mutex<Option<CancellationToken>>,
}

impl Default for ViewportObserver {
    fn default() -> Self {
        Self::new()
    }
}

impl ViewportObserver {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(ViewportSize::default());
        Self {
            root_size: Arc::new(tx),
            cancel: Mutex::new(None),
        }
    }

    pub fn root_size(&self) -> watch::Receiver<ViewportSize> {
        self.root_size.subscribe()
    }

    pub fn current(&self) -> ViewportSize {
        *self.root_size.borrow()
    }

    pub fn is_enabled(&self) -> bool {
        self.cancel.lock().is_some()
    }

    /// Starts forwarding sizes from `source`. Must be called inside a Tokio
    /// runtime. Replaces any previous source.
    pub fn enable(&self, source: watch::Receiver<ViewportSize>) {
        let cancel = CancellationToken::new();
        if let Some(previous) = self.cancel.lock().replace(cancel.clone()) {
            previous.cancel();
        }
        debug!("viewport observer enabled");
        tokio::spawn(forward_sizes(source, Arc::clone(&self.root_size), cancel));
    }

    /// Stops forwarding and clears a previously published size.
    pub fn disable(&self) {
        if let Some(cancel) = self.cancel.lock().take() {
            cancel.cancel();
            debug!("viewport observer disabled");
        }
        self.reset();
    }

    fn reset(&self) {
        self.root_size.send_if_modified(|size| {
            if !size.is_defined() {
                return false;
            }
            *size = ViewportSize::default();
            true
        });
    }
}

impl Drop for ViewportObserver {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.get_mut().take() {
            cancel.cancel();
        }
    }
}

async fn forward_sizes(
    mut source: watch::Receiver<ViewportSize>,
    root_size: Arc<watch::Sender<ViewportSize>>,
    cancel: CancellationToken,
) {
    let publish = |size: ViewportSize| {
        root_size.send_if_modified(|current| {
            // Checked under the channel lock so a concurrent disable wins.
            if cancel.is_cancelled() || *current == size {
                return false;
            }
            *current = size;
            true
        });
    };

    publish(*source.borrow_and_update());
    loop {
        select! {
            _ = cancel.cancelled() => break,
            changed = source.changed() => {
                if changed.is_err() {
                    debug!("viewport source closed");
                    break;
                }
                publish(*source.borrow_and_update());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn wait_for(rx: &mut watch::Receiver<ViewportSize>, expected: ViewportSize) {
        tokio::time::timeout(Duration::from_secs(1), rx.wait_for(|size| *size == expected))
            .await
            .expect("timed out waiting for viewport size")
            .expect("viewport channel closed");
    }

    #[tokio::test]
    async fn forwards_sizes_while_enabled() {
        let observer = ViewportObserver::new();
        let (host_tx, host_rx) = watch::channel(ViewportSize::new(800.0, 600.0));
        let mut root = observer.root_size();

        observer.enable(host_rx);
        wait_for(&mut root, ViewportSize::new(800.0, 600.0)).await;

        host_tx.send_replace(ViewportSize::new(1024.0, 768.0));
        wait_for(&mut root, ViewportSize::new(1024.0, 768.0)).await;
        assert!(observer.is_enabled());
    }

    #[tokio::test]
    async fn disabling_resets_the_published_size() {
        let observer = ViewportObserver::new();
        let (host_tx, host_rx) = watch::channel(ViewportSize::new(320.0, 240.0));
        let mut root = observer.root_size();
        observer.enable(host_rx);
        wait_for(&mut root, ViewportSize::new(320.0, 240.0)).await;

        observer.disable();
        assert_eq!(observer.current(), ViewportSize::default());
        host_tx.send_replace(ViewportSize::new(1.0, 1.0));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(observer.current(), ViewportSize::default());
    }

    #[test]
    fn inert_while_disabled() {
        let observer = ViewportObserver::new();
        observer.disable();
        assert!(!observer.is_enabled());
        assert!(!observer.current().is_defined());
    }
}
