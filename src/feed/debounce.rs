use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;

/// Holds back a rapidly changing value until it has been stable for
/// `delay`.
///
/// At most one timer is pending per instance: a new [`push`](Self::push)
/// aborts the previous one, and dropping the debouncer aborts whatever is
/// still pending. A zero delay forwards the value on the next scheduler tick.
pub struct Debouncer<T> {
    delay: Duration,
    tx: Arc<watch::Sender<T>>,
    pending: Option<JoinHandle<()>>,
}

impl<T> Debouncer<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(initial: T, delay: Duration) -> Self {
        let (tx, _) = watch::channel(initial);
        Self {
            delay,
            tx: Arc::new(tx),
            pending: None,
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Schedules `value`, superseding anything not yet forwarded.
    pub fn push(&mut self, value: T) {
        self.cancel();
        let tx = Arc::clone(&self.tx);
        let delay = self.delay;
        self.pending = Some(tokio::spawn(async move {
            sleep(delay).await;
            tx.send_replace(value);
        }));
    }

    /// Forwards `value` immediately, dropping any pending one.
    pub fn flush(&mut self, value: T) {
        self.cancel();
        self.tx.send_replace(value);
    }

    pub fn cancel(&mut self) {
        if let Some(handle) = self.pending.take() {
            handle.abort();
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    /// The last forwarded value.
    pub fn current(&self) -> T {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<T> {
        self.tx.subscribe()
    }
}

impl<T> Drop for Debouncer<T> {
    fn drop(&mut self) {
        if let Some(handle) = self.pending.take() {
            handle.abort();
        }
    }
}
