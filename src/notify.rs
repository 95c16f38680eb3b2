use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ToastKind {
    Success,
    Error,
    Info,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Toast {
    pub id: u64,
    pub message: String,
    pub kind: ToastKind,
}

#[derive(Debug, Default)]
struct Queue {
    next_id: u64,
    toasts: Vec<Toast>,
}

/// Transient user-facing notifications. Clones share one queue.
#[derive(Debug, Clone, Default)]
pub struct Notifier {
    queue: Arc<Mutex<Queue>>,
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, message: impl Into<String>, kind: ToastKind) -> u64 {
        let mut queue = self.lock();
        queue.next_id += 1;
        let id = queue.next_id;
        queue.toasts.push(Toast {
            id,
            message: message.into(),
            kind,
        });
        id
    }

    pub fn success(&self, message: impl Into<String>) -> u64 {
        self.push(message, ToastKind::Success)
    }

    pub fn error(&self, message: impl Into<String>) -> u64 {
        self.push(message, ToastKind::Error)
    }

    pub fn info(&self, message: impl Into<String>) -> u64 {
        self.push(message, ToastKind::Info)
    }

    pub fn dismiss(&self, id: u64) -> bool {
        let mut queue = self.lock();
        let before = queue.toasts.len();
        queue.toasts.retain(|toast| toast.id != id);
        queue.toasts.len() != before
    }

    pub fn snapshot(&self) -> Vec<Toast> {
        self.lock().toasts.clone()
    }

    /// Removes and returns everything queued.
    pub fn drain(&self) -> Vec<Toast> {
        std::mem::take(&mut self.lock().toasts)
    }

    fn lock(&self) -> MutexGuard<'_, Queue> {
        match self.queue.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_the_queue() {
        let notifier = Notifier::new();
        let handle = notifier.clone();
        let first = handle.error("Failed to update RSVP");
        notifier.success("Event created successfully");

        let toasts = notifier.snapshot();
        assert_eq!(toasts.len(), 2);
        assert_eq!(toasts[0].kind, ToastKind::Error);

        assert!(notifier.dismiss(first));
        assert!(!notifier.dismiss(first));
        assert_eq!(handle.drain().len(), 1);
        assert!(notifier.snapshot().is_empty());
    }
}
