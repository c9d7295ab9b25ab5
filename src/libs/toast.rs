use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

pub const TOAST_LIFETIME: Duration = Duration::from_secs(3);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ToastLevel {
    Info,
    Success,
    Error,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Toast {
    pub id: u64,
    pub level: ToastLevel,
    pub message: String,
    pub shown_at: Instant,
}

#[derive(Debug, Default)]
struct ToastQueue {
    toasts: VecDeque<Toast>,
    next_id: u64,
}

impl ToastQueue {
    fn prune(&mut self, now: Instant, lifetime: Duration) {
        self.toasts
            .retain(|toast| now.duration_since(toast.shown_at) < lifetime);
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.toasts.len()
    }
}

/// Transient user-facing notifications. Each toast is visible for the configured
/// lifetime and is then dropped the next time the queue is read or pushed to.
#[derive(Clone, Debug)]
pub struct NotificationCenter {
    queue: Arc<Mutex<ToastQueue>>,
    lifetime: Duration,
}

impl Default for NotificationCenter {
    fn default() -> Self {
        Self::new(TOAST_LIFETIME)
    }
}

impl NotificationCenter {
    pub fn new(lifetime: Duration) -> Self {
        Self {
            queue: Arc::new(Mutex::new(ToastQueue::default())),
            lifetime,
        }
    }

    pub fn push(&self, level: ToastLevel, message: impl Into<String>) -> u64 {
        let message = message.into();
        match level {
            ToastLevel::Error => warn!(%message, "toast"),
            _ => info!(%message, "toast"),
        }

        let now = Instant::now();
        let mut queue = self.lock();
        queue.prune(now, self.lifetime);
        queue.next_id += 1;
        let id = queue.next_id;
        queue.toasts.push_back(Toast {
            id,
            level,
            message,
            shown_at: now,
        });
        id
    }

    pub fn info(&self, message: impl Into<String>) -> u64 {
        self.push(ToastLevel::Info, message)
    }

    pub fn success(&self, message: impl Into<String>) -> u64 {
        self.push(ToastLevel::Success, message)
    }

    pub fn error(&self, message: impl Into<String>) -> u64 {
        self.push(ToastLevel::Error, message)
    }

    /// Toasts still inside their display window, oldest first.
    pub fn active(&self) -> Vec<Toast> {
        let now = Instant::now();
        let mut queue = self.lock();
        queue.prune(now, self.lifetime);
        queue.toasts.iter().cloned().collect()
    }

    pub fn latest(&self) -> Option<Toast> {
        self.active().pop()
    }

    pub fn dismiss(&self, id: u64) {
        self.lock().toasts.retain(|toast| toast.id != id);
    }

    fn lock(&self) -> MutexGuard<'_, ToastQueue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
