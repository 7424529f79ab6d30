//! Cooperative cancellation
//!
//! A [`CancellationSignal`] is a shared, idempotent trigger. Operations either
//! poll it ([`CancellationSignal::check`], [`CancellationSignal::is_triggered`]),
//! wait on it ([`CancellationSignal::cancelled`]) or register a listener.
//! Nothing is preempted: an operation that ignores the signal keeps running.
//!
//! A signal belongs to one logical operation group. Clones share the same
//! state; when the last clone is dropped any pending deadline timer is
//! released.
//!
//! # Example
//!
//! ```rust,ignore
//! use taskweave_core::cancel::CancellationSignal;
//! use std::time::Duration;
//!
//! let signal = CancellationSignal::new();
//! signal.trigger_after(Duration::from_secs(2));
//!
//! tokio::select! {
//!     _ = signal.cancelled() => println!("timed out"),
//!     total = sum_page_sizes(&signal) => println!("{total}"),
//! }
//! ```

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::debug;

const ACTIVE: u8 = 0;
const MANUAL: u8 = 1;
const DEADLINE: u8 = 2;

/// Why a signal fired
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelReason {
    /// `trigger()` was called
    Manual,
    /// The deadline armed by `trigger_after()` elapsed
    Deadline,
}

impl CancelReason {
    fn code(self) -> u8 {
        match self {
            Self::Manual => MANUAL,
            Self::Deadline => DEADLINE,
        }
    }

    fn from_code(code: u8) -> Option<Self> {
        match code {
            MANUAL => Some(Self::Manual),
            DEADLINE => Some(Self::Deadline),
            _ => None,
        }
    }
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Manual => write!(f, "canceled"),
            Self::Deadline => write!(f, "timed out"),
        }
    }
}

/// Returned by [`CancellationSignal::check`] once the signal has fired
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("operation {reason}")]
pub struct Canceled {
    pub reason: CancelReason,
}

/// Identifies a registered listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener = Box<dyn FnOnce(CancelReason) + Send>;

#[derive(Default)]
struct Listeners {
    next_id: u64,
    entries: Vec<(ListenerId, Listener)>,
}

struct SignalInner {
    /// `ACTIVE` or the code of the reason that won the trigger
    state: AtomicU8,
    notify: Notify,
    listeners: Mutex<Listeners>,
    deadline: Mutex<Option<JoinHandle<()>>>,
    /// Set on signals created by `child()`: the parent and the forwarding listener
    parent: Mutex<Option<(Weak<SignalInner>, ListenerId)>>,
}

impl Drop for SignalInner {
    fn drop(&mut self) {
        if let Some(timer) = self.deadline.get_mut().take() {
            timer.abort();
        }
        if let Some((parent, id)) = self.parent.get_mut().take() {
            if let Some(inner) = parent.upgrade() {
                CancellationSignal { inner }.unregister(id);
            }
        }
    }
}

/// Shared, idempotent cancellation trigger with an optional deadline
#[derive(Clone)]
pub struct CancellationSignal {
    inner: Arc<SignalInner>,
}

impl fmt::Debug for CancellationSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancellationSignal")
            .field("reason", &self.reason())
            .finish()
    }
}

impl CancellationSignal {
    /// Create a new, active signal
    pub fn new() -> Self {
        Self {
            inner: Arc::new(SignalInner {
                state: AtomicU8::new(ACTIVE),
                notify: Notify::new(),
                listeners: Mutex::new(Listeners::default()),
                deadline: Mutex::new(None),
                parent: Mutex::new(None),
            }),
        }
    }

    /// Create a signal that fires on its own after `duration`
    ///
    /// Must be called from within a tokio runtime.
    pub fn with_timeout(duration: Duration) -> Self {
        let signal = Self::new();
        signal.trigger_after(duration);
        signal
    }

    /// Trigger the signal
    ///
    /// Returns `true` if this call performed the transition and `false` if
    /// the signal had already fired.
    pub fn trigger(&self) -> bool {
        self.trigger_with(CancelReason::Manual)
    }

    fn trigger_with(&self, reason: CancelReason) -> bool {
        if self
            .inner
            .state
            .compare_exchange(ACTIVE, reason.code(), Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        debug!(%reason, "Cancellation signal triggered");

        if let Some(timer) = self.inner.deadline.lock().take() {
            timer.abort();
        }
        self.inner.notify.notify_waiters();

        let listeners = std::mem::take(&mut self.inner.listeners.lock().entries);
        for (_, listener) in listeners {
            listener(reason);
        }

        true
    }

    /// Arm a deadline: the signal fires with [`CancelReason::Deadline`] after `duration`
    ///
    /// A later call replaces the earlier deadline. The timer is released as
    /// soon as the signal fires for any reason, or when the last clone of the
    /// signal is dropped. Must be called from within a tokio runtime.
    pub fn trigger_after(&self, duration: Duration) {
        if self.is_triggered() {
            return;
        }

        let weak: Weak<SignalInner> = Arc::downgrade(&self.inner);
        let timer = tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            if let Some(inner) = weak.upgrade() {
                CancellationSignal { inner }.trigger_with(CancelReason::Deadline);
            }
        });

        if let Some(previous) = self.inner.deadline.lock().replace(timer) {
            previous.abort();
        }

        // Lost a race with trigger(): nobody else will release the new timer.
        if self.is_triggered() {
            if let Some(timer) = self.inner.deadline.lock().take() {
                timer.abort();
            }
        }
    }

    /// Non-blocking observation
    pub fn is_triggered(&self) -> bool {
        self.inner.state.load(Ordering::Acquire) != ACTIVE
    }

    /// Why the signal fired, if it has
    pub fn reason(&self) -> Option<CancelReason> {
        CancelReason::from_code(self.inner.state.load(Ordering::Acquire))
    }

    /// `Err(Canceled)` once the signal has fired
    pub fn check(&self) -> Result<(), Canceled> {
        match self.reason() {
            Some(reason) => Err(Canceled { reason }),
            None => Ok(()),
        }
    }

    /// Register a callback invoked at most once when the signal fires
    ///
    /// If the signal has already fired the callback runs immediately on the
    /// calling thread.
    pub fn register<F>(&self, listener: F) -> ListenerId
    where
        F: FnOnce(CancelReason) + Send + 'static,
    {
        let mut listeners = self.inner.listeners.lock();
        let id = ListenerId(listeners.next_id);
        listeners.next_id += 1;

        match self.reason() {
            Some(reason) => {
                drop(listeners);
                listener(reason);
            }
            None => listeners.entries.push((id, Box::new(listener))),
        }

        id
    }

    /// Remove a listener that has not fired yet
    pub fn unregister(&self, id: ListenerId) -> bool {
        let mut listeners = self.inner.listeners.lock();
        let before = listeners.entries.len();
        listeners.entries.retain(|(entry, _)| *entry != id);
        listeners.entries.len() != before
    }

    /// Wait until the signal fires
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.is_triggered() {
                return;
            }
            notified.await;
        }
    }

    /// A linked signal that fires, with the same reason, whenever this one does
    ///
    /// Triggering the child does not affect the parent. Dropping the last
    /// clone of the child removes its listener from the parent.
    pub fn child(&self) -> CancellationSignal {
        let child = CancellationSignal::new();
        let weak = Arc::downgrade(&child.inner);
        let id = self.register(move |reason| {
            if let Some(inner) = weak.upgrade() {
                CancellationSignal { inner }.trigger_with(reason);
            }
        });
        *child.inner.parent.lock() = Some((Arc::downgrade(&self.inner), id));
        child
    }

    #[cfg(test)]
    fn listener_count(&self) -> usize {
        self.inner.listeners.lock().entries.len()
    }
}

impl Default for CancellationSignal {
    fn default() -> Self {
        Self::new()
    }
}
