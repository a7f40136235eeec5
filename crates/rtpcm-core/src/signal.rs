//! Single-waiter completion signal.
//!
//! The raising side is a cloneable [`CompletionSignal`] that the interrupt
//! path can use; the waiting side is a unique [`SignalWaiter`] owned by the
//! consumer thread. Raises are edges: several raises before the next wait
//! collapse into one pending wake. Counting missed periods is the tracker's
//! job, not the signal's.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam::sync::{Parker, Unparker};

const IDLE: u8 = 0;
const PENDING: u8 = 1;
const DESTROYED: u8 = 2;
// The waiter is inside (or about to enter) `park`.
const PARKED: u8 = 3;

/// Outcome of a wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitResult {
    /// A raise happened since the previous successful wait.
    Ready,
    /// The signal was torn down; the consumer loop must exit.
    Destroyed,
}

/// Raising side of the signal.
///
/// `raise` moves an idle or parked signal to pending and unparks the waiter
/// if it was parked. It never allocates and never takes a lock.
#[derive(Clone)]
pub struct CompletionSignal {
    state: Arc<AtomicU8>,
    unparker: Unparker,
}

impl CompletionSignal {
    /// Creates a signal and its only waiter.
    pub fn new() -> (CompletionSignal, SignalWaiter) {
        let state = Arc::new(AtomicU8::new(IDLE));
        let parker = Parker::new();
        let signal = CompletionSignal {
            state: Arc::clone(&state),
            unparker: parker.unparker().clone(),
        };
        (signal, SignalWaiter { state, parker })
    }

    #[inline]
    pub fn raise(&self) {
        let previous = self
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |state| {
                matches!(state, IDLE | PARKED).then_some(PENDING)
            });
        if previous == Ok(PARKED) {
            self.unparker.unpark();
        }
    }

    /// Releases a blocked waiter with [`WaitResult::Destroyed`] and makes
    /// every later wait return it immediately. Idempotent.
    pub fn destroy(&self) {
        if self.state.swap(DESTROYED, Ordering::AcqRel) != DESTROYED {
            self.unparker.unpark();
        }
    }

    #[inline]
    pub fn is_destroyed(&self) -> bool {
        self.state.load(Ordering::Acquire) == DESTROYED
    }

    #[inline]
    pub fn is_pending(&self) -> bool {
        self.state.load(Ordering::Acquire) == PENDING
    }

    /// Whether the waiter is blocked with nothing pending. Once no more
    /// raises can arrive, a parked waiter stays parked until destroyed.
    #[inline]
    pub fn is_waiter_parked(&self) -> bool {
        self.state.load(Ordering::Acquire) == PARKED
    }
}

impl std::fmt::Debug for CompletionSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionSignal")
            .field("state", &self.state.load(Ordering::Relaxed))
            .finish()
    }
}

/// Waiting side of the signal. Not `Clone` and not `Sync`, so there is never
/// more than one thread blocked on it.
pub struct SignalWaiter {
    state: Arc<AtomicU8>,
    parker: Parker,
}

impl SignalWaiter {
    /// Blocks until the next raise or until the signal is destroyed.
    pub fn wait(&mut self) -> WaitResult {
        loop {
            if let Some(result) = self.try_wait() {
                return result;
            }
            if self.enter_park() {
                self.parker.park();
                self.leave_park();
            }
        }
    }

    /// Like [`wait`](Self::wait) but gives up after `timeout`.
    pub fn wait_timeout(&mut self, timeout: Duration) -> Option<WaitResult> {
        let deadline = std::time::Instant::now() + timeout;
        loop {
            if let Some(result) = self.try_wait() {
                return Some(result);
            }
            let now = std::time::Instant::now();
            if now >= deadline {
                return None;
            }
            if self.enter_park() {
                self.parker.park_timeout(deadline - now);
                self.leave_park();
            }
        }
    }

    // A failed transition means a raise or destroy got in first; the caller
    // loops back to `try_wait`.
    fn enter_park(&self) -> bool {
        self.state
            .compare_exchange(IDLE, PARKED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn leave_park(&self) {
        let _ = self
            .state
            .compare_exchange(PARKED, IDLE, Ordering::AcqRel, Ordering::Acquire);
    }

    /// Consumes a pending raise without blocking.
    pub fn try_wait(&mut self) -> Option<WaitResult> {
        match self
            .state
            .compare_exchange(PENDING, IDLE, Ordering::Acquire, Ordering::Acquire)
        {
            Ok(_) => Some(WaitResult::Ready),
            Err(DESTROYED) => Some(WaitResult::Destroyed),
            Err(_) => None,
        }
    }
}

impl std::fmt::Debug for SignalWaiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalWaiter")
            .field("state", &self.state.load(Ordering::Relaxed))
            .finish()
    }
}
