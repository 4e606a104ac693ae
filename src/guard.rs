//! Crash-safety guard for tree mutations
//!
//! A termination signal can land between any two instructions of the hook
//! that is growing the tree. The guard marks the narrow window where node and
//! child-list allocation happens; inside it, cooperative requests are parked
//! in a pending slot and fault signals escalate to an immediate abort.
//!
//! The guard only holds atomics, so the signal handler may read and write it
//! while the interrupted thread is inside [`MutationGuard::mutate`].

use nix::sys::signal::Signal;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};

/// How a termination signal should be treated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalClass {
    /// Interrupt/terminate-style request for an orderly shutdown
    Cooperative,
    /// Memory corruption or illegal operation; tree state is suspect
    Fault,
}

/// Signals handled as cooperative shutdown requests
pub const COOPERATIVE_SIGNALS: [Signal; 3] = [Signal::SIGINT, Signal::SIGTERM, Signal::SIGHUP];

/// Signals handled as faults
pub const FAULT_SIGNALS: [Signal; 4] = [
    Signal::SIGSEGV,
    Signal::SIGBUS,
    Signal::SIGILL,
    Signal::SIGFPE,
];

/// Classify a signal; anything not known as a fault is cooperative
pub fn classify(signal: Signal) -> SignalClass {
    if FAULT_SIGNALS.contains(&signal) {
        SignalClass::Fault
    } else {
        SignalClass::Cooperative
    }
}

/// What the signal handler must do right now
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationAction {
    /// Mutation in flight: the request was parked and will be re-delivered
    Defer,
    /// Fault during a mutation: abort without touching the tree
    AbortNow,
    /// Tree is quiescent: flush the trace, then exit or abort per class
    Shutdown(SignalClass),
}

/// Mutation-in-progress flag plus a one-slot pending signal
#[derive(Debug)]
pub struct MutationGuard {
    in_mutation: AtomicBool,
    pending: AtomicI32,
}

impl Default for MutationGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl MutationGuard {
    pub const fn new() -> Self {
        Self {
            in_mutation: AtomicBool::new(false),
            pending: AtomicI32::new(0),
        }
    }

    /// Open the mutation window
    pub fn begin(&self) {
        self.in_mutation.store(true, Ordering::SeqCst);
    }

    /// Close the mutation window and take any request parked during it
    pub fn finish(&self) -> Option<Signal> {
        self.in_mutation.store(false, Ordering::SeqCst);
        let signo = self.pending.swap(0, Ordering::SeqCst);
        if signo == 0 {
            None
        } else {
            Signal::try_from(signo).ok()
        }
    }

    /// Run `f` inside the mutation window
    ///
    /// Returns `f`'s result and the request deferred while it ran, which the
    /// caller must re-deliver.
    pub fn mutate<R>(&self, f: impl FnOnce() -> R) -> (R, Option<Signal>) {
        self.begin();
        let out = f();
        let pending = self.finish();
        (out, pending)
    }

    pub fn is_mutating(&self) -> bool {
        self.in_mutation.load(Ordering::SeqCst)
    }

    /// Request parked but not yet taken by [`finish`](Self::finish)
    pub fn pending(&self) -> Option<Signal> {
        match self.pending.load(Ordering::SeqCst) {
            0 => None,
            signo => Signal::try_from(signo).ok(),
        }
    }

    /// Decide what a termination signal does at this instant
    ///
    /// Called from the signal handler. Only the first request arriving during
    /// one mutation window is kept.
    pub fn on_signal(&self, signal: Signal) -> TerminationAction {
        let class = classify(signal);
        if !self.is_mutating() {
            return TerminationAction::Shutdown(class);
        }
        match class {
            SignalClass::Fault => TerminationAction::AbortNow,
            SignalClass::Cooperative => {
                let _ = self.pending.compare_exchange(
                    0,
                    signal as i32,
                    Ordering::SeqCst,
                    Ordering::SeqCst,
                );
                TerminationAction::Defer
            }
        }
    }
}
