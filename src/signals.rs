//! Process signal handlers for the crash-safety guard
//!
//! The handler reaches the active guard and the flush hook through two
//! process-wide atomic pointers, so it never touches a lock or the session
//! object the interrupted thread may be holding. Only one guard is active at
//! a time; installing again replaces the previous one, and releasing a
//! replaced set of handlers leaves the newer one armed.
//!
//! Flushing the trace from inside a handler is not async-signal-safe in the
//! strict sense (it allocates and writes a file). It only ever happens when
//! no tree mutation is in flight, and the process exits right after.

use crate::error::Result;
use crate::guard::{MutationGuard, SignalClass, TerminationAction, COOPERATIVE_SIGNALS, FAULT_SIGNALS};
use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};
use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};
use std::sync::Arc;

static ACTIVE_GUARD: AtomicPtr<MutationGuard> = AtomicPtr::new(ptr::null_mut());
static FLUSH_HOOK: AtomicPtr<()> = AtomicPtr::new(ptr::null_mut());

/// Every signal the guard takes over
pub fn handled_signals() -> impl Iterator<Item = Signal> {
    COOPERATIVE_SIGNALS.into_iter().chain(FAULT_SIGNALS)
}

/// Installed termination handlers; restores default dispositions on drop
#[derive(Debug)]
pub struct SignalHandlers {
    installed: Vec<Signal>,
    // Keeps the guard alive while the handler may dereference it
    _guard: Arc<MutationGuard>,
}

impl SignalHandlers {
    /// Route termination signals through `guard`
    ///
    /// `flush` runs at most once, from the handler, when a signal arrives
    /// while the tree is quiescent.
    pub fn install(guard: Arc<MutationGuard>, flush: Option<fn()>) -> Result<Self> {
        ACTIVE_GUARD.store(Arc::as_ptr(&guard) as *mut MutationGuard, Ordering::SeqCst);
        FLUSH_HOOK.store(
            flush.map_or(ptr::null_mut(), |f| f as *mut ()),
            Ordering::SeqCst,
        );

        let action = SigAction::new(
            SigHandler::Handler(handle_termination),
            SaFlags::SA_RESTART,
            SigSet::empty(),
        );
        let mut handlers = Self {
            installed: Vec::new(),
            _guard: guard,
        };
        for sig in handled_signals() {
            // SAFETY: handle_termination only touches atomics until it decides
            // to flush and terminate the process
            unsafe { signal::sigaction(sig, &action) }?;
            handlers.installed.push(sig);
        }
        tracing::debug!(signals = handlers.installed.len(), "termination handlers installed");
        Ok(handlers)
    }

    /// Start teardown: default dispositions everywhere, except SIGTERM which
    /// is ignored until the returned shield drops
    pub fn teardown(mut self) -> TeardownShield {
        let shield_term = self.installed.contains(&Signal::SIGTERM);
        let owned = self.release(shield_term);
        TeardownShield {
            active: shield_term && owned,
        }
    }

    pub fn signals(&self) -> &[Signal] {
        &self.installed
    }

    /// Disarm the handlers if this guard is still the active one; returns
    /// whether it was
    fn release(&mut self, ignore_term: bool) -> bool {
        let ours = Arc::as_ptr(&self._guard) as *mut MutationGuard;
        let owned = ACTIVE_GUARD
            .compare_exchange(ours, ptr::null_mut(), Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();
        if !owned {
            tracing::debug!("termination handlers superseded; leaving dispositions in place");
            self.installed.clear();
            return false;
        }
        FLUSH_HOOK.store(ptr::null_mut(), Ordering::SeqCst);
        for sig in self.installed.drain(..) {
            let handler = if ignore_term && sig == Signal::SIGTERM {
                SigHandler::SigIgn
            } else {
                SigHandler::SigDfl
            };
            set_disposition(sig, handler);
        }
        true
    }
}

impl Drop for SignalHandlers {
    fn drop(&mut self) {
        if !self.installed.is_empty() {
            self.release(false);
        }
    }
}

/// Ignores duplicate SIGTERMs while the trace is being written
#[derive(Debug)]
pub struct TeardownShield {
    active: bool,
}

impl Drop for TeardownShield {
    fn drop(&mut self) {
        if self.active {
            set_disposition(Signal::SIGTERM, SigHandler::SigDfl);
        }
    }
}

/// Deliver a request that was parked during a mutation
pub fn redeliver(signal: Signal) -> Result<()> {
    signal::raise(signal)?;
    Ok(())
}

fn set_disposition(sig: Signal, handler: SigHandler) {
    let action = SigAction::new(handler, SaFlags::empty(), SigSet::empty());
    // SAFETY: default and ignore dispositions carry no handler code
    if let Err(e) = unsafe { signal::sigaction(sig, &action) } {
        tracing::warn!("failed to restore disposition of {}: {}", sig, e);
    }
}

fn abort_process() -> ! {
    set_disposition(Signal::SIGABRT, SigHandler::SigDfl);
    std::process::abort()
}

extern "C" fn handle_termination(signo: libc::c_int) {
    let Ok(signal) = Signal::try_from(signo) else {
        return;
    };
    let guard = ACTIVE_GUARD.load(Ordering::SeqCst);
    if guard.is_null() {
        return;
    }
    // SAFETY: cleared before SignalHandlers drops its Arc
    let action = unsafe { &*guard }.on_signal(signal);

    match action {
        TerminationAction::Defer => {}
        TerminationAction::AbortNow => abort_process(),
        TerminationAction::Shutdown(class) => {
            let hook = FLUSH_HOOK.swap(ptr::null_mut(), Ordering::SeqCst);
            if !hook.is_null() {
                // SAFETY: only ever stored from a `fn()` in `install`
                let flush: fn() = unsafe { std::mem::transmute::<*mut (), fn()>(hook) };
                flush();
            }
            match class {
                // SAFETY: _exit is async-signal-safe
                SignalClass::Cooperative => unsafe { libc::_exit(128 + signo) },
                SignalClass::Fault => abort_process(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn current_handler(sig: Signal) -> SigHandler {
        let probe = SigAction::new(SigHandler::SigDfl, SaFlags::empty(), SigSet::empty());
        // Swap in a probe to read the disposition, then put it back
        let old = unsafe { signal::sigaction(sig, &probe) }.unwrap();
        unsafe { signal::sigaction(sig, &old) }.unwrap();
        old.handler()
    }

    #[test]
    fn test_handled_signal_set() {
        let all: Vec<Signal> = handled_signals().collect();
        assert!(all.contains(&Signal::SIGTERM));
        assert!(all.contains(&Signal::SIGSEGV));
        assert!(!all.contains(&Signal::SIGABRT));
    }

    #[test]
    #[serial]
    fn test_install_and_teardown_dispositions() {
        let guard = Arc::new(MutationGuard::new());
        let handlers = SignalHandlers::install(guard, None).unwrap();
        assert_eq!(handlers.signals().len(), 7);
        assert!(matches!(
            current_handler(Signal::SIGINT),
            SigHandler::Handler(_)
        ));

        let shield = handlers.teardown();
        assert_eq!(current_handler(Signal::SIGTERM), SigHandler::SigIgn);
        assert_eq!(current_handler(Signal::SIGINT), SigHandler::SigDfl);
        drop(shield);
        assert_eq!(current_handler(Signal::SIGTERM), SigHandler::SigDfl);
    }

    #[test]
    #[serial]
    fn test_drop_restores_defaults() {
        let guard = Arc::new(MutationGuard::new());
        {
            let _handlers = SignalHandlers::install(guard, None).unwrap();
        }
        assert_eq!(current_handler(Signal::SIGHUP), SigHandler::SigDfl);
        assert!(ACTIVE_GUARD.load(Ordering::SeqCst).is_null());
    }

    #[test]
    #[serial]
    fn test_dropping_replaced_handlers_keeps_newer_armed() {
        let first = Arc::new(MutationGuard::new());
        let second = Arc::new(MutationGuard::new());
        let old = SignalHandlers::install(first, None).unwrap();
        let new = SignalHandlers::install(second.clone(), None).unwrap();

        drop(old);
        assert_eq!(
            ACTIVE_GUARD.load(Ordering::SeqCst),
            Arc::as_ptr(&second) as *mut MutationGuard
        );
        assert!(matches!(
            current_handler(Signal::SIGTERM),
            SigHandler::Handler(_)
        ));

        // The newer guard still parks requests
        second.begin();
        signal::raise(Signal::SIGTERM).unwrap();
        assert_eq!(second.finish(), Some(Signal::SIGTERM));

        drop(new);
        assert!(ACTIVE_GUARD.load(Ordering::SeqCst).is_null());
        assert_eq!(current_handler(Signal::SIGTERM), SigHandler::SigDfl);
    }

    #[test]
    #[serial]
    fn test_teardown_of_replaced_handlers_has_no_shield() {
        let old = SignalHandlers::install(Arc::new(MutationGuard::new()), None).unwrap();
        let new = SignalHandlers::install(Arc::new(MutationGuard::new()), None).unwrap();

        let shield = old.teardown();
        assert!(!shield.active);
        assert!(matches!(
            current_handler(Signal::SIGTERM),
            SigHandler::Handler(_)
        ));
        drop(shield);
        drop(new);
        assert_eq!(current_handler(Signal::SIGTERM), SigHandler::SigDfl);
    }

    #[test]
    #[serial]
    fn test_signal_during_mutation_is_parked_not_acted_on() {
        let guard = Arc::new(MutationGuard::new());
        let handlers = SignalHandlers::install(guard.clone(), None).unwrap();

        guard.begin();
        // Synchronous delivery to this thread: the handler runs before
        // raise() returns and must park the request
        signal::raise(Signal::SIGTERM).unwrap();
        assert_eq!(guard.pending(), Some(Signal::SIGTERM));
        assert_eq!(guard.finish(), Some(Signal::SIGTERM));

        drop(handlers);
    }
}
