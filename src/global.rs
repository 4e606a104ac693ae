//! Process-wide session behind the instrumentation hooks
//!
//! The hooks carry no context argument, so the active [`Session`] lives
//! behind an atomic pointer. Whoever swaps it out owns the teardown: the
//! normal `session_end` path and the signal flush path race for the same
//! swap, and exactly one of them wins.
//!
//! Events are only recorded on the thread that started the session; other
//! threads would need a tree of their own.

use crate::config::TraceConfig;
use crate::node::FuncId;
use crate::session::{Session, SessionReport};
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicUsize, Ordering};

static ACTIVE: AtomicPtr<Session> = AtomicPtr::new(ptr::null_mut());
static OWNER_THREAD: AtomicUsize = AtomicUsize::new(0);
/// Set while a hook is running on the owner thread
static IN_HOOK: AtomicBool = AtomicBool::new(false);

fn this_thread() -> usize {
    // SAFETY: pthread_self has no preconditions
    unsafe { libc::pthread_self() as usize }
}

/// Start the process-wide session from environment configuration
///
/// A broken configuration falls back to defaults rather than failing the
/// host program.
pub fn session_start() -> bool {
    let config = TraceConfig::from_env().unwrap_or_else(|e| {
        eprintln!("chaintrace: {}; using defaults", e);
        TraceConfig::default()
    });
    session_start_with(config)
}

/// Start the process-wide session; returns false if one is already running
/// or setup failed
pub fn session_start_with(config: TraceConfig) -> bool {
    crate::logging::init(config.verbose, tracing::Level::DEBUG);
    if !ACTIVE.load(Ordering::SeqCst).is_null() {
        tracing::warn!("trace session already active");
        return false;
    }
    let session = match Session::open(config) {
        Ok(session) => Box::new(session),
        Err(e) => {
            tracing::error!("trace session not started: {}", e);
            return false;
        }
    };
    let arm = session.config().install_signal_handlers;
    OWNER_THREAD.store(this_thread(), Ordering::SeqCst);
    let raw = Box::into_raw(session);
    if ACTIVE
        .compare_exchange(ptr::null_mut(), raw, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        // SAFETY: `raw` was never published
        drop(unsafe { Box::from_raw(raw) });
        return false;
    }

    // Handlers go in only once the flush hook can reach the session
    if arm {
        IN_HOOK.store(true, Ordering::SeqCst);
        // SAFETY: published above and only touched by this thread until the
        // hooks see IN_HOOK cleared
        let armed = unsafe { &mut *raw }.arm(Some(flush_from_signal));
        IN_HOOK.store(false, Ordering::SeqCst);
        if let Err(e) = armed {
            tracing::error!("trace session not started: {}", e);
            drop(take_active());
            return false;
        }
    }
    true
}

/// End the process-wide session and write its trace
pub fn session_end() -> Option<SessionReport> {
    take_active().map(|session| (*session).end())
}

/// Whether a process-wide session is recording
pub fn is_active() -> bool {
    !ACTIVE.load(Ordering::SeqCst).is_null()
}

/// Enter hook
pub fn on_enter(identity: FuncId, caller: FuncId) {
    with_active(|session| session.enter(identity, caller));
}

/// Exit hook
pub fn on_exit(identity: FuncId, caller: FuncId) {
    with_active(|session| session.exit(identity, caller));
}

fn with_active(f: impl FnOnce(&mut Session)) {
    let session = ACTIVE.load(Ordering::SeqCst);
    if session.is_null() || OWNER_THREAD.load(Ordering::Relaxed) != this_thread() {
        return;
    }
    // Anything the engine calls may itself be instrumented
    if IN_HOOK.swap(true, Ordering::SeqCst) {
        return;
    }
    // SAFETY: only the owner thread dereferences the session outside of
    // teardown, and teardown swaps the pointer out first
    f(unsafe { &mut *session });
    IN_HOOK.store(false, Ordering::SeqCst);
}

fn take_active() -> Option<Box<Session>> {
    let raw = ACTIVE.swap(ptr::null_mut(), Ordering::SeqCst);
    if raw.is_null() {
        None
    } else {
        // SAFETY: produced by Box::into_raw in session_start_with and
        // removed from ACTIVE by this swap
        Some(unsafe { Box::from_raw(raw) })
    }
}

fn flush_from_signal() {
    if let Some(session) = take_active() {
        (*session).end();
    }
}
