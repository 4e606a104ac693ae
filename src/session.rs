//! Session lifecycle
//!
//! A [`Session`] is one traced run: it owns the call tree, the crash-safety
//! guard and (optionally) the signal handlers, and at [`Session::end`] it
//! appends the collected chains to the trace file and frees the tree.
//!
//! # Example
//!
//! ```no_run
//! use chaintrace::config::TraceConfig;
//! use chaintrace::node::FuncId;
//! use chaintrace::session::Session;
//!
//! let mut session = Session::start(TraceConfig::default().with_output("run.trc"))?;
//! session.enter(FuncId(0x401136), FuncId(0));
//! session.exit(FuncId(0x401136), FuncId(0));
//! let report = session.end();
//! assert_eq!(report.chains, 1);
//! # Ok::<(), chaintrace::error::TraceError>(())
//! ```

use crate::collector::{self, CollectStats};
use crate::config::TraceConfig;
use crate::error::{Result, TraceError};
use crate::format::ChainSink;
use crate::guard::MutationGuard;
use crate::node::FuncId;
use crate::signals::{self, SignalHandlers};
use crate::tree::CallTree;
use nix::sys::signal::Signal;
use std::fs::OpenOptions;
use std::io::BufWriter;
use std::sync::Arc;

/// Outcome of [`Session::end`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionReport {
    /// Chains written to the trace file
    pub chains: usize,
    /// Nodes released at teardown, root included
    pub nodes_freed: usize,
    /// Maximum simultaneous call nesting observed
    pub max_call_depth: usize,
    /// Whether the session ended inside an open call
    pub ended_mid_call: bool,
    /// False when the trace file could not be opened or written
    pub written: bool,
    /// Whether recording stopped early on an allocation failure
    pub poisoned: bool,
}

/// One traced run
#[derive(Debug)]
pub struct Session {
    config: TraceConfig,
    tree: CallTree,
    guard: Arc<MutationGuard>,
    handlers: Option<SignalHandlers>,
    poisoned: bool,
    /// Parked requests seen while no handlers were installed
    deferred: Vec<Signal>,
}

impl Session {
    /// Start a session; installs signal handlers if the config asks for them
    ///
    /// Without a flush hook, a termination signal still follows the guard's
    /// policy but writes no trace; see [`Session::start_with_flush`].
    pub fn start(config: TraceConfig) -> Result<Self> {
        Self::start_with_flush(config, None)
    }

    /// Start a session whose signal path calls `flush` to write the trace
    pub fn start_with_flush(config: TraceConfig, flush: Option<fn()>) -> Result<Self> {
        let mut session = Self::open(config)?;
        if session.config.install_signal_handlers {
            session.arm(flush)?;
        }
        Ok(session)
    }

    /// Build the session without touching signal dispositions
    pub(crate) fn open(config: TraceConfig) -> Result<Self> {
        config.validate()?;
        let tree = CallTree::new(config.child_growth)?;
        tracing::debug!(
            output = %config.output.display(),
            encoding = ?config.encoding,
            "trace session started"
        );
        Ok(Self {
            config,
            tree,
            guard: Arc::new(MutationGuard::new()),
            handlers: None,
            poisoned: false,
            deferred: Vec::new(),
        })
    }

    /// Route termination signals through this session's guard
    pub(crate) fn arm(&mut self, flush: Option<fn()>) -> Result<()> {
        self.handlers = Some(SignalHandlers::install(self.guard.clone(), flush)?);
        Ok(())
    }

    /// Function entry; `_caller` is accepted for the hook contract only
    pub fn enter(&mut self, identity: FuncId, _caller: FuncId) {
        if self.poisoned {
            return;
        }
        tracing::trace!(id = %identity, "enter");
        match self.tree.on_enter(identity, &self.guard) {
            Ok(Some(signal)) => self.redeliver(signal),
            Ok(None) => {}
            Err(e) => {
                tracing::error!("recording stopped: {}", e);
                self.poisoned = true;
            }
        }
    }

    /// Function return
    pub fn exit(&mut self, identity: FuncId, _caller: FuncId) {
        if self.poisoned {
            return;
        }
        tracing::trace!(id = %identity, "exit");
        self.tree.on_exit(identity);
    }

    /// Tear down: flush chains to the trace file, then free the tree
    ///
    /// Never fails; a trace file that cannot be opened only costs the trace.
    pub fn end(mut self) -> SessionReport {
        let _shield = self.handlers.take().map(SignalHandlers::teardown);

        let mut report = SessionReport {
            ended_mid_call: self.tree.close_open_call(),
            max_call_depth: self.tree.max_call_depth(),
            poisoned: self.poisoned,
            ..SessionReport::default()
        };

        match self.write_trace() {
            Ok(stats) => {
                report.chains = stats.chains;
                report.written = true;
            }
            Err(e) => tracing::warn!("trace not written: {}", e),
        }

        report.nodes_freed = self.tree.destroy();
        tracing::debug!(
            chains = report.chains,
            nodes = report.nodes_freed,
            "trace session ended"
        );
        report
    }

    /// Collect into an arbitrary sink without ending the session
    pub fn collect_into<S: ChainSink + ?Sized>(&self, sink: &mut S) -> std::io::Result<CollectStats> {
        collector::collect(&self.tree, sink)
    }

    pub fn tree(&self) -> &CallTree {
        &self.tree
    }

    pub fn config(&self) -> &TraceConfig {
        &self.config
    }

    /// Shared guard, as seen by the signal handler
    pub fn guard(&self) -> &Arc<MutationGuard> {
        &self.guard
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// Requests parked during a mutation while no handlers were installed
    pub fn deferred_signals(&self) -> &[Signal] {
        &self.deferred
    }

    fn redeliver(&mut self, signal: Signal) {
        if self.handlers.is_some() {
            tracing::debug!("re-delivering deferred {}", signal);
            if let Err(e) = signals::redeliver(signal) {
                tracing::warn!("could not re-deliver {}: {}", signal, e);
            }
        } else {
            self.deferred.push(signal);
        }
    }

    fn write_trace(&self) -> Result<CollectStats> {
        let path = &self.config.output;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|source| TraceError::Open {
                path: path.clone(),
                source,
            })?;
        let mut sink = self.config.encoding.sink(BufWriter::new(file));
        Ok(collector::collect(&self.tree, &mut sink)?)
    }
}
