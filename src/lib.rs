//! chaintrace - always-on call-chain trace collector
//!
//! This library records every distinct call chain a program executes. The
//! host's enter/exit instrumentation drives a deduplicating call tree; at
//! program end (or on a termination signal) the tree's leaf chains are
//! appended to a trace file in a text or compact binary encoding.
//!
//! Build with the `cyg-profile` feature and link the static library into a
//! host compiled with `-finstrument-functions` to trace it without code
//! changes.

pub mod cli;
pub mod collector;
pub mod config;
pub mod error;
pub mod format;
pub mod global;
pub mod graph;
pub mod guard;
#[cfg(feature = "cyg-profile")]
pub mod instrument;
pub mod logging;
pub mod node;
pub mod replay;
pub mod session;
pub mod signals;
pub mod tree;
