//! Error types for the call-chain engine
//!
//! Nothing in here ever crosses the enter/exit hook boundary: the hooks log
//! and swallow these, so the host program is unaffected by tracing failures.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the tree engine and session lifecycle
#[derive(Error, Debug)]
pub enum TraceError {
    /// Node arena or a child list could not grow
    #[error("Allocation failed while growing the call tree ({what})")]
    Exhausted { what: &'static str },

    #[error("Trace file could not be opened: {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Signal setup failed: {0}")]
    Signal(#[from] nix::errno::Errno),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, TraceError>;

/// Errors raised while reading a trace file back
#[derive(Error, Debug, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Line {line}: chain found outside a session")]
    ChainOutsideSession { line: usize },

    #[error("Line {line}: invalid identity '{token}'")]
    InvalidIdentity { line: usize, token: String },

    #[error("Binary trace length {0} is not a multiple of the word size")]
    TruncatedWord(usize),

    #[error("Word {offset}: identity found outside a session")]
    WordOutsideSession { offset: usize },
}
