//! CLI argument parsing for the chaintrace tooling

use crate::format::Encoding;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "chaintrace")]
#[command(version)]
#[command(about = "Replay, decode and graph call-chain trace files", long_about = None)]
pub struct Cli {
    /// Enable debug tracing output to stderr
    #[arg(long = "debug", global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Rebuild a chain trace from an E/L event log
    Replay {
        /// Event log written by an event-per-line collector
        #[arg(value_name = "LOG")]
        log: PathBuf,

        /// Trace file to append to (defaults to the encoding's file name)
        #[arg(short = 'o', long = "output", value_name = "FILE")]
        output: Option<PathBuf>,

        /// Encoding of the written trace
        #[arg(long = "format", value_enum, default_value_t = Encoding::default())]
        format: Encoding,
    },

    /// Print the chains of a trace file
    Decode {
        #[arg(value_name = "TRACE")]
        trace: PathBuf,

        /// Encoding of the trace file
        #[arg(long = "format", value_enum, default_value_t = Encoding::default())]
        format: Encoding,

        /// Print sessions as JSON instead of text
        #[arg(long = "json")]
        json: bool,
    },

    /// Aggregate a trace file into a caller→callee graph (JSON)
    Graph {
        #[arg(value_name = "TRACE")]
        trace: PathBuf,

        /// Encoding of the trace file
        #[arg(long = "format", value_enum, default_value_t = Encoding::default())]
        format: Encoding,
    },
}
