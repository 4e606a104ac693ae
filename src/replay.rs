//! Event-log replay
//!
//! Older collectors wrote every event instead of a chain tree:
//!
//! ```text
//! START PROGRAM
//! E0x401136
//! E0x401156
//! L0x401156
//! L0x401136
//! QUIT PROGRAM
//! ```
//!
//! Replaying such a log through a [`Session`] yields the same chain trace the
//! in-process collector would have written for that run.

use crate::config::TraceConfig;
use crate::format::parse_identity;
use crate::node::FuncId;
use crate::session::{Session, SessionReport};
use anyhow::{bail, Context, Result};
use std::fs;
use std::path::Path;

const LOG_START: &str = "START PROGRAM";
const LOG_QUIT: &str = "QUIT PROGRAM";

/// One enter or exit event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceEvent {
    Enter(FuncId),
    Exit(FuncId),
}

impl TraceEvent {
    /// Feed this event to a session
    pub fn apply(self, session: &mut Session) {
        match self {
            TraceEvent::Enter(id) => session.enter(id, FuncId(0)),
            TraceEvent::Exit(id) => session.exit(id, FuncId(0)),
        }
    }
}

/// Events of one `START PROGRAM` block
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventBlock {
    pub events: Vec<TraceEvent>,
    /// False when the log ends before `QUIT PROGRAM`
    pub closed: bool,
}

/// Parse an event log into per-run blocks
pub fn parse_event_log(input: &str) -> Result<Vec<EventBlock>> {
    let mut blocks = Vec::new();
    let mut open: Option<EventBlock> = None;

    for (idx, raw) in input.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        if line == LOG_START {
            // A run killed before its destructor leaves no QUIT line
            if let Some(block) = open.take() {
                blocks.push(block);
            }
            open = Some(EventBlock::default());
            continue;
        }
        if line == LOG_QUIT {
            if let Some(mut block) = open.take() {
                block.closed = true;
                blocks.push(block);
            }
            continue;
        }

        let Some(block) = open.as_mut() else {
            bail!("line {}: event outside a START PROGRAM block", line_no);
        };
        let mut chars = line.chars();
        let kind = chars.next().unwrap_or_default();
        let rest = chars.as_str();
        let identity = parse_pointer(rest)
            .with_context(|| format!("line {}: invalid function address '{}'", line_no, rest))?;
        let event = match kind {
            'E' => TraceEvent::Enter(identity),
            'L' => TraceEvent::Exit(identity),
            other => bail!("line {}: unknown event kind '{}'", line_no, other),
        };
        block.events.push(event);
    }

    if let Some(block) = open {
        blocks.push(block);
    }
    Ok(blocks)
}

fn parse_pointer(token: &str) -> Option<FuncId> {
    // glibc prints null pointers as "(nil)"
    if token == "(nil)" {
        return Some(FuncId(0));
    }
    parse_identity(token)
}

/// Run each block through its own session, appending to `config.output`
pub fn replay_blocks(blocks: &[EventBlock], config: &TraceConfig) -> Result<Vec<SessionReport>> {
    let config = config.clone().with_signal_handlers(false);
    let mut reports = Vec::with_capacity(blocks.len());
    for (i, block) in blocks.iter().enumerate() {
        let mut session = Session::start(config.clone())
            .with_context(|| format!("Failed to start session for run {}", i + 1))?;
        for event in &block.events {
            event.apply(&mut session);
        }
        let report = session.end();
        if !report.written {
            bail!(
                "Failed to write trace for run {} to {}",
                i + 1,
                config.output.display()
            );
        }
        tracing::debug!(run = i + 1, chains = report.chains, "replayed");
        reports.push(report);
    }
    Ok(reports)
}

/// Parse and replay an event log file
pub fn replay_file<P: AsRef<Path>>(log: P, config: &TraceConfig) -> Result<Vec<SessionReport>> {
    let content = fs::read_to_string(log.as_ref())
        .with_context(|| format!("Failed to read event log: {}", log.as_ref().display()))?;
    let blocks = parse_event_log(&content)?;
    replay_blocks(&blocks, config)
}
