use anyhow::{Context, Result};
use chaintrace::cli::{Cli, Command};
use chaintrace::config::TraceConfig;
use chaintrace::format::{Encoding, TraceSession, TEXT_QUIT_MARKER, TEXT_SEPARATOR, TEXT_START_MARKER};
use chaintrace::graph::CallGraph;
use chaintrace::{logging, replay};
use clap::Parser;
use std::path::Path;

fn read_trace(path: &Path, format: Encoding) -> Result<Vec<TraceSession>> {
    let bytes =
        std::fs::read(path).with_context(|| format!("Failed to read trace file: {}", path.display()))?;
    format
        .decode(&bytes)
        .with_context(|| format!("Failed to decode {} as {:?}", path.display(), format))
}

fn print_sessions(sessions: &[TraceSession]) {
    for session in sessions {
        println!("{}", TEXT_START_MARKER);
        for chain in &session.chains {
            let line: Vec<String> = chain.iter().map(|id| id.to_string()).collect();
            println!("{}", line.join(TEXT_SEPARATOR));
        }
        if session.complete {
            println!("{}", TEXT_QUIT_MARKER);
        }
    }
}

fn main() -> Result<()> {
    let args = Cli::parse();
    logging::init(args.debug, tracing::Level::TRACE);

    match args.command {
        Command::Replay {
            log,
            output,
            format,
        } => {
            let output = output.unwrap_or_else(|| format.default_file_name().into());
            let config = TraceConfig::default()
                .with_encoding(format)
                .with_output(&output);
            let reports = replay::replay_file(&log, &config)?;
            let chains: usize = reports.iter().map(|r| r.chains).sum();
            eprintln!(
                "[chaintrace: replayed {} run(s), {} chain(s) -> {}]",
                reports.len(),
                chains,
                output.display()
            );
        }
        Command::Decode {
            trace,
            format,
            json,
        } => {
            let sessions = read_trace(&trace, format)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&sessions)?);
            } else {
                print_sessions(&sessions);
            }
        }
        Command::Graph { trace, format } => {
            let sessions = read_trace(&trace, format)?;
            let graph = CallGraph::from_sessions(&sessions);
            println!("{}", graph.to_json()?);
        }
    }

    Ok(())
}
