// End-to-end scenarios: events in, trace file out, trace file parsed back

use chaintrace::config::TraceConfig;
use chaintrace::format::{decode_binary, decode_text, Encoding, TraceSession};
use chaintrace::node::FuncId;
use chaintrace::replay::TraceEvent::{self, Enter, Exit};
use chaintrace::session::{Session, SessionReport};
use nix::sys::signal::Signal;
use std::path::PathBuf;

fn id(raw: usize) -> FuncId {
    FuncId(raw)
}

fn chain(raw: &[usize]) -> Vec<FuncId> {
    raw.iter().copied().map(FuncId).collect()
}

struct Run {
    _dir: tempfile::TempDir,
    path: PathBuf,
    encoding: Encoding,
}

impl Run {
    fn new(encoding: Encoding) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trace.out");
        Self {
            _dir: dir,
            path,
            encoding,
        }
    }

    fn config(&self) -> TraceConfig {
        TraceConfig::default()
            .with_output(&self.path)
            .with_encoding(self.encoding)
            .with_signal_handlers(false)
    }

    fn session(&self, events: &[TraceEvent]) -> SessionReport {
        let mut session = Session::start(self.config()).unwrap();
        for &event in events {
            event.apply(&mut session);
        }
        session.end()
    }

    fn sessions(&self) -> Vec<TraceSession> {
        let bytes = std::fs::read(&self.path).unwrap();
        match self.encoding {
            Encoding::Text => decode_text(&String::from_utf8(bytes).unwrap()).unwrap(),
            Encoding::Binary => decode_binary(&bytes).unwrap(),
        }
    }

    fn text(&self) -> String {
        std::fs::read_to_string(&self.path).unwrap()
    }
}

#[test]
fn test_scenario_single_call() {
    let run = Run::new(Encoding::Text);
    let report = run.session(&[Enter(id(0x1)), Exit(id(0x1))]);
    assert_eq!(report.chains, 1);
    assert_eq!(run.text(), "## START PROGRAM\n0x1\n## QUIT PROGRAM\n");
}

#[test]
fn test_scenario_nested_call() {
    let run = Run::new(Encoding::Text);
    run.session(&[Enter(id(0x1)), Enter(id(0x2)), Exit(id(0x2)), Exit(id(0x1))]);
    assert_eq!(run.text(), "## START PROGRAM\n0x1-->0x2\n## QUIT PROGRAM\n");
}

#[test]
fn test_scenario_two_siblings() {
    let run = Run::new(Encoding::Text);
    run.session(&[
        Enter(id(0x1)),
        Enter(id(0x2)),
        Exit(id(0x2)),
        Enter(id(0x3)),
        Exit(id(0x3)),
        Exit(id(0x1)),
    ]);
    assert_eq!(
        run.text(),
        "## START PROGRAM\n0x1-->0x2\n0x1-->0x3\n## QUIT PROGRAM\n"
    );
}

#[test]
fn test_scenario_session_ends_mid_call() {
    let run = Run::new(Encoding::Text);
    let report = run.session(&[Enter(id(0x1)), Enter(id(0x2)), Exit(id(0x2)), Enter(id(0x3))]);
    assert!(report.ended_mid_call);

    let sessions = run.sessions();
    assert_eq!(sessions[0].chains, vec![chain(&[1, 2]), chain(&[1, 3])]);
    assert!(sessions[0].complete);
}

#[test]
fn test_scenario_open_internal_node_forced_terminal() {
    // 0x1 is still running when the session ends, after its child returned
    let run = Run::new(Encoding::Text);
    run.session(&[Enter(id(0x1)), Enter(id(0x2)), Exit(id(0x2))]);
    assert_eq!(run.sessions()[0].chains, vec![chain(&[1]), chain(&[1, 2])]);
}

#[test]
fn test_scenario_cooperative_signal_during_growth() {
    let run = Run::new(Encoding::Text);
    let mut session = Session::start(run.config()).unwrap();
    session.enter(id(0x1), id(0));

    // The request lands while the next child allocation is in flight
    let guard = session.guard().clone();
    guard.begin();
    assert_eq!(
        guard.on_signal(Signal::SIGTERM),
        chaintrace::guard::TerminationAction::Defer
    );
    session.enter(id(0x2), id(0));
    assert_eq!(session.deferred_signals(), &[Signal::SIGTERM]);
    assert!(!guard.is_mutating());

    // Acting on it now: full shutdown of a quiescent tree
    assert_eq!(
        guard.on_signal(Signal::SIGTERM),
        chaintrace::guard::TerminationAction::Shutdown(chaintrace::guard::SignalClass::Cooperative)
    );
    let report = session.end();
    assert!(report.written);

    let text = run.text();
    assert!(text.starts_with("## START PROGRAM\n"));
    assert!(text.ends_with("## QUIT PROGRAM\n"));
    let sessions = run.sessions();
    assert_eq!(sessions.len(), 1);
    assert!(sessions[0].complete);
    assert_eq!(sessions[0].chains, vec![chain(&[1, 2])]);
}

#[test]
fn test_repeated_call_from_same_context_is_one_node() {
    let run = Run::new(Encoding::Text);
    let report = run.session(&[
        Enter(id(0x1)),
        Enter(id(0x9)),
        Exit(id(0x9)),
        Enter(id(0x9)),
        Exit(id(0x9)),
        Exit(id(0x1)),
    ]);
    assert_eq!(report.chains, 1);
    // root, 0x1, 0x9
    assert_eq!(report.nodes_freed, 3);
}

#[test]
fn test_self_recursion_is_linear() {
    let run = Run::new(Encoding::Text);
    let report = run.session(&[
        Enter(id(0xa)),
        Enter(id(0xa)),
        Enter(id(0xa)),
        Exit(id(0xa)),
        Exit(id(0xa)),
        Exit(id(0xa)),
    ]);
    assert_eq!(report.nodes_freed, 4);
    assert_eq!(report.max_call_depth, 3);
    assert_eq!(run.sessions()[0].chains, vec![chain(&[0xa, 0xa, 0xa])]);
}

#[test]
fn test_binary_trace_scenario() {
    let run = Run::new(Encoding::Binary);
    run.session(&[
        Enter(id(0x401000)),
        Enter(id(0x401100)),
        Exit(id(0x401100)),
        Enter(id(0x401200)),
        Exit(id(0x401200)),
        Exit(id(0x401000)),
    ]);
    run.session(&[Enter(id(0x401300)), Exit(id(0x401300))]);

    let bytes = std::fs::read(&run.path).unwrap();
    let words: Vec<usize> = bytes
        .chunks_exact(std::mem::size_of::<usize>())
        .map(|w| usize::from_ne_bytes(w.try_into().unwrap()))
        .collect();
    assert_eq!(
        words,
        vec![
            1, 0x401000, 0x401100, 0, 0x401000, 0x401200, 0, 2,
            1, 0x401300, 0, 2,
        ]
    );

    let sessions = run.sessions();
    assert_eq!(sessions.len(), 2);
    assert!(sessions.iter().all(|s| s.complete));
}

#[test]
fn test_empty_session_still_framed() {
    let run = Run::new(Encoding::Text);
    let report = run.session(&[]);
    assert_eq!(report.chains, 0);
    assert_eq!(run.text(), "## START PROGRAM\n## QUIT PROGRAM\n");
}
