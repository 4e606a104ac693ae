//! Trace file encodings
//!
//! Text, one chain per line:
//!
//! ```text
//! ## START PROGRAM
//! 0x401136-->0x401156
//! 0x401136-->0x40117a
//! ## QUIT PROGRAM
//! ```
//!
//! Binary, native-endian `usize` words: `1` opens a session, `2` closes it,
//! `0` ends each chain. There is no length prefix; readers scan for the
//! sentinels. An identity equal to one of the sentinel values cannot be told
//! apart from it.

use crate::error::DecodeError;
use crate::node::FuncId;
use serde::{Deserialize, Serialize};
use std::io::{self, Write};

pub const TEXT_START_MARKER: &str = "## START PROGRAM";
pub const TEXT_QUIT_MARKER: &str = "## QUIT PROGRAM";
pub const TEXT_SEPARATOR: &str = "-->";

pub const BINARY_CHAIN_END: usize = 0;
pub const BINARY_START_MARKER: usize = 1;
pub const BINARY_QUIT_MARKER: usize = 2;

const WORD: usize = std::mem::size_of::<usize>();

/// Wire format of a trace file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    /// One `-->`-separated hex chain per line
    #[serde(alias = "txt")]
    #[value(alias = "txt")]
    Text,
    /// Sentinel-delimited native-endian words
    #[serde(alias = "bin")]
    #[value(alias = "bin")]
    Binary,
}

impl Default for Encoding {
    fn default() -> Self {
        if cfg!(feature = "binary-trace") {
            Encoding::Binary
        } else {
            Encoding::Text
        }
    }
}

impl Encoding {
    /// Conventional file name for traces in this encoding
    pub fn default_file_name(self) -> &'static str {
        match self {
            Encoding::Text => "tracer.trc",
            Encoding::Binary => "tracer.bchains",
        }
    }

    /// Build a sink writing this encoding to `out`
    pub fn sink<W: Write + 'static>(self, out: W) -> Box<dyn ChainSink> {
        match self {
            Encoding::Text => Box::new(TextSink::new(out)),
            Encoding::Binary => Box::new(BinarySink::new(out)),
        }
    }

    /// Parse a whole trace file in this encoding
    pub fn decode(self, bytes: &[u8]) -> Result<Vec<TraceSession>, DecodeError> {
        match self {
            Encoding::Text => decode_text(&String::from_utf8_lossy(bytes)),
            Encoding::Binary => decode_binary(bytes),
        }
    }
}

impl std::str::FromStr for Encoding {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" | "txt" => Ok(Encoding::Text),
            "binary" | "bin" => Ok(Encoding::Binary),
            other => Err(format!("unknown trace encoding '{}'", other)),
        }
    }
}

/// Destination for collected chains
pub trait ChainSink {
    fn begin_session(&mut self) -> io::Result<()>;

    /// Write one chain, outermost call first
    fn write_chain(&mut self, chain: &[FuncId]) -> io::Result<()>;

    fn end_session(&mut self) -> io::Result<()>;
}

impl<S: ChainSink + ?Sized> ChainSink for Box<S> {
    fn begin_session(&mut self) -> io::Result<()> {
        (**self).begin_session()
    }

    fn write_chain(&mut self, chain: &[FuncId]) -> io::Result<()> {
        (**self).write_chain(chain)
    }

    fn end_session(&mut self) -> io::Result<()> {
        (**self).end_session()
    }
}

/// Text encoding writer
pub struct TextSink<W: Write> {
    out: W,
}

impl<W: Write> TextSink<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> ChainSink for TextSink<W> {
    fn begin_session(&mut self) -> io::Result<()> {
        writeln!(self.out, "{}", TEXT_START_MARKER)
    }

    fn write_chain(&mut self, chain: &[FuncId]) -> io::Result<()> {
        for (i, id) in chain.iter().enumerate() {
            if i > 0 {
                self.out.write_all(TEXT_SEPARATOR.as_bytes())?;
            }
            write!(self.out, "{}", id)?;
        }
        self.out.write_all(b"\n")
    }

    fn end_session(&mut self) -> io::Result<()> {
        writeln!(self.out, "{}", TEXT_QUIT_MARKER)?;
        self.out.flush()
    }
}

/// Binary encoding writer
pub struct BinarySink<W: Write> {
    out: W,
}

impl<W: Write> BinarySink<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn word(&mut self, value: usize) -> io::Result<()> {
        self.out.write_all(&value.to_ne_bytes())
    }
}

impl<W: Write> ChainSink for BinarySink<W> {
    fn begin_session(&mut self) -> io::Result<()> {
        self.word(BINARY_START_MARKER)
    }

    fn write_chain(&mut self, chain: &[FuncId]) -> io::Result<()> {
        for id in chain {
            self.word(id.addr())?;
        }
        self.word(BINARY_CHAIN_END)
    }

    fn end_session(&mut self) -> io::Result<()> {
        self.word(BINARY_QUIT_MARKER)?;
        self.out.flush()
    }
}

/// In-memory sink, mostly for tests and tooling
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct VecSink {
    pub sessions: Vec<TraceSession>,
}

impl VecSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Chains of the last session written
    pub fn chains(&self) -> &[Vec<FuncId>] {
        self.sessions
            .last()
            .map(|s| s.chains.as_slice())
            .unwrap_or(&[])
    }
}

impl ChainSink for VecSink {
    fn begin_session(&mut self) -> io::Result<()> {
        self.sessions.push(TraceSession::default());
        Ok(())
    }

    fn write_chain(&mut self, chain: &[FuncId]) -> io::Result<()> {
        match self.sessions.last_mut() {
            Some(session) => {
                session.chains.push(chain.to_vec());
                Ok(())
            }
            None => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "chain written before session start",
            )),
        }
    }

    fn end_session(&mut self) -> io::Result<()> {
        if let Some(session) = self.sessions.last_mut() {
            session.complete = true;
        }
        Ok(())
    }
}

/// One session read back from a trace file
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceSession {
    /// Chains in file order
    pub chains: Vec<Vec<FuncId>>,
    /// False when the file ends before the session's quit marker
    pub complete: bool,
}

impl Serialize for FuncId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for FuncId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse_identity(&raw).ok_or_else(|| serde::de::Error::custom(format!("bad identity {}", raw)))
    }
}

/// Parse a hex identity, with or without the `0x` prefix
pub fn parse_identity(token: &str) -> Option<FuncId> {
    let token = token.trim();
    let digits = token
        .strip_prefix("0x")
        .or_else(|| token.strip_prefix("0X"))
        .unwrap_or(token);
    if digits.is_empty() {
        return None;
    }
    usize::from_str_radix(digits, 16).ok().map(FuncId)
}

/// Parse a text trace
///
/// Blank lines are skipped. A session still open at end of input, or when
/// the next start marker appears, is returned with `complete == false`.
pub fn decode_text(input: &str) -> Result<Vec<TraceSession>, DecodeError> {
    let mut sessions = Vec::new();
    let mut open: Option<TraceSession> = None;

    for (idx, raw) in input.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        if line == TEXT_START_MARKER {
            // The previous writer died before its quit marker
            if let Some(session) = open.take() {
                sessions.push(session);
            }
            open = Some(TraceSession::default());
            continue;
        }
        if line == TEXT_QUIT_MARKER {
            if let Some(mut session) = open.take() {
                session.complete = true;
                sessions.push(session);
            }
            continue;
        }

        let session = open
            .as_mut()
            .ok_or(DecodeError::ChainOutsideSession { line: line_no })?;
        let chain = line
            .split(TEXT_SEPARATOR)
            .map(|token| {
                parse_identity(token).ok_or_else(|| DecodeError::InvalidIdentity {
                    line: line_no,
                    token: token.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        session.chains.push(chain);
    }

    if let Some(session) = open {
        sessions.push(session);
    }
    Ok(sessions)
}

/// Parse a binary trace
///
/// Between chains, `1` and `2` are read as session markers; inside a chain
/// every non-zero word is an identity.
pub fn decode_binary(bytes: &[u8]) -> Result<Vec<TraceSession>, DecodeError> {
    if bytes.len() % WORD != 0 {
        return Err(DecodeError::TruncatedWord(bytes.len()));
    }

    let mut sessions = Vec::new();
    let mut open: Option<TraceSession> = None;
    let mut chain: Vec<FuncId> = Vec::new();

    for (offset, word) in bytes.chunks_exact(WORD).enumerate() {
        let mut raw = [0u8; WORD];
        raw.copy_from_slice(word);
        let value = usize::from_ne_bytes(raw);

        if chain.is_empty() && value == BINARY_START_MARKER {
            // A start marker while a session is open means the previous
            // writer died before its quit marker
            if let Some(session) = open.take() {
                sessions.push(session);
            }
            open = Some(TraceSession::default());
            continue;
        }
        if chain.is_empty() && value == BINARY_QUIT_MARKER {
            if let Some(mut session) = open.take() {
                session.complete = true;
                sessions.push(session);
            }
            continue;
        }

        let session = open
            .as_mut()
            .ok_or(DecodeError::WordOutsideSession { offset })?;
        if value == BINARY_CHAIN_END {
            if !chain.is_empty() {
                session.chains.push(std::mem::take(&mut chain));
            }
        } else {
            chain.push(FuncId(value));
        }
    }

    if let Some(mut session) = open {
        if !chain.is_empty() {
            session.chains.push(chain);
        }
        sessions.push(session);
    }
    Ok(sessions)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(raw: &[usize]) -> Vec<FuncId> {
        raw.iter().copied().map(FuncId).collect()
    }

    #[test]
    fn test_text_sink_output() {
        let mut sink = TextSink::new(Vec::new());
        sink.begin_session().unwrap();
        sink.write_chain(&ids(&[0x1, 0x2])).unwrap();
        sink.write_chain(&ids(&[0xabc])).unwrap();
        sink.end_session().unwrap();

        let text = String::from_utf8(sink.into_inner()).unwrap();
        assert_eq!(
            text,
            "## START PROGRAM\n0x1-->0x2\n0xabc\n## QUIT PROGRAM\n"
        );
    }

    #[test]
    fn test_binary_sink_output() {
        let mut sink = BinarySink::new(Vec::new());
        sink.begin_session().unwrap();
        sink.write_chain(&ids(&[0x10, 0x20])).unwrap();
        sink.end_session().unwrap();

        let bytes = sink.into_inner();
        let words: Vec<usize> = bytes
            .chunks_exact(WORD)
            .map(|w| usize::from_ne_bytes(w.try_into().unwrap()))
            .collect();
        assert_eq!(words, vec![1, 0x10, 0x20, 0, 2]);
    }

    #[test]
    fn test_decode_text_sessions() {
        let input = "## START PROGRAM\n0x1-->0x2\n## QUIT PROGRAM\n\n## START PROGRAM\n0x3\n";
        let sessions = decode_text(input).unwrap();
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0].chains, vec![ids(&[1, 2])]);
        assert!(sessions[0].complete);
        assert_eq!(sessions[1].chains, vec![ids(&[3])]);
        assert!(!sessions[1].complete);
    }

    #[test]
    fn test_decode_text_rejects_bad_identity() {
        let err = decode_text("## START PROGRAM\n0x1-->zz\n").unwrap_err();
        assert_eq!(
            err,
            DecodeError::InvalidIdentity {
                line: 2,
                token: "zz".to_string()
            }
        );
    }

    #[test]
    fn test_decode_text_rejects_orphan_chain() {
        let err = decode_text("0x1\n").unwrap_err();
        assert_eq!(err, DecodeError::ChainOutsideSession { line: 1 });
    }

    #[test]
    fn test_decode_text_unterminated_session_then_new_run() {
        let input = "## START PROGRAM\n0x10-->0x20\n## START PROGRAM\n0x30\n## QUIT PROGRAM\n";
        let sessions = decode_text(input).unwrap();
        assert_eq!(sessions.len(), 2);
        assert!(!sessions[0].complete);
        assert_eq!(sessions[0].chains, vec![ids(&[0x10, 0x20])]);
        assert!(sessions[1].complete);
        assert_eq!(sessions[1].chains, vec![ids(&[0x30])]);
    }

    #[test]
    fn test_decode_text_and_binary_agree_on_unterminated_session() {
        let mut bytes = Vec::new();
        for w in [1usize, 0x10, 0x20, 0, 1, 0x30, 0, 2] {
            bytes.extend_from_slice(&w.to_ne_bytes());
        }
        let text = "## START PROGRAM\n0x10-->0x20\n## START PROGRAM\n0x30\n## QUIT PROGRAM\n";
        assert_eq!(decode_binary(&bytes).unwrap(), decode_text(text).unwrap());
    }

    #[test]
    fn test_decode_binary_rejects_partial_word() {
        let err = decode_binary(&[1, 2, 3]).unwrap_err();
        assert_eq!(err, DecodeError::TruncatedWord(3));
    }

    #[test]
    fn test_decode_binary_truncated_session() {
        let mut bytes = Vec::new();
        for w in [1usize, 0x40, 0x41, 0, 0x40] {
            bytes.extend_from_slice(&w.to_ne_bytes());
        }
        let sessions = decode_binary(&bytes).unwrap();
        assert_eq!(sessions.len(), 1);
        assert!(!sessions[0].complete);
        assert_eq!(sessions[0].chains, vec![ids(&[0x40, 0x41]), ids(&[0x40])]);
    }

    #[test]
    fn test_parse_identity_forms() {
        assert_eq!(parse_identity("0x1f"), Some(FuncId(0x1f)));
        assert_eq!(parse_identity("1F"), Some(FuncId(0x1f)));
        assert_eq!(parse_identity("0x"), None);
        assert_eq!(parse_identity("xyz"), None);
    }

    #[test]
    fn test_encoding_from_str() {
        assert_eq!("binary".parse::<Encoding>(), Ok(Encoding::Binary));
        assert_eq!("TEXT".parse::<Encoding>(), Ok(Encoding::Text));
        assert!("yaml".parse::<Encoding>().is_err());
    }

    #[test]
    fn test_vec_sink_collects() {
        let mut sink = VecSink::new();
        sink.begin_session().unwrap();
        sink.write_chain(&ids(&[5])).unwrap();
        sink.end_session().unwrap();
        assert_eq!(sink.chains(), &[ids(&[5])]);
        assert!(sink.sessions[0].complete);
    }

    #[test]
    fn test_session_serializes_identities_as_hex() {
        let session = TraceSession {
            chains: vec![ids(&[0x1, 0xff])],
            complete: true,
        };
        let json = serde_json::to_string(&session).unwrap();
        assert_eq!(json, r#"{"chains":[["0x1","0xff"]],"complete":true}"#);
        let back: TraceSession = serde_json::from_str(&json).unwrap();
        assert_eq!(back, session);
    }
}
