//! Call graph aggregated from decoded chains
//!
//! Every adjacent pair in a chain is a caller→callee edge. Edge weights
//! count how often the pair occurs across the distinct chains of all
//! sessions, so the graph answers "which call paths exist" rather than
//! "how often a call ran".

use crate::format::TraceSession;
use crate::node::FuncId;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// A caller→callee edge
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CallEdge {
    pub caller: FuncId,
    pub callee: FuncId,
    /// Occurrences across all chains
    pub occurrences: u64,
}

/// Directed call graph over function identities
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CallGraph {
    /// Functions in ascending identity order
    pub functions: Vec<FuncId>,
    /// Functions seen as the first call of a chain
    pub entry_points: Vec<FuncId>,
    pub edges: Vec<CallEdge>,
    pub sessions: usize,
    pub chains: usize,
}

impl CallGraph {
    pub fn from_sessions(sessions: &[TraceSession]) -> Self {
        let mut functions = BTreeSet::new();
        let mut entries = BTreeSet::new();
        let mut edges = BTreeMap::<(FuncId, FuncId), u64>::new();
        let mut chains = 0;

        for session in sessions {
            for chain in &session.chains {
                chains += 1;
                if let Some(&first) = chain.first() {
                    entries.insert(first);
                }
                for &id in chain {
                    functions.insert(id);
                }
                for pair in chain.windows(2) {
                    *edges.entry((pair[0], pair[1])).or_default() += 1;
                }
            }
        }

        Self {
            functions: functions.into_iter().collect(),
            entry_points: entries.into_iter().collect(),
            edges: edges
                .into_iter()
                .map(|((caller, callee), occurrences)| CallEdge {
                    caller,
                    callee,
                    occurrences,
                })
                .collect(),
            sessions: sessions.len(),
            chains,
        }
    }

    /// Direct callees of `caller`
    pub fn callees(&self, caller: FuncId) -> impl Iterator<Item = FuncId> + '_ {
        self.edges
            .iter()
            .filter(move |e| e.caller == caller)
            .map(|e| e.callee)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(chains: &[&[usize]]) -> TraceSession {
        TraceSession {
            chains: chains
                .iter()
                .map(|c| c.iter().copied().map(FuncId).collect())
                .collect(),
            complete: true,
        }
    }

    #[test]
    fn test_edges_counted_across_chains() {
        let graph = CallGraph::from_sessions(&[
            session(&[&[1, 2], &[1, 2, 3]]),
            session(&[&[1, 4], &[5]]),
        ]);

        assert_eq!(graph.sessions, 2);
        assert_eq!(graph.chains, 4);
        assert_eq!(
            graph.functions,
            vec![FuncId(1), FuncId(2), FuncId(3), FuncId(4), FuncId(5)]
        );
        assert_eq!(graph.entry_points, vec![FuncId(1), FuncId(5)]);
        assert_eq!(
            graph.edges,
            vec![
                CallEdge { caller: FuncId(1), callee: FuncId(2), occurrences: 2 },
                CallEdge { caller: FuncId(1), callee: FuncId(4), occurrences: 1 },
                CallEdge { caller: FuncId(2), callee: FuncId(3), occurrences: 1 },
            ]
        );
        assert_eq!(
            graph.callees(FuncId(1)).collect::<Vec<_>>(),
            vec![FuncId(2), FuncId(4)]
        );
    }

    #[test]
    fn test_recursion_is_a_self_edge() {
        let graph = CallGraph::from_sessions(&[session(&[&[7, 7, 7]])]);
        assert_eq!(
            graph.edges,
            vec![CallEdge { caller: FuncId(7), callee: FuncId(7), occurrences: 2 }]
        );
    }

    #[test]
    fn test_json_uses_hex_identities() {
        let graph = CallGraph::from_sessions(&[session(&[&[0x10, 0x20]])]);
        let json = graph.to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["edges"][0]["caller"], "0x10");
        assert_eq!(value["edges"][0]["callee"], "0x20");
        assert_eq!(value["entry_points"][0], "0x10");
    }

    #[test]
    fn test_empty() {
        let graph = CallGraph::from_sessions(&[]);
        assert!(graph.edges.is_empty());
        assert_eq!(graph.chains, 0);
    }
}
