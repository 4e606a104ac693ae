//! Call tree builder
//!
//! Keeps `current` as a mirror of the host's live call stack, expressed as a
//! path from the sentinel root. Repeated calls to the same callee from the
//! same context share one child node; recursion produces one node per level.

use crate::error::Result;
use crate::guard::MutationGuard;
use crate::node::{FuncId, Node, NodeArena, NodeId};
use nix::sys::signal::Signal;

/// Call-chain tree for one traced session
#[derive(Debug)]
pub struct CallTree {
    arena: NodeArena,
    current: NodeId,
    last_event_was_enter: bool,
    /// Root counts as level 1
    current_depth: usize,
    max_depth: usize,
}

impl CallTree {
    /// Create a tree holding only the root, positioned at the root
    pub fn new(child_growth: usize) -> Result<Self> {
        Ok(Self {
            arena: NodeArena::new(child_growth)?,
            current: NodeId::ROOT,
            last_event_was_enter: false,
            current_depth: 1,
            max_depth: 1,
        })
    }

    /// Record a function entry
    ///
    /// Allocation runs inside `guard`'s mutation window. Returns the
    /// termination request parked during that window, if any; the caller
    /// must re-deliver it.
    pub fn on_enter(&mut self, identity: FuncId, guard: &MutationGuard) -> Result<Option<Signal>> {
        let mut deferred = None;
        let child = match self.arena.find_child(self.current, identity) {
            Some(child) => child,
            None => {
                let parent = self.current;
                let (created, pending) =
                    guard.mutate(|| self.arena.create_node(parent, identity));
                deferred = pending;
                // On failure position and depth stay where they were
                created?
            }
        };

        self.current = child;
        self.current_depth += 1;
        if self.current_depth > self.max_depth {
            self.max_depth = self.current_depth;
        }
        self.last_event_was_enter = true;
        Ok(deferred)
    }

    /// Record a function return
    pub fn on_exit(&mut self, identity: FuncId) {
        if self.last_event_was_enter {
            self.arena.get_mut(self.current).is_terminal = true;
            self.last_event_was_enter = false;
        }

        // Resynchronize on the nearest ancestor carrying this identity
        while let Some(parent) = self.arena.get(self.current).parent {
            if self.arena.get(self.current).identity == Some(identity) {
                break;
            }
            self.current = parent;
            self.current_depth -= 1;
        }

        if let Some(parent) = self.arena.get(self.current).parent {
            self.current = parent;
            self.current_depth -= 1;
        }
    }

    /// Mark the open call terminal when the session ends mid-call
    ///
    /// Returns whether a node was marked.
    pub fn close_open_call(&mut self) -> bool {
        if self.current == NodeId::ROOT {
            return false;
        }
        self.arena.get_mut(self.current).is_terminal = true;
        true
    }

    /// Release every node; returns how many were freed
    pub fn destroy(&mut self) -> usize {
        let freed = self.arena.destroy_subtree(NodeId::ROOT);
        self.current = NodeId::ROOT;
        self.current_depth = 1;
        freed
    }

    pub fn root(&self) -> NodeId {
        NodeId::ROOT
    }

    pub fn current(&self) -> NodeId {
        self.current
    }

    pub fn node(&self, id: NodeId) -> &Node {
        self.arena.get(id)
    }

    /// Levels currently open, root included
    pub fn current_depth(&self) -> usize {
        self.current_depth
    }

    /// Deepest level reached, root included; sizes the collector's buffer
    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Maximum simultaneous nesting of traced calls
    pub fn max_call_depth(&self) -> usize {
        self.max_depth - 1
    }

    #[cfg(test)]
    pub(crate) fn limit_nodes(&mut self, limit: usize) {
        self.arena.limit_nodes(limit);
    }

    /// Number of nodes, root included
    pub fn node_count(&self) -> usize {
        self.arena.len()
    }

    pub fn last_event_was_enter(&self) -> bool {
        self.last_event_was_enter
    }
}
