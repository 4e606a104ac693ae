//! Chain node store
//!
//! Nodes live in a single arena and refer to each other by index, so the
//! parent back-reference is a plain `NodeId` and the whole tree is released
//! at once when the arena is dropped.
//!
//! Child lists grow by a fixed increment rather than doubling. Wide call
//! sites pay at most `child_growth` slots of slack each, and the growth
//! never needs profile data up front.

use crate::error::{Result, TraceError};
use std::fmt;

/// Opaque, address-sized identity of a traced function
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FuncId(pub usize);

impl FuncId {
    /// Identity of a function pointer handed over by the instrumentation hooks
    pub fn from_ptr<T>(ptr: *const T) -> Self {
        FuncId(ptr as usize)
    }

    pub fn addr(self) -> usize {
        self.0
    }
}

impl fmt::Display for FuncId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl fmt::LowerHex for FuncId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

/// Index of a node in its arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(u32);

impl NodeId {
    /// The sentinel root is always the first node allocated
    pub const ROOT: NodeId = NodeId(0);

    fn index(self) -> usize {
        self.0 as usize
    }
}

/// One call-site occurrence in some root-to-node chain
#[derive(Debug, Clone)]
pub struct Node {
    /// `None` only on the sentinel root
    pub identity: Option<FuncId>,
    pub is_terminal: bool,
    pub parent: Option<NodeId>,
    children: Vec<NodeId>,
}

impl Node {
    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }
}

/// Arena owning every node of one call tree
#[derive(Debug)]
pub struct NodeArena {
    nodes: Vec<Node>,
    child_growth: usize,
    #[cfg(test)]
    node_limit: Option<usize>,
}

impl NodeArena {
    /// Create an arena holding only the sentinel root
    pub fn new(child_growth: usize) -> Result<Self> {
        let mut nodes = Vec::new();
        nodes.try_reserve(64).map_err(|_| TraceError::Exhausted {
            what: "node arena",
        })?;
        nodes.push(Node {
            identity: None,
            is_terminal: false,
            parent: None,
            children: Vec::new(),
        });
        Ok(Self {
            nodes,
            child_growth: child_growth.max(1),
            #[cfg(test)]
            node_limit: None,
        })
    }

    /// Allocate a node under `parent` and append it to the parent's children
    ///
    /// The caller is responsible for the sibling-uniqueness check.
    pub fn create_node(&mut self, parent: NodeId, identity: FuncId) -> Result<NodeId> {
        #[cfg(test)]
        if self.node_limit.is_some_and(|limit| self.nodes.len() >= limit) {
            return Err(TraceError::Exhausted {
                what: "node arena",
            });
        }
        if self.nodes.len() == self.nodes.capacity() {
            let extra = self.nodes.len().max(64);
            self.nodes
                .try_reserve(extra)
                .map_err(|_| TraceError::Exhausted {
                    what: "node arena",
                })?;
        }
        let id = u32::try_from(self.nodes.len())
            .map(NodeId)
            .map_err(|_| TraceError::Exhausted {
                what: "node index space",
            })?;

        self.grow_children(parent)?;
        self.nodes.push(Node {
            identity: Some(identity),
            is_terminal: false,
            parent: Some(parent),
            children: Vec::new(),
        });
        self.nodes[parent.index()].children.push(id);
        Ok(id)
    }

    /// Extend a full child list by the fixed increment
    pub fn grow_children(&mut self, node: NodeId) -> Result<()> {
        let growth = self.child_growth;
        let children = &mut self.nodes[node.index()].children;
        if children.len() == children.capacity() {
            children
                .try_reserve_exact(growth)
                .map_err(|_| TraceError::Exhausted {
                    what: "child list",
                })?;
        }
        Ok(())
    }

    /// Child of `parent` carrying `identity`, if any (linear scan)
    pub fn find_child(&self, parent: NodeId, identity: FuncId) -> Option<NodeId> {
        self.nodes[parent.index()]
            .children
            .iter()
            .copied()
            .find(|&child| self.nodes[child.index()].identity == Some(identity))
    }

    /// Free `node` and all of its descendants, children before parents
    ///
    /// Returns the number of nodes released. Only meaningful on the root at
    /// teardown; the arena is empty afterwards.
    pub fn destroy_subtree(&mut self, node: NodeId) -> usize {
        if node.index() >= self.nodes.len() {
            return 0;
        }
        let mut freed = 0;
        let mut stack = vec![(node, false)];
        while let Some((id, expanded)) = stack.pop() {
            if expanded {
                let released = &mut self.nodes[id.index()];
                released.children = Vec::new();
                released.parent = None;
                freed += 1;
                continue;
            }
            stack.push((id, true));
            stack.extend(
                self.nodes[id.index()]
                    .children
                    .iter()
                    .rev()
                    .map(|&child| (child, false)),
            );
        }
        if node == NodeId::ROOT {
            self.nodes = Vec::new();
        }
        freed
    }

    /// Fail allocations once the arena holds `limit` nodes
    #[cfg(test)]
    pub(crate) fn limit_nodes(&mut self, limit: usize) {
        self.node_limit = Some(limit);
    }

    pub fn get(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    pub fn get_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.index()]
    }

    /// Number of nodes, root included
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn child_growth(&self) -> usize {
        self.child_growth
    }
}
