//! Chain collector
//!
//! Pre-order walk over the finished tree. The path buffer works as a stack:
//! a node at depth `d` truncates it to `d` entries before pushing itself, so
//! the buffer always holds exactly the node's root path. Terminal nodes emit
//! that path (root excluded), then the walk continues into their children.

use crate::format::ChainSink;
use crate::node::{FuncId, NodeId};
use crate::tree::CallTree;
use std::io;

/// Summary of one collection pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CollectStats {
    pub chains: usize,
    pub nodes_visited: usize,
    pub longest_chain: usize,
}

/// Write every terminal chain of `tree` to `sink`, framed by session markers
pub fn collect<S: ChainSink + ?Sized>(tree: &CallTree, sink: &mut S) -> io::Result<CollectStats> {
    sink.begin_session()?;
    let stats = walk(tree, |chain| sink.write_chain(chain))?;
    sink.end_session()?;
    Ok(stats)
}

/// Terminal chains of `tree` in emission order
pub fn chains(tree: &CallTree) -> Vec<Vec<FuncId>> {
    let mut out = Vec::new();
    // Infallible callback
    let _ = walk(tree, |chain| {
        out.push(chain.to_vec());
        Ok(())
    });
    out
}

fn walk<F>(tree: &CallTree, mut emit: F) -> io::Result<CollectStats>
where
    F: FnMut(&[FuncId]) -> io::Result<()>,
{
    let mut stats = CollectStats::default();
    if tree.node_count() == 0 {
        return Ok(stats);
    }

    let mut path: Vec<FuncId> = Vec::with_capacity(tree.max_depth());
    let mut stack: Vec<(NodeId, usize)> = vec![(tree.root(), 0)];

    while let Some((id, depth)) = stack.pop() {
        let node = tree.node(id);
        stats.nodes_visited += 1;

        if let Some(identity) = node.identity {
            // depth >= 1 for every non-root node; slot 0 belongs to the root
            path.truncate(depth - 1);
            path.push(identity);
            if node.is_terminal {
                emit(&path)?;
                stats.chains += 1;
                stats.longest_chain = stats.longest_chain.max(path.len());
            }
        }

        stack.extend(
            node.children()
                .iter()
                .rev()
                .map(|&child| (child, depth + 1)),
        );
    }

    Ok(stats)
}
