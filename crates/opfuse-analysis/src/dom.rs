//! Post-dominator tree over the indexed forward graph.
//!
//! Built in a single pass over nodes in reverse post-DFS order
//! (consumers before producers). Because the graph is a DAG, every
//! consumer's dominator chain is already final when its producer is
//! processed, so the immediate post-dominator of a node is the least
//! common ancestor of its consumers in the partially built tree. The
//! same walk folds edge and chain patterns into the combined pattern
//! between a node and its immediate post-dominator.

use std::fmt::Write as _;

use opfuse_ir::OpPattern;

use crate::graph::IndexedGraph;

/// A node of the post-dominator tree, parallel to the graph node with
/// the same index.
#[derive(Clone, Copy, Debug)]
pub struct DomNode {
    /// Index of the immediate post-dominator; `None` for sinks and for
    /// nodes whose consumers reach distinct sinks.
    pub parent: Option<usize>,
    /// Distance from the tree root; sinks have depth 1.
    pub depth: u32,
    /// Combined pattern along every path from this node to its
    /// immediate post-dominator.
    pub pattern: OpPattern,
}

/// The post-dominator tree: one [`DomNode`] per graph node, same order.
#[derive(Clone, Debug, Default)]
pub struct DominatorTree {
    nodes: Vec<DomNode>,
}

impl DominatorTree {
    /// Computes the post-dominator relation for a forward graph.
    ///
    /// # Panics
    ///
    /// Panics if a computed post-dominator does not come after its child
    /// in post-DFS order; that would mean the graph edges are corrupt
    /// and is a programming error.
    pub fn build(graph: &IndexedGraph) -> Self {
        let n = graph.len();
        let mut nodes = vec![
            DomNode {
                parent: None,
                depth: 1,
                pattern: OpPattern::Opaque,
            };
            n
        ];

        // Reverse post-DFS order: consumers first.
        for index in (0..n).rev() {
            let gnode = &graph.nodes()[index];
            if gnode.outputs.is_empty() {
                // Sink: root of its dominator tree, nothing to combine.
                nodes[index] = DomNode {
                    parent: None,
                    depth: 1,
                    pattern: OpPattern::Opaque,
                };
                continue;
            }

            let mut pattern = OpPattern::ElemWise;
            let first = &gnode.outputs[0];
            let mut parent = Some(first.node);
            pattern = pattern.combine(first.pattern);
            for edge in &gnode.outputs[1..] {
                parent = match parent {
                    Some(p) => lca(&nodes, p, edge.node, &mut pattern),
                    None => None,
                };
                pattern = pattern.combine(edge.pattern);
            }

            if let Some(p) = parent {
                assert!(
                    p > index,
                    "post-dominator {p} precedes node {index} in post-DFS order",
                );
            }
            let depth = match parent {
                Some(p) => nodes[p].depth + 1,
                None => 1,
            };
            nodes[index] = DomNode {
                parent,
                depth,
                pattern,
            };
        }

        Self { nodes }
    }

    /// Dominator-tree nodes, parallel to the graph's post-DFS vector.
    pub fn nodes(&self) -> &[DomNode] {
        &self.nodes
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns `true` if the tree is empty.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Textual listing of the tree; informational only.
    pub fn dump(&self) -> String {
        let mut out = String::new();
        for (index, node) in self.nodes.iter().enumerate() {
            let _ = match node.parent {
                Some(p) => writeln!(
                    out,
                    "node[{index}] parent={p} depth={} pattern={}",
                    node.depth, node.pattern,
                ),
                None => writeln!(out, "node[{index}] sink depth={}", node.depth),
            };
        }
        out
    }
}

/// Least common ancestor of two tree nodes, folding the pattern of every
/// node stepped over into `pattern`.
///
/// The walk always advances the deeper node, so both cursors converge on
/// the common ancestor or run past a root (`None`) when the nodes live
/// in different trees of the forest.
fn lca(
    nodes: &[DomNode],
    mut lhs: usize,
    mut rhs: usize,
    pattern: &mut OpPattern,
) -> Option<usize> {
    while lhs != rhs {
        if nodes[lhs].depth >= nodes[rhs].depth {
            *pattern = pattern.combine(nodes[lhs].pattern);
            lhs = nodes[lhs].parent?;
        } else {
            *pattern = pattern.combine(nodes[rhs].pattern);
            rhs = nodes[rhs].parent?;
        }
    }
    Some(lhs)
}
