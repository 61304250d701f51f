//! Operator fusion analysis core.
//!
//! Decides which operators of a tensor dataflow program may be merged
//! into a single fused kernel. The pipeline has three stages sharing one
//! set of per-run data structures:
//!
//! 1. [`IndexedGraph`] lowers the expression tree to an indexed forward
//!    DAG with per-node fusion patterns.
//! 2. [`DominatorTree`] computes each node's immediate post-dominator
//!    and the combined pattern along the dominator edge in a single
//!    LCA-based pass.
//! 3. [`GraphPartitioner`] runs pattern-driven fusion phases over the
//!    dominator tree with a path-compressed union-find.
//!
//! The result is a disjoint partition of the program's operator nodes;
//! the input expression tree is never rewritten.

mod dom;
mod error;
mod graph;
mod options;
mod partition;

pub use dom::{DomNode, DominatorTree};
pub use error::FuseError;
pub use graph::{GraphEdge, GraphNode, IndexedGraph};
pub use options::{FuseOptions, OptLevel};
pub use partition::{GraphPartitioner, Group, GroupId, GroupInfo, Partition};

use std::collections::HashSet;

use opfuse_ir::{Expr, Handle, OpRegistry, Program};

/// Partitions a program into fusion groups.
///
/// The partition is a pure function of the program, the operator
/// registry, the external-reference set, and the options; running it
/// twice yields the same grouping.
///
/// # Errors
///
/// Fails with [`FuseError::Config`] on invalid options, with
/// [`FuseError::EmptyProgram`] when the program has no result, and with
/// [`FuseError::CorruptGraph`] when the expression structure contains a
/// back edge.
pub fn partition(
    program: &Program,
    registry: &OpRegistry,
    externals: &HashSet<Handle<Expr>>,
    options: &FuseOptions,
) -> Result<Partition, FuseError> {
    options.validate()?;
    let graph = IndexedGraph::build(program, registry, externals)?;
    let tree = DominatorTree::build(&graph);
    let mut partitioner = GraphPartitioner::new(options.opt_level, options.max_fuse_depth);
    Ok(partitioner.run(program, registry, &graph, &tree))
}
