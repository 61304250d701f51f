//! Indexed forward dataflow graph.
//!
//! Lowers an expression tree to a compact DAG in post-DFS order. Each
//! node carries the fusion pattern of its expression and the forward
//! edges to its consumers; each edge carries the consumer's view of the
//! dependency. This is the temporary structure the dominator tree and
//! the partitioner operate on.

use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;

use opfuse_ir::{describe_expr, Expr, Handle, OpPattern, OpRegistry, Program, Ty};

use crate::error::FuseError;

/// A forward edge to a consumer node.
#[derive(Clone, Copy, Debug)]
pub struct GraphEdge {
    /// Post-DFS index of the consumer.
    pub node: usize,
    /// The consumer's view of this dependency.
    pub pattern: OpPattern,
}

/// A node of the indexed forward graph.
#[derive(Clone, Debug)]
pub struct GraphNode {
    /// The originating expression. Observation only; the graph never
    /// owns or mutates the program.
    pub expr: Handle<Expr>,
    /// Position of this node in the post-DFS vector.
    pub index: usize,
    /// Fusion pattern of the node itself.
    pub pattern: OpPattern,
    /// Whether the node's value is observable outside the analyzed
    /// expression (the program result, plus caller-marked identities).
    pub extern_ref: bool,
    /// Forward edges to consumers. Producer indices always precede
    /// consumer indices.
    pub outputs: Vec<GraphEdge>,
}

/// The indexed forward graph: nodes in post-DFS order plus a map from
/// expression identity to node index.
#[derive(Clone, Debug, Default)]
pub struct IndexedGraph {
    nodes: Vec<GraphNode>,
    node_of: HashMap<Handle<Expr>, usize>,
}

impl IndexedGraph {
    /// Lowers a program to its indexed forward graph.
    ///
    /// A single post-order walk from the result registers each reachable
    /// expression once and appends it after its children. The result
    /// node and every identity in `externals` are marked `extern_ref`.
    ///
    /// # Errors
    ///
    /// [`FuseError::EmptyProgram`] if no result is set, and
    /// [`FuseError::CorruptGraph`] if a back edge is encountered.
    pub fn build(
        program: &Program,
        registry: &OpRegistry,
        externals: &HashSet<Handle<Expr>>,
    ) -> Result<Self, FuseError> {
        let result = program.result().ok_or(FuseError::EmptyProgram)?;
        let mut creator = Creator {
            program,
            registry,
            externals,
            result,
            nodes: Vec::new(),
            node_of: HashMap::new(),
            state: HashMap::new(),
        };
        creator.visit(result)?;
        log::debug!(
            "indexed forward graph: {} nodes from {} expressions",
            creator.nodes.len(),
            program.len(),
        );
        Ok(Self {
            nodes: creator.nodes,
            node_of: creator.node_of,
        })
    }

    /// Nodes in post-DFS order.
    pub fn nodes(&self) -> &[GraphNode] {
        &self.nodes
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns `true` if the graph has no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Looks up the node index of an expression, if it was reachable.
    pub fn node_of(&self, expr: Handle<Expr>) -> Option<usize> {
        self.node_of.get(&expr).copied()
    }

    /// Per-node producer lists (the reverse of `outputs`).
    pub fn predecessors(&self) -> Vec<Vec<usize>> {
        let mut preds: Vec<Vec<usize>> = vec![Vec::new(); self.nodes.len()];
        for node in &self.nodes {
            for edge in &node.outputs {
                preds[edge.node].push(node.index);
            }
        }
        preds
    }

    /// Textual listing of the post-DFS nodes with their outputs.
    ///
    /// Purely informational; the format carries no stability guarantees.
    pub fn dump(&self, program: &Program, registry: &OpRegistry) -> String {
        let mut out = String::new();
        for node in &self.nodes {
            let mut edges = String::new();
            for (i, edge) in node.outputs.iter().enumerate() {
                if i > 0 {
                    edges.push_str(", ");
                }
                let _ = write!(edges, "{}:{}", edge.node, edge.pattern);
            }
            let _ = writeln!(
                out,
                "node[{}] {} pattern={}{} outputs=[{}]",
                node.index,
                describe_expr(program, registry, &program.exprs[node.expr]),
                node.pattern,
                if node.extern_ref { " extern" } else { "" },
                edges,
            );
        }
        out
    }
}

#[derive(Clone, Copy)]
enum VisitState {
    InProgress,
    Done(usize),
}

struct Creator<'a> {
    program: &'a Program,
    registry: &'a OpRegistry,
    externals: &'a HashSet<Handle<Expr>>,
    result: Handle<Expr>,
    nodes: Vec<GraphNode>,
    node_of: HashMap<Handle<Expr>, usize>,
    state: HashMap<Handle<Expr>, VisitState>,
}

impl<'a> Creator<'a> {
    fn visit(&mut self, handle: Handle<Expr>) -> Result<usize, FuseError> {
        match self.state.get(&handle) {
            Some(VisitState::Done(index)) => return Ok(*index),
            Some(VisitState::InProgress) => {
                return Err(FuseError::CorruptGraph {
                    index: handle.index(),
                })
            }
            None => {}
        }
        self.state.insert(handle, VisitState::InProgress);

        let program = self.program;
        let expr = &program.exprs[handle];
        let index = match expr {
            Expr::Call { callee, args } => {
                if let Expr::Op(op) = program.exprs[*callee] {
                    // The operator reference itself is not a dataflow
                    // node; only the call and its arguments are.
                    let mut pattern = self.registry.pattern(op);
                    let fusable_args = args.iter().all(|&a| {
                        let ty = program.ty(a);
                        ty.is_tensor() || ty.is_tensor_tuple()
                    });
                    if !fusable_args {
                        pattern = OpPattern::Opaque;
                    }
                    let mut child_ixs = Vec::with_capacity(args.len());
                    for &arg in args {
                        child_ixs.push(self.visit(arg)?);
                    }
                    let index = self.add_node(handle, pattern);
                    for (&arg, &child) in args.iter().zip(&child_ixs) {
                        let edge_pattern = if matches!(program.ty(arg), Ty::Tuple(_)) {
                            OpPattern::Injective
                        } else {
                            pattern
                        };
                        self.add_edge(child, index, edge_pattern);
                    }
                    index
                } else {
                    let mut child_ixs = Vec::with_capacity(args.len() + 1);
                    child_ixs.push(self.visit(*callee)?);
                    for &arg in args {
                        child_ixs.push(self.visit(arg)?);
                    }
                    let index = self.add_node(handle, OpPattern::Opaque);
                    for child in child_ixs {
                        self.add_edge(child, index, OpPattern::Opaque);
                    }
                    index
                }
            }
            Expr::Tuple { fields } => {
                let mut child_ixs = Vec::with_capacity(fields.len());
                for &field in fields {
                    child_ixs.push(self.visit(field)?);
                }
                let index = self.add_node(handle, OpPattern::Tuple);
                for child in child_ixs {
                    self.add_edge(child, index, OpPattern::Injective);
                }
                index
            }
            Expr::TupleGetItem { tuple, .. } => {
                let child = self.visit(*tuple)?;
                let index = self.add_node(handle, OpPattern::Injective);
                let edge_pattern = if program.ty(*tuple).is_tensor_tuple() {
                    OpPattern::Injective
                } else {
                    OpPattern::Opaque
                };
                self.add_edge(child, index, edge_pattern);
                index
            }
            Expr::Op(_) | Expr::Var { .. } | Expr::Constant(_) => {
                self.add_node(handle, OpPattern::Opaque)
            }
            // Function, Let, If, Match, Ref*: non-dataflow structure.
            // Children are dependencies but nothing fuses across them.
            other => {
                let children = other.children();
                let mut child_ixs = Vec::with_capacity(children.len());
                for child in children {
                    child_ixs.push(self.visit(child)?);
                }
                let index = self.add_node(handle, OpPattern::Opaque);
                for child in child_ixs {
                    self.add_edge(child, index, OpPattern::Opaque);
                }
                index
            }
        };

        self.state.insert(handle, VisitState::Done(index));
        Ok(index)
    }

    fn add_node(&mut self, expr: Handle<Expr>, pattern: OpPattern) -> usize {
        let index = self.nodes.len();
        let extern_ref = expr == self.result || self.externals.contains(&expr);
        self.nodes.push(GraphNode {
            expr,
            index,
            pattern,
            extern_ref,
            outputs: Vec::new(),
        });
        self.node_of.insert(expr, index);
        index
    }

    fn add_edge(&mut self, from: usize, to: usize, pattern: OpPattern) {
        self.nodes[from].outputs.push(GraphEdge { node: to, pattern });
    }
}
