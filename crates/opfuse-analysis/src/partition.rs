//! Union-find graph partitioner.
//!
//! Runs three pattern-driven fusion phases against the post-dominator
//! tree. Each phase walks the graph in post-DFS order and tries to fuse
//! a node into its immediate post-dominator; a successful fuse merges
//! the whole dominated subgraph between the two into one group.
//!
//! The union direction is fixed (child into parent as given by the
//! algorithm) with path compression on find; union-by-rank must not be
//! substituted, since the surviving root identifies the fused kernel.

use std::collections::{HashMap, HashSet};
use std::fmt;

use opfuse_ir::{Expr, Handle, OpAttrs, OpPattern, OpRegistry, Program};

use crate::dom::DominatorTree;
use crate::graph::{GraphNode, IndexedGraph};
use crate::options::OptLevel;

/// A group in the union-find structure.
///
/// `pattern`, `anchor_ref`, `attrs`, and `num_nodes` are authoritative
/// only on roots; stale values remain on merged children.
#[derive(Clone, Debug)]
pub struct Group {
    /// Union-find parent; the index of the group itself on roots.
    pub parent: usize,
    /// The pattern governing the fused group.
    pub pattern: OpPattern,
    /// Expression identifying the group root.
    pub root_ref: Handle<Expr>,
    /// The anchor operator absorbed into this group, if any. Set only
    /// when the group pattern is `OutEWiseFusable`.
    pub anchor_ref: Option<Handle<Expr>>,
    /// Attributes carried over from the anchor operator.
    pub attrs: OpAttrs,
    /// Number of graph nodes in the group.
    pub num_nodes: u32,
}

/// Compact identifier of a fused group in a [`Partition`].
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct GroupId(pub u32);

/// Metadata of one fused group.
#[derive(Clone, Debug)]
pub struct GroupInfo {
    /// The pattern governing the fused group.
    pub pattern: OpPattern,
    /// Expression identifying the group root.
    pub root: Handle<Expr>,
    /// The anchor operator of the group, if any.
    pub anchor: Option<Handle<Expr>>,
    /// Attributes carried over from the anchor operator.
    pub attrs: OpAttrs,
    /// Number of graph nodes in the group.
    pub num_nodes: u32,
}

/// The result of a partition run: one group per graph node.
#[derive(Clone, Debug)]
pub struct Partition {
    assignments: Vec<GroupId>,
    groups: Vec<GroupInfo>,
}

impl Partition {
    /// The group of the node at the given post-DFS index.
    pub fn group_of(&self, node: usize) -> GroupId {
        self.assignments[node]
    }

    /// Per-node group ids, parallel to the post-DFS vector.
    pub fn assignments(&self) -> &[GroupId] {
        &self.assignments
    }

    /// Metadata of a group.
    pub fn info(&self, id: GroupId) -> &GroupInfo {
        &self.groups[id.0 as usize]
    }

    /// All groups, in order of first appearance in post-DFS order.
    pub fn groups(&self) -> &[GroupInfo] {
        &self.groups
    }

    /// Number of distinct groups.
    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// Number of partitioned nodes.
    pub fn len(&self) -> usize {
        self.assignments.len()
    }

    /// Returns `true` if the partition covers no nodes.
    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (id, info) in self.groups.iter().enumerate() {
            let members: Vec<String> = self
                .assignments
                .iter()
                .enumerate()
                .filter(|(_, g)| g.0 as usize == id)
                .map(|(ix, _)| ix.to_string())
                .collect();
            writeln!(
                f,
                "group[{id}] pattern={} nodes={} root={:?}{} members=[{}]",
                info.pattern,
                info.num_nodes,
                info.root,
                match info.anchor {
                    Some(a) => format!(" anchor={a:?}"),
                    None => String::new(),
                },
                members.join(", "),
            )?;
        }
        Ok(())
    }
}

/// The partitioner itself; owns the union-find state for one run.
#[derive(Debug)]
pub struct GraphPartitioner {
    opt_level: OptLevel,
    max_fuse_depth: usize,
    groups: Vec<Group>,
}

impl GraphPartitioner {
    /// Creates a partitioner for one run.
    pub fn new(opt_level: OptLevel, max_fuse_depth: usize) -> Self {
        Self {
            opt_level,
            max_fuse_depth,
            groups: Vec::new(),
        }
    }

    /// Partitions a graph against its post-dominator tree.
    ///
    /// At `OptLevel::O0` only initialization runs and every node stays
    /// in a singleton group.
    pub fn run(
        &mut self,
        program: &Program,
        registry: &OpRegistry,
        graph: &IndexedGraph,
        tree: &DominatorTree,
    ) -> Partition {
        self.init_groups(program, registry, graph);
        for phase in 0..self.opt_level.phases() {
            log::debug!("fusion phase {phase}");
            self.run_fuse(graph, tree, phase);
        }
        self.finish(graph)
    }

    /// Resolves the root of a group with path compression.
    pub fn find_root(&mut self, index: usize) -> usize {
        let mut root = index;
        while self.groups[root].parent != root {
            root = self.groups[root].parent;
        }
        let mut cursor = index;
        while cursor != root {
            let next = self.groups[cursor].parent;
            self.groups[cursor].parent = root;
            cursor = next;
        }
        root
    }

    /// Current group table; roots hold the authoritative data.
    pub fn groups(&self) -> &[Group] {
        &self.groups
    }

    fn init_groups(&mut self, program: &Program, registry: &OpRegistry, graph: &IndexedGraph) {
        self.groups = graph
            .nodes()
            .iter()
            .enumerate()
            .map(|(index, node)| {
                let mut group = Group {
                    parent: index,
                    pattern: node.pattern,
                    root_ref: node.expr,
                    anchor_ref: None,
                    attrs: OpAttrs::new(),
                    num_nodes: 1,
                };
                if node.pattern == OpPattern::OutEWiseFusable {
                    group.anchor_ref = Some(node.expr);
                    if let Expr::Call { callee, .. } = &program.exprs[node.expr] {
                        if let Expr::Op(op) = program.exprs[*callee] {
                            group.attrs = registry.get(op).attrs.clone();
                        }
                    }
                }
                group
            })
            .collect();
    }

    /// Merges the child group into the parent group.
    ///
    /// Both are resolved to roots first. The anchor reference and its
    /// attributes travel to the parent when the parent has none; the
    /// parent pattern then absorbs the anchor's.
    fn merge_from_to(&mut self, child: usize, parent: usize) {
        let child = self.find_root(child);
        let parent = self.find_root(parent);
        if child == parent {
            return;
        }
        let child_nodes = self.groups[child].num_nodes;
        self.groups[child].parent = parent;
        self.groups[parent].num_nodes += child_nodes;
        if self.groups[child].anchor_ref.is_some() && self.groups[parent].anchor_ref.is_none() {
            let anchor = self.groups[child].anchor_ref.take();
            let attrs = std::mem::take(&mut self.groups[child].attrs);
            let child_pattern = self.groups[child].pattern;
            let target = &mut self.groups[parent];
            target.anchor_ref = anchor;
            target.attrs = attrs;
            target.pattern = target.pattern.combine(child_pattern);
        }
    }

    /// Checks that every node on every path between `src` and `sink`
    /// satisfies `fcond` and that every traversed edge stays at or below
    /// `Injective`. `src` itself is exempt; reaching `sink` terminates a
    /// path successfully.
    ///
    /// `fcond` receives the graph node and the pattern of its current
    /// group root.
    fn check_path<F>(&mut self, graph: &IndexedGraph, src: usize, sink: usize, fcond: F) -> bool
    where
        F: Fn(&GraphNode, OpPattern) -> bool + Copy,
    {
        let mut visited = HashSet::new();
        for edge in &graph.nodes()[src].outputs {
            if edge.pattern > OpPattern::Injective {
                return false;
            }
            if !self.check_path_(graph, edge.node, sink, fcond, &mut visited) {
                return false;
            }
        }
        true
    }

    fn check_path_<F>(
        &mut self,
        graph: &IndexedGraph,
        src: usize,
        sink: usize,
        fcond: F,
        visited: &mut HashSet<usize>,
    ) -> bool
    where
        F: Fn(&GraphNode, OpPattern) -> bool + Copy,
    {
        if src == sink || visited.contains(&src) {
            return true;
        }
        visited.insert(src);
        let root = self.find_root(src);
        let root_pattern = self.groups[root].pattern;
        let node = &graph.nodes()[src];
        if !fcond(node, root_pattern) {
            return false;
        }
        for edge in &node.outputs {
            if edge.pattern > OpPattern::Injective {
                return false;
            }
            if !self.check_path_(graph, edge.node, sink, fcond, visited) {
                return false;
            }
        }
        true
    }

    /// Size of the group that would result from fusing `child` up into
    /// `dom_parent`: the target root plus the distinct roots of the
    /// child and every interior node, each counted once.
    fn count_fused_nodes_with_new_child(
        &mut self,
        graph: &IndexedGraph,
        child: usize,
        dom_parent: usize,
    ) -> usize {
        let mut roots = HashSet::new();
        let target = self.find_root(dom_parent);
        roots.insert(target);
        let mut visited = HashSet::new();
        self.count_roots_upto_sink(graph, child, dom_parent, &mut visited, &mut roots);
        roots
            .iter()
            .map(|&root| self.groups[root].num_nodes as usize)
            .sum()
    }

    fn count_roots_upto_sink(
        &mut self,
        graph: &IndexedGraph,
        src: usize,
        sink: usize,
        visited: &mut HashSet<usize>,
        roots: &mut HashSet<usize>,
    ) {
        if src == sink || visited.contains(&src) {
            return;
        }
        visited.insert(src);
        let root = self.find_root(src);
        roots.insert(root);
        for edge in &graph.nodes()[src].outputs {
            self.count_roots_upto_sink(graph, edge.node, sink, visited, roots);
        }
    }

    /// Merges `src`, and every interior node on paths from `src` to
    /// `sink`, into `sink`'s group. Returns the surviving root.
    fn commit_fuse(&mut self, graph: &IndexedGraph, src: usize, sink: usize) -> usize {
        let target = self.find_root(sink);
        let mut visited = HashSet::new();
        self.commit_fuse_(graph, src, sink, target, &mut visited);
        target
    }

    fn commit_fuse_(
        &mut self,
        graph: &IndexedGraph,
        src: usize,
        sink: usize,
        target: usize,
        visited: &mut HashSet<usize>,
    ) {
        if src == sink || visited.contains(&src) {
            return;
        }
        visited.insert(src);
        self.merge_from_to(src, target);
        for edge in &graph.nodes()[src].outputs {
            self.commit_fuse_(graph, edge.node, sink, target, visited);
        }
    }

    /// Whether the root of the group holding `dom` corresponds to an
    /// externally referenced graph node.
    fn target_root_is_extern(&mut self, graph: &IndexedGraph, dom: usize) -> bool {
        let root = self.find_root(dom);
        let root_ref = self.groups[root].root_ref;
        graph
            .node_of(root_ref)
            .map(|ix| graph.nodes()[ix].extern_ref)
            .unwrap_or(false)
    }

    fn run_fuse(&mut self, graph: &IndexedGraph, tree: &DominatorTree, phase: usize) {
        let preds = if phase == 2 {
            Some(graph.predecessors())
        } else {
            None
        };

        for index in 0..graph.len() {
            let root = self.find_root(index);
            if self.groups[root].pattern == OpPattern::Opaque {
                continue;
            }
            let Some(dom) = tree.nodes()[index].parent else {
                continue;
            };

            if phase == 2 {
                if graph.nodes()[index].pattern != OpPattern::Tuple {
                    continue;
                }
                if let Some(preds) = &preds {
                    self.fuse_tuple_producers(graph, index, &preds[index]);
                }
                continue;
            }

            let dom_root = self.find_root(dom);
            if dom_root == root {
                continue;
            }
            // A group rooted in an opaque node never absorbs anything.
            if self.groups[dom_root].pattern == OpPattern::Opaque {
                continue;
            }
            // Never fuse into a tuple here; the tuple-flattening phase
            // pulls producers in once the tuple has found its consumer.
            if graph.nodes()[dom].pattern == OpPattern::Tuple {
                continue;
            }
            // Two anchors must never end up in one group.
            if self.groups[root].anchor_ref.is_some() && self.groups[dom_root].anchor_ref.is_some()
            {
                continue;
            }
            let edge_pattern = tree.nodes()[index].pattern;
            if edge_pattern > OpPattern::Injective {
                continue;
            }

            match phase {
                0 => {
                    // Anchor epilogue: pull the dominated consumers of an
                    // anchor group into it, unless any of the involved
                    // nodes is externally observable.
                    if self.groups[root].pattern != OpPattern::OutEWiseFusable {
                        continue;
                    }
                    if graph.nodes()[index].extern_ref {
                        continue;
                    }
                    if self.target_root_is_extern(graph, dom) {
                        continue;
                    }
                    if !self.check_path(graph, index, dom, |node, root_pattern| {
                        root_pattern <= OpPattern::Injective && !node.extern_ref
                    }) {
                        continue;
                    }
                    if self.count_fused_nodes_with_new_child(graph, index, dom)
                        > self.max_fuse_depth
                    {
                        continue;
                    }
                    let target = self.commit_fuse(graph, index, dom);
                    self.groups[target].pattern = OpPattern::OutEWiseFusable;
                    log::debug!(
                        "phase 0: fused node {index} into {dom} (group size {})",
                        self.groups[target].num_nodes,
                    );
                }
                1 => {
                    // Everything that can still move fuses up into its
                    // post-dominator over injective paths. Reductions and
                    // opaque groups stay put.
                    let group_pattern = self.groups[root].pattern;
                    if group_pattern == OpPattern::CommReduce {
                        continue;
                    }
                    if !self.check_path(graph, index, dom, |_, root_pattern| {
                        root_pattern <= OpPattern::Injective
                    }) {
                        continue;
                    }
                    if self.count_fused_nodes_with_new_child(graph, index, dom)
                        > self.max_fuse_depth
                    {
                        continue;
                    }
                    let target = self.commit_fuse(graph, index, dom);
                    self.groups[target].pattern =
                        self.groups[target].pattern.combine(edge_pattern);
                    log::debug!(
                        "phase 1: fused node {index} into {dom} (group size {})",
                        self.groups[target].num_nodes,
                    );
                }
                _ => unreachable!("phase out of range"),
            }
        }
    }

    /// Phase 2: flatten producers into the tuple's group when every path
    /// from the producer to the tuple stays injective.
    ///
    /// The tuple group keeps its pattern, so a tuple already fused into
    /// an injective consumer stays injective; absorbing an anchor turns
    /// the group into an anchor group.
    fn fuse_tuple_producers(&mut self, graph: &IndexedGraph, tuple: usize, producers: &[usize]) {
        for &producer in producers {
            let producer_root = self.find_root(producer);
            let target = self.find_root(tuple);
            if producer_root == target {
                continue;
            }
            let producer_pattern = self.groups[producer_root].pattern;
            if producer_pattern > OpPattern::Injective
                && producer_pattern != OpPattern::OutEWiseFusable
            {
                continue;
            }
            if self.groups[producer_root].anchor_ref.is_some()
                && self.groups[target].anchor_ref.is_some()
            {
                continue;
            }
            if !self.check_path(graph, producer, tuple, |_, root_pattern| {
                root_pattern <= OpPattern::Injective
            }) {
                continue;
            }
            if self.count_fused_nodes_with_new_child(graph, producer, tuple) > self.max_fuse_depth
            {
                continue;
            }
            self.merge_from_to(producer_root, target);
            if self.groups[target].anchor_ref.is_some() {
                self.groups[target].pattern = OpPattern::OutEWiseFusable;
            }
            log::debug!("phase 2: fused producer {producer} into tuple {tuple}");
        }
    }

    fn finish(&mut self, graph: &IndexedGraph) -> Partition {
        let mut assignments = Vec::with_capacity(graph.len());
        let mut ids: HashMap<usize, GroupId> = HashMap::new();
        let mut infos: Vec<GroupInfo> = Vec::new();
        for index in 0..graph.len() {
            let root = self.find_root(index);
            let id = match ids.get(&root) {
                Some(&id) => id,
                None => {
                    let id = GroupId(infos.len() as u32);
                    let group = &self.groups[root];
                    infos.push(GroupInfo {
                        pattern: group.pattern,
                        root: group.root_ref,
                        anchor: group.anchor_ref,
                        attrs: group.attrs.clone(),
                        num_nodes: group.num_nodes,
                    });
                    ids.insert(root, id);
                    id
                }
            };
            assignments.push(id);
        }
        Partition {
            assignments,
            groups: infos,
        }
    }
}
