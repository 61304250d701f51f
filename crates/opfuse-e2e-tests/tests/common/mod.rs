//! Shared helpers for the end-to-end tests: program builders, a seeded
//! random DAG generator, a reference post-dominator implementation, and
//! structural invariant checks.

use std::collections::{HashMap, HashSet};

use opfuse_analysis::{IndexedGraph, Partition};
use opfuse_ir::{Expr, Handle, OpPattern, OpRegistry, Program, Ty};

/// Registry with one operator of every pattern kind.
#[allow(dead_code)]
pub fn standard_registry() -> OpRegistry {
    let mut reg = OpRegistry::new();
    reg.register("relu", OpPattern::ElemWise).unwrap();
    reg.register("tanh", OpPattern::ElemWise).unwrap();
    reg.register("elu", OpPattern::ElemWise).unwrap();
    reg.register("exp", OpPattern::ElemWise).unwrap();
    reg.register("add", OpPattern::Broadcast).unwrap();
    reg.register("mul", OpPattern::Broadcast).unwrap();
    reg.register("reshape", OpPattern::Injective).unwrap();
    reg.register("transpose", OpPattern::Injective).unwrap();
    reg.register("concat", OpPattern::Injective).unwrap();
    reg.register("sum", OpPattern::CommReduce).unwrap();
    reg.register("conv2d", OpPattern::OutEWiseFusable).unwrap();
    reg.register("matmul", OpPattern::OutEWiseFusable).unwrap();
    reg.intern("vendor.blackbox");
    reg
}

/// Appends a call to a registered operator.
#[allow(dead_code)]
pub fn call(
    prog: &mut Program,
    reg: &OpRegistry,
    name: &str,
    args: Vec<Handle<Expr>>,
    ty: Ty,
) -> Handle<Expr> {
    let op = reg.find(name).expect("operator registered");
    let callee = prog.append(Expr::Op(op), Ty::Fn);
    prog.append(Expr::Call { callee, args }, ty)
}

/// Small deterministic PRNG so random-graph tests stay reproducible.
#[allow(dead_code)]
pub struct Lcg(u64);

#[allow(dead_code)]
impl Lcg {
    pub fn new(seed: u64) -> Self {
        Self(seed.wrapping_mul(0x9e37_79b9).wrapping_add(1))
    }

    pub fn next_u32(&mut self) -> u32 {
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        (self.0 >> 33) as u32
    }

    pub fn below(&mut self, n: usize) -> usize {
        self.next_u32() as usize % n
    }
}

/// Builds a random layered DAG program with the given number of
/// operator applications. Every dangling value is gathered into a final
/// tuple so the whole graph stays reachable from the result.
#[allow(dead_code)]
pub fn random_program(seed: u64, ops: usize) -> (Program, OpRegistry) {
    let reg = standard_registry();
    let mut rng = Lcg::new(seed);
    let mut prog = Program::new();
    let tensor = Ty::tensor_f32(&[4]);

    let mut values: Vec<Handle<Expr>> = Vec::new();
    let mut consumed: HashSet<Handle<Expr>> = HashSet::new();
    for i in 0..2 + rng.below(3) {
        values.push(prog.append(
            Expr::Var {
                name: format!("x{i}"),
            },
            tensor.clone(),
        ));
    }

    const UNARY: &[&str] = &["relu", "tanh", "elu", "reshape", "sum", "vendor.blackbox"];
    const BINARY: &[&str] = &["add", "mul", "conv2d", "matmul"];

    for _ in 0..ops {
        let roll = rng.below(8);
        let out = if roll == 0 && values.len() >= 2 {
            // Tuple of two values feeding a concat.
            let a = values[rng.below(values.len())];
            let b = values[rng.below(values.len())];
            let tup = prog.append(
                Expr::Tuple { fields: vec![a, b] },
                Ty::Tuple(vec![tensor.clone(), tensor.clone()]),
            );
            consumed.insert(a);
            consumed.insert(b);
            call(&mut prog, &reg, "concat", vec![tup], tensor.clone())
        } else if roll < 5 || values.len() < 2 {
            let name = UNARY[rng.below(UNARY.len())];
            let a = values[rng.below(values.len())];
            consumed.insert(a);
            call(&mut prog, &reg, name, vec![a], tensor.clone())
        } else {
            let name = BINARY[rng.below(BINARY.len())];
            let a = values[rng.below(values.len())];
            let b = values[rng.below(values.len())];
            consumed.insert(a);
            consumed.insert(b);
            call(&mut prog, &reg, name, vec![a, b], tensor.clone())
        };
        values.push(out);
    }

    let sinks: Vec<Handle<Expr>> = values
        .iter()
        .copied()
        .filter(|v| !consumed.contains(v))
        .collect();
    let result = if sinks.len() == 1 {
        sinks[0]
    } else {
        let fields_ty = Ty::Tuple(vec![tensor.clone(); sinks.len()]);
        prog.append(Expr::Tuple { fields: sinks }, fields_ty)
    };
    prog.set_result(result);
    (prog, reg)
}

/// Reference immediate post-dominators, computed by the iterative
/// dominance algorithm on the reversed graph with a virtual exit that
/// unifies all sinks.
#[allow(dead_code)]
pub fn reference_ipdom(graph: &IndexedGraph) -> Vec<Option<usize>> {
    const UNDEFINED: usize = usize::MAX;
    let n = graph.len();
    let virtual_exit = n;
    let mut ipdom = vec![UNDEFINED; n + 1];
    ipdom[virtual_exit] = virtual_exit;
    for node in graph.nodes() {
        if node.outputs.is_empty() {
            ipdom[node.index] = virtual_exit;
        }
    }

    // Consumers carry higher post-DFS indices, so descending index order
    // is a reverse postorder of the reversed graph.
    let mut changed = true;
    while changed {
        changed = false;
        for u in (0..n).rev() {
            let node = &graph.nodes()[u];
            if node.outputs.is_empty() {
                continue;
            }
            let mut new_idom = UNDEFINED;
            for edge in &node.outputs {
                if ipdom[edge.node] == UNDEFINED {
                    continue;
                }
                new_idom = if new_idom == UNDEFINED {
                    edge.node
                } else {
                    intersect(&ipdom, new_idom, edge.node)
                };
            }
            if new_idom != UNDEFINED && ipdom[u] != new_idom {
                ipdom[u] = new_idom;
                changed = true;
            }
        }
    }

    (0..n)
        .map(|u| {
            if graph.nodes()[u].outputs.is_empty() {
                return None;
            }
            match ipdom[u] {
                UNDEFINED => None,
                v if v == virtual_exit => None,
                v => Some(v),
            }
        })
        .collect()
}

/// Walks two dominator chains toward the virtual exit until they meet.
/// Parents always carry higher indices, so the smaller cursor climbs.
#[allow(dead_code)]
fn intersect(ipdom: &[usize], mut a: usize, mut b: usize) -> usize {
    while a != b {
        while a < b {
            a = ipdom[a];
        }
        while b < a {
            b = ipdom[b];
        }
    }
    a
}

/// Asserts the structural invariants every partition must uphold.
#[allow(dead_code)]
pub fn check_invariants(graph: &IndexedGraph, partition: &Partition, max_fuse_depth: usize) {
    // Coverage: one group per node.
    assert_eq!(partition.len(), graph.len());

    // Disjointness and size accounting: the recorded member count of
    // each group matches the actual assignment count.
    let mut member_counts: HashMap<u32, u32> = HashMap::new();
    for id in partition.assignments() {
        *member_counts.entry(id.0).or_default() += 1;
    }
    for (gid, info) in partition.groups().iter().enumerate() {
        let members = member_counts.get(&(gid as u32)).copied().unwrap_or(0);
        assert_eq!(
            info.num_nodes, members,
            "group {gid} records {} nodes but has {members} members",
            info.num_nodes,
        );
        // Size bound.
        assert!(
            (info.num_nodes as usize) <= max_fuse_depth,
            "group {gid} exceeds the fuse depth bound",
        );
    }

    for (gid, info) in partition.groups().iter().enumerate() {
        let members: Vec<usize> = partition
            .assignments()
            .iter()
            .enumerate()
            .filter(|(_, id)| id.0 as usize == gid)
            .map(|(ix, _)| ix)
            .collect();

        // Pattern monotonicity: the group pattern is at least the
        // smallest member pattern.
        let min_member = members
            .iter()
            .map(|&ix| graph.nodes()[ix].pattern)
            .min()
            .expect("group has members");
        assert!(info.pattern >= min_member);

        // Anchor uniqueness: at most one anchor-patterned member, and it
        // is the recorded anchor.
        let anchors: Vec<usize> = members
            .iter()
            .copied()
            .filter(|&ix| graph.nodes()[ix].pattern == OpPattern::OutEWiseFusable)
            .collect();
        assert!(anchors.len() <= 1, "group {gid} holds {} anchors", anchors.len());
        if let Some(&anchor_ix) = anchors.first() {
            assert_eq!(info.anchor, Some(graph.nodes()[anchor_ix].expr));
            assert_eq!(info.pattern, OpPattern::OutEWiseFusable);
        } else {
            assert_eq!(info.anchor, None);
        }

        // Opaque isolation.
        for &ix in &members {
            if graph.nodes()[ix].pattern == OpPattern::Opaque {
                assert_eq!(info.num_nodes, 1, "opaque node {ix} fused into group {gid}");
            }
        }
    }
}
