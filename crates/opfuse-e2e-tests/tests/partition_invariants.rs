//! Structural invariants of the partition, checked on seeded random
//! programs and on the regression cases around external references.

mod common;

use std::collections::HashSet;

use common::{call, check_invariants, random_program, standard_registry};
use opfuse_analysis::{partition, FuseOptions, IndexedGraph, OptLevel};
use opfuse_ir::{Expr, Handle, OpPattern, Program, Ty};

#[test]
fn random_programs_uphold_invariants_at_every_level() {
    for seed in 0..24u64 {
        let (prog, reg) = random_program(seed, 18);
        let externals: HashSet<Handle<Expr>> = HashSet::new();
        let graph = IndexedGraph::build(&prog, &reg, &externals).unwrap();

        for level in 0..=3u8 {
            let options = FuseOptions {
                opt_level: OptLevel::from_u8(level).unwrap(),
                max_fuse_depth: 6,
            };
            let result = partition(&prog, &reg, &externals, &options).unwrap();
            check_invariants(&graph, &result, options.max_fuse_depth);
        }
    }
}

#[test]
fn random_programs_partition_idempotently() {
    for seed in 0..12u64 {
        let (prog, reg) = random_program(seed.wrapping_mul(7919), 14);
        let externals: HashSet<Handle<Expr>> = HashSet::new();
        let options = FuseOptions::default();
        let first = partition(&prog, &reg, &externals, &options).unwrap();
        let second = partition(&prog, &reg, &externals, &options).unwrap();
        assert_eq!(first.assignments(), second.assignments());
        assert_eq!(first.group_count(), second.group_count());
    }
}

#[test]
fn marked_external_nodes_survive_with_invariants_intact() {
    for seed in 30..40u64 {
        let (prog, reg) = random_program(seed, 16);
        // Mark a few reachable expressions as externally referenced.
        let externals: HashSet<Handle<Expr>> = prog
            .exprs
            .iter()
            .filter(|(h, _)| h.index() % 5 == 0)
            .map(|(h, _)| h)
            .collect();
        let graph = IndexedGraph::build(&prog, &reg, &externals).unwrap();
        let options = FuseOptions {
            max_fuse_depth: 8,
            ..FuseOptions::default()
        };
        let result = partition(&prog, &reg, &externals, &options).unwrap();
        check_invariants(&graph, &result, options.max_fuse_depth);
    }
}

/// An anchor group whose output is externally referenced is left alone
/// by the anchor phase but still absorbs its epilogue afterwards, and
/// the anchor stays queryable on the surviving root.
#[test]
fn extern_anchor_keeps_identity_in_phase1() {
    let reg = standard_registry();
    let mut prog = Program::new();
    let t = Ty::tensor_f32(&[-1, 8, 8, 16]);
    let x = prog.append(
        Expr::Var { name: "x".into() },
        Ty::tensor_f32(&[-1, 8, 8, 3]),
    );
    let w = prog.append(
        Expr::Var { name: "w".into() },
        Ty::tensor_f32(&[3, 3, 3, 16]),
    );
    let conv = call(&mut prog, &reg, "conv2d", vec![x, w], t.clone());
    let relu = call(&mut prog, &reg, "relu", vec![conv], t.clone());
    let out = call(&mut prog, &reg, "tanh", vec![relu], t);
    prog.set_result(out);

    // The convolution output itself is observable from outside.
    let mut externals = HashSet::new();
    externals.insert(conv);

    let result = partition(&prog, &reg, &externals, &FuseOptions::default()).unwrap();
    let graph = IndexedGraph::build(&prog, &reg, &externals).unwrap();

    let conv_ix = graph.node_of(conv).unwrap();
    let relu_ix = graph.node_of(relu).unwrap();
    let out_ix = graph.node_of(out).unwrap();
    let group = result.group_of(conv_ix);
    assert_eq!(result.group_of(relu_ix), group);
    assert_eq!(result.group_of(out_ix), group);

    let info = result.info(group);
    assert_eq!(info.anchor, Some(conv));
    assert_eq!(info.pattern, OpPattern::OutEWiseFusable);
    check_invariants(&graph, &result, FuseOptions::default().max_fuse_depth);
}

/// With the fuse depth forced to 1, nothing ever merges.
#[test]
fn unit_fuse_depth_forces_singletons() {
    let (prog, reg) = random_program(99, 12);
    let externals: HashSet<Handle<Expr>> = HashSet::new();
    let options = FuseOptions {
        max_fuse_depth: 1,
        ..FuseOptions::default()
    };
    let result = partition(&prog, &reg, &externals, &options).unwrap();
    for info in result.groups() {
        assert_eq!(info.num_nodes, 1);
    }
}

#[test]
fn zero_fuse_depth_is_a_config_error() {
    let (prog, reg) = random_program(7, 6);
    let externals: HashSet<Handle<Expr>> = HashSet::new();
    let options = FuseOptions {
        max_fuse_depth: 0,
        ..FuseOptions::default()
    };
    assert!(partition(&prog, &reg, &externals, &options).is_err());
}
