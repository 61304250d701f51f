#![no_main]

use std::collections::HashSet;

use libfuzzer_sys::fuzz_target;

use opfuse_analysis::{partition, FuseOptions, OptLevel};
use opfuse_ir::{Expr, Handle, OpPattern, OpRegistry, Program, Ty};

fn registry() -> OpRegistry {
    let mut reg = OpRegistry::new();
    reg.register("ew", OpPattern::ElemWise).unwrap();
    reg.register("bc", OpPattern::Broadcast).unwrap();
    reg.register("inj", OpPattern::Injective).unwrap();
    reg.register("red", OpPattern::CommReduce).unwrap();
    reg.register("anchor", OpPattern::OutEWiseFusable).unwrap();
    reg.intern("opq");
    reg
}

const OPS: &[&str] = &["ew", "bc", "inj", "red", "anchor", "opq"];

/// Decode fuzzer bytes into an arbitrary DAG program. Arguments always
/// point at earlier expressions, so the program stays acyclic; the
/// partitioner must never panic on any such input.
fn build_program(data: &[u8], reg: &OpRegistry) -> Option<(Program, Handle<Expr>)> {
    let tensor = Ty::tensor_f32(&[4]);
    let mut prog = Program::new();
    let mut values: Vec<Handle<Expr>> = vec![
        prog.append(Expr::Var { name: "a".into() }, tensor.clone()),
        prog.append(Expr::Var { name: "b".into() }, tensor.clone()),
    ];

    let mut chunks = data.chunks_exact(3);
    for chunk in &mut chunks {
        let [op_byte, arg0, arg1] = [chunk[0], chunk[1], chunk[2]];
        let out = match op_byte % 8 {
            6 => {
                let a = values[arg0 as usize % values.len()];
                let b = values[arg1 as usize % values.len()];
                prog.append(
                    Expr::Tuple { fields: vec![a, b] },
                    Ty::Tuple(vec![tensor.clone(), tensor.clone()]),
                )
            }
            7 => {
                let tup = values[arg0 as usize % values.len()];
                prog.append(
                    Expr::TupleGetItem {
                        tuple: tup,
                        index: arg1 as usize % 2,
                    },
                    tensor.clone(),
                )
            }
            n => {
                let name = OPS[n as usize % OPS.len()];
                let op = reg.find(name).expect("fuzz op registered");
                let callee = prog.append(Expr::Op(op), Ty::Fn);
                let mut args = vec![values[arg0 as usize % values.len()]];
                if n % 2 == 0 {
                    args.push(values[arg1 as usize % values.len()]);
                }
                prog.append(Expr::Call { callee, args }, tensor.clone())
            }
        };
        values.push(out);
        if values.len() > 512 {
            break;
        }
    }

    let result = *values.last()?;
    prog.set_result(result);
    Some((prog, result))
}

fuzz_target!(|data: &[u8]| {
    let reg = registry();
    let Some((prog, _)) = build_program(data, &reg) else {
        return;
    };
    let externals: HashSet<Handle<Expr>> = HashSet::new();

    for level in 0..=3u8 {
        let options = FuseOptions {
            opt_level: OptLevel::from_u8(level).expect("level in range"),
            max_fuse_depth: 5,
        };
        let result = partition(&prog, &reg, &externals, &options)
            .expect("well-formed programs always partition");

        // Cheap structural checks: full coverage and the size bound.
        let mut counts = vec![0u32; result.group_count()];
        for id in result.assignments() {
            counts[id.0 as usize] += 1;
        }
        for (count, info) in counts.iter().zip(result.groups()) {
            assert_eq!(*count, info.num_nodes);
            assert!(info.num_nodes <= 5);
        }
    }
});
