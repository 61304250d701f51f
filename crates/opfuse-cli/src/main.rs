//! fusedump: inspect the fusion pipeline on built-in demo programs.

use std::collections::HashSet;
use std::process::ExitCode;

use clap::Parser;
use miette::IntoDiagnostic;

use opfuse_analysis::{DominatorTree, FuseOptions, GraphPartitioner, IndexedGraph, OptLevel};
use opfuse_ir::{dump_program, Expr, Handle, OpAttrs, OpPattern, OpRegistry, Program, Ty};

/// opfuse operator fusion analysis dump tool
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Demo program to analyze
    #[arg(short, long, default_value = "conv-bias-relu", value_parser = parse_demo)]
    demo: Demo,

    /// Optimization level: 0, 1, 2, or 3
    #[arg(long, default_value = "2", value_parser = parse_opt_level)]
    opt_level: OptLevel,

    /// Maximum number of operators in one fused group
    #[arg(long, default_value_t = 256)]
    max_fuse_depth: usize,

    /// Pipeline stage to print: program, graph, dom, groups, or all
    #[arg(long, default_value = "all", value_parser = parse_stage)]
    stage: Stage,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Demo {
    ElemwiseChain,
    ConvBiasRelu,
    Diamond,
    OpaqueBarrier,
    ConcatTuple,
    LongChain,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Stage {
    Program,
    Graph,
    Dom,
    Groups,
    All,
}

fn parse_demo(s: &str) -> Result<Demo, String> {
    match s {
        "elemwise-chain" => Ok(Demo::ElemwiseChain),
        "conv-bias-relu" => Ok(Demo::ConvBiasRelu),
        "diamond" => Ok(Demo::Diamond),
        "opaque-barrier" => Ok(Demo::OpaqueBarrier),
        "concat-tuple" => Ok(Demo::ConcatTuple),
        "long-chain" => Ok(Demo::LongChain),
        _ => Err(format!(
            "unknown demo '{s}', expected elemwise-chain, conv-bias-relu, diamond, \
             opaque-barrier, concat-tuple, or long-chain"
        )),
    }
}

fn parse_opt_level(s: &str) -> Result<OptLevel, String> {
    let level: u8 = s
        .parse()
        .map_err(|_| format!("invalid optimization level '{s}'"))?;
    OptLevel::from_u8(level).map_err(|e| e.to_string())
}

fn parse_stage(s: &str) -> Result<Stage, String> {
    match s {
        "program" => Ok(Stage::Program),
        "graph" => Ok(Stage::Graph),
        "dom" => Ok(Stage::Dom),
        "groups" => Ok(Stage::Groups),
        "all" => Ok(Stage::All),
        _ => Err(format!(
            "unknown stage '{s}', expected program, graph, dom, groups, or all"
        )),
    }
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err:?}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> miette::Result<()> {
    env_logger::try_init().ok();
    let cli = Cli::parse();

    let (program, registry) = build_demo(cli.demo);
    let options = FuseOptions {
        opt_level: cli.opt_level,
        max_fuse_depth: cli.max_fuse_depth,
    };
    options.validate().into_diagnostic()?;

    let externals: HashSet<Handle<Expr>> = HashSet::new();
    let graph = IndexedGraph::build(&program, &registry, &externals).into_diagnostic()?;
    let tree = DominatorTree::build(&graph);
    let mut partitioner = GraphPartitioner::new(options.opt_level, options.max_fuse_depth);
    let partition = partitioner.run(&program, &registry, &graph, &tree);

    if matches!(cli.stage, Stage::Program | Stage::All) {
        println!("== program ==");
        print!("{}", dump_program(&program, &registry));
    }
    if matches!(cli.stage, Stage::Graph | Stage::All) {
        println!("== indexed forward graph ==");
        print!("{}", graph.dump(&program, &registry));
    }
    if matches!(cli.stage, Stage::Dom | Stage::All) {
        println!("== post-dominator tree ==");
        print!("{}", tree.dump());
    }
    if matches!(cli.stage, Stage::Groups | Stage::All) {
        println!("== fusion groups ==");
        print!("{partition}");
    }
    Ok(())
}

fn standard_registry() -> OpRegistry {
    let mut reg = OpRegistry::new();
    let mut conv_attrs = OpAttrs::new();
    conv_attrs.set("kernel", "3x3");
    conv_attrs.set("stride", "1");
    reg.register_with_attrs("conv2d", OpPattern::OutEWiseFusable, conv_attrs)
        .expect("fresh registry");
    reg.register("add", OpPattern::Broadcast).expect("fresh registry");
    reg.register("relu", OpPattern::ElemWise).expect("fresh registry");
    reg.register("tanh", OpPattern::ElemWise).expect("fresh registry");
    reg.register("elu", OpPattern::ElemWise).expect("fresh registry");
    reg.register("concat", OpPattern::Injective).expect("fresh registry");
    reg.intern("vendor.blackbox");
    reg
}

fn call(
    prog: &mut Program,
    reg: &OpRegistry,
    name: &str,
    args: Vec<Handle<Expr>>,
    ty: Ty,
) -> Handle<Expr> {
    let op = reg.find(name).expect("demo operator registered");
    let callee = prog.append(Expr::Op(op), Ty::Fn);
    prog.append(Expr::Call { callee, args }, ty)
}

fn build_demo(demo: Demo) -> (Program, OpRegistry) {
    let reg = standard_registry();
    let mut prog = Program::new();
    match demo {
        Demo::ElemwiseChain => {
            let mut cur = prog.append(Expr::Var { name: "x".into() }, Ty::tensor_f32(&[-1, 64]));
            for _ in 0..3 {
                cur = call(&mut prog, &reg, "relu", vec![cur], Ty::tensor_f32(&[-1, 64]));
            }
            prog.set_result(cur);
        }
        Demo::ConvBiasRelu => {
            let x = prog.append(
                Expr::Var { name: "x".into() },
                Ty::tensor_f32(&[-1, 32, 32, 3]),
            );
            let w = prog.append(
                Expr::Var { name: "w".into() },
                Ty::tensor_f32(&[3, 3, 3, 16]),
            );
            let b = prog.append(Expr::Var { name: "b".into() }, Ty::tensor_f32(&[16]));
            let out_ty = Ty::tensor_f32(&[-1, 32, 32, 16]);
            let conv = call(&mut prog, &reg, "conv2d", vec![x, w], out_ty.clone());
            let add = call(&mut prog, &reg, "add", vec![conv, b], out_ty.clone());
            let relu = call(&mut prog, &reg, "relu", vec![add], out_ty);
            prog.set_result(relu);
        }
        Demo::Diamond => {
            let x = prog.append(Expr::Var { name: "x".into() }, Ty::tensor_f32(&[-1, 64]));
            let relu = call(&mut prog, &reg, "relu", vec![x], Ty::tensor_f32(&[-1, 64]));
            let tanh = call(&mut prog, &reg, "tanh", vec![x], Ty::tensor_f32(&[-1, 64]));
            let add = call(
                &mut prog,
                &reg,
                "add",
                vec![relu, tanh],
                Ty::tensor_f32(&[-1, 64]),
            );
            prog.set_result(add);
        }
        Demo::OpaqueBarrier => {
            let x = prog.append(
                Expr::Var { name: "x".into() },
                Ty::tensor_f32(&[-1, 32, 32, 3]),
            );
            let w = prog.append(
                Expr::Var { name: "w".into() },
                Ty::tensor_f32(&[3, 3, 3, 16]),
            );
            let out_ty = Ty::tensor_f32(&[-1, 32, 32, 16]);
            let conv = call(&mut prog, &reg, "conv2d", vec![x, w], out_ty.clone());
            let opq = call(&mut prog, &reg, "vendor.blackbox", vec![conv], out_ty.clone());
            let relu = call(&mut prog, &reg, "relu", vec![opq], out_ty);
            prog.set_result(relu);
        }
        Demo::ConcatTuple => {
            let x = prog.append(Expr::Var { name: "x".into() }, Ty::tensor_f32(&[-1, 64]));
            let y = prog.append(Expr::Var { name: "y".into() }, Ty::tensor_f32(&[-1, 64]));
            let ex = call(&mut prog, &reg, "elu", vec![x], Ty::tensor_f32(&[-1, 64]));
            let ey = call(&mut prog, &reg, "elu", vec![y], Ty::tensor_f32(&[-1, 64]));
            let tup_ty = Ty::Tuple(vec![
                Ty::tensor_f32(&[-1, 64]),
                Ty::tensor_f32(&[-1, 64]),
            ]);
            let tup = prog.append(Expr::Tuple { fields: vec![ex, ey] }, tup_ty);
            let cat = call(&mut prog, &reg, "concat", vec![tup], Ty::tensor_f32(&[-1, 128]));
            prog.set_result(cat);
        }
        Demo::LongChain => {
            let mut cur = prog.append(Expr::Var { name: "x".into() }, Ty::tensor_f32(&[-1, 64]));
            for i in 0..10 {
                let name = if i % 2 == 0 { "relu" } else { "tanh" };
                cur = call(&mut prog, &reg, name, vec![cur], Ty::tensor_f32(&[-1, 64]));
            }
            prog.set_result(cur);
        }
    }
    (prog, reg)
}
