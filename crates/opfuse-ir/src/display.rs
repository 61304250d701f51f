//! Display implementations and text dump for debugging.

use std::fmt;
use std::fmt::Write as _;

use crate::expr::{Expr, Literal, Program};
use crate::op::OpRegistry;
use crate::types::{Dim, Scalar, ScalarKind, TensorShape, Ty};

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ScalarKind::Bool => write!(f, "bool"),
            ScalarKind::Sint => write!(f, "i{}", self.width * 8),
            ScalarKind::Uint => write!(f, "u{}", self.width * 8),
            ScalarKind::Float => write!(f, "f{}", self.width * 8),
            ScalarKind::BFloat => write!(f, "bf{}", self.width * 8),
        }
    }
}

impl fmt::Display for Dim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dim::Fixed(n) => write!(f, "{n}"),
            Dim::Dynamic(Some(name)) => write!(f, "{name}"),
            Dim::Dynamic(None) => write!(f, "?"),
        }
    }
}

impl fmt::Display for TensorShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, dim) in self.dims.iter().enumerate() {
            if i > 0 {
                write!(f, "x")?;
            }
            write!(f, "{dim}")?;
        }
        write!(f, "]")
    }
}

impl fmt::Display for Ty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ty::Tensor { scalar, shape } => write!(f, "tensor<{scalar}, {shape}>"),
            Ty::Tuple(fields) => {
                write!(f, "(")?;
                for (i, field) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{field}")?;
                }
                write!(f, ")")
            }
            Ty::Fn => write!(f, "fn"),
            Ty::Ref(inner) => write!(f, "ref<{inner}>"),
            Ty::Unknown => write!(f, "?"),
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Bool(v) => write!(f, "{v}"),
            Literal::I32(v) => write!(f, "{v}"),
            Literal::U32(v) => write!(f, "{v}u"),
            Literal::F32(v) => write!(f, "{v}f"),
            Literal::F64(v) => write!(f, "{v}"),
        }
    }
}

/// One-line description of an expression, resolving operator names.
pub fn describe_expr(program: &Program, registry: &OpRegistry, expr: &Expr) -> String {
    match expr {
        Expr::Op(op) => format!("op {}", registry.get(*op).name),
        Expr::Var { name } => format!("var {name}"),
        Expr::Constant(lit) => format!("const {lit}"),
        Expr::Call { callee, args } => {
            let callee_name = match &program.exprs[*callee] {
                Expr::Op(op) => registry.get(*op).name.clone(),
                other => format!("{}{:?}", other.kind_name(), callee),
            };
            format!("call {callee_name}/{}", args.len())
        }
        Expr::Tuple { fields } => format!("tuple/{}", fields.len()),
        Expr::TupleGetItem { index, .. } => format!("tuple.{index}"),
        other => other.kind_name().to_string(),
    }
}

/// Dumps the whole program as text, one expression per line.
pub fn dump_program(program: &Program, registry: &OpRegistry) -> String {
    let mut out = String::new();
    for (handle, expr) in program.exprs.iter() {
        let marker = if program.result() == Some(handle) {
            " <- result"
        } else {
            ""
        };
        let _ = writeln!(
            out,
            "{:?}: {} : {}{}",
            handle,
            describe_expr(program, registry, expr),
            program.ty(handle),
            marker,
        );
    }
    out
}
