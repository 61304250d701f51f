//! Expression tree for tensor dataflow programs.

use crate::arena::{Arena, Handle};
use crate::op::OpDef;
use crate::types::{Scalar, ScalarKind, Ty};

/// A literal constant value.
#[derive(Clone, Copy, Debug)]
pub enum Literal {
    Bool(bool),
    I32(i32),
    U32(u32),
    F32(f32),
    F64(f64),
}

impl Literal {
    /// Returns the scalar type of this literal.
    pub fn scalar(&self) -> Scalar {
        match *self {
            Self::Bool(_) => Scalar::BOOL,
            Self::I32(_) => Scalar::I32,
            Self::U32(_) => Scalar::U32,
            Self::F32(_) => Scalar::F32,
            Self::F64(_) => Scalar {
                kind: ScalarKind::Float,
                width: 8,
            },
        }
    }
}

/// One node of the expression tree.
///
/// A closed enumeration: unknown operator behavior is expressed through
/// the registry pattern of a [`Call`](Expr::Call)ed operator, never
/// through open extension of the tree itself.
#[derive(Clone, Debug)]
pub enum Expr {
    /// A reference to a registered operator, usable as a call target.
    Op(Handle<OpDef>),
    /// A named input value.
    Var { name: String },
    /// A literal constant.
    Constant(Literal),
    /// Application of a callee to arguments.
    Call {
        callee: Handle<Expr>,
        args: Vec<Handle<Expr>>,
    },
    /// Tuple formation.
    Tuple { fields: Vec<Handle<Expr>> },
    /// Projection of one tuple field.
    TupleGetItem { tuple: Handle<Expr>, index: usize },
    /// An anonymous function value.
    Function {
        params: Vec<Handle<Expr>>,
        body: Handle<Expr>,
    },
    /// A let binding scoping `value` as `var` inside `body`.
    Let {
        var: Handle<Expr>,
        value: Handle<Expr>,
        body: Handle<Expr>,
    },
    /// Conditional expression.
    If {
        cond: Handle<Expr>,
        then_branch: Handle<Expr>,
        else_branch: Handle<Expr>,
    },
    /// Pattern match over a scrutinee; arms carry only their bodies here.
    Match {
        scrutinee: Handle<Expr>,
        arms: Vec<Handle<Expr>>,
    },
    /// Allocation of a mutable reference cell.
    RefCreate { value: Handle<Expr> },
    /// Read through a reference cell.
    RefRead { source: Handle<Expr> },
    /// Write through a reference cell.
    RefWrite {
        target: Handle<Expr>,
        value: Handle<Expr>,
    },
}

impl Expr {
    /// Child expressions in left-to-right order.
    ///
    /// This is the walker contract: every traversal in the crate visits
    /// children in exactly this order.
    pub fn children(&self) -> Vec<Handle<Expr>> {
        match *self {
            Expr::Op(_) | Expr::Var { .. } | Expr::Constant(_) => Vec::new(),
            Expr::Call { callee, ref args } => {
                let mut out = Vec::with_capacity(args.len() + 1);
                out.push(callee);
                out.extend_from_slice(args);
                out
            }
            Expr::Tuple { ref fields } => fields.clone(),
            Expr::TupleGetItem { tuple, .. } => vec![tuple],
            Expr::Function { ref params, body } => {
                let mut out = params.clone();
                out.push(body);
                out
            }
            Expr::Let { var, value, body } => vec![var, value, body],
            Expr::If {
                cond,
                then_branch,
                else_branch,
            } => vec![cond, then_branch, else_branch],
            Expr::Match {
                scrutinee,
                ref arms,
            } => {
                let mut out = Vec::with_capacity(arms.len() + 1);
                out.push(scrutinee);
                out.extend_from_slice(arms);
                out
            }
            Expr::RefCreate { value } => vec![value],
            Expr::RefRead { source } => vec![source],
            Expr::RefWrite { target, value } => vec![target, value],
        }
    }

    /// Short name of the variant, used in dumps.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Expr::Op(_) => "Op",
            Expr::Var { .. } => "Var",
            Expr::Constant(_) => "Constant",
            Expr::Call { .. } => "Call",
            Expr::Tuple { .. } => "Tuple",
            Expr::TupleGetItem { .. } => "TupleGetItem",
            Expr::Function { .. } => "Function",
            Expr::Let { .. } => "Let",
            Expr::If { .. } => "If",
            Expr::Match { .. } => "Match",
            Expr::RefCreate { .. } => "RefCreate",
            Expr::RefRead { .. } => "RefRead",
            Expr::RefWrite { .. } => "RefWrite",
        }
    }
}

/// A dataflow program: an expression arena, per-expression types, and a
/// distinguished result expression.
///
/// The arena is append-only, so children always precede their parents
/// and a freshly built program is a DAG by construction.
#[derive(Clone, Debug, Default)]
pub struct Program {
    /// Expression storage. Public so that tests and tools can inspect or
    /// patch nodes in place.
    pub exprs: Arena<Expr>,
    types: Vec<Ty>,
    result: Option<Handle<Expr>>,
}

impl Program {
    /// Creates an empty program.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an expression with its type and returns its handle.
    pub fn append(&mut self, expr: Expr, ty: Ty) -> Handle<Expr> {
        let handle = self.exprs.alloc(expr);
        self.types.push(ty);
        handle
    }

    /// Marks an expression as the program result.
    pub fn set_result(&mut self, result: Handle<Expr>) {
        self.result = Some(result);
    }

    /// The program result, if one has been set.
    pub fn result(&self) -> Option<Handle<Expr>> {
        self.result
    }

    /// The type of an expression.
    pub fn ty(&self, handle: Handle<Expr>) -> &Ty {
        &self.types[handle.index()]
    }

    /// Number of expressions in the program.
    pub fn len(&self) -> usize {
        self.exprs.len()
    }

    /// Returns `true` if the program holds no expressions.
    pub fn is_empty(&self) -> bool {
        self.exprs.is_empty()
    }
}
