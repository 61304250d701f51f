//! Expression IR consumed by the opfuse analysis core.
//!
//! An arena-based expression tree for tensor dataflow programs, plus the
//! operator registry that classifies each operator with a fusion pattern.

pub mod arena;
mod display;
mod error;
mod expr;
mod op;
mod types;

pub use arena::{Arena, Handle};
pub use display::{describe_expr, dump_program};
pub use error::IrError;
pub use expr::{Expr, Literal, Program};
pub use op::{OpAttrs, OpDef, OpPattern, OpRegistry};
pub use types::{Bytes, Dim, Scalar, ScalarKind, TensorShape, Ty};
