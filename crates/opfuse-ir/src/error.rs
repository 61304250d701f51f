//! Error types for the expression IR.

/// Errors that can occur when constructing programs.
#[derive(Debug, thiserror::Error)]
pub enum IrError {
    /// An operator name was registered twice.
    #[error("operator `{name}` is already registered")]
    DuplicateOp { name: String },
}
