//! Error types for fusion analysis.

/// Errors that can occur while partitioning a program.
#[derive(Debug, thiserror::Error)]
pub enum FuseError {
    /// A back edge was discovered while lowering the expression tree:
    /// the input is not a DAG.
    #[error("back edge at expression [{index}]: the program is not a DAG")]
    CorruptGraph { index: usize },

    /// The fusion configuration is invalid.
    #[error("invalid fusion configuration: {reason}")]
    Config { reason: String },

    /// The program has no result expression to analyze.
    #[error("program has no result expression")]
    EmptyProgram,
}
