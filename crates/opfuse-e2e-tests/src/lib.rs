//! End-to-end tests for the opfuse pipeline. See `tests/`.
