//! Fusion configuration.

use crate::error::FuseError;

/// Optimization level of the fusion pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OptLevel {
    /// Fusion disabled; every node stays in a singleton group.
    O0,
    /// Anchor epilogue fusion and injective-chain fusion.
    O1,
    /// Additionally flatten producers into tuple-rooted groups.
    O2,
    /// Reserved; behaves like `O2`.
    O3,
}

impl OptLevel {
    /// Number of fusion phases the level runs.
    pub fn phases(self) -> usize {
        match self {
            OptLevel::O0 => 0,
            OptLevel::O1 => 2,
            OptLevel::O2 | OptLevel::O3 => 3,
        }
    }

    /// Parses a numeric level.
    pub fn from_u8(level: u8) -> Result<Self, FuseError> {
        match level {
            0 => Ok(OptLevel::O0),
            1 => Ok(OptLevel::O1),
            2 => Ok(OptLevel::O2),
            3 => Ok(OptLevel::O3),
            other => Err(FuseError::Config {
                reason: format!("opt level {other} out of range 0..=3"),
            }),
        }
    }
}

/// Options of one partition run.
#[derive(Clone, Debug)]
pub struct FuseOptions {
    /// Which fusion phases run.
    pub opt_level: OptLevel,
    /// Hard upper bound on the number of nodes in any group.
    pub max_fuse_depth: usize,
}

impl Default for FuseOptions {
    fn default() -> Self {
        Self {
            opt_level: OptLevel::O2,
            max_fuse_depth: 256,
        }
    }
}

impl FuseOptions {
    /// Validates the options.
    ///
    /// # Errors
    ///
    /// [`FuseError::Config`] if `max_fuse_depth` is zero.
    pub fn validate(&self) -> Result<(), FuseError> {
        if self.max_fuse_depth == 0 {
            return Err(FuseError::Config {
                reason: "max_fuse_depth must be at least 1".into(),
            });
        }
        Ok(())
    }
}
