//! Stable exit codes for `ledger-steps` commands.

/// Command succeeded; for `run`, every scenario passed.
pub const OK: i32 = 0;
/// Invalid config, feature file or arguments, or any other error.
pub const INVALID: i32 = 1;
/// `run` finished but at least one scenario failed.
pub const FAILED: i32 = 2;
