//! Stable exit codes for nightshift CLI commands.

/// Command succeeded.
pub const OK: i32 = 0;
/// Command failed due to broken local plumbing (git, filesystem) or other errors.
pub const ERROR: i32 = 1;
/// Configuration is invalid or a required secret is missing.
pub const CONFIG: i32 = 2;
/// The model service rejected the run or stayed unavailable through retries.
pub const SERVICE: i32 = 3;
