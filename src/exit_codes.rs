//! Process exit codes

/// Normal termination
pub const SUCCESS: i32 = 0;

/// Unclassified failure (bind error, runtime failure, ...)
pub const GENERAL_ERROR: i32 = 1;

/// Configuration could not be loaded or is invalid
pub const CONFIG_ERROR: i32 = 2;
