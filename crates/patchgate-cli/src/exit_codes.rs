//! Standard exit codes for CLI operations
//!
//! These exit codes follow Unix conventions and sysexits.h where applicable.

/// General error - unspecified failure
pub const ERROR: i32 = 1;

/// Template error - the patch directive did not parse, evaluate or normalize
pub const TEMPLATE_ERROR: i32 = 3;

/// Patch error - unsupported type, unknown schema type, or rejected patch
pub const PATCH_ERROR: i32 = 4;

/// IO error - file not found, permission denied, etc.
pub const IO_ERROR: i32 = 5;

/// Cluster error - configuration, startup schema refresh, or API failure
pub const CLUSTER_ERROR: i32 = 6;

/// Usage error - invalid input files or options (following sysexits.h convention)
pub const USAGE_ERROR: i32 = 64;
