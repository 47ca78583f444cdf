//! Process exit codes

/// Success - operation completed without errors
pub const SUCCESS: i32 = 0;

/// Fatal error - any failure, including a realization step that could not complete
pub const ERROR: i32 = 1;
