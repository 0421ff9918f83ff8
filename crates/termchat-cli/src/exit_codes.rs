//! Process exit codes.

/// Normal completion, or the interactive session ended at EOF.
pub const RECOVERABLE: u8 = 0;
/// Pipeline, configuration, usage or rendering failure.
pub const UNRECOVERABLE: u8 = 1;
