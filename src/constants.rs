use std::time::Duration;

/// Exit code reported for a process killed on its deadline.
pub const TIMEOUT_EXIT_CODE: i32 = 124;
/// Exit code reported for a process killed by an explicit stop.
pub const KILLED_EXIT_CODE: i32 = 137;
pub const SIGNAL_EXIT_BASE: i32 = 128;

pub const SOURCE_STEM: &str = "main";
pub const BINARY_NAME: &str = "main";
pub const STDIN_FILE_NAME: &str = "input.txt";

/// Characters shown on each side of the first divergence in a diff.
pub const DIFF_CONTEXT_CHARS: usize = 10;

pub const READ_CHUNK_BYTES: usize = 4096;
pub const PUMP_DRAIN_GRACE: Duration = Duration::from_millis(500);
pub const REAPER_INTERVAL: Duration = Duration::from_secs(5);

pub const HEALTH_OK: &str = "ok";
