use std::time::Duration;

/// `/sleep` duration when `ms` is missing or not a non-negative integer.
pub const DEFAULT_SLEEP_MS: u64 = 1_000;

/// Upper bound on `/sleep` so a typo cannot park a handler for hours.
pub const MAX_SLEEP_MS: u64 = 30_000;

/// Pause after a failed `accept` (e.g. out of file descriptors) before retrying.
pub const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(50);

/// Smallest read buffer hyper accepts.
pub const MIN_HEADER_BYTES: usize = 8_192;
