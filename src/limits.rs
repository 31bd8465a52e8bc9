//! Buffer sizing and timeout configuration.
//!
//! # Memory
//!
//! Each [`Connection`](crate::Connection) pre-allocates a read buffer and a
//! write buffer sized from [`BufferLimits`]. spec.md recommends a 2 KiB
//! minimum and 16 KiB typical read buffer; the defaults below follow that
//! recommendation.

use std::time::Duration;

/// Per-connection buffer capacities.
#[derive(Debug, Clone, Copy)]
pub struct BufferLimits {
    /// Capacity of the raw-bytes read buffer (default: `16 KiB`).
    pub read_capacity: usize,
    /// Capacity of the write buffer the caller's writes accumulate into
    /// before `flush_write` drains it (default: `16 KiB`).
    pub write_capacity: usize,
    /// Capacity of the scratch buffer used by the compression codec
    /// (default: `8 KiB`). Only allocated when `compression != Identity`.
    pub compression_work_capacity: usize,
}

impl Default for BufferLimits {
    fn default() -> Self {
        Self {
            read_capacity: 16 * 1024,
            write_capacity: 16 * 1024,
            compression_work_capacity: 8 * 1024,
        }
    }
}

/// Timeout and wait-budget configuration.
///
/// `timeout_secs` is the caller-facing knob (spec.md's "floating point
/// seconds; 0 means unbounded"); the *effective* per-wait budget handed to
/// `wait_readable` is derived from it and from the blocking flag:
///
/// - blocking: `min(timeout * 1000, 60_000)` ms (0 ⇒ 60_000 ms)
/// - non-blocking: fixed `10_000` ms
#[derive(Debug, Clone, Copy)]
pub struct TimeoutConfig {
    /// Caller-configured timeout in seconds. `0.0` means unbounded (capped
    /// at the blocking default below, since an async task cannot truly wait
    /// forever without starving its runtime).
    pub timeout_secs: f64,
    pub(crate) blocking: bool,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 0.0,
            blocking: true,
        }
    }
}

pub(crate) const BLOCKING_DEFAULT_MS: u64 = 60_000;
const NON_BLOCKING_MS: u64 = 10_000;

impl TimeoutConfig {
    /// The wait budget handed to `wait_readable`, per spec.md §3.
    #[inline]
    pub fn wait_budget(&self) -> Duration {
        if self.blocking {
            if self.timeout_secs <= 0.0 {
                Duration::from_millis(BLOCKING_DEFAULT_MS)
            } else {
                let ms = (self.timeout_secs * 1000.0) as u64;
                Duration::from_millis(ms.min(BLOCKING_DEFAULT_MS))
            }
        } else {
            Duration::from_millis(NON_BLOCKING_MS)
        }
    }

    #[inline]
    pub(crate) fn set_blocking(&mut self, blocking: bool) {
        self.blocking = blocking;
    }
}
