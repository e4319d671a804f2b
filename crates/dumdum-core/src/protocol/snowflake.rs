//! Snowflake message ids.
//!
//! ```text
//!  63 62                                        19      12           0
//!  ┌─┬──────────────────────────────────────────┬───────┬────────────┐
//!  │0│ Unix timestamp, milliseconds (44 bits)   │pid (7)│counter (12)│
//!  └─┴──────────────────────────────────────────┴───────┴────────────┘
//! ```
//!
//! Ids sort by creation time. The timestamp comes from the system clock,
//! so ids go backwards if the clock does; that is accepted.

use crate::error::{Error, Result};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;

/// Bits holding the millisecond timestamp.
pub const TIMESTAMP_BITS: u32 = 44;

/// Bits holding the process id.
pub const PROCESS_ID_BITS: u32 = 7;

/// Bits holding the per-process counter.
pub const INCREMENT_BITS: u32 = 12;

const TIMESTAMP_SHIFT: u32 = PROCESS_ID_BITS + INCREMENT_BITS;
const TIMESTAMP_MASK: u64 = (1 << TIMESTAMP_BITS) - 1;
const PROCESS_ID_MASK: u64 = (1 << PROCESS_ID_BITS) - 1;
const INCREMENT_MASK: u64 = (1 << INCREMENT_BITS) - 1;

/// Build an id from its parts. `pid` and `increment` wrap to their widths.
pub fn compose(timestamp_ms: u64, pid: u32, increment: u64) -> Result<u64> {
    if timestamp_ms > TIMESTAMP_MASK {
        return Err(Error::InvalidArgument(format!(
            "timestamp {} out of bounds (are we in 2527?)",
            timestamp_ms
        )));
    }
    let pid = u64::from(pid) & PROCESS_ID_MASK;
    let increment = increment & INCREMENT_MASK;
    Ok((timestamp_ms << TIMESTAMP_SHIFT) | (pid << INCREMENT_BITS) | increment)
}

/// Millisecond timestamp part of an id.
pub fn timestamp_ms(id: u64) -> u64 {
    id >> TIMESTAMP_SHIFT
}

/// Process id part of an id.
pub fn process_id(id: u64) -> u32 {
    ((id >> INCREMENT_BITS) & PROCESS_ID_MASK) as u32
}

/// Counter part of an id.
pub fn increment(id: u64) -> u64 {
    id & INCREMENT_MASK
}

/// Allocates ids for one process.
#[derive(Debug)]
pub struct SnowflakeGenerator {
    pid: u32,
    counter: AtomicU64,
}

impl SnowflakeGenerator {
    /// Create a generator stamping ids with `pid`.
    pub fn new(pid: u32) -> Self {
        Self {
            pid,
            counter: AtomicU64::new(0),
        }
    }

    /// The process-wide generator, seeded from the current process id.
    pub fn global() -> &'static SnowflakeGenerator {
        static GLOBAL: OnceLock<SnowflakeGenerator> = OnceLock::new();
        GLOBAL.get_or_init(|| SnowflakeGenerator::new(std::process::id()))
    }

    /// Allocate an id stamped with the current time.
    pub fn next_id(&self) -> u64 {
        let now = chrono::Utc::now().timestamp_millis();
        self.next_id_at(u64::try_from(now).unwrap_or(0))
    }

    /// Allocate an id stamped with `timestamp_ms`.
    ///
    /// Timestamps wider than 44 bits are truncated.
    pub fn next_id_at(&self, timestamp_ms: u64) -> u64 {
        let increment = self.counter.fetch_add(1, Ordering::Relaxed);
        let pid = u64::from(self.pid) & PROCESS_ID_MASK;
        ((timestamp_ms & TIMESTAMP_MASK) << TIMESTAMP_SHIFT)
            | (pid << INCREMENT_BITS)
            | (increment & INCREMENT_MASK)
    }
}

/// Allocate an id from the process-wide generator.
pub fn create_snowflake() -> u64 {
    SnowflakeGenerator::global().next_id()
}
