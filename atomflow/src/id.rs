//! Process-unique identifier generation.
//!
//! Used to synthesize default cache keys for queries created without an
//! explicit cache key source. Identifiers are unique within the process
//! and monotonically increasing; they carry no meaning beyond uniqueness.

use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Returns a process-unique identifier.
///
/// Each call returns a value strictly greater than any previous call's.
pub fn unique_id() -> u64 {
    NEXT_ID.fetch_add(1, Ordering::Relaxed)
}
