//! Monotonic millisecond clock shared by the delay queue and schedulers.
//!
//! All scheduling math runs on signed milliseconds measured from a process-wide
//! anchor. `accurate_millis` reads the OS clock and refreshes a cached value;
//! `last_known_millis` reads only the cache and is intended for hot paths that
//! tolerate slight staleness (the rate limiter's bookkeeping, delay estimates).

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::OnceLock;
use std::time::Instant;

static ANCHOR: OnceLock<Instant> = OnceLock::new();
static LAST_KNOWN: AtomicI64 = AtomicI64::new(-1);

fn anchor() -> Instant {
    *ANCHOR.get_or_init(Instant::now)
}

/// Read the OS clock, refresh the cached value, and return monotonic milliseconds.
pub fn accurate_millis() -> i64 {
    let now = anchor().elapsed().as_millis() as i64;
    LAST_KNOWN.store(now, Ordering::Relaxed);
    now
}

/// Return the most recently observed millisecond value without touching the OS clock.
///
/// Falls back to an accurate read if no value has been cached yet.
pub fn last_known_millis() -> i64 {
    let cached = LAST_KNOWN.load(Ordering::Relaxed);
    if cached < 0 {
        accurate_millis()
    } else {
        cached
    }
}
