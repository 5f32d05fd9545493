//! Coarse relative time.
//!
//! Timestamps throughout the engine are whole seconds relative to process
//! start, kept in a process-wide counter that the front end refreshes on
//! each tick. [`now`] is a plain atomic load, never a syscall.
//!
//! Expiry values on the wire are interpreted two ways, as memcached
//! clients expect: values above [`MAX_DELTA`] are absolute unix epoch
//! seconds, smaller values are offsets from now.

use std::sync::OnceLock;
use std::sync::atomic::{AtomicU32, Ordering};

use clocksource::coarse::UnixInstant;

/// Expiry values above this are absolute epoch seconds (30 days).
pub const MAX_DELTA: u32 = 30 * 24 * 60 * 60;

/// Seconds since process start, refreshed by [`update`].
static NOW: AtomicU32 = AtomicU32::new(0);

/// Unix epoch seconds at process start.
static STARTED: OnceLock<u32> = OnceLock::new();

#[inline]
fn unix_now() -> u32 {
    UnixInstant::now()
        .duration_since(UnixInstant::EPOCH)
        .as_secs()
}

/// Record the process start time. Idempotent; later calls are no-ops.
pub fn setup() {
    STARTED.get_or_init(unix_now);
}

/// Unix epoch seconds at process start.
#[inline]
pub fn started() -> u32 {
    *STARTED.get_or_init(unix_now)
}

/// Refresh the relative clock. Called by the event loop at each tick.
pub fn update() {
    let elapsed = unix_now().saturating_sub(started());
    NOW.store(elapsed, Ordering::Relaxed);
}

/// Seconds since process start. Syscall-free.
#[inline]
pub fn now() -> u32 {
    NOW.load(Ordering::Relaxed)
}

/// Convert a wire expiry value into relative seconds.
///
/// Zero means "never". Values above [`MAX_DELTA`] are absolute epoch
/// seconds; the rest are offsets from the current time.
#[inline]
pub fn reltime(exptime: u32) -> u32 {
    if exptime == 0 {
        0
    } else if exptime > MAX_DELTA {
        exptime.saturating_sub(started())
    } else {
        exptime.saturating_add(now())
    }
}
