// =============================================================================
// Timebase — consistent epoch-nanosecond timestamp semantics
// =============================================================================
//
// Broker feeds report timestamps in whatever unit the venue picked: seconds,
// milliseconds, microseconds, or nanoseconds. Everything inside the engine is
// epoch nanoseconds; `coerce_ns` classifies inbound values by magnitude and
// normalizes them once at ingest.
// =============================================================================

use std::time::{SystemTime, UNIX_EPOCH};

/// Wall-clock epoch time in nanoseconds.
pub fn now_ns() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}

/// Coerce a timestamp-like integer into epoch nanoseconds.
///
/// Magnitude rules (absolute value):
///   < 1e11  — seconds
///   < 1e14  — milliseconds
///   < 1e17  — microseconds
///   else    — already nanoseconds
pub fn coerce_ns(ts: i64) -> i64 {
    let abs = ts.unsigned_abs();
    if abs < 100_000_000_000 {
        ts.saturating_mul(1_000_000_000)
    } else if abs < 100_000_000_000_000 {
        ts.saturating_mul(1_000_000)
    } else if abs < 100_000_000_000_000_000 {
        ts.saturating_mul(1_000)
    } else {
        ts
    }
}

/// Coerce a float timestamp (fractional seconds allowed) into epoch ns.
pub fn coerce_ns_f64(ts: f64) -> i64 {
    let abs = ts.abs();
    if abs < 1e11 {
        (ts * 1e9) as i64
    } else if abs < 1e14 {
        (ts * 1e6) as i64
    } else if abs < 1e17 {
        (ts * 1e3) as i64
    } else {
        ts as i64
    }
}

/// Clamp a broker timestamp that runs ahead of the local clock.
///
/// Returns `(clamped_ts, was_clamped)`. A source timestamp more than
/// `max_skew_ns` in the future of `local_ns` is pinned to `local_ns`; sane
/// timestamps pass through untouched.
pub fn clamp_future_ts(source_ns: i64, local_ns: i64, max_skew_ns: i64) -> (i64, bool) {
    if source_ns > local_ns.saturating_add(max_skew_ns) {
        (local_ns, true)
    } else {
        (source_ns, false)
    }
}
