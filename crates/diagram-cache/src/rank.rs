//! Eviction ranking from access frequency and recency

use crate::types::CacheRecord;
use chrono::{DateTime, Utc};

/// Records untouched for longer than this have rank 0 (20 days)
pub const RANK_WINDOW_SECS: f64 = 20.0 * 24.0 * 60.0 * 60.0;

/// Recency factor of a record accessed just now
const MAX_RECENCY: f64 = 10.0;

/// Eviction priority of `record` at `now`; lower ranks are evicted first.
///
/// The recency factor decays linearly from 10 at the moment of last access to
/// 0 once [`RANK_WINDOW_SECS`] have passed, and is multiplied by the access
/// count.
pub fn rank(record: &CacheRecord, now: DateTime<Utc>) -> f64 {
    let elapsed_ms = (now - record.last_access).num_milliseconds().max(0);
    let elapsed = elapsed_ms as f64 / 1000.0;

    let recency = if elapsed > RANK_WINDOW_SECS {
        0.0
    } else {
        MAX_RECENCY * (RANK_WINDOW_SECS - elapsed) / RANK_WINDOW_SECS
    };

    record.access_count as f64 * recency
}

/// Position of the record with the lowest rank, the first one on ties
pub fn lowest_ranked(records: &[CacheRecord], now: DateTime<Utc>) -> Option<usize> {
    let mut lowest: Option<(usize, f64)> = None;

    for (i, record) in records.iter().enumerate() {
        let r = rank(record, now);
        match lowest {
            Some((_, best)) if r >= best => {}
            _ => lowest = Some((i, r)),
        }
        // nothing ranks below zero
        if r == 0.0 {
            break;
        }
    }

    lowest.map(|(i, _)| i)
}
