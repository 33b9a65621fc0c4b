//! Last-write-wins conflict resolution.
//!
//! Every mutable row in the system carries `(identifier, payload, updated_at_ts)`.
//! The resolution rule — keep the highest timestamp, break ties by identifier —
//! lives here and nowhere else. Both the Postgres store (via its upsert guard)
//! and the in-memory store call into this module rather than re-deriving the
//! policy per entity.

use chrono::Utc;

/// Current wall-clock time in milliseconds since the epoch.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// A row that participates in LWW resolution.
pub trait LwwStamped {
    /// Identifier type used for tie-breaking when timestamps collide.
    type Id: Ord;

    fn lww_id(&self) -> Self::Id;

    /// Write timestamp in milliseconds.
    fn lww_ts(&self) -> i64;
}

/// Returns true when `incoming` should replace `existing` under LWW rules.
///
/// Higher timestamp wins; equal timestamps fall back to identifier ordering so
/// that resolution is deterministic regardless of arrival order.
pub fn wins<T: LwwStamped>(incoming: &T, existing: &T) -> bool {
    (incoming.lww_ts(), incoming.lww_id()) > (existing.lww_ts(), existing.lww_id())
}

/// Resolves a set of conflicting writes to the single surviving row.
pub fn pick_latest<T: LwwStamped>(rows: impl IntoIterator<Item = T>) -> Option<T> {
    let mut best: Option<T> = None;
    for row in rows {
        match &best {
            None => best = Some(row),
            Some(current) if wins(&row, current) => best = Some(row),
            Some(_) => {}
        }
    }
    best
}
