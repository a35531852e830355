//! Fixed-window rate-limit buckets.
//!
//! On read, a bucket whose window lies entirely before `now - window` resets
//! to `(count=1, window_start=now)`; otherwise the count increments. The
//! check and the increment happen in the caller's transaction.

use rusqlite::{Connection, OptionalExtension};

use crate::Result;

/// Outcome of a rate-limit check.
#[derive(Clone, Copy, Debug)]
pub struct RateDecision {
    /// Whether the request is admitted.
    pub allowed: bool,
    /// Requests left in the current window (0 when denied).
    pub remaining: i64,
    /// Unix second at which the window resets.
    pub reset_at: i64,
    /// Seconds until reset (only meaningful when denied).
    pub retry_after: i64,
}

/// Check the bucket and count this request against it.
pub fn check_and_increment(
    conn: &Connection,
    key: &str,
    limit: i64,
    window_secs: i64,
    now: i64,
) -> Result<RateDecision> {
    let bucket: Option<(i64, i64)> = conn
        .query_row(
            "SELECT count, window_start FROM rate_limits WHERE key = ?1",
            [key],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    match bucket {
        Some((count, window_start)) if window_start > now - window_secs => {
            let reset_at = window_start + window_secs;
            if count >= limit {
                let retry_after = (reset_at - now).max(1);
                return Ok(RateDecision {
                    allowed: false,
                    remaining: 0,
                    reset_at,
                    retry_after,
                });
            }
            conn.execute(
                "UPDATE rate_limits SET count = count + 1 WHERE key = ?1",
                [key],
            )?;
            Ok(RateDecision {
                allowed: true,
                remaining: limit - count - 1,
                reset_at,
                retry_after: 0,
            })
        }
        _ => {
            conn.execute(
                "INSERT INTO rate_limits (key, count, window_start) VALUES (?1, 1, ?2)
                 ON CONFLICT(key) DO UPDATE SET count = 1, window_start = excluded.window_start",
                rusqlite::params![key, now],
            )?;
            Ok(RateDecision {
                allowed: true,
                remaining: limit - 1,
                reset_at: now + window_secs,
                retry_after: 0,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Connection {
        crate::open_memory().expect("open test db")
    }

    #[test]
    fn test_limit_boundary() {
        let conn = test_db();
        // The 100th request within the window succeeds; the 101st is denied.
        for i in 0..100 {
            let decision =
                check_and_increment(&conn, "contacts:request:atlas", 100, 3600, 1000).expect("check");
            assert!(decision.allowed, "request {} should pass", i + 1);
        }
        let denied =
            check_and_increment(&conn, "contacts:request:atlas", 100, 3600, 1000).expect("check");
        assert!(!denied.allowed);
        assert!(denied.retry_after > 0);
        assert_eq!(denied.remaining, 0);
    }

    #[test]
    fn test_window_reset() {
        let conn = test_db();
        for _ in 0..100 {
            check_and_increment(&conn, "k", 100, 3600, 1000).expect("check");
        }
        assert!(!check_and_increment(&conn, "k", 100, 3600, 1000).expect("check").allowed);

        // After the window elapses a new request succeeds.
        let later = check_and_increment(&conn, "k", 100, 3600, 1000 + 3600).expect("check");
        assert!(later.allowed);
        assert_eq!(later.remaining, 99);
    }

    #[test]
    fn test_retry_after_counts_down() {
        let conn = test_db();
        check_and_increment(&conn, "k", 1, 3600, 1000).expect("fill");
        let denied = check_and_increment(&conn, "k", 1, 3600, 2000).expect("deny");
        assert_eq!(denied.retry_after, 1000 + 3600 - 2000);
        assert_eq!(denied.reset_at, 4600);
    }

    #[test]
    fn test_keys_are_independent() {
        let conn = test_db();
        check_and_increment(&conn, "contacts:request:atlas", 1, 3600, 1000).expect("fill");
        let other =
            check_and_increment(&conn, "contacts:request:bmo", 1, 3600, 1000).expect("check");
        assert!(other.allowed);
    }
}
