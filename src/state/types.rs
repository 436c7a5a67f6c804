use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Persisted state blob of one stack. One row per stack, last write wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateRecord {
    pub stack_name: String,
    pub state: Value,
    /// Epoch milliseconds of the last `save_state`.
    pub updated_at: i64,
}

/// Deployment lock of one stack.
///
/// The lock is held while `now - acquired_at < ttl * 1000`. An expired row
/// is logically absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockRecord {
    pub stack_name: String,
    pub holder: String,
    /// Epoch milliseconds.
    pub acquired_at: i64,
    /// Seconds. Zero or negative TTLs expire immediately.
    pub ttl: i64,
}

impl LockRecord {
    pub fn age_ms(&self, now_ms: i64) -> i64 {
        now_ms - self.acquired_at
    }

    pub fn is_expired_at(&self, now_ms: i64) -> bool {
        self.age_ms(now_ms) >= self.ttl.saturating_mul(1000)
    }

    pub fn is_held_at(&self, now_ms: i64) -> bool {
        !self.is_expired_at(now_ms)
    }
}

/// Append-only audit row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub id: i64,
    pub stack_name: String,
    pub entry: Value,
    /// Epoch milliseconds.
    pub created_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn lock(acquired_at: i64, ttl: i64) -> LockRecord {
        LockRecord {
            stack_name: "s".to_string(),
            holder: "h".to_string(),
            acquired_at,
            ttl,
        }
    }

    #[test]
    fn test_lock_boundary() {
        let l = lock(1_000, 5);
        assert!(l.is_held_at(1_000));
        assert!(l.is_held_at(5_999));
        assert!(l.is_expired_at(6_000));
    }

    proptest! {
        #[test]
        fn non_positive_ttl_is_always_expired(ttl in -1_000i64..=0, elapsed in 0i64..1_000_000) {
            let l = lock(10_000, ttl);
            prop_assert!(l.is_expired_at(10_000 + elapsed));
        }

        #[test]
        fn held_iff_age_below_ttl(ttl in 1i64..3_600, elapsed in 0i64..4_000_000) {
            let l = lock(0, ttl);
            prop_assert_eq!(l.is_held_at(elapsed), elapsed < ttl * 1000);
        }
    }
}
