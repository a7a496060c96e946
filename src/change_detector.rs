// src/change_detector.rs
//! Decides whether a fetched batch warrants a new digest.
//!
//! The feed is a sliding time window, so the same posts reappear across
//! cycles. Only the newest id is compared against the cursor; if older posts
//! are edited or backfilled while the newest id stays the same, no digest is
//! produced for them.

use crate::ingest::types::MessageRecord;

/// Id of the most recently delivered message.
pub type Cursor = Option<i64>;

/// True iff `messages` is non-empty and its newest id differs from `cursor`.
/// `messages` must be newest-first, as the feed reader returns them.
pub fn has_new(messages: &[MessageRecord], cursor: Cursor) -> bool {
    match (messages.first(), cursor) {
        (None, _) => false,
        (Some(_), None) => true,
        (Some(newest), Some(last)) => newest.id != last,
    }
}

/// Newest id of a batch, the value the cursor moves to after delivery.
pub fn newest_id(messages: &[MessageRecord]) -> Option<i64> {
    messages.first().map(|m| m.id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn batch(ids: &[i64]) -> Vec<MessageRecord> {
        ids.iter()
            .map(|&id| MessageRecord {
                id,
                timestamp: Utc::now(),
                text: format!("post {id}"),
            })
            .collect()
    }

    #[test]
    fn empty_batch_is_never_new() {
        assert!(!has_new(&[], None));
        assert!(!has_new(&[], Some(42)));
    }

    #[test]
    fn unset_cursor_means_new() {
        assert!(has_new(&batch(&[42, 41]), None));
    }

    #[test]
    fn same_newest_id_is_not_new() {
        assert!(!has_new(&batch(&[42, 41]), Some(42)));
        // older ids changing underneath do not count
        assert!(!has_new(&batch(&[42, 7]), Some(42)));
    }

    #[test]
    fn different_newest_id_is_new() {
        assert!(has_new(&batch(&[43, 42]), Some(42)));
        // ids going backwards (deleted newest post) still differ
        assert!(has_new(&batch(&[40]), Some(42)));
    }

    #[test]
    fn repeated_calls_agree() {
        let b = batch(&[10, 9]);
        let first = has_new(&b, Some(9));
        for _ in 0..3 {
            assert_eq!(has_new(&b, Some(9)), first);
        }
        assert_eq!(b.len(), 2);
        assert_eq!(newest_id(&b), Some(10));
        assert_eq!(newest_id(&[]), None);
    }
}
