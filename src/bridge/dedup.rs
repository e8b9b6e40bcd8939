use super::{InboundMessage, MessageType};
use crate::types::Jid;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Identity used to collapse redeliveries of the same inbound message.
///
/// Besides sender, text and timestamp bucket the key carries the message
/// type, so an image and a text with the same caption from one sender in
/// one bucket are both delivered.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DedupKey {
    pub from: Jid,
    pub text: Option<String>,
    pub message_type: MessageType,
    pub bucket: i64,
}

impl DedupKey {
    pub fn of(message: &InboundMessage, bucket: Duration) -> Self {
        let bucket_ms = (bucket.as_millis() as i64).max(1);
        Self {
            from: message.from.clone(),
            text: message.text.clone(),
            message_type: message.message_type,
            bucket: message.timestamp.timestamp_millis().div_euclid(bucket_ms),
        }
    }
}

/// Remembers recently seen keys for `window` of wall-clock time.
pub struct Deduplicator {
    window: Duration,
    bucket: Duration,
    seen: HashMap<DedupKey, Instant>,
}

impl Deduplicator {
    pub fn new(window: Duration, bucket: Duration) -> Self {
        Self {
            window,
            bucket,
            seen: HashMap::new(),
        }
    }

    /// `true` the first time a key is seen within the window.
    pub fn observe(&mut self, message: &InboundMessage) -> bool {
        self.observe_at(message, Instant::now())
    }

    fn observe_at(&mut self, message: &InboundMessage, now: Instant) -> bool {
        let window = self.window;
        self.seen
            .retain(|_, seen_at| now.saturating_duration_since(*seen_at) < window);

        let key = DedupKey::of(message, self.bucket);
        if self.seen.contains_key(&key) {
            return false;
        }
        self.seen.insert(key, now);
        true
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AccountId, DEFAULT_USER_SERVER};
    use chrono::{TimeZone, Utc};

    fn message(text: &str, millis: i64) -> InboundMessage {
        InboundMessage {
            account_id: AccountId::new("a").unwrap(),
            from: Jid::new("628123", DEFAULT_USER_SERVER),
            text: Some(text.to_string()),
            message_type: MessageType::Text,
            timestamp: Utc.timestamp_millis_opt(millis).unwrap(),
            raw_reference: format!("id-{millis}"),
        }
    }

    #[test]
    fn same_bucket_is_suppressed_for_each_window() {
        for window_ms in [200u64, 1_000, 5_000] {
            let mut dedup =
                Deduplicator::new(Duration::from_millis(window_ms), Duration::from_secs(1));
            let now = Instant::now();
            assert!(dedup.observe_at(&message("halo", 10_100), now));
            assert!(!dedup.observe_at(&message("halo", 10_900), now));
            assert_eq!(dedup.len(), 1);
        }
    }

    #[test]
    fn different_bucket_or_text_passes() {
        let mut dedup = Deduplicator::new(Duration::from_secs(1), Duration::from_secs(1));
        let now = Instant::now();
        assert!(dedup.observe_at(&message("halo", 10_100), now));
        assert!(dedup.observe_at(&message("halo", 11_100), now));
        assert!(dedup.observe_at(&message("pesan", 10_100), now));
    }

    #[test]
    fn keys_expire_after_window() {
        let mut dedup = Deduplicator::new(Duration::from_millis(500), Duration::from_secs(1));
        let start = Instant::now();
        assert!(dedup.observe_at(&message("halo", 10_100), start));
        let later = start + Duration::from_millis(600);
        assert!(dedup.observe_at(&message("halo", 10_100), later));
    }

    #[test]
    fn same_text_with_other_type_passes() {
        let mut dedup = Deduplicator::new(Duration::from_secs(1), Duration::from_secs(1));
        let now = Instant::now();
        let caption = InboundMessage {
            message_type: MessageType::Image,
            ..message("halo", 10_100)
        };
        assert!(dedup.observe_at(&message("halo", 10_100), now));
        assert!(dedup.observe_at(&caption, now));
        assert!(!dedup.observe_at(&caption, now));
        assert_eq!(dedup.len(), 2);
    }
}
