//! Hash-based, time-windowed duplicate-reception cache (§3 "Dedup entry",
//! §4.7 point 1-2). Used by C7 to suppress repeated dispatch of the same
//! `(source, destination, payload)` triple received more than once within
//! `deduplication_expiry`.

use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::Duration;

use tokio::time::Instant;

use crate::callsign::Callsign;

fn hash_key(source: &Callsign, destination: &Callsign, payload: &[u8]) -> u64 {
    let mut hasher = DefaultHasher::new();
    source.base().hash(&mut hasher);
    source.ssid().hash(&mut hasher);
    destination.base().hash(&mut hasher);
    destination.ssid().hash(&mut hasher);
    payload.hash(&mut hasher);
    hasher.finish()
}

/// Map from the 64-bit hash of a `(source, destination, payload)` triple to
/// its expiry instant. Lookups prune expired entries lazily, per spec's
/// invariant that "the dedup cache never contains expired entries visible
/// to lookups".
pub struct DedupCache {
    expiry: Duration,
    entries: HashMap<u64, Instant>,
}

impl DedupCache {
    pub fn new(expiry: Duration) -> Self {
        DedupCache {
            expiry,
            entries: HashMap::new(),
        }
    }

    /// Checks whether `(source, destination, payload)` was already seen
    /// within the expiry window. If not (either never seen, or the prior
    /// sighting has expired), records it with a fresh expiry and returns
    /// `false` — the caller should dispatch. Returns `true` when the
    /// triple is a live duplicate and should be dropped.
    pub fn is_duplicate(&mut self, source: &Callsign, destination: &Callsign, payload: &[u8]) -> bool {
        self.is_duplicate_at(source, destination, payload, Instant::now())
    }

    fn is_duplicate_at(
        &mut self,
        source: &Callsign,
        destination: &Callsign,
        payload: &[u8],
        now: Instant,
    ) -> bool {
        let key = hash_key(source, destination, payload);
        let duplicate = matches!(self.entries.get(&key), Some(expires_at) if *expires_at > now);
        if !duplicate {
            self.entries.insert(key, now + self.expiry);
        }
        self.prune(now);
        duplicate
    }

    /// Drops every entry that has expired as of `now`. Called on every
    /// lookup; may also be driven by a periodic tick per §4.7.
    pub fn prune(&mut self, now: Instant) {
        self.entries.retain(|_, expires_at| *expires_at > now);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(base: &str, ssid: u8) -> Callsign {
        Callsign::new(base, ssid)
    }

    #[tokio::test(start_paused = true)]
    async fn s6_second_receive_within_window_is_suppressed_third_after_is_not() {
        let mut cache = DedupCache::new(Duration::from_secs(28));
        let src = call("VK4ABC", 0);
        let dst = call("APRS", 0);
        let payload = b"!4903.50N/07201.75W>hello";

        assert!(!cache.is_duplicate(&src, &dst, payload), "first receive dispatches");

        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(cache.is_duplicate(&src, &dst, payload), "t=10 is within the 28s window");

        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(!cache.is_duplicate(&src, &dst, payload), "t=40 is past expiry, dispatches again");
    }

    #[tokio::test]
    async fn distinct_payloads_do_not_collide() {
        let mut cache = DedupCache::new(Duration::from_secs(28));
        let src = call("VK4ABC", 0);
        let dst = call("APRS", 0);

        assert!(!cache.is_duplicate(&src, &dst, b"one"));
        assert!(!cache.is_duplicate(&src, &dst, b"two"));
        assert_eq!(cache.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_entries_are_pruned_on_lookup() {
        let mut cache = DedupCache::new(Duration::from_secs(5));
        let src = call("VK4ABC", 0);
        let dst = call("APRS", 0);
        cache.is_duplicate(&src, &dst, b"x");
        assert_eq!(cache.len(), 1);

        tokio::time::advance(Duration::from_secs(10)).await;
        cache.is_duplicate(&call("OTHER", 0), &dst, b"y");
        assert_eq!(cache.len(), 1, "the expired x entry was pruned, only y remains");
    }
}
