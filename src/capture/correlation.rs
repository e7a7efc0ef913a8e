//! Request/response timestamp correlation.
//!
//! # Responsibilities
//! - Hand out arrival timestamps that never repeat within the process
//! - Pair an outbound request with its inbound response by composite key
//!
//! # Design Decisions
//! - One store per proxy instance, never process-wide
//! - Sharded map (DashMap) so unrelated requests never contend on one lock
//! - Keys carry a per-instance sequence number, so two identical requests
//!   from the same client in flight at once still get distinct entries
//! - Entries are removed when read; the store only holds in-flight exchanges

use std::fmt;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use axum::http::Method;
use dashmap::DashMap;

/// Last timestamp handed out by [`Timestamp::now`].
static LAST_TIMESTAMP: AtomicI64 = AtomicI64::new(0);

/// Arrival timestamp in nanoseconds since the Unix epoch.
///
/// Strictly increasing across the process: it names dump files, so two
/// requests arriving in the same nanosecond must not collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(i64);

impl Timestamp {
    /// Current wall-clock time, bumped past the previously issued value.
    pub fn now() -> Self {
        let wall = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| i64::try_from(d.as_nanos()).unwrap_or(i64::MAX))
            .unwrap_or_default();

        let mut last = LAST_TIMESTAMP.load(Ordering::Relaxed);
        loop {
            let next = wall.max(last + 1);
            match LAST_TIMESTAMP.compare_exchange_weak(last, next, Ordering::AcqRel, Ordering::Relaxed) {
                Ok(_) => return Self(next),
                Err(current) => last = current,
            }
        }
    }

    /// Raw nanosecond value.
    pub fn as_nanos(&self) -> i64 {
        self.0
    }
}

impl From<i64> for Timestamp {
    fn from(nanos: i64) -> Self {
        Self(nanos)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Composite identity of one exchange: `"{client} {method} {target} #{seq}"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CorrelationKey(String);

impl CorrelationKey {
    pub fn new(client_addr: &str, method: &Method, target: &str, sequence: u64) -> Self {
        Self(format!("{} {} {} #{}", client_addr, method, target, sequence))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Concurrent key → arrival timestamp store.
#[derive(Debug, Default)]
pub struct CorrelationStore {
    entries: DashMap<CorrelationKey, Timestamp>,
    sequence: AtomicU64,
}

impl CorrelationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next request sequence number for this instance.
    pub fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::Relaxed)
    }

    /// Record the arrival time of a request.
    pub fn record(&self, key: CorrelationKey, at: Timestamp) {
        if let Some(previous) = self.entries.insert(key, at) {
            tracing::warn!(previous = %previous, "Correlation key reused while still in flight");
        }
    }

    /// Look up and remove the arrival time recorded for `key`.
    pub fn take(&self, key: &CorrelationKey) -> Option<Timestamp> {
        self.entries.remove(key).map(|(_, at)| at)
    }

    /// Drop an entry that will never be read (excluded or failed exchange).
    pub fn forget(&self, key: &CorrelationKey) {
        self.entries.remove(key);
    }

    /// Number of exchanges currently in flight.
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
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn timestamps_strictly_increase() {
        let mut previous = Timestamp::now();
        for _ in 0..10_000 {
            let next = Timestamp::now();
            assert!(next > previous);
            previous = next;
        }
    }

    #[test]
    fn timestamps_unique_across_threads() {
        let handles: Vec<_> = (0..8)
            .map(|_| std::thread::spawn(|| (0..1_000).map(|_| Timestamp::now()).collect::<Vec<_>>()))
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for ts in handle.join().unwrap() {
                assert!(seen.insert(ts), "duplicate timestamp {}", ts);
            }
        }
    }

    #[test]
    fn key_format() {
        let key = CorrelationKey::new("127.0.0.1:5000", &Method::GET, "/foo?q=1", 7);
        assert_eq!(key.as_str(), "127.0.0.1:5000 GET /foo?q=1 #7");
    }

    #[test]
    fn take_removes_entry() {
        let store = CorrelationStore::new();
        let key = CorrelationKey::new("10.0.0.1:1", &Method::POST, "/upload", store.next_sequence());
        let at = Timestamp::now();

        store.record(key.clone(), at);
        assert_eq!(store.len(), 1);
        assert_eq!(store.take(&key), Some(at));
        assert_eq!(store.take(&key), None);
        assert!(store.is_empty());
    }

    #[test]
    fn identical_requests_do_not_collide() {
        let store = CorrelationStore::new();
        let first = CorrelationKey::new("10.0.0.1:1", &Method::GET, "/", store.next_sequence());
        let second = CorrelationKey::new("10.0.0.1:1", &Method::GET, "/", store.next_sequence());
        let (t1, t2) = (Timestamp::now(), Timestamp::now());

        store.record(first.clone(), t1);
        store.record(second.clone(), t2);

        assert_eq!(store.take(&second), Some(t2));
        assert_eq!(store.take(&first), Some(t1));
    }

    #[test]
    fn concurrent_insert_and_take() {
        let store = Arc::new(CorrelationStore::new());
        let handles: Vec<_> = (0..8)
            .map(|worker| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for i in 0..500 {
                        let key = CorrelationKey::new(
                            &format!("10.0.0.{}:80", worker),
                            &Method::GET,
                            &format!("/item/{}", i),
                            store.next_sequence(),
                        );
                        let at = Timestamp::now();
                        store.record(key.clone(), at);
                        assert_eq!(store.take(&key), Some(at));
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert!(store.is_empty());
    }

    #[test]
    fn forget_is_idempotent() {
        let store = CorrelationStore::new();
        let key = CorrelationKey::new("a", &Method::GET, "/", 0);
        store.forget(&key);
        store.record(key.clone(), Timestamp::from(5));
        store.forget(&key);
        store.forget(&key);
        assert!(store.is_empty());
    }
}
