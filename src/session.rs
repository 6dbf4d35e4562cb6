#![forbid(unsafe_code)]

//! Short-lived memory of the last link each browser resolved.
//!
//! Downloads normally carry their URL explicitly; this store only lets the
//! two-step `/download/{id}` flow work without it. Entries are keyed by an
//! opaque token handed to the client in a cookie, expire after a TTL and the
//! store never grows past its capacity.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use parking_lot::Mutex;
use rand_core::{OsRng, RngCore};

use crate::link::ValidatedUrl;
use crate::resolver::VideoMetadata;

pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(30 * 60);
pub const DEFAULT_SESSION_CAPACITY: usize = 1024;
const TOKEN_BYTES: usize = 16;

/// Mints a fresh opaque session token: 128 random bits, URL-safe base64.
pub fn issue_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Cheap shape check applied to tokens coming back from clients.
pub fn is_well_formed_token(token: &str) -> bool {
    URL_SAFE_NO_PAD
        .decode(token)
        .is_ok_and(|bytes| bytes.len() == TOKEN_BYTES)
}

#[derive(Debug, Clone)]
struct SessionEntry {
    url: ValidatedUrl,
    metadata: Arc<VideoMetadata>,
    touched: Instant,
}

#[derive(Debug)]
pub struct SessionStore {
    entries: Mutex<HashMap<String, SessionEntry>>,
    ttl: Duration,
    capacity: usize,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(DEFAULT_SESSION_TTL, DEFAULT_SESSION_CAPACITY)
    }
}

impl SessionStore {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
            capacity: capacity.max(1),
        }
    }

    /// Records `url`/`metadata` as the latest resolution for `token`,
    /// replacing whatever was there.
    pub fn put(&self, token: &str, url: ValidatedUrl, metadata: Arc<VideoMetadata>) {
        self.put_at(token, url, metadata, Instant::now());
    }

    pub fn get(&self, token: &str) -> Option<(ValidatedUrl, Arc<VideoMetadata>)> {
        self.get_at(token, Instant::now())
    }

    pub fn remove(&self, token: &str) -> bool {
        self.entries.lock().remove(token).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn put_at(
        &self,
        token: &str,
        url: ValidatedUrl,
        metadata: Arc<VideoMetadata>,
        now: Instant,
    ) {
        let mut entries = self.entries.lock();
        entries.retain(|_, entry| !is_expired(entry, now, self.ttl));

        if !entries.contains_key(token) && entries.len() >= self.capacity {
            let oldest = entries
                .iter()
                .min_by_key(|(_, entry)| entry.touched)
                .map(|(key, _)| key.clone());
            if let Some(oldest) = oldest {
                tracing::debug!("session store full, evicting least recently used entry");
                entries.remove(&oldest);
            }
        }

        entries.insert(
            token.to_string(),
            SessionEntry {
                url,
                metadata,
                touched: now,
            },
        );
    }

    fn get_at(&self, token: &str, now: Instant) -> Option<(ValidatedUrl, Arc<VideoMetadata>)> {
        let mut entries = self.entries.lock();
        let expired = is_expired(entries.get(token)?, now, self.ttl);
        if expired {
            entries.remove(token);
            return None;
        }
        let entry = entries.get_mut(token)?;
        entry.touched = now;
        Some((entry.url.clone(), entry.metadata.clone()))
    }
}

fn is_expired(entry: &SessionEntry, now: Instant, ttl: Duration) -> bool {
    now.saturating_duration_since(entry.touched) > ttl
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::validate;
    use std::thread;

    fn metadata(title: &str) -> Arc<VideoMetadata> {
        Arc::new(VideoMetadata {
            title: title.into(),
            thumbnail_url: String::new(),
            renditions: Vec::new(),
        })
    }

    fn url(id: &str) -> ValidatedUrl {
        validate(&format!("https://www.youtube.com/watch?v={id}")).unwrap()
    }

    #[test]
    fn get_returns_none_for_unknown_token() {
        let store = SessionStore::default();
        assert!(store.get("nobody").is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn put_overwrites_previous_resolution() {
        let store = SessionStore::default();
        store.put("tok", url("a"), metadata("first"));
        store.put("tok", url("b"), metadata("second"));

        let (stored_url, stored) = store.get("tok").unwrap();
        assert_eq!(stored_url, url("b"));
        assert_eq!(stored.title, "second");
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn entries_expire_after_ttl() {
        let store = SessionStore::new(Duration::from_secs(60), 8);
        let start = Instant::now();
        store.put_at("tok", url("a"), metadata("a"), start);

        assert!(store.get_at("tok", start + Duration::from_secs(30)).is_some());
        // the read above refreshed the entry
        assert!(store.get_at("tok", start + Duration::from_secs(80)).is_some());
        assert!(store.get_at("tok", start + Duration::from_secs(200)).is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn full_store_evicts_least_recently_used() {
        let store = SessionStore::new(Duration::from_secs(600), 2);
        let start = Instant::now();
        store.put_at("a", url("a"), metadata("a"), start);
        store.put_at("b", url("b"), metadata("b"), start + Duration::from_secs(1));
        store.get_at("a", start + Duration::from_secs(2));
        store.put_at("c", url("c"), metadata("c"), start + Duration::from_secs(3));

        assert_eq!(store.len(), 2);
        assert!(store.get_at("a", start + Duration::from_secs(4)).is_some());
        assert!(store.get_at("b", start + Duration::from_secs(4)).is_none());
        assert!(store.get_at("c", start + Duration::from_secs(4)).is_some());
    }

    #[test]
    fn overwriting_at_capacity_does_not_evict() {
        let store = SessionStore::new(Duration::from_secs(600), 1);
        store.put("a", url("a"), metadata("one"));
        store.put("a", url("a"), metadata("two"));
        assert_eq!(store.get("a").unwrap().1.title, "two");
    }

    #[test]
    fn concurrent_puts_keep_read_your_own_write() {
        let store = Arc::new(SessionStore::default());
        let handles: Vec<_> = (0..8)
            .map(|worker| {
                let store = store.clone();
                thread::spawn(move || {
                    let token = format!("client-{worker}");
                    for round in 0..200 {
                        let id = format!("{worker}x{round}");
                        store.put(&token, url(&id), metadata(&id));
                        let (got_url, got) = store.get(&token).unwrap();
                        assert_eq!(got_url, url(&id));
                        assert_eq!(got.title, id);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(store.len(), 8);
        assert_eq!(store.get("client-3").unwrap().1.title, "3x199");
    }

    #[test]
    fn tokens_are_unique_and_well_formed() {
        let first = issue_token();
        let second = issue_token();
        assert_ne!(first, second);
        assert!(is_well_formed_token(&first));
        assert!(!is_well_formed_token("short"));
        assert!(!is_well_formed_token("not base64 at all!"));
    }
}
