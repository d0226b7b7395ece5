//! Response cache keyed by request fingerprint

use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt::Write as _;
use std::time::{Duration, Instant};
use tracing::debug;

use swap_core::{GenerationRequest, GenerationResult};

/// SHA-256 over everything that can change the answer
pub fn fingerprint(
    request: &GenerationRequest,
    difficulty: u8,
    specialty: Option<&str>,
    model_override: Option<&str>,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(request.prompt.as_bytes());
    hasher.update([0, difficulty]);
    hasher.update(specialty.unwrap_or_default().as_bytes());
    hasher.update([0]);
    hasher.update(model_override.unwrap_or_default().as_bytes());
    hasher.update([0]);
    hasher.update(request.max_tokens.to_le_bytes());
    hasher.update(request.temperature.to_le_bytes());

    hasher
        .finalize()
        .iter()
        .fold(String::with_capacity(64), |mut hex, byte| {
            let _ = write!(hex, "{:02x}", byte);
            hex
        })
}

struct Entry {
    result: GenerationResult,
    inserted: Instant,
}

/// Bounded TTL cache; the oldest entry goes first when full
pub struct ResponseCache {
    capacity: usize,
    ttl: Duration,
    entries: Mutex<HashMap<String, Entry>>,
}

impl ResponseCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            capacity: capacity.max(1),
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, key: &str) -> Option<GenerationResult> {
        let mut entries = self.entries.lock();
        let fresh = entries.get(key)?.inserted.elapsed() < self.ttl;
        if !fresh {
            entries.remove(key);
            return None;
        }
        entries.get(key).map(|e| e.result.clone())
    }

    pub fn insert(&self, key: String, result: GenerationResult) {
        let mut entries = self.entries.lock();
        if !entries.contains_key(&key) && entries.len() >= self.capacity {
            let ttl = self.ttl;
            entries.retain(|_, e| e.inserted.elapsed() < ttl);
            if entries.len() >= self.capacity {
                let oldest = entries
                    .iter()
                    .min_by_key(|(_, e)| e.inserted)
                    .map(|(k, _)| k.clone());
                if let Some(oldest) = oldest {
                    debug!("Response cache full, dropping {}", oldest);
                    entries.remove(&oldest);
                }
            }
        }
        entries.insert(
            key,
            Entry {
                result,
                inserted: Instant::now(),
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(prompt: &str) -> GenerationRequest {
        GenerationRequest {
            prompt: prompt.to_string(),
            max_tokens: 128,
            temperature: 0.7,
        }
    }

    fn result(text: &str) -> GenerationResult {
        GenerationResult {
            text: text.to_string(),
            model: "m".to_string(),
            latency: Duration::from_millis(5),
            tokens: 1,
            memory: None,
            degraded: false,
            cached: false,
            cost_usd: None,
        }
    }

    #[test]
    fn test_fingerprint_distinguishes_inputs() {
        let base = fingerprint(&request("hi"), 20, None, None);
        assert_eq!(base.len(), 64);
        assert_eq!(base, fingerprint(&request("hi"), 20, None, None));
        assert_ne!(base, fingerprint(&request("hi"), 21, None, None));
        assert_ne!(base, fingerprint(&request("hi"), 20, Some("code"), None));
        assert_ne!(base, fingerprint(&request("hi"), 20, None, Some("m")));

        let mut colder = request("hi");
        colder.temperature = 0.0;
        assert_ne!(base, fingerprint(&colder, 20, None, None));
    }

    #[test]
    fn test_capacity_drops_oldest() {
        let cache = ResponseCache::new(2, Duration::from_secs(60));
        cache.insert("a".into(), result("a"));
        std::thread::sleep(Duration::from_millis(2));
        cache.insert("b".into(), result("b"));
        std::thread::sleep(Duration::from_millis(2));
        cache.insert("c".into(), result("c"));

        assert_eq!(cache.len(), 2);
        assert!(cache.get("a").is_none());
        assert_eq!(cache.get("c").unwrap().text, "c");
    }

    #[test]
    fn test_ttl_expiry() {
        let cache = ResponseCache::new(4, Duration::from_millis(20));
        cache.insert("k".into(), result("v"));
        assert!(cache.get("k").is_some());
        std::thread::sleep(Duration::from_millis(40));
        assert!(cache.get("k").is_none());
        assert!(cache.is_empty());
    }
}
