//! Bounded in-memory key→text maps used by remote sandbox workers to GET
//! their instructions and PUT their output when the sandbox transport
//! cannot carry the payload inline (the HTTP fleet-worker variant of
//! [`crate::sandbox::SandboxProvider`]).
//!
//! Both stores evict everything once at capacity rather than doing LRU
//! bookkeeping — the spec calls these "bounded (evict-all-at-capacity, cap
//! ≈50 entries)", which is a blunt but simple backpressure valve against a
//! crashed or stuck mission leaking entries forever.

use std::collections::HashMap;
use std::sync::Mutex;

const DEFAULT_CAPACITY: usize = 50;

/// Builds the shared key for instruction/output lookups: `sandbox-<agent>-<taskId>`.
pub fn sandbox_key(agent: &str, task_id: &str) -> String {
    format!("sandbox-{agent}-{task_id}")
}

struct BoundedMap {
    capacity: usize,
    entries: HashMap<String, String>,
}

impl BoundedMap {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: HashMap::new(),
        }
    }

    fn put(&mut self, key: String, value: String) {
        if self.entries.len() >= self.capacity && !self.entries.contains_key(&key) {
            self.entries.clear();
        }
        self.entries.insert(key, value);
    }

    fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).cloned()
    }

    fn remove(&mut self, key: &str) -> Option<String> {
        self.entries.remove(key)
    }
}

/// Holds instruction text keyed by `sandbox-<agent>-<taskId>` for a remote
/// worker to fetch via `GET /internal/instructions/{key}`.
pub struct InstructionStore {
    inner: Mutex<BoundedMap>,
}

impl InstructionStore {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(BoundedMap::new(capacity)),
        }
    }

    pub fn put(&self, key: impl Into<String>, instruction: impl Into<String>) {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).put(key.into(), instruction.into());
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).get(key)
    }

    pub fn remove(&self, key: &str) -> Option<String> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).remove(key)
    }
}

impl Default for InstructionStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Holds captured output keyed the same way, written by a remote worker via
/// `PUT /internal/output/{key}` and read by the dispatcher once the worker
/// reports completion.
pub struct OutputStore {
    inner: Mutex<BoundedMap>,
}

impl OutputStore {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(BoundedMap::new(capacity)),
        }
    }

    pub fn put(&self, key: impl Into<String>, output: impl Into<String>) {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).put(key.into(), output.into());
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).get(key)
    }

    pub fn remove(&self, key: &str) -> Option<String> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).remove(key)
    }
}

impl Default for OutputStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sandbox_key_format() {
        assert_eq!(sandbox_key("coder", "TASK-001"), "sandbox-coder-TASK-001");
    }

    #[test]
    fn instruction_store_put_and_get() {
        let store = InstructionStore::new();
        store.put("sandbox-coder-TASK-001", "do the thing");
        assert_eq!(store.get("sandbox-coder-TASK-001"), Some("do the thing".to_string()));
        assert_eq!(store.get("missing"), None);
    }

    #[test]
    fn output_store_remove_consumes_entry() {
        let store = OutputStore::new();
        store.put("key", "output text");
        assert_eq!(store.remove("key"), Some("output text".to_string()));
        assert_eq!(store.get("key"), None);
    }

    #[test]
    fn bounded_map_evicts_all_at_capacity() {
        let mut map = BoundedMap::new(2);
        map.put("a".to_string(), "1".to_string());
        map.put("b".to_string(), "2".to_string());
        map.put("c".to_string(), "3".to_string());

        // Adding a third distinct key past capacity clears everything, then
        // inserts the new one.
        assert_eq!(map.get("a"), None);
        assert_eq!(map.get("b"), None);
        assert_eq!(map.get("c"), Some("3".to_string()));
    }

    #[test]
    fn bounded_map_overwrite_does_not_evict() {
        let mut map = BoundedMap::new(2);
        map.put("a".to_string(), "1".to_string());
        map.put("b".to_string(), "2".to_string());
        map.put("a".to_string(), "updated".to_string());

        assert_eq!(map.get("a"), Some("updated".to_string()));
        assert_eq!(map.get("b"), Some("2".to_string()));
    }
}
