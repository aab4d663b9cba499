//! Compilation cache.
//!
//! Bounded in-memory map from a content hash to a compiled output, with
//! least-recently-used eviction and an optional on-disk JSON mirror. Reads
//! share a `RwLock`; at most one compute runs per key at a time.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::codegen::RazorCSharpDocument;
use crate::config::{RazorCodeGenerationOptions, RazorConfiguration};
use crate::engine::RazorProjectEngine;
use crate::error::{PipelineError, SerializationError};
use crate::source::{to_hex, SourceDocument};
use crate::tag_helpers::TagHelperCollection;

// ═══════════════════════════════════════════════════════════════════════════════
// KEYS
// ═══════════════════════════════════════════════════════════════════════════════

/// SHA-256 over everything that can change a document's generated output.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn compute(
        source: &SourceDocument,
        imports: &[SourceDocument],
        tag_helpers: &TagHelperCollection,
        configuration: &RazorConfiguration,
        options: &RazorCodeGenerationOptions,
    ) -> Result<Self, SerializationError> {
        let mut hasher = Sha256::new();
        // Paths end up in `#pragma checksum` and `#line`.
        let mut update_document = |document: &SourceDocument| {
            hasher.update(document.checksum());
            for path in [document.file_path(), document.relative_path()] {
                hasher.update(path.unwrap_or_default().as_bytes());
                hasher.update([0u8]);
            }
        };
        update_document(source);
        for import in imports {
            update_document(import);
        }
        hasher.update(serde_json::to_vec(tag_helpers)?);
        hasher.update(serde_json::to_vec(configuration)?);
        hasher.update(serde_json::to_vec(options)?);
        Ok(Self(to_hex(&hasher.finalize())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// CACHE
// ═══════════════════════════════════════════════════════════════════════════════

struct CacheEntry<V> {
    value: Arc<V>,
    last_used: AtomicU64,
}

pub struct CompilationCache<V> {
    capacity: usize,
    entries: RwLock<HashMap<CacheKey, CacheEntry<V>>>,
    in_flight: Mutex<HashMap<CacheKey, Arc<Mutex<()>>>>,
    clock: AtomicU64,
    cache_dir: Option<PathBuf>,
}

impl<V> CompilationCache<V>
where
    V: Serialize + DeserializeOwned + Send + Sync,
{
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: RwLock::new(HashMap::new()),
            in_flight: Mutex::new(HashMap::new()),
            clock: AtomicU64::new(0),
            cache_dir: None,
        }
    }

    /// Cache that mirrors entries to `{cache_dir}/{key}.json`.
    pub fn with_persistence(capacity: usize, cache_dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let cache_dir = cache_dir.into();
        fs::create_dir_all(&cache_dir)?;
        let mut cache = Self::new(capacity);
        cache.cache_dir = Some(cache_dir);
        Ok(cache)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }

    /// Drops in-memory entries; persisted files stay.
    pub fn clear(&self) {
        self.entries.write().unwrap_or_else(PoisonError::into_inner).clear();
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn cache_path(&self, key: &CacheKey) -> Option<PathBuf> {
        self.cache_dir
            .as_ref()
            .map(|dir| dir.join(format!("{}.json", key.as_str())))
    }

    pub fn get(&self, key: &CacheKey) -> Option<Arc<V>> {
        {
            let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(entry) = entries.get(key) {
                entry.last_used.store(self.tick(), Ordering::Relaxed);
                log::trace!("cache hit {}", key.as_str());
                return Some(Arc::clone(&entry.value));
            }
        }
        let value = self.load(key)?;
        log::trace!("cache hit on disk {}", key.as_str());
        Some(self.store(key.clone(), value))
    }

    fn load(&self, key: &CacheKey) -> Option<V> {
        let path = self.cache_path(key)?;
        let data = fs::read_to_string(&path).ok()?;
        match serde_json::from_str(&data) {
            Ok(value) => Some(value),
            Err(e) => {
                log::warn!("discarding corrupt cache entry {}: {}", path.display(), e);
                fs::remove_file(&path).ok();
                None
            }
        }
    }

    fn persist(&self, key: &CacheKey, value: &V) {
        let Some(path) = self.cache_path(key) else {
            return;
        };
        match serde_json::to_string(value) {
            Ok(data) => {
                if let Err(e) = fs::write(&path, data) {
                    log::warn!("failed to write cache entry {}: {}", path.display(), e);
                }
            }
            Err(e) => log::warn!("failed to encode cache entry {}: {}", key.as_str(), e),
        }
    }

    fn store(&self, key: CacheKey, value: V) -> Arc<V> {
        let value = Arc::new(value);
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.insert(
            key,
            CacheEntry {
                value: Arc::clone(&value),
                last_used: AtomicU64::new(self.tick()),
            },
        );
        while entries.len() > self.capacity {
            let Some(oldest) = entries
                .iter()
                .min_by_key(|(_, e)| e.last_used.load(Ordering::Relaxed))
                .map(|(k, _)| k.clone())
            else {
                break;
            };
            log::trace!("cache evict {}", oldest.as_str());
            entries.remove(&oldest);
        }
        value
    }

    pub fn insert(&self, key: CacheKey, value: V) -> Arc<V> {
        self.persist(&key, &value);
        self.store(key, value)
    }

    /// Cached value for `key`, computing it when absent. Concurrent callers
    /// for the same key wait for the first compute instead of repeating it.
    /// A failed compute caches nothing.
    pub fn get_or_compute<E, F>(&self, key: &CacheKey, compute: F) -> Result<Arc<V>, E>
    where
        F: FnOnce() -> Result<V, E>,
    {
        if let Some(value) = self.get(key) {
            return Ok(value);
        }
        let key_lock = {
            let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(in_flight.entry(key.clone()).or_default())
        };
        let guard = key_lock.lock().unwrap_or_else(PoisonError::into_inner);

        let result = match self.get(key) {
            Some(value) => Ok(value),
            None => {
                log::trace!("cache miss {}", key.as_str());
                compute().map(|value| self.insert(key.clone(), value))
            }
        };
        drop(guard);
        drop(key_lock);

        // Waiters still hold the key's lock; only the last one out removes it.
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if in_flight.get(key).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            in_flight.remove(key);
        }
        result
    }

    pub fn cache_dir(&self) -> Option<&Path> {
        self.cache_dir.as_deref()
    }
}

impl RazorProjectEngine {
    /// Generated output for `source`, served from `cache` when the source,
    /// imports, descriptors and options all match a previous compilation.
    pub fn process_cached(
        &self,
        cache: &CompilationCache<RazorCSharpDocument>,
        source: SourceDocument,
        imports: Vec<SourceDocument>,
        tag_helpers: Arc<TagHelperCollection>,
        design_time: bool,
    ) -> Result<Arc<RazorCSharpDocument>, PipelineError> {
        let options = RazorCodeGenerationOptions {
            design_time,
            ..self.codegen_options().clone()
        };
        let key = CacheKey::compute(&source, &imports, &tag_helpers, self.configuration(), &options)?;
        cache.get_or_compute(&key, || {
            let document = if design_time {
                self.process_design_time(source, imports, tag_helpers)?
            } else {
                self.process(source, imports, tag_helpers)?
            };
            document.csharp_document().cloned()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn key(n: u8) -> CacheKey {
        CacheKey(to_hex(&[n]))
    }

    #[test]
    fn test_least_recently_used_is_evicted() {
        let cache: CompilationCache<String> = CompilationCache::new(2);
        cache.insert(key(1), "one".into());
        cache.insert(key(2), "two".into());
        assert!(cache.get(&key(1)).is_some());
        cache.insert(key(3), "three".into());
        assert_eq!(cache.len(), 2);
        assert!(cache.contains(&key(1)));
        assert!(!cache.contains(&key(2)));
        assert!(cache.contains(&key(3)));
    }

    #[test]
    fn test_failed_compute_is_not_cached() {
        let cache: CompilationCache<String> = CompilationCache::new(4);
        let failed: Result<_, &str> = cache.get_or_compute(&key(1), || Err("boom"));
        assert!(failed.is_err());
        assert!(cache.is_empty());
        let ok: Result<_, &str> = cache.get_or_compute(&key(1), || Ok("fine".to_string()));
        assert_eq!(ok.unwrap().as_str(), "fine");
    }

    #[test]
    fn test_one_compute_per_key_under_contention() {
        let cache: Arc<CompilationCache<String>> = Arc::new(CompilationCache::new(4));
        let computes = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let computes = Arc::clone(&computes);
                std::thread::spawn(move || {
                    let value: Result<_, ()> = cache.get_or_compute(&key(7), || {
                        computes.fetch_add(1, Ordering::SeqCst);
                        std::thread::sleep(std::time::Duration::from_millis(20));
                        Ok("seven".to_string())
                    });
                    value.unwrap()
                })
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap().as_str(), "seven");
        }
        assert_eq!(computes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_persisted_entries_reload_and_corrupt_ones_are_removed() {
        let dir = tempfile::tempdir().unwrap();
        {
            let cache: CompilationCache<Vec<u32>> = CompilationCache::with_persistence(4, dir.path()).unwrap();
            cache.insert(key(1), vec![1, 2, 3]);
        }
        let corrupt = dir.path().join(format!("{}.json", key(2).as_str()));
        fs::write(&corrupt, "{not json").unwrap();

        let cache: CompilationCache<Vec<u32>> = CompilationCache::with_persistence(4, dir.path()).unwrap();
        assert_eq!(*cache.get(&key(1)).unwrap(), vec![1, 2, 3]);
        assert!(cache.get(&key(2)).is_none());
        assert!(!corrupt.exists());
    }

    #[test]
    fn test_key_changes_with_inputs() {
        let source = SourceDocument::from_text("<p></p>");
        let configuration = RazorConfiguration::default_legacy();
        let options = RazorCodeGenerationOptions::default();
        let empty = TagHelperCollection::new();
        let a = CacheKey::compute(&source, &[], &empty, &configuration, &options).unwrap();
        let b = CacheKey::compute(&source, &[], &empty, &configuration, &options).unwrap();
        assert_eq!(a, b);
        let design = RazorCodeGenerationOptions::design_time_default();
        let c = CacheKey::compute(&source, &[], &empty, &configuration, &design).unwrap();
        assert_ne!(a, c);
        let edited = SourceDocument::from_text("<p>!</p>");
        let d = CacheKey::compute(&edited, &[], &empty, &configuration, &options).unwrap();
        assert_ne!(a, d);

        let at = |file: &str| SourceDocument::new("<p></p>", Some(file.to_string()), Some("/Index.cshtml".into()));
        let first = CacheKey::compute(&at("/a/Index.cshtml"), &[], &empty, &configuration, &options).unwrap();
        let second = CacheKey::compute(&at("/b/Index.cshtml"), &[], &empty, &configuration, &options).unwrap();
        assert_ne!(first, second);

        let import = |file: &str| SourceDocument::new("@using X", Some(file.to_string()), Some("/_ViewImports.cshtml".into()));
        let page = at("/a/Index.cshtml");
        let e = CacheKey::compute(&page, &[import("/a/_ViewImports.cshtml")], &empty, &configuration, &options).unwrap();
        let f = CacheKey::compute(&page, &[import("/b/_ViewImports.cshtml")], &empty, &configuration, &options).unwrap();
        assert_ne!(e, f);
    }

    #[test]
    fn test_same_page_under_two_roots_keeps_its_own_pragmas() {
        let engine = RazorProjectEngine::create(RazorConfiguration::default_legacy(), None);
        let cache = CompilationCache::new(8);
        let tag_helpers = Arc::new(TagHelperCollection::new());
        let at = |file: &str| SourceDocument::new("<p>@x</p>", Some(file.to_string()), Some("/Index.cshtml".into()));
        engine
            .process_cached(&cache, at("/projA/Index.cshtml"), Vec::new(), tag_helpers.clone(), false)
            .unwrap();
        let second = engine
            .process_cached(&cache, at("/projB/Index.cshtml"), Vec::new(), tag_helpers, false)
            .unwrap();
        assert!(second.generated_code.contains("/projB/Index.cshtml"));
        assert!(!second.generated_code.contains("/projA/"));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_failed_compute_under_contention_never_overlaps() {
        let cache: Arc<CompilationCache<String>> = Arc::new(CompilationCache::new(4));
        let active = Arc::new(AtomicUsize::new(0));
        let overlapped = Arc::new(AtomicUsize::new(0));
        let attempts = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let active = Arc::clone(&active);
                let overlapped = Arc::clone(&overlapped);
                let attempts = Arc::clone(&attempts);
                std::thread::spawn(move || {
                    let value: Result<_, &str> = cache.get_or_compute(&key(9), || {
                        if active.fetch_add(1, Ordering::SeqCst) > 0 {
                            overlapped.fetch_add(1, Ordering::SeqCst);
                        }
                        std::thread::sleep(std::time::Duration::from_millis(10));
                        active.fetch_sub(1, Ordering::SeqCst);
                        if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                            Err("first attempt fails")
                        } else {
                            Ok("nine".to_string())
                        }
                    });
                    value.ok()
                })
            })
            .collect();
        let values: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(overlapped.load(Ordering::SeqCst), 0);
        assert_eq!(values.iter().filter(|v| v.is_none()).count(), 1);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        assert_eq!(cache.get(&key(9)).unwrap().as_str(), "nine");
        assert!(cache.in_flight.lock().unwrap().is_empty());
    }

    #[test]
    fn test_engine_process_cached_reuses_output() {
        let engine = RazorProjectEngine::create(RazorConfiguration::default_legacy(), None);
        let cache = CompilationCache::new(8);
        let tag_helpers = Arc::new(TagHelperCollection::new());
        let source = SourceDocument::new("<p>@Model</p>", Some("/A.cshtml".into()), Some("/A.cshtml".into()));
        let first = engine
            .process_cached(&cache, source.clone(), Vec::new(), tag_helpers.clone(), false)
            .unwrap();
        let second = engine
            .process_cached(&cache, source, Vec::new(), tag_helpers, false)
            .unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.len(), 1);
    }
}
