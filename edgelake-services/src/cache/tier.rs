use std::{
    collections::HashMap,
    fs,
    io::Write,
    path::{Path, PathBuf},
    sync::{Arc, RwLock},
};

use edgelake_core::util::{glob_match, hash::sha256};
use serde::{Deserialize, Serialize};

use super::CacheError;

/// A cached value with its absolute expiry in unix milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoredEntry {
    pub cache_name: String,
    pub key: String,
    /// Serialized value, returned as-is on every hit.
    pub value: String,
    pub expires_at: u64,
}

impl StoredEntry {
    #[inline]
    pub fn is_live(&self, now: u64) -> bool {
        now < self.expires_at
    }

    fn matches(&self, cache_name: Option<&str>, pattern: Option<&str>) -> bool {
        cache_name.map_or(true, |name| self.cache_name == name)
            && pattern.map_or(true, |p| glob_match(p, &self.key))
    }
}

/// Key of an entry across every cache name.
pub type EntryId = (String, String);

/// One storage layer of the cache facade.
///
/// Implementations must tolerate concurrent callers. A tier reporting itself
/// unavailable is skipped by the facade.
pub trait CacheTier: Send + Sync {
    fn name(&self) -> &'static str;

    fn is_available(&self) -> bool {
        true
    }

    fn get(&self, cache_name: &str, key: &str) -> Result<Option<StoredEntry>, CacheError>;

    /// Store `entry`, replacing any previous one with the same id. `now` lets a tier
    /// evict what has already expired.
    fn put(&self, entry: &StoredEntry, now: u64) -> Result<(), CacheError>;

    /// Drop every entry matching the filters, returning the ids of the live ones removed.
    fn remove(
        &self,
        cache_name: Option<&str>,
        pattern: Option<&str>,
        now: u64,
    ) -> Result<Vec<EntryId>, CacheError>;

    fn live_entries(&self, cache_name: Option<&str>, now: u64) -> Result<Vec<EntryId>, CacheError>;
}

/// In-process tier. Clones share the same map.
#[derive(Clone, Default)]
pub struct MemoryTier {
    entries: Arc<RwLock<HashMap<EntryId, StoredEntry>>>,
}

impl MemoryTier {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CacheTier for MemoryTier {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn get(&self, cache_name: &str, key: &str) -> Result<Option<StoredEntry>, CacheError> {
        let entries = self.entries.read().map_err(|_| CacheError::Poisoned)?;
        Ok(entries
            .get(&(cache_name.to_string(), key.to_string()))
            .cloned())
    }

    fn put(&self, entry: &StoredEntry, now: u64) -> Result<(), CacheError> {
        let mut entries = self.entries.write().map_err(|_| CacheError::Poisoned)?;
        entries.retain(|_, stored| stored.is_live(now));
        entries.insert(
            (entry.cache_name.clone(), entry.key.clone()),
            entry.clone(),
        );
        Ok(())
    }

    fn remove(
        &self,
        cache_name: Option<&str>,
        pattern: Option<&str>,
        now: u64,
    ) -> Result<Vec<EntryId>, CacheError> {
        let mut entries = self.entries.write().map_err(|_| CacheError::Poisoned)?;
        let mut removed = Vec::new();
        entries.retain(|id, entry| {
            if !entry.matches(cache_name, pattern) {
                return true;
            }
            if entry.is_live(now) {
                removed.push(id.clone());
            }
            false
        });
        Ok(removed)
    }

    fn live_entries(&self, cache_name: Option<&str>, now: u64) -> Result<Vec<EntryId>, CacheError> {
        let entries = self.entries.read().map_err(|_| CacheError::Poisoned)?;
        Ok(entries
            .iter()
            .filter(|(_, e)| e.matches(cache_name, None) && e.is_live(now))
            .map(|(id, _)| id.clone())
            .collect())
    }
}

/// Local persistent tier: one JSON file per entry, named after a digest of its id.
#[derive(Debug, Clone)]
pub struct FileTier {
    dir: PathBuf,
}

impl FileTier {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path_of(&self, cache_name: &str, key: &str) -> PathBuf {
        self.dir
            .join(format!("{}.json", sha256(&[cache_name, key])))
    }

    fn read_entry(path: &Path) -> Result<Option<StoredEntry>, CacheError> {
        match fs::read(path) {
            Ok(content) => Ok(Some(serde_json::from_slice(&content)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn scan(&self) -> Result<Vec<(PathBuf, StoredEntry)>, CacheError> {
        let mut found = Vec::new();
        for dir_entry in fs::read_dir(&self.dir)? {
            let path = dir_entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match Self::read_entry(&path) {
                Ok(Some(entry)) => found.push((path, entry)),
                Ok(None) => {}
                Err(e) => tracing::warn!("skip unreadable cache file {}: {e}", path.display()),
            }
        }
        Ok(found)
    }
}

impl CacheTier for FileTier {
    fn name(&self) -> &'static str {
        "persistent"
    }

    fn is_available(&self) -> bool {
        self.dir.is_dir()
    }

    fn get(&self, cache_name: &str, key: &str) -> Result<Option<StoredEntry>, CacheError> {
        Self::read_entry(&self.path_of(cache_name, key))
    }

    /// Writes to a uniquely named temp file in the cache dir, then renames it over the
    /// entry. Readers see the old or the new file, never a partial one.
    fn put(&self, entry: &StoredEntry, _now: u64) -> Result<(), CacheError> {
        let path = self.path_of(&entry.cache_name, &entry.key);
        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(&serde_json::to_vec(entry)?)?;
        tmp.persist(&path).map_err(|e| e.error)?;
        Ok(())
    }

    fn remove(
        &self,
        cache_name: Option<&str>,
        pattern: Option<&str>,
        now: u64,
    ) -> Result<Vec<EntryId>, CacheError> {
        let mut removed = Vec::new();
        for (path, entry) in self.scan()? {
            if !entry.matches(cache_name, pattern) {
                continue;
            }
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            }
            if entry.is_live(now) {
                removed.push((entry.cache_name, entry.key));
            }
        }
        Ok(removed)
    }

    fn live_entries(&self, cache_name: Option<&str>, now: u64) -> Result<Vec<EntryId>, CacheError> {
        Ok(self
            .scan()?
            .into_iter()
            .filter(|(_, e)| e.matches(cache_name, None) && e.is_live(now))
            .map(|(_, e)| (e.cache_name, e.key))
            .collect())
    }
}
