//! Durable, generation-scoped entry storage.
//!
//! Entries live under `<root>/<generation>/<id>.json`. Writes go to a
//! temp file first and are renamed into place, so an entry is always
//! observed either whole or not at all. The in-memory index mirrors the
//! disk layout and is rebuilt from it on open.

use std::path::{Path, PathBuf};

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, info, warn};

use crate::{CacheEntry, CacheError, CacheKey, Generation};

/// Storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root directory holding one subdirectory per generation.
    pub root: PathBuf,

    /// Soft quota across all generations. `None` means unbounded.
    pub max_bytes: Option<u64>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: dirs::cache_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("pagekit"),
            max_bytes: None,
        }
    }
}

impl StorageConfig {
    /// Create a config rooted at the given directory.
    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            max_bytes: None,
        }
    }

    /// Set the soft quota.
    pub fn with_max_bytes(mut self, max_bytes: u64) -> Self {
        self.max_bytes = Some(max_bytes);
        self
    }
}

/// All entries of one generation plus their accumulated weight.
#[derive(Debug, Default)]
struct GenerationIndex {
    entries: HashMap<String, CacheEntry>,
    weight: u64,
}

/// Generation-scoped durable cache store.
///
/// Writes are last-writer-wins; an entry replace is atomic at file
/// granularity, so readers never observe a torn entry.
#[derive(Debug)]
pub struct CacheStore {
    config: StorageConfig,
    generations: HashMap<Generation, GenerationIndex>,
}

impl CacheStore {
    /// Open the store, rebuilding the index from whatever generations
    /// already exist on disk.
    pub async fn open(config: StorageConfig) -> Result<Self, CacheError> {
        fs::create_dir_all(&config.root).await?;

        let mut generations = HashMap::new();
        let mut dir = fs::read_dir(&config.root).await?;
        while let Some(child) = dir.next_entry().await? {
            if !child.file_type().await?.is_dir() {
                continue;
            }
            let Some(name) = child.file_name().to_str().map(String::from) else {
                continue;
            };
            let generation = Generation::new(name);
            let index = Self::load_generation(&child.path()).await?;
            debug!(%generation, entries = index.entries.len(), "Loaded generation");
            generations.insert(generation, index);
        }

        info!(root = %config.root.display(), generations = generations.len(), "Cache store opened");

        Ok(Self {
            config,
            generations,
        })
    }

    async fn load_generation(dir: &Path) -> Result<GenerationIndex, CacheError> {
        let mut index = GenerationIndex::default();
        let mut files = fs::read_dir(dir).await?;
        while let Some(file) = files.next_entry().await? {
            let path = file.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(id) = path.file_stem().and_then(|s| s.to_str()).map(String::from) else {
                continue;
            };
            let bytes = fs::read(&path).await?;
            match serde_json::from_slice::<CacheEntry>(&bytes) {
                Ok(entry) => {
                    index.weight += entry.weight();
                    index.entries.insert(id, entry);
                }
                Err(e) => {
                    // A torn write from a crash mid-rename; drop the file.
                    warn!(path = %path.display(), error = %e, "Discarding unreadable cache entry");
                    let _ = fs::remove_file(&path).await;
                }
            }
        }
        Ok(index)
    }

    /// List known generations.
    pub fn generations(&self) -> Vec<Generation> {
        self.generations.keys().cloned().collect()
    }

    /// Check whether a generation exists.
    pub fn has(&self, generation: &Generation) -> bool {
        self.generations.contains_key(generation)
    }

    /// Create a generation namespace (idempotent).
    pub async fn open_generation(&mut self, generation: &Generation) -> Result<(), CacheError> {
        fs::create_dir_all(self.generation_dir(generation)).await?;
        self.generations
            .entry(generation.clone())
            .or_default();
        Ok(())
    }

    /// Look up an entry.
    pub fn get(&self, generation: &Generation, key: &CacheKey) -> Option<&CacheEntry> {
        self.generations
            .get(generation)?
            .entries
            .get(&key.storage_id())
    }

    /// Number of entries in a generation.
    pub fn len(&self, generation: &Generation) -> usize {
        self.generations
            .get(generation)
            .map(|g| g.entries.len())
            .unwrap_or(0)
    }

    /// Whether a generation holds no entries.
    pub fn is_empty(&self, generation: &Generation) -> bool {
        self.len(generation) == 0
    }

    /// Store an entry, replacing any previous entry for the same key.
    pub async fn put(
        &mut self,
        generation: &Generation,
        key: &CacheKey,
        entry: CacheEntry,
    ) -> Result<(), CacheError> {
        if !self.generations.contains_key(generation) {
            return Err(CacheError::UnknownGeneration(generation.to_string()));
        }

        let id = key.storage_id();
        let weight = entry.weight();
        let replaced_weight = self
            .generations
            .get(generation)
            .and_then(|g| g.entries.get(&id))
            .map(|e| e.weight())
            .unwrap_or(0);

        if let Some(max) = self.config.max_bytes {
            let total: u64 = self.generations.values().map(|g| g.weight).sum();
            if total - replaced_weight + weight > max {
                return Err(CacheError::QuotaExceeded { needed: weight });
            }
        }

        let path = self.entry_path(generation, &id);
        let tmp = path.with_extension("json.tmp");
        let bytes = serde_json::to_vec(&entry)
            .map_err(|e| CacheError::EntryFormat(e.to_string()))?;
        fs::write(&tmp, &bytes).await?;
        fs::rename(&tmp, &path).await?;

        if let Some(index) = self.generations.get_mut(generation) {
            index.weight = index.weight - replaced_weight + weight;
            index.entries.insert(id, entry);
        }

        debug!(%generation, %key, bytes = bytes.len(), "Cached entry");
        Ok(())
    }

    /// Delete a generation and its disk directory.
    pub async fn delete_generation(
        &mut self,
        generation: &Generation,
    ) -> Result<bool, CacheError> {
        let existed = self.generations.remove(generation).is_some();
        match fs::remove_dir_all(self.generation_dir(generation)).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        if existed {
            info!(%generation, "Deleted cache generation");
        }
        Ok(existed)
    }

    /// Delete every generation except `keep`.
    pub async fn retain_only(&mut self, keep: &Generation) -> Result<(), CacheError> {
        let doomed: Vec<Generation> = self
            .generations
            .keys()
            .filter(|g| *g != keep)
            .cloned()
            .collect();
        for generation in doomed {
            self.delete_generation(&generation).await?;
        }
        Ok(())
    }

    fn generation_dir(&self, generation: &Generation) -> PathBuf {
        self.config.root.join(generation.as_str())
    }

    fn entry_path(&self, generation: &Generation, id: &str) -> PathBuf {
        self.generation_dir(generation).join(format!("{id}.json"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Method;
    use url::Url;

    fn key(path: &str) -> CacheKey {
        CacheKey::new(
            Method::GET,
            Url::parse(&format!("https://clinic.example{path}")).unwrap(),
        )
    }

    fn entry(key: &CacheKey, body: &[u8]) -> CacheEntry {
        CacheEntry::new(key, 200, HashMap::new(), body.to_vec())
    }

    async fn store_in(dir: &tempfile::TempDir) -> CacheStore {
        CacheStore::open(StorageConfig::at(dir.path()))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_put_get_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store_in(&dir).await;
        let generation = Generation::new("v1");
        store.open_generation(&generation).await.unwrap();

        let k = key("/pages/home.html");
        store
            .put(&generation, &k, entry(&k, b"<h1>home</h1>"))
            .await
            .unwrap();

        let got = store.get(&generation, &k).unwrap();
        assert_eq!(got.body, b"<h1>home</h1>");
        assert_eq!(got.status, 200);
    }

    #[tokio::test]
    async fn test_put_replaces_entry() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store_in(&dir).await;
        let generation = Generation::new("v1");
        store.open_generation(&generation).await.unwrap();

        let k = key("/styles.css");
        store.put(&generation, &k, entry(&k, b"old")).await.unwrap();
        store.put(&generation, &k, entry(&k, b"new")).await.unwrap();

        assert_eq!(store.len(&generation), 1);
        assert_eq!(store.get(&generation, &k).unwrap().body, b"new");
    }

    #[tokio::test]
    async fn test_entries_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let generation = Generation::new("v1");
        let k = key("/app.js");

        {
            let mut store = store_in(&dir).await;
            store.open_generation(&generation).await.unwrap();
            store
                .put(&generation, &k, entry(&k, b"console.log(1)"))
                .await
                .unwrap();
        }

        let store = store_in(&dir).await;
        assert!(store.has(&generation));
        assert_eq!(
            store.get(&generation, &k).unwrap().body,
            b"console.log(1)"
        );
    }

    #[tokio::test]
    async fn test_delete_generation_removes_disk_state() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store_in(&dir).await;
        let generation = Generation::new("v1");
        store.open_generation(&generation).await.unwrap();

        let k = key("/a");
        store.put(&generation, &k, entry(&k, b"a")).await.unwrap();

        assert!(store.delete_generation(&generation).await.unwrap());
        assert!(!store.has(&generation));
        assert!(!dir.path().join("v1").exists());

        // Idempotent
        assert!(!store.delete_generation(&generation).await.unwrap());
    }

    #[tokio::test]
    async fn test_retain_only_keeps_current() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store_in(&dir).await;
        let old = Generation::new("v1");
        let current = Generation::new("v2");
        store.open_generation(&old).await.unwrap();
        store.open_generation(&current).await.unwrap();

        store.retain_only(&current).await.unwrap();

        assert!(!store.has(&old));
        assert!(store.has(&current));
    }

    #[tokio::test]
    async fn test_quota_exceeded_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = CacheStore::open(
            StorageConfig::at(dir.path()).with_max_bytes(100),
        )
        .await
        .unwrap();
        let generation = Generation::new("v1");
        store.open_generation(&generation).await.unwrap();

        let k = key("/big");
        let err = store
            .put(&generation, &k, entry(&k, &[0u8; 4096]))
            .await
            .unwrap_err();
        assert!(err.is_quota());
        assert!(store.get(&generation, &k).is_none());
    }

    #[tokio::test]
    async fn test_put_into_unknown_generation_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store_in(&dir).await;
        let k = key("/x");
        let err = store
            .put(&Generation::new("nope"), &k, entry(&k, b"x"))
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::UnknownGeneration(_)));
    }
}
