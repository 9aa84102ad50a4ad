//! Snapshot cache manager with atomic writes
//!
//! Each saved record set becomes one JSON file named after its UTC creation
//! second. Writes go to a temporary file that is renamed into place, so
//! readers never observe a partial snapshot. Eviction by age runs on every
//! save and load, and expired snapshots are filtered from reads even if they
//! could not be deleted.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::fs;
use tracing::{debug, error, info, warn};

use crate::app::models::PatchTitle;
use crate::constants::cache;
use crate::errors::{CacheError, CacheResult};

use super::config::CacheConfig;
use super::entry::{
    file_name_for_key, is_snapshot_file, key_for, timestamp_from_file_name, CacheEntry,
};

/// Owner of the snapshot files under the cache root
#[derive(Debug)]
pub struct CacheManager {
    /// Configuration
    config: CacheConfig,
    /// Cache root directory
    cache_root: PathBuf,
}

impl CacheManager {
    /// Create a new cache manager
    ///
    /// # Errors
    ///
    /// Returns `CacheError` if cache directory cannot be created or accessed
    pub async fn new(config: CacheConfig) -> CacheResult<Self> {
        let cache_root = match &config.cache_root {
            Some(path) => path.clone(),
            None => Self::get_default_cache_dir()?,
        };

        Self::ensure_directory_exists(&cache_root).await?;

        debug!(
            "Initialized cache manager with root: {}",
            cache_root.display()
        );

        Ok(Self { config, cache_root })
    }

    /// Get the cache root directory
    pub fn cache_root(&self) -> &Path {
        &self.cache_root
    }

    /// Get the cache configuration
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Get the default cache directory for the current OS
    ///
    /// - macOS: ~/Library/Caches/patcher
    /// - Linux: ~/.cache/patcher
    /// - Windows: %LOCALAPPDATA%/patcher
    pub fn get_default_cache_dir() -> CacheResult<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| CacheError::DirectoryNotAccessible {
                path: PathBuf::from("system cache directory"),
            })?
            .join(cache::DIR_NAME);

        Ok(cache_dir)
    }

    /// Ensure a directory exists, creating it if necessary
    async fn ensure_directory_exists(path: &Path) -> CacheResult<()> {
        if !path.exists() {
            fs::create_dir_all(path).await.map_err(|e| {
                error!("Failed to create cache directory: {}", e);
                CacheError::DirectoryNotAccessible {
                    path: path.to_path_buf(),
                }
            })?;
            debug!("Created cache directory: {}", path.display());
        }
        Ok(())
    }

    /// Persist a record set as a new snapshot
    ///
    /// Returns `None` without touching disk when the cache is disabled.
    pub async fn save(&self, records: &[PatchTitle]) -> CacheResult<Option<CacheEntry>> {
        self.save_at(records, Utc::now()).await
    }

    /// Persist a record set with an explicit creation time
    pub async fn save_at(
        &self,
        records: &[PatchTitle],
        created_at: DateTime<Utc>,
    ) -> CacheResult<Option<CacheEntry>> {
        if self.config.disabled {
            debug!("Cache disabled, skipping snapshot of {} records", records.len());
            return Ok(None);
        }

        let (key, final_path) = self.free_slot(created_at);
        let entry = CacheEntry {
            created_at,
            key,
            records: records.to_vec(),
        };
        let content = serde_json::to_vec_pretty(&entry)?;
        self.write_atomically(&final_path, &content).await?;

        info!(
            "Cached {} records to {}",
            entry.records.len(),
            final_path.display()
        );

        self.evict_quietly().await;
        Ok(Some(entry))
    }

    /// Most recent non-expired snapshot, by the creation time stored inside it
    pub async fn load_latest(&self) -> CacheResult<Option<CacheEntry>> {
        self.evict_quietly().await;
        let entries = self.read_entries().await?;
        Ok(entries
            .into_iter()
            .max_by(|a, b| a.created_at.cmp(&b.created_at).then(a.key.cmp(&b.key))))
    }

    /// Every non-expired snapshot, newest first
    pub async fn load_all(&self) -> CacheResult<Vec<CacheEntry>> {
        self.evict_quietly().await;
        let mut entries = self.read_entries().await?;
        entries.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.key.cmp(&a.key)));
        Ok(entries)
    }

    /// Delete snapshots older than `retention`, returning how many were removed
    pub async fn evict_expired(&self, retention: Duration) -> CacheResult<usize> {
        let now = Utc::now();
        let mut removed = 0;

        for path in self.snapshot_paths().await? {
            let created_at = match read_entry(&path).await {
                Ok(entry) => Some(entry.created_at),
                Err(_) => timestamp_from_file_name(&path),
            };
            let Some(created_at) = created_at else {
                continue;
            };

            let age = (now - created_at).to_std().unwrap_or(Duration::ZERO);
            if age > retention {
                fs::remove_file(&path).await.map_err(|e| CacheError::Io {
                    path: path.clone(),
                    source: e,
                })?;
                debug!("Evicted expired snapshot {}", path.display());
                removed += 1;
            }
        }

        if removed > 0 {
            info!("Evicted {} expired cache snapshots", removed);
        }
        Ok(removed)
    }

    /// Remove every snapshot and leftover temp file, returning the snapshot count
    pub async fn clear_all(&self) -> CacheResult<usize> {
        let mut removed = 0;
        let mut dir = fs::read_dir(&self.cache_root)
            .await
            .map_err(|e| self.io_error(e))?;

        while let Some(dir_entry) = dir.next_entry().await.map_err(|e| self.io_error(e))? {
            let path = dir_entry.path();
            let is_temp = path
                .file_name()
                .and_then(|name| name.to_str())
                .map_or(false, |name| {
                    name.starts_with(cache::FILE_PREFIX) && name.ends_with(cache::TEMP_FILE_SUFFIX)
                });

            if is_snapshot_file(&path) || is_temp {
                fs::remove_file(&path).await.map_err(|e| CacheError::Io {
                    path: path.clone(),
                    source: e,
                })?;
                if !is_temp {
                    removed += 1;
                }
            }
        }

        info!(
            "Cleared {} cache snapshots from {}",
            removed,
            self.cache_root.display()
        );
        Ok(removed)
    }

    fn free_slot(&self, created_at: DateTime<Utc>) -> (String, PathBuf) {
        let base = key_for(created_at);
        let mut key = base.clone();
        let mut suffix = 1;
        loop {
            let path = self.cache_root.join(file_name_for_key(&key));
            if !path.exists() {
                return (key, path);
            }
            key = format!("{}-{}", base, suffix);
            suffix += 1;
        }
    }

    /// Save file content atomically using temp file + rename pattern
    async fn write_atomically(&self, final_path: &Path, content: &[u8]) -> CacheResult<()> {
        let mut temp_name = final_path.as_os_str().to_owned();
        temp_name.push(cache::TEMP_FILE_SUFFIX);
        let temp_path = PathBuf::from(temp_name);

        fs::write(&temp_path, content).await.map_err(|e| {
            error!("Failed to write temporary file: {}", e);
            CacheError::Io {
                path: temp_path.clone(),
                source: e,
            }
        })?;

        if let Err(e) = fs::rename(&temp_path, final_path).await {
            error!("Failed to rename temporary file: {}", e);
            let _ = fs::remove_file(&temp_path).await;
            return Err(CacheError::AtomicWriteFailed {
                temp_path,
                final_path: final_path.to_path_buf(),
            });
        }
        Ok(())
    }

    async fn evict_quietly(&self) {
        if let Err(e) = self.evict_expired(self.config.retention).await {
            warn!("Cache eviction failed: {}", e);
        }
    }

    async fn read_entries(&self) -> CacheResult<Vec<CacheEntry>> {
        let now = Utc::now();
        let mut entries = Vec::new();

        for path in self.snapshot_paths().await? {
            match read_entry(&path).await {
                Ok(entry) if entry.is_expired(self.config.retention, now) => {
                    debug!("Ignoring expired snapshot {}", path.display());
                }
                Ok(entry) => entries.push(entry),
                Err(e) => warn!("Skipping unreadable snapshot {}: {}", path.display(), e),
            }
        }
        Ok(entries)
    }

    async fn snapshot_paths(&self) -> CacheResult<Vec<PathBuf>> {
        let mut paths = Vec::new();
        let mut dir = match fs::read_dir(&self.cache_root).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(paths),
            Err(e) => return Err(self.io_error(e)),
        };

        while let Some(dir_entry) = dir.next_entry().await.map_err(|e| self.io_error(e))? {
            let path = dir_entry.path();
            if is_snapshot_file(&path) {
                paths.push(path);
            }
        }
        Ok(paths)
    }

    fn io_error(&self, source: io::Error) -> CacheError {
        CacheError::Io {
            path: self.cache_root.clone(),
            source,
        }
    }
}

async fn read_entry(path: &Path) -> CacheResult<CacheEntry> {
    let content = fs::read(path).await.map_err(|e| CacheError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    Ok(serde_json::from_slice(&content)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn records() -> Vec<PatchTitle> {
        vec![
            PatchTitle::new("1", "Google Chrome", "Jan 15 2024", 6, 5, "124.0"),
            PatchTitle::new("2", "Zoom", "Mar 01 2024", 2, 0, "6.0"),
        ]
    }

    async fn manager(dir: &TempDir) -> CacheManager {
        CacheManager::new(CacheConfig::with_cache_root(dir.path().to_path_buf()))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_creates_missing_directory() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("nested").join("patcher");
        let cache = CacheManager::new(CacheConfig::with_cache_root(root.clone()))
            .await
            .unwrap();
        assert_eq!(cache.cache_root(), root.as_path());
        assert!(root.exists());
    }

    #[tokio::test]
    async fn test_save_and_load_latest() {
        let temp_dir = TempDir::new().unwrap();
        let cache = manager(&temp_dir).await;

        let saved = cache.save(&records()).await.unwrap().unwrap();
        let loaded = cache.load_latest().await.unwrap().unwrap();

        assert_eq!(loaded.key, saved.key);
        assert_eq!(loaded.records, records());
        assert!(temp_dir.path().join(saved.file_name()).exists());
    }

    #[tokio::test]
    async fn test_same_second_gets_suffix() {
        let temp_dir = TempDir::new().unwrap();
        let cache = manager(&temp_dir).await;
        let created_at = Utc::now();

        let first = cache.save_at(&records(), created_at).await.unwrap().unwrap();
        let second = cache.save_at(&records()[..1], created_at).await.unwrap().unwrap();

        assert_eq!(second.key, format!("{}-1", first.key));
        assert_eq!(cache.load_all().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_latest_uses_stored_creation_time() {
        let temp_dir = TempDir::new().unwrap();
        let cache = manager(&temp_dir).await;
        let now = Utc::now();

        let newer = cache.save_at(&records(), now).await.unwrap().unwrap();

        // A file whose name sorts last but whose contents are older
        let stale = CacheEntry {
            created_at: now - chrono::Duration::days(1),
            key: "99991231235959".to_string(),
            records: Vec::new(),
        };
        std::fs::write(
            temp_dir.path().join(stale.file_name()),
            serde_json::to_vec(&stale).unwrap(),
        )
        .unwrap();

        let latest = cache.load_latest().await.unwrap().unwrap();
        assert_eq!(latest.key, newer.key);

        let all = cache.load_all().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].key, newer.key);
    }

    #[tokio::test]
    async fn test_unreadable_snapshot_is_skipped() {
        let temp_dir = TempDir::new().unwrap();
        let cache = manager(&temp_dir).await;
        let saved = cache.save(&records()).await.unwrap().unwrap();

        std::fs::write(temp_dir.path().join("patch_data_20990101000000.json"), b"{oops").unwrap();

        let latest = cache.load_latest().await.unwrap().unwrap();
        assert_eq!(latest.key, saved.key);
    }

    #[tokio::test]
    async fn test_expired_snapshots_are_evicted() {
        let temp_dir = TempDir::new().unwrap();
        let config = CacheConfig::with_cache_root(temp_dir.path().to_path_buf())
            .with_retention(Duration::from_secs(7 * 24 * 60 * 60));
        let cache = CacheManager::new(config).await.unwrap();

        let old = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        let old_entry = cache.save_at(&records(), old).await.unwrap().unwrap();
        assert!(!temp_dir.path().join(old_entry.file_name()).exists());

        assert!(cache.load_latest().await.unwrap().is_none());

        let fresh = cache.save(&records()).await.unwrap().unwrap();
        assert_eq!(cache.load_latest().await.unwrap().unwrap().key, fresh.key);
    }

    #[tokio::test]
    async fn test_expired_snapshot_on_disk_is_not_read() {
        let temp_dir = TempDir::new().unwrap();
        let keeper = manager(&temp_dir).await;
        let created = Utc::now() - chrono::Duration::days(30);
        let entry = keeper.save_at(&records(), created).await.unwrap().unwrap();

        // Shorter retention over the same directory, read without evicting
        let config = CacheConfig::with_cache_root(temp_dir.path().to_path_buf())
            .with_retention(Duration::from_secs(7 * 24 * 60 * 60));
        let strict = CacheManager::new(config).await.unwrap();

        assert!(strict.read_entries().await.unwrap().is_empty());
        assert!(temp_dir.path().join(entry.file_name()).exists());
        assert_eq!(keeper.read_entries().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_evict_expired_counts_removals() {
        let temp_dir = TempDir::new().unwrap();
        let cache = manager(&temp_dir).await;

        let old = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        let entry = CacheEntry {
            created_at: old,
            key: key_for(old),
            records: records(),
        };
        std::fs::write(
            temp_dir.path().join(entry.file_name()),
            serde_json::to_vec(&entry).unwrap(),
        )
        .unwrap();
        cache.save(&records()).await.unwrap();

        // Already evicted by the save
        assert_eq!(cache.evict_expired(cache::DEFAULT_RETENTION).await.unwrap(), 0);
        assert_eq!(cache.load_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_clear_all() {
        let temp_dir = TempDir::new().unwrap();
        let cache = manager(&temp_dir).await;
        let now = Utc::now();
        cache.save_at(&records(), now).await.unwrap();
        cache.save_at(&records(), now).await.unwrap();
        std::fs::write(temp_dir.path().join("keep.txt"), b"x").unwrap();

        assert_eq!(cache.clear_all().await.unwrap(), 2);
        assert!(cache.load_latest().await.unwrap().is_none());
        assert!(temp_dir.path().join("keep.txt").exists());
    }

    #[tokio::test]
    async fn test_disabled_cache_writes_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let config =
            CacheConfig::with_cache_root(temp_dir.path().to_path_buf()).with_disabled(true);
        let cache = CacheManager::new(config).await.unwrap();

        assert!(cache.save(&records()).await.unwrap().is_none());
        assert_eq!(std::fs::read_dir(temp_dir.path()).unwrap().count(), 0);
    }
}
