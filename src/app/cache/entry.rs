//! Snapshot entries and their file naming

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::app::models::PatchTitle;
use crate::constants::cache;

/// One persisted copy of a record set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub created_at: DateTime<Utc>,
    /// Timestamp key, with a `-N` suffix when several snapshots share a second
    pub key: String,
    pub records: Vec<PatchTitle>,
}

impl CacheEntry {
    /// Age of the entry at `now`, zero for entries dated in the future
    pub fn age_at(&self, now: DateTime<Utc>) -> Duration {
        (now - self.created_at).to_std().unwrap_or(Duration::ZERO)
    }

    pub fn is_expired(&self, retention: Duration, now: DateTime<Utc>) -> bool {
        self.age_at(now) > retention
    }

    /// File name of the snapshot holding this entry
    pub fn file_name(&self) -> String {
        file_name_for_key(&self.key)
    }
}

/// Seconds-resolution key for a creation time
pub fn key_for(created_at: DateTime<Utc>) -> String {
    created_at.format(cache::KEY_FORMAT).to_string()
}

pub fn file_name_for_key(key: &str) -> String {
    format!("{}{}.{}", cache::FILE_PREFIX, key, cache::FILE_EXTENSION)
}

/// Whether a directory entry is a finished snapshot (temp files excluded)
pub fn is_snapshot_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .map_or(false, |name| {
            name.starts_with(cache::FILE_PREFIX)
                && name.ends_with(&format!(".{}", cache::FILE_EXTENSION))
        })
}

/// Creation time encoded in a snapshot file name
pub fn timestamp_from_file_name(path: &Path) -> Option<DateTime<Utc>> {
    let stem = path.file_stem()?.to_str()?;
    let key = stem.strip_prefix(cache::FILE_PREFIX)?;
    let timestamp = key.split('-').next()?;
    NaiveDateTime::parse_from_str(timestamp, cache::KEY_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}
