// src/cache/file.rs
//! File-backed fingerprint cache: one JSON file per key, atomic tmp+rename writes.
//! Any I/O or decode problem is treated as a miss.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{CacheEntry, CacheKey, FingerprintCache};

#[derive(Debug, Serialize, Deserialize)]
struct StoredEntry {
    key: CacheKey,
    entry: CacheEntry,
}

#[derive(Debug, Clone)]
pub struct FileCache {
    dir: PathBuf,
    ttl: Option<Duration>,
}

impl FileCache {
    pub fn new(dir: impl Into<PathBuf>, ttl: Option<Duration>) -> Self {
        let dir = dir.into();
        if let Err(e) = fs::create_dir_all(&dir) {
            // best-effort; every later read just misses
            warn!(target: "cache", dir = %dir.display(), error = %e, "cannot create cache dir");
        }
        Self { dir, ttl }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(format!("{}-{}.json", key.task, key.digest()))
    }

    fn read(&self, key: &CacheKey) -> io::Result<Option<CacheEntry>> {
        let path = self.path_for(key);
        let raw = match fs::read_to_string(&path) {
            Ok(s) => s,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };
        let stored: StoredEntry = serde_json::from_str(&raw)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        if &stored.key != key {
            // digest collision or a foreign file; not ours
            return Ok(None);
        }
        if let Some(ttl) = self.ttl {
            let age = Utc::now().signed_duration_since(stored.entry.computed_at);
            if age.to_std().map(|a| a > ttl).unwrap_or(false) {
                let _ = fs::remove_file(&path);
                return Ok(None);
            }
        }
        Ok(Some(stored.entry))
    }

    fn write(&self, key: CacheKey, value: String) -> io::Result<()> {
        let path = self.path_for(&key);
        let stored = StoredEntry {
            key,
            entry: CacheEntry {
                value,
                computed_at: Utc::now(),
            },
        };
        let json = serde_json::to_vec(&stored)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        // unique tmp name so concurrent writers of one key don't clobber each other's tmp
        let tmp = path.with_extension(format!("{}.tmp", uuid::Uuid::new_v4().simple()));
        let mut f = fs::File::create(&tmp)?;
        f.write_all(&json)?;
        f.sync_all()?;
        fs::rename(&tmp, &path).inspect_err(|_| {
            let _ = fs::remove_file(&tmp);
        })
    }
}

impl FingerprintCache for FileCache {
    fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        match self.read(key) {
            Ok(hit) => hit,
            Err(e) => {
                debug!(target: "cache", task = %key.task, error = %e, "file cache read failed; treating as miss");
                None
            }
        }
    }

    fn put(&self, key: CacheKey, value: String) {
        if let Some(existing) = self.get(&key) {
            if existing.value == value {
                return;
            }
        }
        let task = key.task;
        if let Err(e) = self.write(key, value) {
            warn!(target: "cache", %task, error = %e, "file cache write failed");
        }
    }

    fn len(&self) -> usize {
        fs::read_dir(&self.dir)
            .map(|rd| {
                rd.filter_map(Result::ok)
                    .filter(|e| e.path().extension().is_some_and(|x| x == "json"))
                    .count()
            })
            .unwrap_or(0)
    }

    fn name(&self) -> &'static str {
        "file"
    }
}
