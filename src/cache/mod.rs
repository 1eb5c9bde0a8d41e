//! The incremental source cache (§4.F): one JSON file per build-output directory mapping source
//! path to last-write-time plus a small data bag, with atomic flush-on-success.
//!
//! Directly grounded on the teacher's `cache.rs` (`SolFilesCache`/`CacheEntry`/`ArtifactsCache`):
//! same `BTreeMap<PathBuf, CacheEntry>` shape, same write-to-tempfile-then-rename discipline, same
//! "format version" guard field (the teacher's `ETHERS_FORMAT_VERSION`, here `FORMAT_VERSION`).
//! `dirty`/`dataChanged` generalize the teacher's content-hash/version-compatibility checks from
//! "is this Solidity version still compatible" to the arbitrary `{version, arch, external-rebuild}`
//! tuple this build tool tracks.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    time::SystemTime,
};

use serde::{Deserialize, Serialize};

use crate::fs::FsError;

/// Bumped whenever the on-disk shape changes incompatibly; a mismatched cache is treated as
/// absent rather than parsed, forcing a full rebuild instead of trusting stale data.
pub const FORMAT_VERSION: u32 = 1;

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error(transparent)]
    Fs(#[from] FsError),
    #[error("cache file {0} has incompatible format version {found} (expected {expected})", expected = FORMAT_VERSION)]
    IncompatibleVersion(PathBuf, u32),
}

pub type Result<T> = std::result::Result<T, CacheError>;

/// §3 `SourceCache entry`.
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct CacheEntry {
    pub lwt: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub v: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub a: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub e: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deps: Vec<PathBuf>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OnDisk {
    format_version: u32,
    last_built: i64,
    strategy: String,
    extra_hash: String,
    entries: BTreeMap<PathBuf, CacheEntry>,
}

/// An in-memory, per-output-directory source cache. Mutations are buffered and only reach disk
/// via [`SourceCache::flush`] (§4.F: "Mutations are buffered in memory and flushed atomically ...
/// on successful build completion. On build failure, the previous on-disk cache is untouched.").
#[derive(Debug)]
pub struct SourceCache {
    path: PathBuf,
    last_built: i64,
    strategy: String,
    extra_hash: String,
    entries: BTreeMap<PathBuf, CacheEntry>,
    dirty_since_load: bool,
}

impl SourceCache {
    /// Loads the cache at `path` if present and format-compatible; otherwise starts empty (a
    /// missing or stale cache is not an error, it just means "everything is dirty").
    pub fn load(path: &Path, strategy: &str, extra_hash: &str) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::empty(path, strategy, extra_hash));
        }

        let on_disk: std::result::Result<OnDisk, _> = crate::fs::read_json_file(path);
        match on_disk {
            Ok(on_disk) if on_disk.format_version == FORMAT_VERSION => Ok(Self {
                path: path.to_path_buf(),
                last_built: on_disk.last_built,
                strategy: on_disk.strategy,
                extra_hash: on_disk.extra_hash,
                entries: on_disk.entries,
                dirty_since_load: false,
            }),
            Ok(on_disk) => {
                tracing::warn!(found = on_disk.format_version, "cache format mismatch, rebuilding from scratch");
                Ok(Self::empty(path, strategy, extra_hash))
            }
            Err(_) => {
                tracing::warn!(path = %path.display(), "cache file unreadable, rebuilding from scratch");
                Ok(Self::empty(path, strategy, extra_hash))
            }
        }
    }

    fn empty(path: &Path, strategy: &str, extra_hash: &str) -> Self {
        Self {
            path: path.to_path_buf(),
            last_built: 0,
            strategy: strategy.to_string(),
            extra_hash: extra_hash.to_string(),
            entries: BTreeMap::new(),
            dirty_since_load: true,
        }
    }

    /// A changed `extra_hash` (environment deltas, theme, metadata, `addExtraHash`) forces every
    /// path to read as dirty on the next query, matching §4.F.
    pub fn extra_hash_changed(&self, new_extra_hash: &str) -> bool {
        self.extra_hash != new_extra_hash
    }

    /// `dirty(path)`: true if the path is missing on disk, has no cache entry, or its on-disk
    /// mtime is newer than the last completed build.
    pub fn dirty(&self, path: &Path) -> bool {
        let Ok(metadata) = std::fs::metadata(path) else {
            return true;
        };
        let Some(entry) = self.entries.get(path) else {
            return true;
        };
        let Ok(modified) = metadata.modified() else {
            return true;
        };
        let lwt = to_unix_seconds(modified);
        lwt > entry.lwt || entry.lwt > self.last_built
    }

    /// `dirty(path, dep)`: the path or any of its dependency-file-derived dependencies is dirty.
    pub fn dirty_with_deps(&self, path: &Path, deps: &[PathBuf]) -> bool {
        self.dirty(path) || deps.iter().any(|d| self.dirty(d))
    }

    /// `dataChanged(path, key, new_value)`.
    pub fn data_changed(&self, path: &Path, key: DataKey, new_value: &str) -> bool {
        let Some(entry) = self.entries.get(path) else {
            return true;
        };
        let current = match key {
            DataKey::Version => entry.v.as_deref(),
            DataKey::Arch => entry.a.as_deref(),
            DataKey::ExternalRebuildFlag => entry.e.as_deref(),
        };
        current != Some(new_value)
    }

    /// Buffers an updated entry for `path` in memory; not visible on disk until [`Self::flush`].
    /// `deps` is the set of header/dependency-file paths this build discovered `path` depends on,
    /// consulted by a later [`Self::dirty_with_deps`] call on the *next* build.
    pub fn record(
        &mut self,
        path: &Path,
        version: Option<&str>,
        arch: Option<&str>,
        external_rebuild_flag: Option<&str>,
        deps: Vec<PathBuf>,
    ) {
        let lwt = std::fs::metadata(path)
            .and_then(|m| m.modified())
            .map(to_unix_seconds)
            .unwrap_or(0);
        self.entries.insert(
            path.to_path_buf(),
            CacheEntry {
                lwt,
                v: version.map(String::from),
                a: arch.map(String::from),
                e: external_rebuild_flag.map(String::from),
                deps,
            },
        );
        self.dirty_since_load = true;
    }

    /// The header/dependency paths recorded for `path` as of the last successful compile, used to
    /// feed [`Self::dirty_with_deps`] on the following build.
    pub fn recorded_deps(&self, path: &Path) -> Vec<PathBuf> {
        self.entries.get(path).map(|entry| entry.deps.clone()).unwrap_or_default()
    }

    /// Drops entries for paths that no longer exist on disk, matching §3's "a file absent from
    /// disk invalidates its entry".
    pub fn prune_missing(&mut self) {
        let before = self.entries.len();
        self.entries.retain(|path, _| path.exists());
        if self.entries.len() != before {
            self.dirty_since_load = true;
        }
    }

    /// Atomically persists the buffered state: write to a temp file, then rename (§4.F).
    /// `last_built` is advanced to the current time as part of the flush, matching "flushed ...
    /// on successful build completion".
    pub fn flush(&mut self, now_unix_seconds: i64) -> Result<()> {
        if !self.dirty_since_load {
            return Ok(());
        }
        self.last_built = now_unix_seconds;
        let on_disk = OnDisk {
            format_version: FORMAT_VERSION,
            last_built: self.last_built,
            strategy: self.strategy.clone(),
            extra_hash: self.extra_hash.clone(),
            entries: self.entries.clone(),
        };
        crate::fs::write_json_file_atomic(&on_disk, &self.path)?;
        self.dirty_since_load = false;
        Ok(())
    }

    /// Discards the in-memory buffer without touching disk, per §4.F's "on build failure, the
    /// partial state is discarded; the previous on-disk cache is untouched".
    pub fn discard(self) {}
}

#[derive(Clone, Copy, Debug)]
pub enum DataKey {
    Version,
    Arch,
    ExternalRebuildFlag,
}

fn to_unix_seconds(time: SystemTime) -> i64 {
    time.duration_since(SystemTime::UNIX_EPOCH).map(|d| d.as_secs() as i64).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_dirty() {
        let dir = tempfile::tempdir().unwrap();
        let cache = SourceCache::load(&dir.path().join("cache.json"), "native", "abc").unwrap();
        assert!(cache.dirty(&dir.path().join("nonexistent.cpp")));
    }

    #[test]
    fn unrecorded_existing_file_is_dirty() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a.cpp");
        std::fs::write(&src, "").unwrap();
        let cache = SourceCache::load(&dir.path().join("cache.json"), "native", "abc").unwrap();
        assert!(cache.dirty(&src));
    }

    #[test]
    fn recorded_file_older_than_last_build_is_clean() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a.cpp");
        std::fs::write(&src, "").unwrap();
        let cache_path = dir.path().join("cache.json");
        let mut cache = SourceCache::load(&cache_path, "native", "abc").unwrap();
        cache.record(&src, Some("1.0"), Some("x86_64"), None, vec![]);
        cache.flush(i64::MAX).unwrap();

        let reloaded = SourceCache::load(&cache_path, "native", "abc").unwrap();
        assert!(!reloaded.dirty(&src));
    }

    #[test]
    fn data_changed_detects_version_drift() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a.cpp");
        std::fs::write(&src, "").unwrap();
        let mut cache = SourceCache::load(&dir.path().join("cache.json"), "native", "abc").unwrap();
        cache.record(&src, Some("1.0"), None, None, vec![]);
        assert!(cache.data_changed(&src, DataKey::Version, "2.0"));
        assert!(!cache.data_changed(&src, DataKey::Version, "1.0"));
    }

    #[test]
    fn dirty_with_deps_flags_clean_source_when_a_dependency_changed() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a.cpp");
        let header = dir.path().join("a.h");
        std::fs::write(&src, "").unwrap();
        std::fs::write(&header, "").unwrap();
        let cache_path = dir.path().join("cache.json");
        let mut cache = SourceCache::load(&cache_path, "native", "abc").unwrap();
        cache.record(&src, None, None, None, vec![header.clone()]);
        cache.flush(i64::MAX).unwrap();

        let mut reloaded = SourceCache::load(&cache_path, "native", "abc").unwrap();
        assert!(!reloaded.dirty(&src));
        std::thread::sleep(std::time::Duration::from_millis(10));
        std::fs::write(&header, "changed").unwrap();
        let deps = reloaded.recorded_deps(&src);
        assert!(reloaded.dirty_with_deps(&src, &deps));
        reloaded.record(&src, None, None, None, deps);
    }

    #[test]
    fn incompatible_format_version_rebuilds_from_scratch() {
        let dir = tempfile::tempdir().unwrap();
        let cache_path = dir.path().join("cache.json");
        let stale = serde_json::json!({
            "formatVersion": FORMAT_VERSION + 1,
            "lastBuilt": 0,
            "strategy": "native",
            "extraHash": "abc",
            "entries": {}
        });
        std::fs::write(&cache_path, serde_json::to_vec(&stale).unwrap()).unwrap();
        let cache = SourceCache::load(&cache_path, "native", "abc").unwrap();
        assert_eq!(cache.entries.len(), 0);
    }
}
