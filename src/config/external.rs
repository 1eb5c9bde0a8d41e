//! External dependency materialization (§4.E "External materialization"): git clone/checkout,
//! archive download/extract, local path verification, and arbitrary scripts, driven concurrently
//! and bounded by `maxJobs`.
//!
//! Grounded on the teacher's version-manager install flow (`compilers/solc/version_manager.rs`:
//! "is it already present under a cache key, if not fetch it") and on the non-goal that this
//! crate shells out to system tools rather than vendoring a git/archive implementation — the
//! teacher's own dependency table carries no `git2`/`tar`/`zip` crate, so `git` materialization
//! goes through the system `git` binary via [`crate::fs::Subprocess`], matching "it drives
//! external tools, trusts system toolchains" from the non-goals.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

use serde_json::Value;

use crate::fs::{AbortFlag, FsError, ProcessError, Subprocess};
use crate::utils::fingerprint_hex;

#[derive(Debug, thiserror::Error)]
pub enum ExternalDepError {
    #[error("external dependency `{name}` git operation failed: {message}")]
    GitFailed { name: String, message: String },
    #[error("external dependency `{name}` archive fetch failed: {message}")]
    ArchiveFailed { name: String, message: String },
    #[error("external dependency `{name}` local path does not exist: {path}")]
    LocalPathMissing { name: String, path: PathBuf },
    #[error("external dependency `{name}` script failed: {message}")]
    ScriptFailed { name: String, message: String },
    #[error("external dependency `{name}` fetch timed out")]
    Timeout { name: String },
    #[error(transparent)]
    Fs(#[from] FsError),
    #[error("malformed external dependency `{0}`: {1}")]
    Malformed(String, String),
}

pub type Result<T> = std::result::Result<T, ExternalDepError>;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExternalDependencyKind {
    Git { repository: String, branch: Option<String>, tag: Option<String>, commit: Option<String>, submodules: bool },
    Archive { url: String, subdirectory: Option<String> },
    Local { path: PathBuf },
    Script { command: String },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExternalDependency {
    pub name: String,
    pub kind: ExternalDependencyKind,
    pub destination: PathBuf,
    pub timeout: Option<Duration>,
}

/// §3 `ExternalDependency` parsing out of the `externalDependencies` object (keyed by name).
pub fn parse_externals(value: Option<&Value>) -> Result<BTreeMap<String, ExternalDependency>> {
    let mut out = BTreeMap::new();
    let Some(obj) = value.and_then(Value::as_object) else {
        return Ok(out);
    };

    for (name, entry) in obj {
        let entry_obj = entry
            .as_object()
            .ok_or_else(|| ExternalDepError::Malformed(name.clone(), "expected an object".into()))?;

        let destination = entry_obj
            .get("destination")
            .and_then(Value::as_str)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(name));

        let timeout = entry_obj
            .get("timeout")
            .and_then(Value::as_u64)
            .map(Duration::from_secs);

        let kind = if let Some(repo) = entry_obj.get("repository").and_then(Value::as_str) {
            ExternalDependencyKind::Git {
                repository: repo.to_string(),
                branch: entry_obj.get("branch").and_then(Value::as_str).map(String::from),
                tag: entry_obj.get("tag").and_then(Value::as_str).map(String::from),
                commit: entry_obj.get("commit").and_then(Value::as_str).map(String::from),
                submodules: entry_obj.get("submodules").and_then(Value::as_bool).unwrap_or(false),
            }
        } else if let Some(url) = entry_obj.get("archive").and_then(Value::as_str) {
            ExternalDependencyKind::Archive {
                url: url.to_string(),
                subdirectory: entry_obj.get("subdirectory").and_then(Value::as_str).map(String::from),
            }
        } else if let Some(path) = entry_obj.get("path").and_then(Value::as_str) {
            ExternalDependencyKind::Local { path: PathBuf::from(path) }
        } else if let Some(command) = entry_obj.get("script").and_then(Value::as_str) {
            ExternalDependencyKind::Script { command: command.to_string() }
        } else {
            return Err(ExternalDepError::Malformed(name.clone(), "no recognized kind key".into()));
        };

        out.insert(name.clone(), ExternalDependency { name: name.clone(), kind, destination, timeout });
    }

    Ok(out)
}

/// On-disk record of the last successful materialization, keyed by dependency name, used to skip
/// redundant fetches (§4.E: "If the destination already exists and its cached `repository+ref`
/// matches, skip").
#[derive(Clone, Debug, Default, serde::Serialize, serde::Deserialize)]
pub struct MaterializationRecord {
    pub fingerprint: String,
}

fn dependency_fingerprint(dep: &ExternalDependency) -> String {
    fingerprint_hex(&format!("{:?}", dep.kind))
}

/// Spawns `sp`, enforcing `timeout` (§3 `ExternalDependency.timeout`) on top of
/// [`Subprocess`]'s own cooperative `abort`-flag cancellation, since `Subprocess` has no native
/// deadline. A watchdog thread raises a process-local abort flag if the deadline passes before
/// the child exits, and a second thread forwards the caller's own `abort` into that same local
/// flag so external cancellation still interrupts the child promptly. The returned bool is true
/// only when the watchdog itself fired the cancellation (as opposed to the caller aborting).
fn spawn_with_timeout(
    sp: Subprocess,
    abort: &AbortFlag,
    timeout: Option<Duration>,
) -> (std::result::Result<crate::fs::SpawnOutcome, ProcessError>, bool) {
    let local_abort = AbortFlag::new();
    let done = Arc::new(AtomicBool::new(false));
    let timed_out = Arc::new(AtomicBool::new(false));

    let watchdog = timeout.map(|duration| {
        let done = done.clone();
        let timed_out = timed_out.clone();
        let local_abort = local_abort.clone();
        thread::spawn(move || {
            let deadline = Instant::now() + duration;
            while Instant::now() < deadline && !done.load(Ordering::SeqCst) {
                thread::sleep(Duration::from_millis(25));
            }
            if !done.load(Ordering::SeqCst) {
                timed_out.store(true, Ordering::SeqCst);
                local_abort.raise();
            }
        })
    });

    let forward = {
        let local_abort = local_abort.clone();
        let outer_abort = abort.clone();
        let done = done.clone();
        thread::spawn(move || {
            while !done.load(Ordering::SeqCst) {
                if outer_abort.is_raised() {
                    local_abort.raise();
                    return;
                }
                thread::sleep(Duration::from_millis(25));
            }
        })
    };

    let outcome = sp.spawn(&local_abort);
    done.store(true, Ordering::SeqCst);
    if let Some(watchdog) = watchdog {
        let _ = watchdog.join();
    }
    let _ = forward.join();
    (outcome, timed_out.load(Ordering::SeqCst))
}

/// Materializes one dependency, consulting/updating `record_path` for the skip-if-unchanged
/// check described in §4.E.
pub fn materialize_one(
    dep: &ExternalDependency,
    record_path: &Path,
    abort: &AbortFlag,
) -> Result<()> {
    let fp = dependency_fingerprint(dep);

    let previous: Option<MaterializationRecord> = if record_path.exists() {
        crate::fs::read_json_file(record_path).ok()
    } else {
        None
    };

    let up_to_date = dep.destination.exists()
        && previous.as_ref().map(|r| r.fingerprint == fp).unwrap_or(false);

    if up_to_date {
        tracing::trace!(name = %dep.name, "external dependency unchanged, skipping");
        return Ok(());
    }

    match &dep.kind {
        ExternalDependencyKind::Git { repository, branch, tag, commit, submodules } => {
            materialize_git(dep, repository, branch.as_deref(), tag.as_deref(), commit.as_deref(), *submodules, abort)?;
        }
        ExternalDependencyKind::Archive { url, subdirectory } => {
            materialize_archive(dep, url, subdirectory.as_deref(), abort)?;
        }
        ExternalDependencyKind::Local { path } => {
            if !path.exists() {
                return Err(ExternalDepError::LocalPathMissing { name: dep.name.clone(), path: path.clone() });
            }
        }
        ExternalDependencyKind::Script { command } => {
            materialize_script(dep, command, abort)?;
        }
    }

    crate::fs::create_parent_dir_all(record_path)?;
    crate::fs::write_json_file_atomic(&MaterializationRecord { fingerprint: fp }, record_path)?;
    Ok(())
}

fn materialize_git(
    dep: &ExternalDependency,
    repository: &str,
    branch: Option<&str>,
    tag: Option<&str>,
    commit: Option<&str>,
    submodules: bool,
    abort: &AbortFlag,
) -> Result<()> {
    let run = |argv: Vec<&str>, cwd: Option<&Path>| -> Result<()> {
        let mut sp = Subprocess::new(argv);
        if let Some(cwd) = cwd {
            sp = sp.cwd(cwd);
        }
        let (outcome, timed_out) = spawn_with_timeout(sp, abort, dep.timeout);
        if timed_out {
            return Err(ExternalDepError::Timeout { name: dep.name.clone() });
        }
        outcome
            .map(|_| ())
            .map_err(|e| ExternalDepError::GitFailed { name: dep.name.clone(), message: e.to_string() })
    };

    if !dep.destination.exists() {
        crate::fs::create_parent_dir_all(&dep.destination)?;
        let mut argv = vec!["git", "clone", repository, dep.destination.to_str().unwrap_or_default()];
        if submodules {
            argv.push("--recurse-submodules");
        }
        run(argv, None)?;
    } else {
        run(vec!["git", "fetch", "--all", "--tags"], Some(&dep.destination))?;
    }

    let checkout_ref = commit.or(tag).or(branch).unwrap_or("HEAD");
    run(vec!["git", "checkout", checkout_ref], Some(&dep.destination))?;
    if submodules {
        run(vec!["git", "submodule", "update", "--init", "--recursive"], Some(&dep.destination))?;
    }
    Ok(())
}

fn materialize_archive(
    dep: &ExternalDependency,
    url: &str,
    subdirectory: Option<&str>,
    abort: &AbortFlag,
) -> Result<()> {
    crate::fs::create_parent_dir_all(&dep.destination)?;
    let archive_path = dep.destination.with_extension("download");

    let response = reqwest::blocking::get(url)
        .and_then(|r| r.error_for_status())
        .and_then(|r| r.bytes())
        .map_err(|e| ExternalDepError::ArchiveFailed { name: dep.name.clone(), message: e.to_string() })?;
    std::fs::write(&archive_path, &response)
        .map_err(|e| FsError::io(e, &archive_path))?;

    // Extraction is delegated to the system `tar`, matching the non-goal that this crate shells
    // out to system tools rather than vendoring an archive-format implementation.
    let sp = Subprocess::new([
        "tar".to_string(),
        "-xf".to_string(),
        archive_path.to_string_lossy().into_owned(),
        "-C".to_string(),
        dep.destination.to_string_lossy().into_owned(),
    ]);
    let (outcome, timed_out) = spawn_with_timeout(sp, abort, dep.timeout);
    if timed_out {
        return Err(ExternalDepError::Timeout { name: dep.name.clone() });
    }
    outcome.map_err(|e| ExternalDepError::ArchiveFailed { name: dep.name.clone(), message: e.to_string() })?;

    if let Some(subdirectory) = subdirectory {
        flatten_subdirectory(&dep.destination, subdirectory)
            .map_err(|e| ExternalDepError::ArchiveFailed { name: dep.name.clone(), message: e.to_string() })?;
    }
    Ok(())
}

/// Promotes the contents of `destination/subdirectory` up into `destination` itself, for the
/// common "archive.tar.gz extracts into a single top-level folder" case (§3 `subdirectory`).
fn flatten_subdirectory(destination: &Path, subdirectory: &str) -> std::io::Result<()> {
    let nested = destination.join(subdirectory);
    if !nested.is_dir() {
        return Ok(());
    }
    for entry in std::fs::read_dir(&nested)? {
        let entry = entry?;
        let target = destination.join(entry.file_name());
        std::fs::rename(entry.path(), target)?;
    }
    std::fs::remove_dir(&nested)?;
    Ok(())
}

fn materialize_script(dep: &ExternalDependency, command: &str, abort: &AbortFlag) -> Result<()> {
    let shell = if cfg!(windows) { "cmd" } else { "sh" };
    let flag = if cfg!(windows) { "/C" } else { "-c" };
    let sp = Subprocess::new([shell, flag, command]).cwd(&dep.destination);
    let (outcome, timed_out) = spawn_with_timeout(sp, abort, dep.timeout);
    if timed_out {
        return Err(ExternalDepError::Timeout { name: dep.name.clone() });
    }
    outcome
        .map(|_| ())
        .map_err(|e| ExternalDepError::ScriptFailed { name: dep.name.clone(), message: e.to_string() })
}

/// Materializes every dependency concurrently, bounded by `max_jobs`, aggregating failures
/// rather than stopping at the first (§4.E "failures are reported in aggregate").
pub fn materialize_all(
    deps: &BTreeMap<String, ExternalDependency>,
    records_dir: &Path,
    max_jobs: usize,
    abort: &AbortFlag,
) -> std::result::Result<(), Vec<ExternalDepError>> {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(max_jobs.max(1))
        .build()
        .expect("failed to build external-dependency thread pool");

    let errors: Vec<ExternalDepError> = pool.install(|| {
        use rayon::prelude::*;
        deps.values()
            .collect::<Vec<_>>()
            .par_iter()
            .filter_map(|dep| {
                let record_path = records_dir.join(format!("{}.json", dep.name));
                materialize_one(dep, &record_path, abort).err()
            })
            .collect()
    });

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_git_kind() {
        let value = serde_json::json!({
            "libfoo": { "repository": "https://example.com/foo.git", "tag": "v1.0" }
        });
        let out = parse_externals(Some(&value)).unwrap();
        let dep = &out["libfoo"];
        assert!(matches!(&dep.kind, ExternalDependencyKind::Git { tag: Some(t), .. } if t == "v1.0"));
    }

    #[test]
    fn parses_local_kind() {
        let value = serde_json::json!({ "vendored": { "path": "./vendor/thing" } });
        let out = parse_externals(Some(&value)).unwrap();
        assert!(matches!(&out["vendored"].kind, ExternalDependencyKind::Local { .. }));
    }

    #[test]
    fn missing_kind_key_is_malformed() {
        let value = serde_json::json!({ "broken": { "destination": "x" } });
        assert!(parse_externals(Some(&value)).is_err());
    }

    #[test]
    fn local_materialization_fails_fast_on_missing_path() {
        let dir = tempfile::tempdir().unwrap();
        let dep = ExternalDependency {
            name: "vendored".into(),
            kind: ExternalDependencyKind::Local { path: dir.path().join("does-not-exist") },
            destination: dir.path().join("dest"),
            timeout: None,
        };
        let record_path = dir.path().join("record.json");
        let err = materialize_one(&dep, &record_path, &AbortFlag::new()).unwrap_err();
        assert!(matches!(err, ExternalDepError::LocalPathMissing { .. }));
    }

    #[test]
    #[cfg_attr(windows, ignore = "uses a unix sleep command")]
    fn script_dependency_past_its_timeout_reports_timeout_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("dest")).unwrap();
        let dep = ExternalDependency {
            name: "slow".into(),
            kind: ExternalDependencyKind::Script { command: "sleep 5".into() },
            destination: dir.path().join("dest"),
            timeout: Some(Duration::from_millis(50)),
        };
        let err = materialize_script(&dep, "sleep 5", &AbortFlag::new()).unwrap_err();
        assert!(matches!(err, ExternalDepError::Timeout { .. }));
    }

    #[test]
    fn archive_subdirectory_is_flattened_into_destination() {
        let dir = tempfile::tempdir().unwrap();
        let destination = dir.path().join("dest");
        std::fs::create_dir_all(destination.join("top-level")).unwrap();
        std::fs::write(destination.join("top-level").join("file.txt"), "hi").unwrap();

        flatten_subdirectory(&destination, "top-level").unwrap();

        assert!(destination.join("file.txt").exists());
        assert!(!destination.join("top-level").exists());
    }
}
