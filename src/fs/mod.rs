//! Filesystem and process primitives (§4.A).
//!
//! Path normalization always produces forward slashes internally; Windows-specific separators
//! are applied only at the OS boundary, exactly as [`canonicalize`] does below.

mod process;

pub use process::{AbortFlag, OutputSink, ProcessError, SpawnOutcome, Subprocess};

use std::{
    fs,
    io,
    path::{Path, PathBuf},
};

use path_slash::PathBufExt;

#[derive(Debug, thiserror::Error)]
pub enum FsError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("glob pattern error: {0}")]
    Glob(#[from] glob::PatternError),
    #[error(transparent)]
    Process(#[from] ProcessError),
}

impl FsError {
    pub fn io(source: io::Error, path: impl Into<PathBuf>) -> Self {
        Self::Io { path: path.into(), source }
    }
}

pub type Result<T> = std::result::Result<T, FsError>;

/// Canonicalizes `path`, normalizing the result to forward slashes on every platform.
///
/// Uses `dunce` rather than `std::fs::canonicalize` so the result doesn't grow a `\\?\` UNC
/// prefix on Windows.
pub fn canonicalize(path: impl AsRef<Path>) -> Result<PathBuf> {
    let path = path.as_ref();
    let canon = dunce::canonicalize(path).map_err(|e| FsError::io(e, path))?;
    Ok(normalize(&canon))
}

/// Normalizes separators to `/` without touching the filesystem.
pub fn normalize(path: &Path) -> PathBuf {
    cfg_if::cfg_if! {
        if #[cfg(windows)] {
            PathBuf::from(path.to_slash_lossy().as_ref())
        } else {
            path.to_path_buf()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GlobMode {
    Files,
    Folders,
    Both,
}

/// Expands `patterns` rooted at `root`, returning matches filtered by [`GlobMode`].
///
/// A pattern with no glob metacharacters (`*`, `?`, `[`, `{`) is treated as a directory to walk
/// recursively rather than a single literal path, matching the brace/star semantics the
/// build-file format expects for bare directory entries in `files`.
pub fn glob(root: &Path, patterns: &[String], mode: GlobMode) -> Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    let mut seen = std::collections::HashSet::new();
    for pattern in patterns {
        let pattern = expand_braces(pattern);
        for variant in pattern {
            let full = root.join(&variant);
            if !has_glob_metachar(&variant) {
                if full.is_dir() {
                    for entry in walkdir::WalkDir::new(&full).follow_links(true) {
                        let entry = entry.map_err(|e| {
                            FsError::io(io::Error::new(io::ErrorKind::Other, e.to_string()), &full)
                        })?;
                        push_match(&mut out, &mut seen, entry.path(), mode);
                    }
                } else if full.exists() {
                    push_match(&mut out, &mut seen, &full, mode);
                }
                continue;
            }

            let glob_pattern = full.to_string_lossy().into_owned();
            for entry in glob::glob(&glob_pattern)? {
                match entry {
                    Ok(path) => push_match(&mut out, &mut seen, &path, mode),
                    Err(e) => return Err(FsError::io(e.into_error(), root)),
                }
            }
        }
    }
    out.sort();
    Ok(out)
}

fn push_match(
    out: &mut Vec<PathBuf>,
    seen: &mut std::collections::HashSet<PathBuf>,
    path: &Path,
    mode: GlobMode,
) {
    let matches = match mode {
        GlobMode::Files => path.is_file(),
        GlobMode::Folders => path.is_dir(),
        GlobMode::Both => true,
    };
    if matches && seen.insert(path.to_path_buf()) {
        out.push(path.to_path_buf());
    }
}

fn has_glob_metachar(s: &str) -> bool {
    s.contains(['*', '?', '[', '{'])
}

/// Expands a single `{a,b}` brace group into its alternatives. Only one group is supported per
/// pattern, matching the build file's modest glob dialect.
fn expand_braces(pattern: &str) -> Vec<String> {
    if let Some(open) = pattern.find('{') {
        if let Some(close) = pattern[open..].find('}') {
            let close = open + close;
            let prefix = &pattern[..open];
            let suffix = &pattern[close + 1..];
            return pattern[open + 1..close]
                .split(',')
                .map(|alt| format!("{prefix}{alt}{suffix}"))
                .collect();
        }
    }
    vec![pattern.to_string()]
}

pub fn make_dir_all(path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    fs::create_dir_all(path).map_err(|e| FsError::io(e, path))
}

pub fn create_parent_dir_all(file: impl AsRef<Path>) -> Result<()> {
    let file = file.as_ref();
    if let Some(parent) = file.parent() {
        fs::create_dir_all(parent).map_err(|e| FsError::io(e, parent))?;
    }
    Ok(())
}

pub fn copy(from: impl AsRef<Path>, to: impl AsRef<Path>) -> Result<u64> {
    let (from, to) = (from.as_ref(), to.as_ref());
    create_parent_dir_all(to)?;
    fs::copy(from, to).map_err(|e| FsError::io(e, from))
}

#[cfg(unix)]
pub fn symlink(original: impl AsRef<Path>, link: impl AsRef<Path>) -> Result<()> {
    let (original, link) = (original.as_ref(), link.as_ref());
    std::os::unix::fs::symlink(original, link).map_err(|e| FsError::io(e, link))
}

#[cfg(windows)]
pub fn symlink(original: impl AsRef<Path>, link: impl AsRef<Path>) -> Result<()> {
    let (original, link) = (original.as_ref(), link.as_ref());
    if original.is_dir() {
        std::os::windows::fs::symlink_dir(original, link).map_err(|e| FsError::io(e, link))
    } else {
        std::os::windows::fs::symlink_file(original, link).map_err(|e| FsError::io(e, link))
    }
}

pub fn remove_tree(path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    if path.is_dir() {
        fs::remove_dir_all(path).map_err(|e| FsError::io(e, path))
    } else if path.exists() {
        fs::remove_file(path).map_err(|e| FsError::io(e, path))
    } else {
        Ok(())
    }
}

/// Reads and deserializes a JSON file.
pub fn read_json_file<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let bytes = fs::read(path).map_err(|e| FsError::io(e, path))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| FsError::io(io::Error::new(io::ErrorKind::InvalidData, e), path))
}

/// Serializes `value` to pretty JSON and atomically writes it to `path`: write to a sibling
/// temp file, then rename. Used by the source cache flush (§4.F) and the environment delta
/// cache (§4.C).
pub fn write_json_file_atomic<T: serde::Serialize>(value: &T, path: &Path) -> Result<()> {
    create_parent_dir_all(path)?;
    let tmp = path.with_extension("tmp");
    {
        let file = fs::File::create(&tmp).map_err(|e| FsError::io(e, &tmp))?;
        let mut writer = io::BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, value)
            .map_err(|e| FsError::io(io::Error::new(io::ErrorKind::Other, e), &tmp))?;
        use io::Write;
        writer.flush().map_err(|e| FsError::io(e, &tmp))?;
    }
    fs::rename(&tmp, path).map_err(|e| FsError::io(e, path))
}

pub fn touch(path: &Path) -> Result<()> {
    use fs::OpenOptions;
    OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(path)
        .map(|_| ())
        .map_err(|e| FsError::io(e, path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expand_braces_single_group() {
        assert_eq!(
            expand_braces("src/{a,b}/*.cpp"),
            vec!["src/a/*.cpp".to_string(), "src/b/*.cpp".to_string()]
        );
    }

    #[test]
    fn expand_braces_no_group_is_identity() {
        assert_eq!(expand_braces("src/*.cpp"), vec!["src/*.cpp".to_string()]);
    }

    #[test]
    fn glob_files_mode_excludes_directories() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("a.cpp"), "").unwrap();
        let found = glob(dir.path(), &["*".into()], GlobMode::Files).unwrap();
        assert_eq!(found, vec![dir.path().join("a.cpp")]);
    }
}
