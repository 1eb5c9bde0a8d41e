//! Environment snapshot: capture, diff, and replay vendor toolchain activation scripts (§4.C).
//!
//! Grounded on the teacher's version-manager install flow (`compilers/solc/version_manager.rs`):
//! same "check a persisted cache keyed by a fingerprint before doing expensive work" shape,
//! generalized from "is this solc version already installed" to "has this vendor environment
//! already been captured".

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use crate::fs::{self, AbortFlag, FsError, OutputSink, Subprocess};
use crate::utils::fingerprint_hex;

#[derive(Debug, thiserror::Error)]
pub enum EnvironmentError {
    #[error("vendor activation script failed:\n{stderr}")]
    VendorScriptFailed { stderr: String },
    #[error(transparent)]
    Fs(#[from] FsError),
    #[error("malformed environment delta cache at {0}")]
    MalformedDelta(PathBuf),
}

pub type Result<T> = std::result::Result<T, EnvironmentError>;

/// Which vendor activation protocol to run (§4.C input).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum VendorActivationSpec {
    MsvcVcvars { vs_year: Option<u32> },
    IntelSetvars,
    EmscriptenEmsdkEnv,
    NoActivation,
}

impl VendorActivationSpec {
    fn vendor_tag(&self) -> &'static str {
        match self {
            Self::MsvcVcvars { .. } => "msvc-vcvars",
            Self::IntelSetvars => "intel-setvars",
            Self::EmscriptenEmsdkEnv => "emscripten-emsdk",
            Self::NoActivation => "no-activation",
        }
    }
}

#[derive(Clone, Debug, Hash)]
pub struct ActivationRequest {
    pub vendor: VendorActivationSpec,
    pub host_arch: String,
    pub target_arch: String,
    pub extra_args: Vec<String>,
}

impl ActivationRequest {
    /// §4.C step 1: `fp = hash(vendor, host, target, version, extra)`. "version" here is folded
    /// into `vendor` (e.g. the vs_year field) since that's where the teacher's analogous
    /// version-keyed cache draws its version from.
    pub fn fingerprint(&self) -> String {
        fingerprint_hex(self)
    }
}

/// The difference between the environment before and after running a vendor activation script.
/// Persisted as `key=value` lines per `intermediate/<toolchain>_<vars>.env` (§6).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EnvironmentDelta {
    pub vars: BTreeMap<String, String>,
}

impl EnvironmentDelta {
    pub fn parse(contents: &str) -> Self {
        let mut vars = BTreeMap::new();
        for line in contents.lines() {
            if let Some((k, v)) = line.split_once('=') {
                vars.insert(k.to_string(), v.to_string());
            }
        }
        Self { vars }
    }

    pub fn serialize(&self) -> String {
        self.vars.iter().map(|(k, v)| format!("{k}={v}\n")).collect()
    }

    /// Applies the delta to a base environment, composing PATH as
    /// `saved-user-PATH, then vendor-delta-PATH` rather than relying on any literal injection
    /// marker (§9 Open Question / §4.C note).
    pub fn apply(&self, base: &BTreeMap<String, String>) -> BTreeMap<String, String> {
        let mut out = base.clone();
        for (k, v) in &self.vars {
            if k == "PATH" {
                let user_path = base.get("PATH").cloned().unwrap_or_default();
                let sep = path_separator();
                out.insert("PATH".to_string(), format!("{user_path}{sep}{v}"));
            } else {
                out.insert(k.clone(), v.clone());
            }
        }
        out
    }
}

fn path_separator() -> char {
    if cfg!(windows) {
        ';'
    } else {
        ':'
    }
}

fn snapshot_env() -> BTreeMap<String, String> {
    std::env::vars().collect()
}

/// Persists and retrieves environment deltas under `intermediate/<fingerprint>.env`.
pub struct EnvironmentCache {
    dir: PathBuf,
}

impl EnvironmentCache {
    pub fn new(intermediate_dir: impl Into<PathBuf>) -> Self {
        Self { dir: intermediate_dir.into() }
    }

    fn path_for(&self, fingerprint: &str) -> PathBuf {
        self.dir.join(format!("{fingerprint}.env"))
    }

    pub fn load(&self, fingerprint: &str) -> Result<Option<EnvironmentDelta>> {
        let path = self.path_for(fingerprint);
        if !path.exists() {
            return Ok(None);
        }
        let contents =
            std::fs::read_to_string(&path).map_err(|e| FsError::io(e, &path))?;
        Ok(Some(EnvironmentDelta::parse(&contents)))
    }

    pub fn store(&self, fingerprint: &str, delta: &EnvironmentDelta) -> Result<()> {
        let path = self.path_for(fingerprint);
        fs::create_parent_dir_all(&path)?;
        std::fs::write(&path, delta.serialize()).map_err(|e| FsError::io(e, &path))?;
        Ok(())
    }
}

/// Runs the four-step protocol from §4.C: look up the cache, else spawn a shell that dumps the
/// environment before and after sourcing the vendor script, diff, and persist.
pub fn activate(
    request: &ActivationRequest,
    cache: &EnvironmentCache,
    vendor_script: Option<&Path>,
    abort: &AbortFlag,
) -> Result<EnvironmentDelta> {
    let fp = request.fingerprint();

    if let Some(cached) = cache.load(&fp)? {
        tracing::trace!(fingerprint = %fp, "reusing cached environment delta");
        return Ok(cached);
    }

    if matches!(request.vendor, VendorActivationSpec::NoActivation) {
        let empty = EnvironmentDelta::default();
        cache.store(&fp, &empty)?;
        return Ok(empty);
    }

    let script = vendor_script.ok_or_else(|| EnvironmentError::VendorScriptFailed {
        stderr: format!("no activation script configured for {}", request.vendor.vendor_tag()),
    })?;

    let before = snapshot_env();
    let delta = run_activation_shell(script, &request.extra_args, abort)?;
    let _ = before; // the shell-based diff below supersedes an in-process snapshot comparison

    cache.store(&fp, &delta)?;
    Ok(delta)
}

/// Spawns a shell that prints the environment, sources the vendor script, then prints the
/// environment again, and computes the delta of "after" minus "before" (§4.C step 3).
fn run_activation_shell(
    script: &Path,
    extra_args: &[String],
    abort: &AbortFlag,
) -> Result<EnvironmentDelta> {
    const MARKER: &str = "__CHALET_CORE_ENV_MARKER__";

    let sp = if cfg!(windows) {
        let mut line = format!("call \"{}\"", script.display());
        for arg in extra_args {
            line.push(' ');
            line.push_str(arg);
        }
        Subprocess::new(["cmd.exe", "/C", &format!("set && echo {MARKER} && {line} && echo {MARKER} && set")])
    } else {
        let mut line = format!(". \"{}\"", script.display());
        for arg in extra_args {
            line.push(' ');
            line.push_str(arg);
        }
        let shell = std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_string());
        Subprocess::new([shell.as_str(), "-c", &format!("export -p; echo {MARKER}; {line}; export -p")])
    }
    .stdout(OutputSink::Capture)
    .stderr(OutputSink::Capture);

    let outcome = sp.spawn(abort).map_err(|e| EnvironmentError::VendorScriptFailed {
        stderr: e.to_string(),
    })?;

    if outcome.cancelled {
        return Err(EnvironmentError::VendorScriptFailed { stderr: "cancelled".into() });
    }

    let stdout = outcome.stdout.unwrap_or_default();
    let mut parts = stdout.splitn(2, MARKER);
    let before = parse_shell_env(parts.next().unwrap_or_default());
    let after = parse_shell_env(parts.next().unwrap_or_default());

    let mut delta = BTreeMap::new();
    for (k, v) in &after {
        if before.get(k) != Some(v) {
            delta.insert(k.clone(), v.clone());
        }
    }

    // Strip the inherited PATH prefix from the recorded PATH so reactivation composes correctly
    // (§4.C step 3): only the vendor-added suffix/prefix is kept, not the whole combined value.
    if let (Some(before_path), Some(after_path)) = (before.get("PATH"), delta.get("PATH").cloned())
    {
        let stripped = after_path
            .strip_prefix(before_path.as_str())
            .map(|s| s.trim_start_matches([':', ';']).to_string())
            .unwrap_or(after_path);
        delta.insert("PATH".to_string(), stripped);
    }

    Ok(EnvironmentDelta { vars: delta })
}

fn parse_shell_env(text: &str) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    for line in text.lines() {
        let line = line.trim();
        if let Some(rest) = line.strip_prefix("declare -x ").or(Some(line)) {
            if let Some((k, v)) = rest.split_once('=') {
                let v = v.trim_matches('"');
                out.insert(k.to_string(), v.to_string());
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delta_round_trips_through_serialize_parse() {
        let mut vars = BTreeMap::new();
        vars.insert("FOO".to_string(), "bar".to_string());
        vars.insert("PATH".to_string(), "/opt/vendor/bin".to_string());
        let delta = EnvironmentDelta { vars };
        let parsed = EnvironmentDelta::parse(&delta.serialize());
        assert_eq!(delta, parsed);
    }

    #[test]
    fn apply_composes_user_path_before_vendor_delta() {
        let mut base = BTreeMap::new();
        base.insert("PATH".to_string(), "/usr/bin".to_string());
        let mut vars = BTreeMap::new();
        vars.insert("PATH".to_string(), "/opt/vendor/bin".to_string());
        let delta = EnvironmentDelta { vars };
        let applied = delta.apply(&base);
        let expected_sep = if cfg!(windows) { ';' } else { ':' };
        assert_eq!(applied["PATH"], format!("/usr/bin{expected_sep}/opt/vendor/bin"));
    }

    #[test]
    fn cache_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let cache = EnvironmentCache::new(dir.path());
        let mut vars = BTreeMap::new();
        vars.insert("X".to_string(), "1".to_string());
        let delta = EnvironmentDelta { vars };
        cache.store("deadbeef", &delta).unwrap();
        let loaded = cache.load("deadbeef").unwrap().unwrap();
        assert_eq!(loaded, delta);
    }

    #[test]
    fn no_activation_yields_empty_delta_without_a_script() {
        let dir = tempfile::tempdir().unwrap();
        let cache = EnvironmentCache::new(dir.path());
        let request = ActivationRequest {
            vendor: VendorActivationSpec::NoActivation,
            host_arch: "x86_64".into(),
            target_arch: "x86_64".into(),
            extra_args: vec![],
        };
        let delta = activate(&request, &cache, None, &AbortFlag::new()).unwrap();
        assert!(delta.vars.is_empty());
    }
}
