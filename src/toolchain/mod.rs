//! Toolchain detection (§4.D). From a toolchain preference, resolve a fully populated
//! [`Toolchain`]: family, binary paths, version, target triple, supported flags.
//!
//! Grounded on the teacher's `CompilerVersionManager` trait (`compilers/mod.rs` /
//! `compilers/solc/version_manager.rs`): "given a name/version, find-or-probe a concrete
//! compiler handle" is the same shape here, generalized from one Solidity compiler binary to
//! the full set of slots (`compiler_cpp`, `compiler_c`, `archiver`, `linker`, ...) a native
//! toolchain needs.

pub mod detector;
pub mod presets;

use std::{
    collections::HashSet,
    path::PathBuf,
};

use semver::Version;

pub use detector::detect;

#[derive(Debug, thiserror::Error)]
pub enum ToolchainError {
    #[error("compiler not found for toolchain `{name}`; searched: {}", .candidates.join(", "))]
    CompilerNotFound { name: String, candidates: Vec<String> },
    #[error("failed to probe compiler at {path}: {message}")]
    ProbeFailed { path: PathBuf, message: String },
    #[error("architecture `{arch}` is not supported by the `{family:?}` family")]
    UnsupportedArchitecture { family: CompilerFamily, arch: String },
    #[error(transparent)]
    Environment(#[from] crate::environment::EnvironmentError),
    #[error(transparent)]
    Fs(#[from] crate::fs::FsError),
}

pub type Result<T> = std::result::Result<T, ToolchainError>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum CompilerFamily {
    Gnu,
    Llvm,
    AppleLlvm,
    Msvc,
    IntelClassic,
    IntelLlvm,
    MingwGnu,
    MingwLlvm,
    Emscripten,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Strategy {
    Native,
    Ninja,
    Makefile,
    Msbuild,
    Xcodebuild,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum BuildPathStyle {
    TargetTriple,
    ToolchainName,
    Architecture,
    Configuration,
}

/// Every resolvable tool path slot (§3 `Toolchain.paths`).
#[derive(Clone, Debug, Default, serde::Serialize, serde::Deserialize)]
pub struct ToolPaths {
    pub compiler_cpp: Option<PathBuf>,
    pub compiler_c: Option<PathBuf>,
    pub compiler_resource: Option<PathBuf>,
    pub archiver: Option<PathBuf>,
    pub linker: Option<PathBuf>,
    pub profiler: Option<PathBuf>,
    pub disassembler: Option<PathBuf>,
    pub cmake: Option<PathBuf>,
    pub make: Option<PathBuf>,
    pub ninja: Option<PathBuf>,
}

/// A named bundle of resolved tool executables and their detected properties (§3 `Toolchain`).
///
/// Invariant: every non-empty path in `paths` exists on disk at the time this value was
/// constructed (the detector never returns a partially populated `Toolchain` — see
/// [`ToolchainError`]).
#[derive(Clone, Debug)]
pub struct Toolchain {
    pub name: String,
    pub version: Version,
    pub strategy: Strategy,
    pub build_path_style: BuildPathStyle,
    pub paths: ToolPaths,
    pub family: CompilerFamily,
    pub host_arch: String,
    pub target_arch: String,
    pub target_triple: String,
    pub supported_flags: HashSet<String>,
    pub system_search_paths: Vec<PathBuf>,
}

impl Toolchain {
    /// The per-configuration output directory name, per the selected [`BuildPathStyle`] (§6
    /// persisted state layout: `<toolchain>_<arch>_<config>`).
    pub fn output_dir_name(&self, configuration: &str, target_triple: &str) -> String {
        match self.build_path_style {
            BuildPathStyle::TargetTriple => format!("{target_triple}_{configuration}"),
            BuildPathStyle::ToolchainName => format!("{}_{configuration}", self.name),
            BuildPathStyle::Architecture => format!("{}_{configuration}", self.target_arch),
            BuildPathStyle::Configuration => configuration.to_string(),
        }
    }
}

/// Settings-file overrides consulted before falling back to `PATH` search (§4.D step 2).
#[derive(Clone, Debug, Default)]
pub struct ToolchainSettings {
    pub explicit_paths: ToolPaths,
    /// Custom toolchain table: unknown preset names fall through here (§4.D step 1).
    pub custom: std::collections::HashMap<String, presets::ToolchainPreset>,
    /// Forces the build strategy rather than inferring one from the detected family
    /// (§4.H `--build-strategy`); `None` falls back to [`detector::default_strategy`].
    pub requested_strategy: Option<Strategy>,
    /// Explicit path to a vendor activation script (`vcvarsall.bat`, `setvars.sh`, ...), bypassing
    /// the family's built-in search locations (§4.D step 2 vendor activation).
    pub vendor_script: Option<PathBuf>,
    /// Directory the vendor-environment cache is stored under; defaults to the system temp dir.
    pub environment_cache_dir: Option<PathBuf>,
}
