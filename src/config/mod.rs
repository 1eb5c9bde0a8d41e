//! The configuration state machine (§4.B, §4.E): load the build description, validate it,
//! resolve conditions/inheritance/variables, and materialize external dependencies into an
//! immutable [`Workspace`].
//!
//! Grounded on the teacher's top-level `Project`/`ProjectPathsConfig` construction in
//! `compile/project.rs`: "load settings, merge in cached/derived values, hand back one immutable
//! struct" is the same shape generalized from one Solidity project layout to a whole workspace.

pub mod external;
pub mod json;
pub mod resolver;

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use semver::VersionReq;

pub use external::{ExternalDepError, ExternalDependency, ExternalDependencyKind};
pub use json::{SchemaError, SourceMap};
pub use resolver::ResolverError;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error(transparent)]
    Resolver(#[from] ResolverError),
    #[error(transparent)]
    External(#[from] ExternalDepError),
    #[error(transparent)]
    Fs(#[from] crate::fs::FsError),
    #[error("unsupported build description extension: {0}")]
    UnsupportedExtension(PathBuf),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// §3 `BuildConfiguration`.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct BuildConfiguration {
    pub name: String,
    #[serde(default)]
    pub debug_symbols: bool,
    #[serde(default)]
    pub enable_profiling: bool,
    #[serde(default)]
    pub interprocedural_optimization: bool,
    #[serde(default)]
    pub optimization_level: OptimizationLevel,
    #[serde(default)]
    pub sanitizers: Vec<Sanitizer>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptimizationLevel {
    #[serde(rename = "0")]
    O0,
    #[serde(rename = "1")]
    O1,
    #[serde(rename = "2")]
    #[default]
    O2,
    #[serde(rename = "3")]
    O3,
    Debug,
    Size,
    Fast,
    CompilerDefault,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Sanitizer {
    Address,
    Thread,
    Memory,
    Leak,
    Undefined,
    Hwaddress,
}

impl BuildConfiguration {
    /// The five built-in configurations (§3 Defaults).
    pub fn builtins() -> Vec<Self> {
        vec![
            Self {
                name: "Release".into(),
                debug_symbols: false,
                enable_profiling: false,
                interprocedural_optimization: true,
                optimization_level: OptimizationLevel::O2,
                sanitizers: vec![],
            },
            Self {
                name: "Debug".into(),
                debug_symbols: true,
                enable_profiling: false,
                interprocedural_optimization: false,
                optimization_level: OptimizationLevel::Debug,
                sanitizers: vec![],
            },
            Self {
                name: "RelWithDebInfo".into(),
                debug_symbols: true,
                enable_profiling: false,
                interprocedural_optimization: true,
                optimization_level: OptimizationLevel::O2,
                sanitizers: vec![],
            },
            Self {
                name: "MinSizeRel".into(),
                debug_symbols: false,
                enable_profiling: false,
                interprocedural_optimization: true,
                optimization_level: OptimizationLevel::Size,
                sanitizers: vec![],
            },
            Self {
                name: "Profile".into(),
                debug_symbols: true,
                enable_profiling: true,
                interprocedural_optimization: false,
                optimization_level: OptimizationLevel::O1,
                sanitizers: vec![],
            },
        ]
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Language {
    C,
    Cpp,
    ObjectiveC,
    ObjectiveCpp,
}

#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TargetKind {
    Executable,
    StaticLibrary,
    SharedLibrary,
    Script,
    Process,
    CmakeProject,
    MesonProject,
    ChaletProject,
    Validation,
}

/// §3 `SourceTarget`. `extends`/condition are consumed by the resolver and not present on the
/// fully-resolved value (they're fields of the pre-resolution JSON shape, carried here so one
/// struct serves both the raw-parsed and abstract-merge stages per §4.E).
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SourceTarget {
    pub name: String,
    pub kind: Option<TargetKind>,
    pub language: Option<Language>,
    pub files: Vec<String>,
    pub exclude_files: Vec<String>,
    pub include_dirs: Vec<String>,
    pub lib_dirs: Vec<String>,
    pub links: Vec<String>,
    pub static_links: Vec<String>,
    pub defines: Vec<String>,
    pub compile_options: BTreeMap<String, Vec<String>>,
    pub linker_options: BTreeMap<String, Vec<String>>,
    pub warnings: Option<String>,
    pub warnings_extra: Vec<String>,
    pub cpp_standard: Option<String>,
    pub c_standard: Option<String>,
    pub pch: Option<String>,
    pub windows_resource: Option<String>,
    pub windows_manifest: Option<String>,
    pub windows_icon: Option<String>,
    pub mac_frameworks: Vec<String>,
    pub threads: Option<bool>,
    pub rtti: Option<bool>,
    pub exceptions: Option<bool>,
    pub fast_math: Option<bool>,
    pub position_independent: Option<bool>,
    pub unity_build: bool,
    pub extends: Option<String>,
    pub condition: Option<String>,
}

/// §3.1 `AbstractTemplate` — structurally a `SourceTarget` with every field already optional by
/// construction; the wrapper exists to make "not set" and "set to empty" distinguishable where
/// the merge cares, and to carry the template name.
#[derive(Clone, Debug, Default)]
pub struct AbstractTemplate {
    pub name: String,
    pub fields: SourceTarget,
}

/// §3.1 `DistributionEntry`.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DistributionEntry {
    pub name: String,
    pub kind: DistributionKind,
    pub include_targets: Vec<String>,
    pub output_subdirectory: String,
    #[serde(default)]
    pub include_files: Vec<String>,
    #[serde(default)]
    pub exclude_files: Vec<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DistributionKind {
    Bundle,
    Script,
    Process,
    Archive,
}

/// §3.1 `VariableDefinition`: may itself be unresolved (nested `${...}`) until §4.E expansion.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct VariableDefinition {
    pub name: String,
    pub value: String,
}

/// The immutable, fully-resolved build description (§3 `Workspace`).
#[derive(Clone, Debug)]
pub struct Workspace {
    pub name: String,
    pub version: VersionReq,
    pub configurations: Vec<BuildConfiguration>,
    pub targets: Vec<SourceTarget>,
    pub distribution: Vec<DistributionEntry>,
    pub externals: BTreeMap<String, ExternalDependency>,
    pub variables: Vec<VariableDefinition>,
}

/// Loads, validates, resolves, and returns the immutable workspace for a build description at
/// `path` (§4.B → §4.E, omitting §4.E's external materialization — call
/// [`external::materialize_all`] separately, since that step needs a destination directory and a
/// job-count budget the loader itself doesn't own).
pub fn load(path: &Path, context: &resolver::ResolutionContext) -> Result<Workspace> {
    let (value, source_map) = json::load(path)?;
    json::validate(&value, &source_map)?;
    let workspace = resolver::resolve(&value, context)?;
    Ok(workspace)
}
