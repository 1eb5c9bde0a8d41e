//! Command generation (§4.G): translates a resolved [`crate::config::SourceTarget`] plus
//! [`crate::toolchain::Toolchain`] into concrete compiler/linker argv per build step.
//!
//! This is the closest analogue to the teacher's `Compiler`/`CompilerInput` trait family
//! (`compilers/mod.rs`: `Compiler::compile`, `CompilerInput::build`), generalized from "build one
//! `SolcVersionedInput` per Solidity version" to "build one ordered argv per (compiler-family,
//! step)". The per-family split below also borrows the `CCompilerImpl`/`CCompilerKind` shape from
//! the sccache C-compiler example (`other_examples/.../src-compiler-c.rs`): one trait, one
//! lightweight kind enum, a family impl per concrete compiler.

pub mod families;
mod warnings;

use std::{collections::BTreeMap, path::{Path, PathBuf}};

use crate::config::{BuildConfiguration, Language, Sanitizer, SourceTarget};
use crate::toolchain::{CompilerFamily, Toolchain};

pub use warnings::WarningPreset;

#[derive(Debug, thiserror::Error)]
pub enum CommandGenError {
    #[error("required flag `{flag}` is not supported by toolchain `{toolchain}`; feature `{feature}` disabled")]
    UnsupportedFlag { flag: String, toolchain: String, feature: String },
    #[error("no source file extension recognized for {0}")]
    UnknownSourceLanguage(PathBuf),
}

pub type Result<T> = std::result::Result<T, CommandGenError>;

/// Which dependency-file protocol the scheduler should expect from a compile step (§4.G
/// "Dependency-file generation").
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DepFileMode {
    /// GNU/LLVM/Emscripten: `-MMD -MF <path>`, a Makefile-snippet dependency file.
    GccStyle,
    /// MSVC: `/showIncludes`, parsed from compiler stdout rather than a side file.
    MsvcShowIncludes,
    None,
}

/// One compile/link/resource/assembly invocation, ready to hand to the scheduler.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GeneratedCommand {
    pub argv: Vec<String>,
    pub dep_file_mode: DepFileMode,
    pub warnings: Vec<String>,
}

/// Everything a [`families::CommandFamily`] needs about one compile step beyond the raw target
/// settings — the specific input/output pair and mode, since the same target produces many
/// compile commands (one per source file).
pub struct CompileSpec<'a> {
    pub source: &'a Path,
    pub object: &'a Path,
    pub dep_file_mode: DepFileMode,
    pub language: Language,
}

/// Resolves warning-preset + optimization/debug interaction + feature flags into the shared
/// policy all families apply before handing off to their own flag vocabulary (§4.G "Shared
/// policy").
pub struct CommandPolicy<'a> {
    pub target: &'a SourceTarget,
    pub configuration: &'a BuildConfiguration,
    pub toolchain: &'a Toolchain,
}

impl<'a> CommandPolicy<'a> {
    /// If debug symbols are requested alongside a non-zero/non-debug optimization level, force
    /// `-O0`/`/Od` and surface a warning, per §4.G.
    pub fn effective_optimization_conflict(&self) -> Option<&'static str> {
        use crate::config::OptimizationLevel::*;
        let forced = self.configuration.debug_symbols
            && !matches!(self.configuration.optimization_level, O0 | Debug);
        forced.then_some("debug-symbols requested with optimization > 0; forcing -O0")
    }

    /// Filters a family's candidate flag list down to those the detected toolchain actually
    /// supports, reporting the rest via the returned diagnostics vector (§4.G: "if the
    /// Toolchain's supported-flags set lacks a required flag, the generator emits a diagnostic
    /// and omits it").
    pub fn filter_supported<'f>(&self, candidates: &'f [&'f str]) -> (Vec<&'f str>, Vec<String>) {
        let mut kept = Vec::new();
        let mut diagnostics = Vec::new();
        for flag in candidates {
            if self.toolchain.supported_flags.is_empty() || self.toolchain.supported_flags.contains(*flag) {
                kept.push(*flag);
            } else {
                diagnostics.push(format!(
                    "flag `{flag}` is not supported by toolchain `{}`; omitted",
                    self.toolchain.name
                ));
            }
        }
        (kept, diagnostics)
    }
}

/// Deduplicates a list of include/lib paths preserving first occurrence (§4.G "Include and lib
/// paths are emitted in listing order; duplicates are removed preserving first occurrence").
pub fn dedup_preserve_order(paths: &[String]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    paths.iter().filter(|p| seen.insert((*p).clone())).cloned().collect()
}

/// Orders link inputs so static inter-project dependencies precede dynamic links (§4.G "Link
/// ordering").
pub fn order_link_inputs(static_links: &[String], dynamic_links: &[String]) -> Vec<String> {
    let mut out = static_links.to_vec();
    out.extend(dynamic_links.iter().cloned());
    out
}

pub fn dep_file_mode_for(family: CompilerFamily) -> DepFileMode {
    match family {
        CompilerFamily::Msvc => DepFileMode::MsvcShowIncludes,
        _ => DepFileMode::GccStyle,
    }
}

pub fn language_from_extension(path: &Path) -> Result<Language> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("c") => Ok(Language::C),
        Some("cc") | Some("cpp") | Some("cxx") | Some("C") => Ok(Language::Cpp),
        Some("m") => Ok(Language::ObjectiveC),
        Some("mm") => Ok(Language::ObjectiveCpp),
        _ => Err(CommandGenError::UnknownSourceLanguage(path.to_path_buf())),
    }
}

/// Returns the [`families::CommandFamily`] implementation for a detected compiler family.
pub fn family_for(family: CompilerFamily) -> Box<dyn families::CommandFamily> {
    use families::*;
    match family {
        CompilerFamily::Gnu | CompilerFamily::MingwGnu => Box::new(GnuFamily),
        CompilerFamily::Llvm | CompilerFamily::AppleLlvm | CompilerFamily::MingwLlvm => Box::new(LlvmFamily),
        CompilerFamily::Msvc => Box::new(MsvcFamily),
        CompilerFamily::IntelClassic | CompilerFamily::IntelLlvm => Box::new(IntelFamily),
        CompilerFamily::Emscripten => Box::new(EmscriptenFamily),
    }
}

/// Object-file naming convention per family, keyed by normalized source path (§6 persisted state
/// layout: `obj/<normalized-src>.o|.obj`).
pub fn object_file_name(source: &Path, family: CompilerFamily) -> PathBuf {
    let ext = if family == CompilerFamily::Msvc { "obj" } else { "o" };
    source.with_extension(ext)
}

pub fn assembly_file_name(source: &Path) -> PathBuf {
    source.with_extension("s")
}

pub fn dependency_file_name(source: &Path) -> PathBuf {
    source.with_extension("d")
}

/// Per-compile-family map of user-supplied options, threaded straight from `SourceTarget`
/// (§3 `compile/linker options (per-family map)`).
pub fn options_for_family(map: &BTreeMap<String, Vec<String>>, family: CompilerFamily) -> Vec<String> {
    let key = match family {
        CompilerFamily::Gnu => "gcc",
        CompilerFamily::Llvm => "clang",
        CompilerFamily::AppleLlvm => "appleClang",
        CompilerFamily::Msvc => "msvc",
        CompilerFamily::IntelClassic => "intelClassic",
        CompilerFamily::IntelLlvm => "intelLlvm",
        CompilerFamily::MingwGnu => "mingw",
        CompilerFamily::MingwLlvm => "mingwLlvm",
        CompilerFamily::Emscripten => "emscripten",
    };
    map.get(key).cloned().unwrap_or_default()
}

/// Translates a [`CommandPolicy`] into the extra compile-step argv (§4.G "Shared policy"): the
/// warning preset and sanitizer flags are filtered against the toolchain's probed
/// `supported_flags` (genuinely optional feature flags), while defines/include dirs/language
/// standard/optimization/RTTI/exceptions are required and always emitted verbatim. Returns the
/// flags plus any diagnostics surfaced by filtering or the debug/optimization conflict check.
pub fn compile_flags(policy: &CommandPolicy<'_>, family: CompilerFamily) -> (Vec<String>, Vec<String>) {
    let target = policy.target;
    let msvc = family == CompilerFamily::Msvc;
    let mut flags = Vec::new();
    let mut diagnostics = Vec::new();

    let preset = WarningPreset::parse(target.warnings.as_deref().unwrap_or(""));
    let warning_candidates: Vec<&str> =
        if msvc { preset.msvc_flags().to_vec() } else { preset.gnu_style_flags(family).to_vec() };
    let (kept_warnings, mut warning_diagnostics) = policy.filter_supported(&warning_candidates);
    flags.extend(kept_warnings.into_iter().map(String::from));
    diagnostics.append(&mut warning_diagnostics);
    flags.extend(target.warnings_extra.iter().cloned());

    let sanitizer_candidates: Vec<String> =
        target_sanitizers(policy).iter().map(|s| sanitizer_flag(*s, msvc)).collect();
    let sanitizer_refs: Vec<&str> = sanitizer_candidates.iter().map(String::as_str).collect();
    let (kept_sanitizers, mut sanitizer_diagnostics) = policy.filter_supported(&sanitizer_refs);
    flags.extend(kept_sanitizers.into_iter().map(String::from));
    diagnostics.append(&mut sanitizer_diagnostics);

    for define in dedup_preserve_order(&target.defines) {
        flags.push(if msvc { format!("/D{define}") } else { format!("-D{define}") });
    }
    for dir in dedup_preserve_order(&target.include_dirs) {
        flags.push(if msvc { format!("/I{dir}") } else { format!("-I{dir}") });
    }
    if let Some(standard) = standard_flag(target, msvc) {
        flags.push(standard);
    }

    if let Some(conflict) = policy.effective_optimization_conflict() {
        diagnostics.push(conflict.to_string());
        flags.push(if msvc { "/Od".to_string() } else { "-O0".to_string() });
    } else if let Some(opt) = optimization_flag(policy.configuration, msvc) {
        flags.push(opt);
    }
    if policy.configuration.debug_symbols {
        flags.push(if msvc { "/Zi".to_string() } else { "-g".to_string() });
    }

    if let Some(rtti) = target.rtti {
        flags.push(rtti_flag(rtti, msvc));
    }
    if let Some(exceptions) = target.exceptions {
        flags.push(exceptions_flag(exceptions, msvc));
    }
    if target.fast_math == Some(true) {
        flags.push(if msvc { "/fp:fast".to_string() } else { "-ffast-math".to_string() });
    }
    if target.position_independent == Some(true) && !msvc {
        flags.push("-fPIC".to_string());
    }
    if target.threads == Some(true) && !msvc {
        flags.push("-pthread".to_string());
    }

    flags.extend(options_for_family(&target.compile_options, family));

    (flags, diagnostics)
}

/// Translates a [`CommandPolicy`] into the extra link-step argv (§4.G "Shared policy"): lib
/// dirs, sanitizers, threading/PIE, macOS frameworks, and the per-family `linkerOptions` map.
/// Linker flags are not filtered against `supported_flags`, since that set is populated from the
/// *compiler's* `--help` output and has no bearing on what the linker accepts.
pub fn link_flags(policy: &CommandPolicy<'_>, family: CompilerFamily) -> Vec<String> {
    let target = policy.target;
    let msvc = family == CompilerFamily::Msvc;
    let mut flags = Vec::new();

    for dir in dedup_preserve_order(&target.lib_dirs) {
        flags.push(if msvc { format!("/LIBPATH:{dir}") } else { format!("-L{dir}") });
    }
    for sanitizer in target_sanitizers(policy) {
        flags.push(sanitizer_flag(sanitizer, msvc));
    }
    if target.position_independent == Some(true) && !msvc {
        flags.push("-pie".to_string());
    }
    if target.threads == Some(true) && !msvc {
        flags.push("-pthread".to_string());
    }
    if !msvc {
        for framework in &target.mac_frameworks {
            flags.push("-framework".to_string());
            flags.push(framework.clone());
        }
    }
    if msvc {
        if let Some(manifest) = &target.windows_manifest {
            flags.push(format!("/MANIFESTINPUT:{manifest}"));
            flags.push("/MANIFEST:EMBED".to_string());
        }
    }

    flags.extend(options_for_family(&target.linker_options, family));
    flags
}

fn target_sanitizers(policy: &CommandPolicy<'_>) -> &[Sanitizer] {
    &policy.configuration.sanitizers
}

fn sanitizer_flag(sanitizer: Sanitizer, msvc: bool) -> String {
    let name = match sanitizer {
        Sanitizer::Address => "address",
        Sanitizer::Thread => "thread",
        Sanitizer::Memory => "memory",
        Sanitizer::Leak => "leak",
        Sanitizer::Undefined => "undefined",
        Sanitizer::Hwaddress => "hwaddress",
    };
    if msvc { format!("/fsanitize={name}") } else { format!("-fsanitize={name}") }
}

fn standard_flag(target: &SourceTarget, msvc: bool) -> Option<String> {
    let standard = target.cpp_standard.as_deref().or(target.c_standard.as_deref())?;
    Some(if msvc { format!("/std:{standard}") } else { format!("-std={standard}") })
}

fn optimization_flag(configuration: &BuildConfiguration, msvc: bool) -> Option<String> {
    use crate::config::OptimizationLevel::*;
    let flag = if msvc {
        match configuration.optimization_level {
            O0 | Debug => "/Od",
            O1 => "/O1",
            O2 => "/O2",
            O3 | Fast => "/Ox",
            Size => "/O1",
            CompilerDefault => return None,
        }
    } else {
        match configuration.optimization_level {
            O0 | Debug => "-O0",
            O1 => "-O1",
            O2 => "-O2",
            O3 => "-O3",
            Size => "-Os",
            Fast => "-Ofast",
            CompilerDefault => return None,
        }
    };
    Some(flag.to_string())
}

fn rtti_flag(enabled: bool, msvc: bool) -> String {
    if msvc {
        (if enabled { "/GR" } else { "/GR-" }).to_string()
    } else {
        (if enabled { "-frtti" } else { "-fno-rtti" }).to_string()
    }
}

fn exceptions_flag(enabled: bool, msvc: bool) -> String {
    if msvc {
        (if enabled { "/EHsc" } else { "/EHs-c-" }).to_string()
    } else {
        (if enabled { "-fexceptions" } else { "-fno-exceptions" }).to_string()
    }
}

/// Parses a GCC-style `-MMD -MF` dependency Makefile snippet (`object: src hdr1 hdr2 \`) into the
/// list of header paths a source depended on, for [`crate::cache::SourceCache::dirty_with_deps`]
/// (§4.F). Malformed or missing files yield an empty dependency list rather than an error — a
/// compile step that never ran simply has no recorded header dependencies yet.
pub fn parse_gcc_dep_file(path: &Path) -> Vec<PathBuf> {
    let Ok(contents) = std::fs::read_to_string(path) else {
        return Vec::new();
    };
    let joined = contents.replace("\\\n", " ");
    let Some((_, rest)) = joined.split_once(':') else {
        return Vec::new();
    };
    rest.split_whitespace().map(PathBuf::from).collect()
}
