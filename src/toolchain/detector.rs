use std::{
    collections::{BTreeMap, HashSet},
    path::{Path, PathBuf},
};

use semver::Version;

use super::{
    presets::{self, ToolchainPreset},
    BuildPathStyle, CompilerFamily, Strategy, Toolchain, ToolchainError, ToolchainSettings,
};
use crate::environment::{self, ActivationRequest, EnvironmentCache, VendorActivationSpec};
use crate::fs::{AbortFlag, Subprocess};

pub type Result<T> = std::result::Result<T, ToolchainError>;

/// One implementation per compiler family, matching the "no inheritance, shared behaviour in
/// free helpers over a common input struct" design note (§9). `detect` below is the free
/// function every implementation's `resolve` ultimately funnels through; the trait exists so a
/// caller can plug in a detector for a family this crate doesn't ship (e.g. a vendor-specific
/// fork) without touching `detect` itself.
pub trait ToolchainDetector: Send + Sync {
    fn family(&self) -> CompilerFamily;
    fn resolve(
        &self,
        preference: &str,
        settings: &ToolchainSettings,
        host_arch: &str,
        target_arch: &str,
        abort: &AbortFlag,
    ) -> Result<Toolchain>;
}

/// Covers the PATH-searched, macro-probed families: GNU, LLVM, Apple LLVM, MinGW (both
/// flavours), Intel Classic/LLVM, Emscripten. MSVC is handled separately since it first needs
/// an environment activation (§4.D step 2 "For MSVC, delegates to the Environment snapshot").
pub struct GenericDetector;

impl ToolchainDetector for GenericDetector {
    fn family(&self) -> CompilerFamily {
        CompilerFamily::Gnu
    }

    fn resolve(
        &self,
        preference: &str,
        settings: &ToolchainSettings,
        host_arch: &str,
        target_arch: &str,
        abort: &AbortFlag,
    ) -> Result<Toolchain> {
        detect(preference, settings, host_arch, target_arch, abort)
    }
}

/// §4.D end to end: family inference, path resolution, version/triple probe, supported-flag
/// enumeration, architecture validation.
pub fn detect(
    preference: &str,
    settings: &ToolchainSettings,
    host_arch: &str,
    target_arch: &str,
    abort: &AbortFlag,
) -> Result<Toolchain> {
    crate::report::toolchain_probe_start(preference);

    // Step 1 — family inference.
    let preset = presets::lookup(preference)
        .or_else(|| settings.custom.get(preference).cloned())
        .ok_or_else(|| {
            let msg = format!("unknown toolchain preference `{preference}`");
            crate::report::toolchain_probe_error(preference, &msg);
            ToolchainError::CompilerNotFound { name: preference.to_string(), candidates: vec![] }
        })?;

    // Step 5 (validated early so we never probe an unsupported combination).
    validate_architecture(&preset, host_arch, target_arch)?;

    // Step 2 — for MSVC, activate the vendor environment (vcvars) first so the PATH search below
    // and every subsequent probe subprocess see `cl.exe`/`INCLUDE`/`LIB` (§4.D step 2).
    let activated_env = if preset.family == CompilerFamily::Msvc {
        Some(activate_msvc_environment(settings, host_arch, target_arch, abort)?)
    } else {
        None
    };
    let env = activated_env.as_ref();

    // Step 2 — compiler path resolution.
    let compiler_cpp = resolve_slot(
        settings.explicit_paths.compiler_cpp.as_deref(),
        preset.cpp_candidates,
        preference,
        env,
    )?;
    let compiler_c = resolve_slot(
        settings.explicit_paths.compiler_c.as_deref(),
        preset.c_candidates,
        preference,
        env,
    )
    .ok();
    let archiver = resolve_slot(
        settings.explicit_paths.archiver.as_deref(),
        preset.archiver_candidates,
        preference,
        env,
    )
    .ok();
    let linker = resolve_slot(
        settings.explicit_paths.linker.as_deref(),
        preset.linker_candidates,
        preference,
        env,
    )
    .ok();
    let disassembler = resolve_slot(
        settings.explicit_paths.disassembler.as_deref(),
        preset.disassembler_candidates,
        preference,
        env,
    )
    .ok();

    // Step 3 — version and triple probe.
    let (version, confirmed_family) = probe_version_and_family(&compiler_cpp, preset.family, env, abort)?;
    let target_triple = probe_target_triple(&compiler_cpp, confirmed_family, target_arch, &version, env, abort)?;

    // Step 4 — supported-flag enumeration.
    let supported_flags = probe_supported_flags(&compiler_cpp, confirmed_family, env, abort);

    crate::report::toolchain_probe_success(preference, &version);

    Ok(Toolchain {
        name: preference.to_string(),
        version,
        strategy: settings.requested_strategy.unwrap_or_else(|| default_strategy(confirmed_family)),
        build_path_style: BuildPathStyle::TargetTriple,
        paths: super::ToolPaths {
            compiler_cpp: Some(compiler_cpp),
            compiler_c,
            compiler_resource: None,
            archiver,
            linker,
            profiler: None,
            disassembler,
            cmake: which("cmake", env),
            make: which("make", env),
            ninja: which("ninja", env),
        },
        family: confirmed_family,
        host_arch: crate::utils::normalize_arch(host_arch).to_string(),
        target_arch: crate::utils::normalize_arch(target_arch).to_string(),
        target_triple,
        supported_flags,
        system_search_paths: system_search_paths(),
    })
}

/// Runs the MSVC `vcvarsall.bat` activation protocol (§4.C/§4.D step 2) via
/// [`crate::environment::activate`] and applies the resulting delta on top of the current process
/// environment, yielding the environment subsequent probes and `PATH` search should use instead
/// of the ambient, unactivated one.
fn activate_msvc_environment(
    settings: &ToolchainSettings,
    host_arch: &str,
    target_arch: &str,
    abort: &AbortFlag,
) -> Result<BTreeMap<String, String>> {
    let request = ActivationRequest {
        vendor: VendorActivationSpec::MsvcVcvars { vs_year: None },
        host_arch: host_arch.to_string(),
        target_arch: target_arch.to_string(),
        extra_args: vec![],
    };
    let cache_dir = settings.environment_cache_dir.clone().unwrap_or_else(std::env::temp_dir);
    let cache = EnvironmentCache::new(cache_dir);
    let delta = environment::activate(&request, &cache, settings.vendor_script.as_deref(), abort)?;
    let base: BTreeMap<String, String> = std::env::vars().collect();
    Ok(delta.apply(&base))
}

fn default_strategy(family: CompilerFamily) -> Strategy {
    match family {
        CompilerFamily::Msvc => Strategy::Native,
        _ if which("ninja", None).is_some() => Strategy::Ninja,
        _ => Strategy::Native,
    }
}

/// §4.D step 2: explicit setting first, then a family-specific candidate list searched on
/// `PATH`. Executables located inside a vendor toolchain tree are not specially tie-broken here
/// since the generic families (unlike MSVC) have no single vendor root; `PATH` order already
/// reflects the user's activation order, which is the documented tie-break surface.
fn resolve_slot(
    explicit: Option<&Path>,
    candidates: &[&str],
    toolchain_name: &str,
    env: Option<&BTreeMap<String, String>>,
) -> Result<PathBuf> {
    if let Some(explicit) = explicit {
        if explicit.is_file() {
            return Ok(explicit.to_path_buf());
        }
    }
    for candidate in candidates {
        if let Some(found) = which(candidate, env) {
            return Ok(found);
        }
    }
    Err(ToolchainError::CompilerNotFound {
        name: toolchain_name.to_string(),
        candidates: candidates.iter().map(|s| s.to_string()).collect(),
    })
}

/// A minimal `PATH` search; `which`-crate-shaped but hand-rolled since the teacher's dependency
/// table carries no process-lookup crate and this search is a handful of lines. When `env` is
/// supplied (a vendor-activated environment), its `PATH` is searched instead of the ambient one.
fn which(program: &str, env: Option<&BTreeMap<String, String>>) -> Option<PathBuf> {
    let path_var = match env {
        Some(env) => env.get("PATH").cloned()?,
        None => std::env::var("PATH").ok()?,
    };
    let exe_name = if cfg!(windows) && !program.ends_with(".exe") {
        format!("{program}.exe")
    } else {
        program.to_string()
    };
    std::env::split_paths(&path_var).find_map(|dir| {
        let candidate = dir.join(&exe_name);
        candidate.is_file().then_some(candidate)
    })
}

/// §4.D step 3: run `cpp --version` and `cpp -E -dM -` against empty input to harvest
/// predefined macros, confirming family by distinctive macros.
fn probe_version_and_family(
    compiler: &Path,
    assumed_family: CompilerFamily,
    env: Option<&BTreeMap<String, String>>,
    abort: &AbortFlag,
) -> Result<(Version, CompilerFamily)> {
    let macros = dump_macros(compiler, env, abort)?;

    let confirmed = if macros.contains("__EMSCRIPTEN__") {
        CompilerFamily::Emscripten
    } else if macros.contains("__INTEL_LLVM_COMPILER") {
        CompilerFamily::IntelLlvm
    } else if macros.contains("__INTEL_COMPILER") {
        CompilerFamily::IntelClassic
    } else if macros.contains("_MSC_FULL_VER") {
        CompilerFamily::Msvc
    } else if macros.contains("__APPLE_CC__") || macros.contains("__apple_build_version__") {
        CompilerFamily::AppleLlvm
    } else if macros.contains("__MINGW64__") || macros.contains("__MINGW32__") {
        match assumed_family {
            CompilerFamily::MingwLlvm => CompilerFamily::MingwLlvm,
            _ => CompilerFamily::MingwGnu,
        }
    } else if macros.contains("__clang__") {
        CompilerFamily::Llvm
    } else {
        CompilerFamily::Gnu
    };

    let version = parse_version_from_macros(&macros, confirmed)
        .ok_or_else(|| ToolchainError::ProbeFailed {
            path: compiler.to_path_buf(),
            message: "could not determine compiler version from predefined macros".to_string(),
        })?;

    Ok((version, confirmed))
}

fn dump_macros(compiler: &Path, env: Option<&BTreeMap<String, String>>, abort: &AbortFlag) -> Result<String> {
    let mut sp = Subprocess::new([compiler.to_string_lossy().into_owned(), "-E".into(), "-dM".into(), "-".into()]);
    sp = with_env(sp, env);
    let outcome = sp.spawn(abort).map_err(|e| ToolchainError::ProbeFailed {
        path: compiler.to_path_buf(),
        message: e.to_string(),
    })?;
    Ok(outcome.stdout.unwrap_or_default())
}

fn with_env(sp: Subprocess, env: Option<&BTreeMap<String, String>>) -> Subprocess {
    match env {
        Some(env) => sp.envs(env.iter().map(|(k, v)| (k.clone(), v.clone()))),
        None => sp,
    }
}

fn parse_version_from_macros(macros: &str, family: CompilerFamily) -> Option<Version> {
    let find = |key: &str| -> Option<String> {
        macros.lines().find_map(|line| {
            let mut parts = line.splitn(3, ' ');
            if parts.next()? != "#define" {
                return None;
            }
            if parts.next()? != key {
                return None;
            }
            parts.next().map(|v| v.trim().to_string())
        })
    };

    match family {
        CompilerFamily::Msvc => {
            let full_ver = find("_MSC_FULL_VER")?;
            let digits: String = full_ver.chars().filter(|c| c.is_ascii_digit()).collect();
            if digits.len() < 8 {
                return None;
            }
            let major: u64 = digits[0..2].parse().ok()?;
            let minor: u64 = digits[2..4].parse().ok()?;
            let patch: u64 = digits[4..].parse().ok()?;
            Some(Version::new(major, minor, patch))
        }
        CompilerFamily::Llvm | CompilerFamily::AppleLlvm | CompilerFamily::MingwLlvm | CompilerFamily::IntelLlvm => {
            let major = find("__clang_major__")?;
            let minor = find("__clang_minor__").unwrap_or_else(|| "0".to_string());
            let patch = find("__clang_patchlevel__").unwrap_or_else(|| "0".to_string());
            Some(Version::new(major.parse().ok()?, minor.parse().ok()?, patch.parse().ok()?))
        }
        _ => {
            let major = find("__GNUC__")?;
            let minor = find("__GNUC_MINOR__").unwrap_or_else(|| "0".to_string());
            let patch = find("__GNUC_PATCHLEVEL__").unwrap_or_else(|| "0".to_string());
            Some(Version::new(major.parse().ok()?, minor.parse().ok()?, patch.parse().ok()?))
        }
    }
}

/// §4.D step 3: target triple via `-dumpmachine` (GNU/LLVM), or synthesized for MSVC.
fn probe_target_triple(
    compiler: &Path,
    family: CompilerFamily,
    target_arch: &str,
    version: &Version,
    env: Option<&BTreeMap<String, String>>,
    abort: &AbortFlag,
) -> Result<String> {
    if family == CompilerFamily::Msvc {
        return Ok(format!("{target_arch}-pc-windows-msvc{}", version.major));
    }
    let sp = with_env(Subprocess::new([compiler.to_string_lossy().into_owned(), "-dumpmachine".into()]), env);
    let outcome = sp.spawn(abort).map_err(|e| ToolchainError::ProbeFailed {
        path: compiler.to_path_buf(),
        message: e.to_string(),
    })?;
    Ok(outcome.stdout.unwrap_or_default().trim().to_string())
}

/// §4.D step 4: parse `--help`/`--help=common` output to enumerate flags the compiler accepts.
/// MSVC has no discoverable `--help` in this sense; a canned list stands in, matching the
/// spec's "or a canned list (MSVC)".
fn probe_supported_flags(
    compiler: &Path,
    family: CompilerFamily,
    env: Option<&BTreeMap<String, String>>,
    abort: &AbortFlag,
) -> HashSet<String> {
    if family == CompilerFamily::Msvc {
        return ["/O1", "/O2", "/Od", "/GL", "/LTCG", "/EHsc", "/GR", "/GR-", "/MT", "/MD"]
            .into_iter()
            .map(String::from)
            .collect();
    }

    let help_flag = if matches!(family, CompilerFamily::Gnu) { "--help=common" } else { "--help" };
    let sp = with_env(Subprocess::new([compiler.to_string_lossy().into_owned(), help_flag.to_string()]), env);
    let Ok(outcome) = sp.spawn(abort) else {
        return HashSet::new();
    };
    let text = outcome.stdout.unwrap_or_default();
    text.lines()
        .filter_map(|line| {
            let line = line.trim_start();
            line.starts_with('-').then(|| line.split_whitespace().next().unwrap_or("").to_string())
        })
        .filter(|f| !f.is_empty())
        .collect()
}

/// §4.D step 5: reject unsupported combinations, normalizing aliases first.
fn validate_architecture(preset: &ToolchainPreset, host_arch: &str, target_arch: &str) -> Result<()> {
    let host = crate::utils::normalize_arch(host_arch);
    let target = crate::utils::normalize_arch(target_arch);

    let supported: &[&str] = match preset.family {
        CompilerFamily::Emscripten => &["wasm32"],
        CompilerFamily::MingwGnu | CompilerFamily::MingwLlvm => &["x86_64", "i686", "aarch64"],
        _ => &["x86_64", "i686", "aarch64", "arm", "wasm32"],
    };

    if !supported.contains(&target) {
        return Err(ToolchainError::UnsupportedArchitecture {
            family: preset.family,
            arch: target.to_string(),
        });
    }
    let _ = host;
    Ok(())
}

fn system_search_paths() -> Vec<PathBuf> {
    if cfg!(windows) {
        vec![]
    } else {
        vec![PathBuf::from("/usr/include"), PathBuf::from("/usr/local/include")]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn architecture_aliases_normalize_before_validation() {
        let preset = presets::lookup("gcc").unwrap();
        assert!(validate_architecture(&preset, "x64", "x64").is_ok());
        assert!(validate_architecture(&preset, "x86_64", "x86_64").is_ok());
    }

    #[test]
    fn emscripten_rejects_non_wasm_target() {
        let preset = presets::lookup("emscripten").unwrap();
        let err = validate_architecture(&preset, "x86_64", "x86_64").unwrap_err();
        assert!(matches!(err, ToolchainError::UnsupportedArchitecture { .. }));
    }

    #[test]
    fn which_finds_a_binary_on_path() {
        // `sh` is present on every POSIX CI runner this crate targets.
        if cfg!(unix) {
            assert!(which("sh", None).is_some());
        }
    }

    #[test]
    fn msvc_version_parses_from_full_ver_macro() {
        let macros = "#define _MSC_FULL_VER 193632532\n";
        let v = parse_version_from_macros(macros, CompilerFamily::Msvc).unwrap();
        assert_eq!(v, Version::new(19, 36, 32532));
    }

    #[test]
    fn gnu_version_parses_from_gnuc_macros() {
        let macros = "#define __GNUC__ 12\n#define __GNUC_MINOR__ 2\n#define __GNUC_PATCHLEVEL__ 0\n";
        let v = parse_version_from_macros(macros, CompilerFamily::Gnu).unwrap();
        assert_eq!(v, Version::new(12, 2, 0));
    }
}
