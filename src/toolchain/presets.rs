//! The built-in toolchain preset table (§4.D step 1, §3.1 `ToolchainPreset`).
//!
//! Supplemented from `original_source/src/Compile/Environment/*` and `ToolchainTypes.*`: the
//! preset names below match what the original tool recognizes for `--toolchain`.

use super::CompilerFamily;

/// A preset name resolves to a family plus an ordered list of candidate binary names to search
/// `PATH` for, per slot, matching §4.D step 2's "family-specific candidate list".
#[derive(Clone, Debug)]
pub struct ToolchainPreset {
    pub family: CompilerFamily,
    pub cpp_candidates: &'static [&'static str],
    pub c_candidates: &'static [&'static str],
    pub archiver_candidates: &'static [&'static str],
    pub linker_candidates: &'static [&'static str],
    pub disassembler_candidates: &'static [&'static str],
}

pub fn lookup(name: &str) -> Option<ToolchainPreset> {
    match name {
        "llvm" => Some(ToolchainPreset {
            family: CompilerFamily::Llvm,
            cpp_candidates: &["clang++"],
            c_candidates: &["clang"],
            archiver_candidates: &["llvm-ar", "ar"],
            linker_candidates: &["lld", "ld.lld"],
            disassembler_candidates: &["llvm-objdump"],
        }),
        "apple-llvm" => Some(ToolchainPreset {
            family: CompilerFamily::AppleLlvm,
            cpp_candidates: &["clang++"],
            c_candidates: &["clang"],
            archiver_candidates: &["ar"],
            linker_candidates: &["ld"],
            disassembler_candidates: &["otool"],
        }),
        "gcc" => Some(ToolchainPreset {
            family: CompilerFamily::Gnu,
            cpp_candidates: &["g++"],
            c_candidates: &["gcc"],
            archiver_candidates: &["ar", "gcc-ar"],
            linker_candidates: &["ld"],
            disassembler_candidates: &["objdump"],
        }),
        "mingw" => Some(ToolchainPreset {
            family: CompilerFamily::MingwGnu,
            cpp_candidates: &["x86_64-w64-mingw32-g++", "i686-w64-mingw32-g++"],
            c_candidates: &["x86_64-w64-mingw32-gcc", "i686-w64-mingw32-gcc"],
            archiver_candidates: &["x86_64-w64-mingw32-ar", "i686-w64-mingw32-ar"],
            linker_candidates: &["x86_64-w64-mingw32-ld"],
            disassembler_candidates: &["x86_64-w64-mingw32-objdump"],
        }),
        "mingw-llvm" => Some(ToolchainPreset {
            family: CompilerFamily::MingwLlvm,
            cpp_candidates: &["clang++"],
            c_candidates: &["clang"],
            archiver_candidates: &["llvm-ar"],
            linker_candidates: &["lld-link"],
            disassembler_candidates: &["llvm-objdump"],
        }),
        "intel-classic" => Some(ToolchainPreset {
            family: CompilerFamily::IntelClassic,
            cpp_candidates: &["icpc"],
            c_candidates: &["icc"],
            archiver_candidates: &["ar", "xiar"],
            linker_candidates: &["ld"],
            disassembler_candidates: &["objdump"],
        }),
        "intel-llvm" => Some(ToolchainPreset {
            family: CompilerFamily::IntelLlvm,
            cpp_candidates: &["icpx"],
            c_candidates: &["icx"],
            archiver_candidates: &["llvm-ar", "ar"],
            linker_candidates: &["lld"],
            disassembler_candidates: &["llvm-objdump"],
        }),
        "emscripten" => Some(ToolchainPreset {
            family: CompilerFamily::Emscripten,
            cpp_candidates: &["em++"],
            c_candidates: &["emcc"],
            archiver_candidates: &["emar"],
            linker_candidates: &["emcc"],
            disassembler_candidates: &["llvm-objdump"],
        }),
        _ if name.starts_with("vs-") || name.starts_with("llvm-vs-") || name.starts_with("intel-llvm-vs-") => {
            let family = if name.starts_with("llvm-vs-") {
                CompilerFamily::Msvc // clang-cl driven through the MSVC environment; see §4.D
            } else if name.starts_with("intel-llvm-vs-") {
                CompilerFamily::IntelLlvm
            } else {
                CompilerFamily::Msvc
            };
            Some(ToolchainPreset {
                family,
                cpp_candidates: &["cl.exe"],
                c_candidates: &["cl.exe"],
                archiver_candidates: &["lib.exe"],
                linker_candidates: &["link.exe"],
                disassembler_candidates: &["dumpbin.exe"],
            })
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_presets_resolve() {
        assert_eq!(lookup("gcc").unwrap().family, CompilerFamily::Gnu);
        assert_eq!(lookup("llvm").unwrap().family, CompilerFamily::Llvm);
        assert_eq!(lookup("vs-2022").unwrap().family, CompilerFamily::Msvc);
        assert_eq!(lookup("llvm-vs-stable").unwrap().family, CompilerFamily::Msvc);
    }

    #[test]
    fn unknown_preset_falls_through() {
        assert!(lookup("totally-custom").is_none());
    }
}
