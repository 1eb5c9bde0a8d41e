//! Per-compiler-family command builders (§4.G). One `CommandFamily` impl per family, mirroring
//! the teacher's per-family `SolcCompiler`/`VyperCompiler` split under one shared `Compiler`
//! trait, and the sccache `CCompilerImpl` per-kind split (GCC/Clang/MSVC) from the other-examples
//! pack.

use std::path::Path;

use crate::toolchain::Toolchain;

use super::{CompileSpec, DepFileMode, GeneratedCommand};

pub trait CommandFamily: Send + Sync {
    fn compile(&self, toolchain: &Toolchain, spec: &CompileSpec, extra_args: &[String]) -> GeneratedCommand;
    fn pch_compile(&self, toolchain: &Toolchain, spec: &CompileSpec, extra_args: &[String]) -> GeneratedCommand;
    fn resource_compile(&self, toolchain: &Toolchain, src: &Path, obj: &Path) -> GeneratedCommand;
    fn link_executable(&self, toolchain: &Toolchain, output: &Path, inputs: &[String], extra_args: &[String]) -> GeneratedCommand;
    fn link_shared(&self, toolchain: &Toolchain, output: &Path, inputs: &[String], extra_args: &[String]) -> GeneratedCommand;
    fn link_static(&self, toolchain: &Toolchain, output: &Path, inputs: &[String]) -> GeneratedCommand;
    fn dump_assembly(&self, toolchain: &Toolchain, obj: &Path, asm: &Path) -> GeneratedCommand;
}

fn compiler_path(toolchain: &Toolchain) -> String {
    toolchain
        .paths
        .compiler_cpp
        .as_ref()
        .or(toolchain.paths.compiler_c.as_ref())
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn archiver_path(toolchain: &Toolchain) -> String {
    toolchain.paths.archiver.as_ref().map(|p| p.to_string_lossy().into_owned()).unwrap_or_else(|| "ar".into())
}

fn linker_path(toolchain: &Toolchain) -> String {
    toolchain
        .paths
        .linker
        .as_ref()
        .or(toolchain.paths.compiler_cpp.as_ref())
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Shared GNU/LLVM/MinGW/Emscripten/Intel-classic-and-LLVM implementation body: the `-c`/`-o`
/// compile shape and `-MMD -MF` dependency generation are identical across these families, which
/// only differ in their default flag vocabulary (handled upstream by [`super::WarningPreset`]).
fn gcc_style_compile(toolchain: &Toolchain, spec: &CompileSpec, extra_args: &[String]) -> GeneratedCommand {
    let mut argv = vec![compiler_path(toolchain), "-c".to_string(), spec.source.to_string_lossy().into_owned(), "-o".to_string(), spec.object.to_string_lossy().into_owned()];
    if spec.dep_file_mode == DepFileMode::GccStyle {
        argv.push("-MMD".to_string());
        argv.push("-MF".to_string());
        argv.push(super::dependency_file_name(spec.object).to_string_lossy().into_owned());
    }
    argv.extend(extra_args.iter().cloned());
    GeneratedCommand { argv, dep_file_mode: spec.dep_file_mode, warnings: vec![] }
}

fn gcc_style_link_executable(toolchain: &Toolchain, output: &Path, inputs: &[String], extra_args: &[String]) -> GeneratedCommand {
    let mut argv = vec![linker_path(toolchain)];
    argv.extend(inputs.iter().cloned());
    argv.push("-o".to_string());
    argv.push(output.to_string_lossy().into_owned());
    argv.extend(extra_args.iter().cloned());
    GeneratedCommand { argv, dep_file_mode: DepFileMode::None, warnings: vec![] }
}

fn gcc_style_link_shared(toolchain: &Toolchain, output: &Path, inputs: &[String], extra_args: &[String]) -> GeneratedCommand {
    let mut cmd = gcc_style_link_executable(toolchain, output, inputs, extra_args);
    cmd.argv.insert(1, "-shared".to_string());
    cmd
}

fn gcc_style_link_static(toolchain: &Toolchain, output: &Path, inputs: &[String]) -> GeneratedCommand {
    let mut argv = vec![archiver_path(toolchain), "rcs".to_string(), output.to_string_lossy().into_owned()];
    argv.extend(inputs.iter().cloned());
    GeneratedCommand { argv, dep_file_mode: DepFileMode::None, warnings: vec![] }
}

fn gcc_style_dump_assembly(toolchain: &Toolchain, obj: &Path, asm: &Path) -> GeneratedCommand {
    let disassembler = toolchain.paths.disassembler.as_ref().map(|p| p.to_string_lossy().into_owned()).unwrap_or_else(|| "objdump".into());
    GeneratedCommand {
        argv: vec![disassembler, "-d".to_string(), obj.to_string_lossy().into_owned(), "-o".to_string(), asm.to_string_lossy().into_owned()],
        dep_file_mode: DepFileMode::None,
        warnings: vec![],
    }
}

pub struct GnuFamily;

impl CommandFamily for GnuFamily {
    fn compile(&self, toolchain: &Toolchain, spec: &CompileSpec, extra_args: &[String]) -> GeneratedCommand {
        gcc_style_compile(toolchain, spec, extra_args)
    }
    fn pch_compile(&self, toolchain: &Toolchain, spec: &CompileSpec, extra_args: &[String]) -> GeneratedCommand {
        gcc_style_compile(toolchain, spec, extra_args)
    }
    fn resource_compile(&self, _toolchain: &Toolchain, src: &Path, obj: &Path) -> GeneratedCommand {
        // GNU toolchains resource-compile via `windres` on MinGW hosts only; elsewhere this step
        // is simply not reached (Windows resources are a Windows-only SourceTarget attribute).
        GeneratedCommand {
            argv: vec!["windres".to_string(), src.to_string_lossy().into_owned(), "-O".to_string(), "coff".to_string(), "-o".to_string(), obj.to_string_lossy().into_owned()],
            dep_file_mode: DepFileMode::None,
            warnings: vec![],
        }
    }
    fn link_executable(&self, toolchain: &Toolchain, output: &Path, inputs: &[String], extra_args: &[String]) -> GeneratedCommand {
        gcc_style_link_executable(toolchain, output, inputs, extra_args)
    }
    fn link_shared(&self, toolchain: &Toolchain, output: &Path, inputs: &[String], extra_args: &[String]) -> GeneratedCommand {
        gcc_style_link_shared(toolchain, output, inputs, extra_args)
    }
    fn link_static(&self, toolchain: &Toolchain, output: &Path, inputs: &[String]) -> GeneratedCommand {
        gcc_style_link_static(toolchain, output, inputs)
    }
    fn dump_assembly(&self, toolchain: &Toolchain, obj: &Path, asm: &Path) -> GeneratedCommand {
        gcc_style_dump_assembly(toolchain, obj, asm)
    }
}

pub struct LlvmFamily;

impl CommandFamily for LlvmFamily {
    fn compile(&self, toolchain: &Toolchain, spec: &CompileSpec, extra_args: &[String]) -> GeneratedCommand {
        gcc_style_compile(toolchain, spec, extra_args)
    }
    fn pch_compile(&self, toolchain: &Toolchain, spec: &CompileSpec, extra_args: &[String]) -> GeneratedCommand {
        let mut cmd = gcc_style_compile(toolchain, spec, extra_args);
        cmd.argv.push("-x".to_string());
        cmd.argv.push("c++-header".to_string());
        cmd
    }
    fn resource_compile(&self, _toolchain: &Toolchain, src: &Path, obj: &Path) -> GeneratedCommand {
        GeneratedCommand {
            argv: vec!["llvm-rc".to_string(), src.to_string_lossy().into_owned(), "/FO".to_string(), obj.to_string_lossy().into_owned()],
            dep_file_mode: DepFileMode::None,
            warnings: vec![],
        }
    }
    fn link_executable(&self, toolchain: &Toolchain, output: &Path, inputs: &[String], extra_args: &[String]) -> GeneratedCommand {
        gcc_style_link_executable(toolchain, output, inputs, extra_args)
    }
    fn link_shared(&self, toolchain: &Toolchain, output: &Path, inputs: &[String], extra_args: &[String]) -> GeneratedCommand {
        gcc_style_link_shared(toolchain, output, inputs, extra_args)
    }
    fn link_static(&self, toolchain: &Toolchain, output: &Path, inputs: &[String]) -> GeneratedCommand {
        gcc_style_link_static(toolchain, output, inputs)
    }
    fn dump_assembly(&self, toolchain: &Toolchain, obj: &Path, asm: &Path) -> GeneratedCommand {
        gcc_style_dump_assembly(toolchain, obj, asm)
    }
}

pub struct IntelFamily;

impl CommandFamily for IntelFamily {
    fn compile(&self, toolchain: &Toolchain, spec: &CompileSpec, extra_args: &[String]) -> GeneratedCommand {
        gcc_style_compile(toolchain, spec, extra_args)
    }
    fn pch_compile(&self, toolchain: &Toolchain, spec: &CompileSpec, extra_args: &[String]) -> GeneratedCommand {
        gcc_style_compile(toolchain, spec, extra_args)
    }
    fn resource_compile(&self, toolchain: &Toolchain, src: &Path, obj: &Path) -> GeneratedCommand {
        GnuFamily.resource_compile(toolchain, src, obj)
    }
    fn link_executable(&self, toolchain: &Toolchain, output: &Path, inputs: &[String], extra_args: &[String]) -> GeneratedCommand {
        gcc_style_link_executable(toolchain, output, inputs, extra_args)
    }
    fn link_shared(&self, toolchain: &Toolchain, output: &Path, inputs: &[String], extra_args: &[String]) -> GeneratedCommand {
        gcc_style_link_shared(toolchain, output, inputs, extra_args)
    }
    fn link_static(&self, toolchain: &Toolchain, output: &Path, inputs: &[String]) -> GeneratedCommand {
        gcc_style_link_static(toolchain, output, inputs)
    }
    fn dump_assembly(&self, toolchain: &Toolchain, obj: &Path, asm: &Path) -> GeneratedCommand {
        gcc_style_dump_assembly(toolchain, obj, asm)
    }
}

pub struct EmscriptenFamily;

impl CommandFamily for EmscriptenFamily {
    fn compile(&self, toolchain: &Toolchain, spec: &CompileSpec, extra_args: &[String]) -> GeneratedCommand {
        gcc_style_compile(toolchain, spec, extra_args)
    }
    fn pch_compile(&self, toolchain: &Toolchain, spec: &CompileSpec, extra_args: &[String]) -> GeneratedCommand {
        gcc_style_compile(toolchain, spec, extra_args)
    }
    fn resource_compile(&self, _toolchain: &Toolchain, _src: &Path, obj: &Path) -> GeneratedCommand {
        // wasm targets have no Windows resource concept; represented as a no-op copy-through.
        GeneratedCommand { argv: vec!["true".to_string(), obj.to_string_lossy().into_owned()], dep_file_mode: DepFileMode::None, warnings: vec![] }
    }
    fn link_executable(&self, toolchain: &Toolchain, output: &Path, inputs: &[String], extra_args: &[String]) -> GeneratedCommand {
        let output = output.with_extension("js");
        gcc_style_link_executable(toolchain, &output, inputs, extra_args)
    }
    fn link_shared(&self, toolchain: &Toolchain, output: &Path, inputs: &[String], extra_args: &[String]) -> GeneratedCommand {
        gcc_style_link_shared(toolchain, output, inputs, extra_args)
    }
    fn link_static(&self, toolchain: &Toolchain, output: &Path, inputs: &[String]) -> GeneratedCommand {
        gcc_style_link_static(toolchain, output, inputs)
    }
    fn dump_assembly(&self, toolchain: &Toolchain, obj: &Path, asm: &Path) -> GeneratedCommand {
        gcc_style_dump_assembly(toolchain, obj, asm)
    }
}

pub struct MsvcFamily;

impl CommandFamily for MsvcFamily {
    fn compile(&self, toolchain: &Toolchain, spec: &CompileSpec, extra_args: &[String]) -> GeneratedCommand {
        let mut argv = vec![
            compiler_path(toolchain),
            "/c".to_string(),
            "/nologo".to_string(),
            spec.source.to_string_lossy().into_owned(),
            format!("/Fo{}", spec.object.to_string_lossy()),
        ];
        if spec.dep_file_mode == DepFileMode::MsvcShowIncludes {
            argv.push("/showIncludes".to_string());
        }
        argv.extend(extra_args.iter().cloned());
        GeneratedCommand { argv, dep_file_mode: spec.dep_file_mode, warnings: vec![] }
    }

    fn pch_compile(&self, toolchain: &Toolchain, spec: &CompileSpec, extra_args: &[String]) -> GeneratedCommand {
        let mut cmd = self.compile(toolchain, spec, extra_args);
        cmd.argv.push("/Yc".to_string());
        cmd
    }

    fn resource_compile(&self, _toolchain: &Toolchain, src: &Path, obj: &Path) -> GeneratedCommand {
        GeneratedCommand {
            argv: vec!["rc.exe".to_string(), "/nologo".to_string(), "/fo".to_string(), obj.to_string_lossy().into_owned(), src.to_string_lossy().into_owned()],
            dep_file_mode: DepFileMode::None,
            warnings: vec![],
        }
    }

    fn link_executable(&self, toolchain: &Toolchain, output: &Path, inputs: &[String], extra_args: &[String]) -> GeneratedCommand {
        let mut argv = vec![linker_path(toolchain), "/nologo".to_string()];
        argv.extend(inputs.iter().cloned());
        argv.push(format!("/OUT:{}", output.to_string_lossy()));
        argv.extend(extra_args.iter().cloned());
        GeneratedCommand { argv, dep_file_mode: DepFileMode::None, warnings: vec![] }
    }

    fn link_shared(&self, toolchain: &Toolchain, output: &Path, inputs: &[String], extra_args: &[String]) -> GeneratedCommand {
        let mut cmd = self.link_executable(toolchain, output, inputs, extra_args);
        cmd.argv.push("/DLL".to_string());
        cmd
    }

    fn link_static(&self, toolchain: &Toolchain, output: &Path, inputs: &[String]) -> GeneratedCommand {
        let mut argv = vec![archiver_path(toolchain), "/nologo".to_string()];
        argv.extend(inputs.iter().cloned());
        argv.push(format!("/OUT:{}", output.to_string_lossy()));
        GeneratedCommand { argv, dep_file_mode: DepFileMode::None, warnings: vec![] }
    }

    fn dump_assembly(&self, toolchain: &Toolchain, obj: &Path, asm: &Path) -> GeneratedCommand {
        let disassembler = toolchain.paths.disassembler.as_ref().map(|p| p.to_string_lossy().into_owned()).unwrap_or_else(|| "dumpbin.exe".into());
        GeneratedCommand {
            argv: vec![disassembler, "/DISASM".to_string(), obj.to_string_lossy().into_owned(), format!("/OUT:{}", asm.to_string_lossy())],
            dep_file_mode: DepFileMode::None,
            warnings: vec![],
        }
    }
}

/// MSVC circular static-link groups repeat the library on the command line (no `--start-group`
/// concept); GNU/LLVM wrap them in `--start-group`/`--end-group` (§4.G "Link ordering").
pub fn wrap_circular_static_links(family: crate::toolchain::CompilerFamily, group: &[String]) -> Vec<String> {
    match family {
        crate::toolchain::CompilerFamily::Msvc => {
            let mut out = group.to_vec();
            out.extend(group.iter().cloned());
            out
        }
        _ => {
            let mut out = vec!["-Wl,--start-group".to_string()];
            out.extend(group.iter().cloned());
            out.push("-Wl,--end-group".to_string());
            out
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commandgen::CompileSpec;
    use crate::config::Language;
    use crate::toolchain::{BuildPathStyle, Strategy, ToolPaths};
    use std::collections::HashSet;

    fn dummy_toolchain(family: crate::toolchain::CompilerFamily) -> Toolchain {
        Toolchain {
            name: "test".into(),
            version: semver::Version::new(1, 0, 0),
            strategy: Strategy::Native,
            build_path_style: BuildPathStyle::TargetTriple,
            paths: ToolPaths { compiler_cpp: Some("/usr/bin/g++".into()), ..Default::default() },
            family,
            host_arch: "x86_64".into(),
            target_arch: "x86_64".into(),
            target_triple: "x86_64-unknown-linux-gnu".into(),
            supported_flags: HashSet::new(),
            system_search_paths: vec![],
        }
    }

    #[test]
    fn gnu_compile_includes_dep_flags() {
        let toolchain = dummy_toolchain(crate::toolchain::CompilerFamily::Gnu);
        let spec = CompileSpec {
            source: Path::new("src/a.cpp"),
            object: Path::new("obj/a.o"),
            dep_file_mode: DepFileMode::GccStyle,
            language: Language::Cpp,
        };
        let cmd = GnuFamily.compile(&toolchain, &spec, &[]);
        assert!(cmd.argv.contains(&"-MMD".to_string()));
    }

    #[test]
    fn circular_static_links_wrap_in_start_end_group_for_gnu() {
        let wrapped = wrap_circular_static_links(crate::toolchain::CompilerFamily::Gnu, &["liba.a".into(), "libb.a".into()]);
        assert_eq!(wrapped.first().unwrap(), "-Wl,--start-group");
        assert_eq!(wrapped.last().unwrap(), "-Wl,--end-group");
    }

    #[test]
    fn circular_static_links_repeat_for_msvc() {
        let wrapped = wrap_circular_static_links(crate::toolchain::CompilerFamily::Msvc, &["a.lib".into()]);
        assert_eq!(wrapped, vec!["a.lib".to_string(), "a.lib".to_string()]);
    }
}
