//! The top-level driver (§4.I): sequences configuration resolution → toolchain detection →
//! source cache load → command generation → graph construction/scheduling per [`Route`].
//!
//! Grounded on the teacher's top-level `Project`/`ProjectBuilder` (`lib.rs`), which wires
//! paths → compiler → cache → compile in one call; generalized here into an explicit
//! `Driver::run(route) -> Result<ExitCode, CoreError>` that sequences the core's subsystems per
//! route, with out-of-scope routes represented as stub variants returning
//! `CoreError::Unsupported` rather than silently vanishing from the enum.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};

use crate::cache::{DataKey, SourceCache};
use crate::commandgen::{self, CommandPolicy};
use crate::config::{self, resolver::ResolutionContext, Workspace};
use crate::error::{CoreError, Result};
use crate::fs::AbortFlag;
use crate::graph::{self, scheduler, TargetDependencyGraph, TargetGraphNode};
use crate::toolchain::{self, CompilerFamily, Strategy, Toolchain, ToolchainSettings};

/// §4.I Route dispatch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Route {
    BuildRun,
    Run,
    Build,
    Rebuild,
    Clean,
    Bundle,
    Configure,
    Export,
    Init,
    SettingsGet,
    SettingsSet,
    SettingsUnset,
    SettingsGetKeys,
    Validate,
    Query,
    Convert,
    TerminalTest,
}

impl Route {
    fn traverses_core(&self) -> bool {
        matches!(
            self,
            Route::Configure | Route::Build | Route::Rebuild | Route::Clean | Route::Run | Route::BuildRun
        )
    }
}

/// §6 exit codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    Success = 0,
    BuildFailure = 1,
    ConfigurationError = 2,
    InvocationError = 3,
    Cancelled = 130,
}

impl From<ExitCode> for i32 {
    fn from(value: ExitCode) -> Self {
        value as i32
    }
}

pub struct DriverOptions {
    pub build_file: PathBuf,
    pub output_dir: PathBuf,
    pub toolchain_preference: String,
    pub configuration_name: String,
    pub max_jobs: usize,
    pub keep_going: bool,
    pub run_arguments: Vec<String>,
    /// Forces the build strategy (§4.H `--build-strategy`); `None` lets the detected toolchain's
    /// own default stand.
    pub build_strategy: Option<Strategy>,
}

/// Owns the Workspace/Toolchain for the lifetime of one invocation (§3 "The Toolchain is owned
/// by the top-level driver for the lifetime of a run").
pub struct Driver {
    options: DriverOptions,
    abort: AbortFlag,
}

impl Driver {
    pub fn new(options: DriverOptions, abort: AbortFlag) -> Self {
        Self { options, abort }
    }

    pub fn run(&self, route: Route) -> Result<ExitCode> {
        if !route.traverses_core() {
            return Err(CoreError::Unsupported(unsupported_message(&route)));
        }

        match route {
            Route::Configure => {
                self.configure()?;
                Ok(ExitCode::Success)
            }
            Route::Clean => {
                self.clean()?;
                Ok(ExitCode::Success)
            }
            Route::Build => self.build(),
            Route::Rebuild => {
                self.clean()?;
                self.build()
            }
            Route::Run => self.run_only(),
            Route::BuildRun => {
                let code = self.build()?;
                if code != ExitCode::Success {
                    return Ok(code);
                }
                self.run_only()
            }
            _ => unreachable!("non-core routes handled above"),
        }
    }

    fn resolution_context(&self, toolchain: &Toolchain) -> ResolutionContext {
        ResolutionContext {
            configuration_name: self.options.configuration_name.clone(),
            platform: host_platform_token(),
            toolchain_family: format!("{:?}", toolchain.family).to_lowercase(),
            toolchain_name: toolchain.name.clone(),
            architecture: toolchain.target_arch.clone(),
            target_triple: toolchain.target_triple.clone(),
            external_dir: self.options.output_dir.join("external").to_string_lossy().into_owned(),
            build_dir: self.options.output_dir.to_string_lossy().into_owned(),
            output_dir: self.options.output_dir.to_string_lossy().into_owned(),
            user_tokens: Default::default(),
        }
    }

    fn configure(&self) -> Result<(Workspace, Toolchain)> {
        let mut settings = ToolchainSettings::default();
        settings.requested_strategy = self.options.build_strategy;

        let toolchain = toolchain::detect(
            &self.options.toolchain_preference,
            &settings,
            host_arch(),
            host_arch(),
            &self.abort,
        )?;

        let context = self.resolution_context(&toolchain);
        let workspace = config::load(&self.options.build_file, &context)?;

        let records_dir = self.options.output_dir.join("intermediate").join("externals");
        if let Err(errors) = config::external::materialize_all(
            &workspace.externals,
            &records_dir,
            self.options.max_jobs,
            &self.abort,
        ) {
            return Err(CoreError::ExternalDeps(errors));
        }

        Ok((workspace, toolchain))
    }

    fn build(&self) -> Result<ExitCode> {
        let (workspace, toolchain) = self.configure()?;

        let config = workspace
            .configurations
            .iter()
            .find(|c| c.name == self.options.configuration_name)
            .cloned()
            .ok_or_else(|| CoreError::Invocation(format!("unknown configuration `{}`", self.options.configuration_name)))?;

        let output_subdir = toolchain.output_dir_name(&config.name, &toolchain.target_triple);
        let config_dir = self.options.output_dir.join(output_subdir);
        let cache_path = config_dir.join("cache.json");

        // §4.F cache invalidation: a toolchain version/arch bump or a changed external-dependency
        // set is folded into `extra_hash`, which forces every source to read as dirty regardless
        // of its individual mtime.
        let external_rebuild_flag = crate::utils::fingerprint_hex(&format!("{:?}", workspace.externals));
        let extra_hash = crate::utils::fingerprint_hex(&(
            toolchain.version.to_string(),
            toolchain.target_arch.clone(),
            external_rebuild_flag.clone(),
        ));

        let mut cache = SourceCache::load(&cache_path, "native", &extra_hash).map_err(CoreError::Cache)?;
        let force_dirty = cache.extra_hash_changed(&extra_hash);

        let target_names: HashSet<&str> = workspace.targets.iter().map(|t| t.name.as_str()).collect();
        let mut dep_graph = TargetDependencyGraph::new();
        for target in &workspace.targets {
            // `links`/`staticLinks` entries that don't name another workspace target are raw
            // system/external libraries (e.g. `pthread`), not part of the build-order graph.
            let deps: Vec<String> = target
                .static_links
                .iter()
                .chain(target.links.iter())
                .filter(|name| target_names.contains(name.as_str()))
                .cloned()
                .collect();
            dep_graph.add_target(&target.name, deps);
        }
        let order = dep_graph.topological_order().map_err(CoreError::Graph)?;

        let family_impl = commandgen::family_for(toolchain.family);
        let mut nodes = Vec::new();
        let mut built_outputs: BTreeMap<String, PathBuf> = Default::default();
        for target_name in &order {
            let Some(target) = workspace.targets.iter().find(|t| &t.name == target_name) else { continue };
            let link_libs = transitive_link_inputs(target, &workspace.targets, &built_outputs, toolchain.family);
            let (target_nodes, output) = build_target_nodes(
                target,
                &toolchain,
                &config,
                family_impl.as_ref(),
                &config_dir,
                &mut cache,
                &link_libs,
                force_dirty,
                &external_rebuild_flag,
            );
            built_outputs.insert(target.name.clone(), output);
            nodes.extend(target_nodes);
        }

        let outcome: std::result::Result<(), scheduler::SchedulerError> = match toolchain.strategy {
            Strategy::Native => {
                scheduler::run_native(&nodes, self.options.max_jobs, self.options.keep_going, &self.abort).map(|_| ())
            }
            Strategy::Ninja => {
                let ninja_binary = toolchain.paths.ninja.clone().ok_or_else(|| {
                    CoreError::Invocation("ninja build strategy selected but no `ninja` binary was found".into())
                })?;
                let ninja_path = config_dir.join("build.ninja");
                graph::ninja::write_and_run(&nodes, &ninja_path, self.options.max_jobs, &ninja_binary, &self.abort)
            }
            Strategy::Makefile => {
                let make_binary = toolchain.paths.make.clone().ok_or_else(|| {
                    CoreError::Invocation("makefile build strategy selected but no `make` binary was found".into())
                })?;
                let dialect = graph::makefile::dialect_for(toolchain.family);
                let makefile_name = match dialect {
                    graph::makefile::MakeDialect::Nmake => "Makefile.nmake",
                    graph::makefile::MakeDialect::Gnu => "Makefile",
                };
                let makefile_path = config_dir.join(makefile_name);
                graph::makefile::write_and_run(&nodes, &makefile_path, dialect, &make_binary, self.options.max_jobs, &self.abort)
            }
            Strategy::Msbuild | Strategy::Xcodebuild => {
                return Err(CoreError::Unsupported(
                    "MSBuild/Xcodebuild project generation is an external collaborator, not implemented in the core",
                ));
            }
        };

        match outcome {
            Ok(_) => {
                let now = std::time::SystemTime::now()
                    .duration_since(std::time::SystemTime::UNIX_EPOCH)
                    .map(|d| d.as_secs() as i64)
                    .unwrap_or(0);
                cache.flush(now).map_err(CoreError::Cache)?;
                Ok(ExitCode::Success)
            }
            Err(scheduler::SchedulerError::Cancelled) => Err(CoreError::Cancelled),
            Err(e) => {
                cache.discard();
                tracing::error!(error = %e, "build failed");
                Ok(ExitCode::BuildFailure)
            }
        }
    }

    fn clean(&self) -> Result<()> {
        if self.options.output_dir.exists() {
            crate::fs::remove_tree(&self.options.output_dir).map_err(CoreError::Fs)?;
        }
        Ok(())
    }

    fn run_only(&self) -> Result<ExitCode> {
        let (workspace, toolchain) = self.configure()?;
        let config_dir = self.options.output_dir.join(toolchain.output_dir_name(&self.options.configuration_name, &toolchain.target_triple));
        let run_target = workspace
            .targets
            .iter()
            .find(|t| t.kind == Some(config::TargetKind::Executable))
            .ok_or_else(|| CoreError::Invocation("no executable target to run".into()))?;

        let binary = config_dir.join(&run_target.name);
        let sp = crate::fs::Subprocess::new(
            std::iter::once(binary.to_string_lossy().into_owned()).chain(self.options.run_arguments.iter().cloned()),
        )
        .stdout(crate::fs::OutputSink::Inherit)
        .stderr(crate::fs::OutputSink::Inherit);

        match sp.spawn(&self.abort) {
            Ok(_) => Ok(ExitCode::Success),
            Err(_) => Ok(ExitCode::BuildFailure),
        }
    }
}

fn pch_extension(family: CompilerFamily) -> &'static str {
    if family == CompilerFamily::Msvc { "pch" } else { "gch" }
}

/// Builds the compile/PCH/resource/link graph nodes for one target (§4.G end to end): threads
/// `CommandPolicy`-derived extra_args into every compile/link step, emits PCH and Windows
/// resource nodes when the target asks for them, and wires the source cache's invalidation
/// helpers (`dirty_with_deps`, `data_changed`) rather than a bare mtime check. A free function
/// (not a `Driver` method) since it touches no `Driver` state — this lets integration tests drive
/// the real node-generation path without standing up a whole `Driver`.
pub fn build_target_nodes(
    target: &config::SourceTarget,
    toolchain: &Toolchain,
    configuration: &config::BuildConfiguration,
    family_impl: &dyn commandgen::families::CommandFamily,
    config_dir: &Path,
    cache: &mut SourceCache,
    link_libs: &[String],
    force_dirty: bool,
    external_rebuild_flag: &str,
) -> (Vec<TargetGraphNode>, PathBuf) {
    let mut nodes = Vec::new();

    let policy = CommandPolicy { target, configuration, toolchain };
    let (compile_extra, compile_diagnostics) = commandgen::compile_flags(&policy, toolchain.family);
    for diagnostic in &compile_diagnostics {
        tracing::warn!(target = %target.name, "{diagnostic}");
    }
    let link_extra = commandgen::link_flags(&policy, toolchain.family);

    let version = toolchain.version.to_string();

    let is_source_dirty = |cache: &SourceCache, source: &Path| -> bool {
        let known_deps = cache.recorded_deps(source);
        force_dirty
            || cache.dirty_with_deps(source, &known_deps)
            || cache.data_changed(source, DataKey::Version, &version)
            || cache.data_changed(source, DataKey::Arch, &toolchain.target_arch)
    };

    if let Some(pch) = &target.pch {
        let pch_source = PathBuf::from(pch);
        let pch_object = config_dir.join("pch").join(pch_source.with_extension(pch_extension(toolchain.family)).file_name().unwrap_or_default());
        if is_source_dirty(cache, &pch_source) {
            let language = commandgen::language_from_extension(&pch_source).unwrap_or(config::Language::Cpp);
            let spec = commandgen::CompileSpec {
                source: &pch_source,
                object: &pch_object,
                dep_file_mode: commandgen::dep_file_mode_for(toolchain.family),
                language,
            };
            let cmd = family_impl.pch_compile(toolchain, &spec, &compile_extra);
            nodes.push(TargetGraphNode {
                target_id: format!("{}:pch", target.name),
                inputs: [pch_source.clone()].into_iter().collect(),
                outputs: [pch_object.clone()].into_iter().collect(),
                command: cmd.argv,
                deps: Default::default(),
            });
            let deps = commandgen::parse_gcc_dep_file(&commandgen::dependency_file_name(&pch_object));
            cache.record(&pch_source, Some(&version), Some(&toolchain.target_arch), Some(external_rebuild_flag), deps);
        }
    }

    let mut objects = Vec::new();

    if let Some(resource) = &target.windows_resource {
        let res_source = PathBuf::from(resource);
        let res_object = config_dir.join("obj").join(res_source.with_extension(if toolchain.family == CompilerFamily::Msvc { "res" } else { "o" }).file_name().unwrap_or_default());
        if is_source_dirty(cache, &res_source) {
            let cmd = family_impl.resource_compile(toolchain, &res_source, &res_object);
            nodes.push(TargetGraphNode {
                target_id: format!("{}:resource", target.name),
                inputs: [res_source.clone()].into_iter().collect(),
                outputs: [res_object.clone()].into_iter().collect(),
                command: cmd.argv,
                deps: Default::default(),
            });
            cache.record(&res_source, Some(&version), Some(&toolchain.target_arch), Some(external_rebuild_flag), vec![]);
        }
        objects.push(res_object.to_string_lossy().into_owned());
    }

    let excluded: HashSet<PathBuf> =
        crate::fs::glob(&PathBuf::from("."), &target.exclude_files, crate::fs::GlobMode::Files)
            .unwrap_or_default()
            .into_iter()
            .collect();
    let sources: Vec<PathBuf> = crate::fs::glob(&PathBuf::from("."), &target.files, crate::fs::GlobMode::Files)
        .unwrap_or_default()
        .into_iter()
        .filter(|p| !excluded.contains(p))
        .collect();

    for source in &sources {
        let object = config_dir.join("obj").join(commandgen::object_file_name(source, toolchain.family));
        if is_source_dirty(cache, source) {
            let Ok(language) = commandgen::language_from_extension(source) else { continue };
            let spec = commandgen::CompileSpec {
                source,
                object: &object,
                dep_file_mode: commandgen::dep_file_mode_for(toolchain.family),
                language,
            };
            let cmd = family_impl.compile(toolchain, &spec, &compile_extra);
            nodes.push(TargetGraphNode {
                target_id: format!("{}:{}", target.name, source.display()),
                inputs: [source.clone()].into_iter().collect(),
                outputs: [object.clone()].into_iter().collect(),
                command: cmd.argv,
                deps: Default::default(),
            });
            let deps = commandgen::parse_gcc_dep_file(&commandgen::dependency_file_name(&object));
            cache.record(source, Some(&version), Some(&toolchain.target_arch), Some(external_rebuild_flag), deps);
        }
        objects.push(object.to_string_lossy().into_owned());
    }

    let output = config_dir.join(&target.name);
    let link_inputs = commandgen::order_link_inputs(&objects, link_libs);
    let link_cmd = match target.kind {
        Some(config::TargetKind::StaticLibrary) => family_impl.link_static(toolchain, &output, &objects),
        Some(config::TargetKind::SharedLibrary) => {
            family_impl.link_shared(toolchain, &output, &link_inputs, &link_extra)
        }
        _ => family_impl.link_executable(toolchain, &output, &link_inputs, &link_extra),
    };
    // Ninja/Make need `deps` to be buildable target paths, not target names — flags and bare
    // library names (`-lpthread`, group-wrap markers) carry no path separator and are excluded.
    let link_deps: std::collections::BTreeSet<String> =
        link_libs.iter().filter(|s| s.contains('/') || s.contains('\\')).cloned().collect();
    nodes.push(TargetGraphNode {
        target_id: format!("{}:link", target.name),
        inputs: objects.iter().map(PathBuf::from).chain(link_libs.iter().map(PathBuf::from)).collect(),
        outputs: [output.clone()].into_iter().collect(),
        command: link_cmd.argv,
        deps: link_deps,
    });

    (nodes, output)
}

/// Flattens `target`'s static and dynamic link closure into concrete output paths, direct
/// dependencies first and each transitive dependency appearing once (§4.G "Link ordering":
/// dependents precede their own transitive dependencies so GNU-style linkers, which resolve
/// symbols left to right, can still find them). Only dependencies already built earlier in the
/// topological order (and therefore present in `built_outputs`) contribute a path. Any group of
/// mutually dependent static libraries is wrapped via
/// [`commandgen::families::wrap_circular_static_links`] instead of being emitted individually.
pub fn transitive_link_inputs(
    target: &config::SourceTarget,
    all_targets: &[config::SourceTarget],
    built_outputs: &BTreeMap<String, PathBuf>,
    family: CompilerFamily,
) -> Vec<String> {
    let mut order = Vec::new();
    let mut seen = HashSet::new();
    let mut queue: VecDeque<String> = target.static_links.iter().chain(target.links.iter()).cloned().collect();

    while let Some(name) = queue.pop_front() {
        if !seen.insert(name.clone()) {
            continue;
        }
        order.push(name.clone());
        if let Some(dep_target) = all_targets.iter().find(|t| t.name == name) {
            for transitive in dep_target.static_links.iter().chain(dep_target.links.iter()) {
                if !seen.contains(transitive) {
                    queue.push_back(transitive.clone());
                }
            }
        }
    }

    let groups = circular_static_groups(&order, all_targets);
    let mut emitted: HashSet<String> = HashSet::new();
    let mut result = Vec::new();
    for name in &order {
        if emitted.contains(name) {
            continue;
        }
        if let Some(group) = groups.iter().find(|g| g.contains(name)) {
            let paths: Vec<String> = group
                .iter()
                .filter_map(|member| built_outputs.get(member))
                .map(|p| p.to_string_lossy().into_owned())
                .collect();
            if !paths.is_empty() {
                result.extend(commandgen::families::wrap_circular_static_links(family, &paths));
            }
            for member in group {
                emitted.insert(member.clone());
            }
        } else if let Some(path) = built_outputs.get(name) {
            result.push(path.to_string_lossy().into_owned());
            emitted.insert(name.clone());
        } else if !all_targets.iter().any(|t| &t.name == name) {
            // Not a workspace target at all: a raw system/external library name.
            result.push(raw_library_flag(name, family));
            emitted.insert(name.clone());
        }
    }
    result
}

fn raw_library_flag(name: &str, family: CompilerFamily) -> String {
    if family == CompilerFamily::Msvc {
        if name.ends_with(".lib") { name.to_string() } else { format!("{name}.lib") }
    } else {
        format!("-l{name}")
    }
}

/// Detects groups of targets whose `staticLinks` entries form a mutual cycle (`a -> b -> a`),
/// which the plain topological/link-line ordering above cannot express (§4.G "Link ordering":
/// "a cyclical static-link group must be wrapped ... rather than rejected as an error").
fn circular_static_groups(names: &[String], all_targets: &[config::SourceTarget]) -> Vec<Vec<String>> {
    let reachable = |start: &str| -> HashSet<String> {
        let mut seen = HashSet::new();
        let mut queue = VecDeque::new();
        queue.push_back(start.to_string());
        while let Some(name) = queue.pop_front() {
            if !seen.insert(name.clone()) {
                continue;
            }
            if let Some(t) = all_targets.iter().find(|t| t.name == name) {
                for link in &t.static_links {
                    queue.push_back(link.clone());
                }
            }
        }
        seen.remove(start);
        seen
    };

    let mut groups: Vec<Vec<String>> = Vec::new();
    let mut grouped: HashSet<String> = HashSet::new();
    for name in names {
        if grouped.contains(name) {
            continue;
        }
        let forward = reachable(name);
        let mutuals: Vec<String> = forward.iter().filter(|other| reachable(other).contains(name)).cloned().collect();
        if !mutuals.is_empty() {
            let mut group = vec![name.clone()];
            group.extend(mutuals);
            group.sort();
            group.dedup();
            for member in &group {
                grouped.insert(member.clone());
            }
            groups.push(group);
        }
    }
    groups
}

fn unsupported_message(route: &Route) -> &'static str {
    match route {
        Route::Init => "Init is an external collaborator, not implemented in the core",
        Route::Export => "Export is an external collaborator, not implemented in the core",
        Route::Bundle => "Bundle's packaging step is an external collaborator, not implemented in the core",
        Route::SettingsGet => "SettingsGet is an external collaborator, not implemented in the core",
        Route::SettingsSet => "SettingsSet is an external collaborator, not implemented in the core",
        Route::SettingsUnset => "SettingsUnset is an external collaborator, not implemented in the core",
        Route::SettingsGetKeys => "SettingsGetKeys is an external collaborator, not implemented in the core",
        Route::Validate => "Validate is an external collaborator, not implemented in the core",
        Route::Query => "Query is an external collaborator, not implemented in the core",
        Route::Convert => "Convert is an external collaborator, not implemented in the core",
        Route::TerminalTest => "TerminalTest is an external collaborator, not implemented in the core",
        _ => "route is an external collaborator, not implemented in the core",
    }
}

fn host_platform_token() -> String {
    if cfg!(target_os = "windows") {
        "windows".to_string()
    } else if cfg!(target_os = "macos") {
        "macos".to_string()
    } else {
        "linux".to_string()
    }
}

fn host_arch() -> &'static str {
    std::env::consts::ARCH
}
