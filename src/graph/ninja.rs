//! Ninja strategy (§4.H "Ninja"): emit a `build.ninja` expressing the same DAG, then spawn
//! `ninja -j <maxJobs>` and forward its output.

use std::{fmt::Write as _, path::Path};

use super::{scheduler::SchedulerError, TargetGraphNode};
use crate::fs::{AbortFlag, OutputSink, Subprocess};

/// Renders `nodes` as Ninja `build`/`rule` statements. One rule per node keeps escaping simple:
/// each node's command is already a fully expanded argv (built by the command generator), so the
/// rule body is just `command = $in_argv` with no Ninja variable substitution to get wrong.
pub fn render(nodes: &[TargetGraphNode]) -> String {
    let mut out = String::new();
    writeln!(out, "# generated — do not edit by hand").unwrap();
    writeln!(out, "ninja_required_version = 1.8").unwrap();
    out.push('\n');

    for (i, node) in nodes.iter().enumerate() {
        let rule_name = format!("rule_{i}");
        writeln!(out, "rule {rule_name}").unwrap();
        writeln!(out, "  command = {}", shell_join(&node.command)).unwrap();
        writeln!(out, "  description = {}", node.target_id).unwrap();
        out.push('\n');
    }

    for (i, node) in nodes.iter().enumerate() {
        let rule_name = format!("rule_{i}");
        let outputs = join_paths(&node.outputs);
        let inputs = join_paths(&node.inputs);
        let deps = node.deps.iter().cloned().collect::<Vec<_>>().join(" ");
        write!(out, "build {outputs}: {rule_name} {inputs}").unwrap();
        if !deps.is_empty() {
            write!(out, " || {deps}").unwrap();
        }
        out.push('\n');
    }

    out
}

fn join_paths(paths: &std::collections::BTreeSet<std::path::PathBuf>) -> String {
    paths.iter().map(|p| p.to_string_lossy().replace(' ', "$ ")).collect::<Vec<_>>().join(" ")
}

fn shell_join(argv: &[String]) -> String {
    argv.iter().map(|a| a.replace(' ', "$ ")).collect::<Vec<_>>().join(" ")
}

pub fn write_and_run(nodes: &[TargetGraphNode], ninja_path: &Path, max_jobs: usize, ninja_binary: &Path, abort: &AbortFlag) -> Result<(), SchedulerError> {
    let contents = render(nodes);
    std::fs::write(ninja_path, contents).map_err(|_| SchedulerError::NodesFailed(0))?;

    let sp = Subprocess::new([
        ninja_binary.to_string_lossy().into_owned(),
        "-f".to_string(),
        ninja_path.to_string_lossy().into_owned(),
        "-j".to_string(),
        max_jobs.to_string(),
    ])
    .stdout(OutputSink::Inherit)
    .stderr(OutputSink::Inherit);

    let outcome = sp.spawn(abort).map_err(|_| SchedulerError::NodesFailed(1))?;
    if outcome.cancelled {
        return Err(SchedulerError::Cancelled);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    #[test]
    fn renders_one_rule_and_build_statement_per_node() {
        let node = TargetGraphNode {
            target_id: "app".into(),
            inputs: BTreeSet::from(["src/a.o".into()]),
            outputs: BTreeSet::from(["app".into()]),
            command: vec!["g++".into(), "-o".into(), "app".into(), "src/a.o".into()],
            deps: BTreeSet::new(),
        };
        let rendered = render(&[node]);
        assert!(rendered.contains("rule rule_0"));
        assert!(rendered.contains("build app: rule_0 src/a.o"));
    }
}
