//! Makefile strategy (§4.H "Makefile"): emit a GNU Makefile (or NMake/Jom variant for MSVC) and
//! spawn the selected make, with proper tab/escape conventions for recipe lines.

use std::{fmt::Write as _, path::Path};

use super::{scheduler::SchedulerError, TargetGraphNode};
use crate::fs::{AbortFlag, OutputSink, Subprocess};
use crate::toolchain::CompilerFamily;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MakeDialect {
    Gnu,
    Nmake,
}

pub fn dialect_for(family: CompilerFamily) -> MakeDialect {
    if family == CompilerFamily::Msvc {
        MakeDialect::Nmake
    } else {
        MakeDialect::Gnu
    }
}

/// Recipe lines in a Makefile must be indented with a literal tab; the GNU and NMake dialects
/// agree on that convention, so a single renderer serves both, differing only in the `.PHONY`
/// pragma NMake lacks.
pub fn render(nodes: &[TargetGraphNode], dialect: MakeDialect) -> String {
    let mut out = String::new();
    writeln!(out, "# generated — do not edit by hand").unwrap();

    let all_outputs: Vec<String> =
        nodes.iter().flat_map(|n| n.outputs.iter().map(|p| p.to_string_lossy().into_owned())).collect();
    writeln!(out, "all: {}", all_outputs.join(" ")).unwrap();
    if dialect == MakeDialect::Gnu {
        writeln!(out, ".PHONY: all").unwrap();
    }
    out.push('\n');

    for node in nodes {
        let outputs = node.outputs.iter().map(|p| p.to_string_lossy().into_owned()).collect::<Vec<_>>().join(" ");
        let inputs = node.inputs.iter().map(|p| p.to_string_lossy().into_owned()).collect::<Vec<_>>().join(" ");
        let deps = node.deps.iter().cloned().collect::<Vec<_>>().join(" ");
        writeln!(out, "{outputs}: {inputs} {deps}").unwrap();
        writeln!(out, "\t{}", node.command.join(" ")).unwrap();
        out.push('\n');
    }

    out
}

pub fn write_and_run(
    nodes: &[TargetGraphNode],
    makefile_path: &Path,
    dialect: MakeDialect,
    make_binary: &Path,
    max_jobs: usize,
    abort: &AbortFlag,
) -> Result<(), SchedulerError> {
    let contents = render(nodes, dialect);
    std::fs::write(makefile_path, contents).map_err(|_| SchedulerError::NodesFailed(0))?;

    let jobs_flag = match dialect {
        MakeDialect::Gnu => format!("-j{max_jobs}"),
        MakeDialect::Nmake => "/NOLOGO".to_string(),
    };

    let sp = Subprocess::new([
        make_binary.to_string_lossy().into_owned(),
        "-f".to_string(),
        makefile_path.to_string_lossy().into_owned(),
        jobs_flag,
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
    fn recipe_lines_are_tab_indented() {
        let node = TargetGraphNode {
            target_id: "app".into(),
            inputs: BTreeSet::from(["src/a.o".into()]),
            outputs: BTreeSet::from(["app".into()]),
            command: vec!["g++".into(), "-o".into(), "app".into(), "src/a.o".into()],
            deps: BTreeSet::new(),
        };
        let rendered = render(&[node], MakeDialect::Gnu);
        assert!(rendered.lines().any(|l| l.starts_with('\t')));
    }

    #[test]
    fn nmake_dialect_omits_phony_pragma() {
        let rendered = render(&[], MakeDialect::Nmake);
        assert!(!rendered.contains(".PHONY"));
    }
}
