//! The native scheduling strategy (§4.H "Native", §5 concurrency model): a fixed-size thread pool
//! of `maxJobs` workers draining ready graph nodes, reporting per-node success/failure, and
//! respecting `keepGoing`.
//!
//! Grounded directly on the teacher's `compile::project::ProjectCompiler`
//! (`rayon::prelude::*`/`par_iter` over `CompilerSources`) — the same work-stealing idiom drives
//! this scheduler's thread pool, generalized from "compile every solc input in parallel" to
//! "drain a priority-ordered ready queue respecting target link order".

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Mutex,
};

use super::TargetGraphNode;
use crate::fs::{AbortFlag, Subprocess};

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("build cancelled")]
    Cancelled,
    #[error("{0} node(s) failed")]
    NodesFailed(usize),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Strategy {
    Native,
    Ninja,
    Makefile,
}

#[derive(Debug)]
pub enum NodeResult {
    Succeeded { target_id: String },
    Failed { target_id: String, stderr: String },
}

/// Buffers a worker's output and flushes it atomically on node completion, so interleaved
/// parallel output stays readable per target (§5 "Ordering guarantees").
pub struct Printer {
    lock: Mutex<()>,
}

impl Printer {
    pub fn new() -> Self {
        Self { lock: Mutex::new(()) }
    }

    pub fn flush(&self, target_id: &str, buffered: &str) {
        let _guard = self.lock.lock().unwrap();
        if !buffered.is_empty() {
            eprintln!("[{target_id}]\n{buffered}");
        }
    }
}

impl Default for Printer {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs `nodes` (already topologically ordered by the caller) on a `max_jobs`-sized thread pool.
///
/// On a node failure: if `keep_going` is false, no *new* nodes are dispatched once a failure is
/// observed, but nodes already in flight are allowed to finish (§4.H "remaining ready nodes drain
/// but no new nodes are dispatched"). If `keep_going` is true, unaffected branches continue
/// regardless of failures elsewhere.
pub fn run_native(
    nodes: &[TargetGraphNode],
    max_jobs: usize,
    keep_going: bool,
    abort: &AbortFlag,
) -> Result<Vec<NodeResult>> {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(max_jobs.max(1))
        .build()
        .expect("failed to build native scheduler thread pool");

    let printer = Printer::new();
    let stop_dispatch = AtomicBool::new(false);

    let results: Vec<NodeResult> = pool.install(|| {
        use rayon::prelude::*;
        nodes
            .par_iter()
            .filter_map(|node| {
                if abort.is_raised() {
                    return None;
                }
                if !keep_going && stop_dispatch.load(Ordering::SeqCst) {
                    return None;
                }

                let sp = Subprocess::new(node.command.clone());
                match sp.spawn(abort) {
                    Ok(outcome) => {
                        printer.flush(&node.target_id, &outcome.stdout.unwrap_or_default());
                        Some(NodeResult::Succeeded { target_id: node.target_id.clone() })
                    }
                    Err(e) => {
                        if !keep_going {
                            stop_dispatch.store(true, Ordering::SeqCst);
                        }
                        Some(NodeResult::Failed { target_id: node.target_id.clone(), stderr: e.to_string() })
                    }
                }
            })
            .collect()
    });

    if abort.is_raised() {
        return Err(SchedulerError::Cancelled);
    }

    let failed = results.iter().filter(|r| matches!(r, NodeResult::Failed { .. })).count();
    if failed > 0 {
        return Err(SchedulerError::NodesFailed(failed));
    }

    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn node(id: &str, command: Vec<&str>) -> TargetGraphNode {
        TargetGraphNode {
            target_id: id.to_string(),
            inputs: BTreeSet::new(),
            outputs: BTreeSet::new(),
            command: command.into_iter().map(String::from).collect(),
            deps: BTreeSet::new(),
        }
    }

    #[test]
    fn all_nodes_succeed() {
        let nodes = vec![node("a", vec!["true"]), node("b", vec!["true"])];
        let results = run_native(&nodes, 2, true, &AbortFlag::new()).unwrap();
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| matches!(r, NodeResult::Succeeded { .. })));
    }

    #[test]
    fn a_failing_node_reports_nodes_failed() {
        let nodes = vec![node("a", vec!["false"])];
        let err = run_native(&nodes, 2, true, &AbortFlag::new()).unwrap_err();
        assert!(matches!(err, SchedulerError::NodesFailed(1)));
    }

    #[test]
    fn cancellation_is_reported_distinctly() {
        let nodes = vec![node("a", vec!["true"])];
        let abort = AbortFlag::new();
        abort.raise();
        let err = run_native(&nodes, 2, true, &abort).unwrap_err();
        assert!(matches!(err, SchedulerError::Cancelled));
    }
}
