//! Subprocess spawning with piped stdio and cooperative cancellation (§4.A, §5).
//!
//! Every external tool invocation in the core — compiler, linker, vendor activation script,
//! `git`, `ninja`, `make` — goes through [`Subprocess`]. Stdout and stderr are drained
//! concurrently on two reader threads so a child that fills one OS pipe buffer cannot deadlock
//! the parent (§5 "Suspension points").

use std::{
    io::Read,
    path::{Path, PathBuf},
    process::{Child, Command, ExitStatus, Stdio},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("failed to spawn `{program}`: {source}")]
    SpawnFailed {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("`{program}` exited with {status}\n{stderr}")]
    NonZeroExit { program: String, status: ExitStatus, stderr: String },
    #[error("`{program}` terminated abnormally (no exit code)")]
    AbnormalTermination { program: String },
}

/// Where a subprocess's stdout/stderr should go.
#[derive(Clone, Debug)]
pub enum OutputSink {
    /// Captured to a `String`, returned to the caller.
    Capture,
    /// Inherited from the parent process (written straight to the terminal).
    Inherit,
    /// Redirected to a file on disk (used for Ninja/Make build logs).
    File(PathBuf),
}

#[derive(Debug, Default)]
pub struct SpawnOutcome {
    pub status: Option<ExitStatus>,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
    pub cancelled: bool,
}

/// Process-wide cancellation flag raised by the signal handler (§5).
///
/// A single `AtomicBool` shared by every in-flight [`Subprocess`]. Workers check it after each
/// subprocess returns and between queue dequeues; [`Subprocess::spawn`] itself polls it while
/// waiting on the child so a raised flag interrupts an in-progress compile/link step rather than
/// only gating the *next* one.
#[derive(Clone, Default)]
pub struct AbortFlag(Arc<AtomicBool>);

impl AbortFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct Subprocess {
    argv: Vec<String>,
    cwd: Option<PathBuf>,
    env: Vec<(String, String)>,
    clear_env: bool,
    stdout: OutputSink,
    stderr: OutputSink,
}

impl Subprocess {
    pub fn new(argv: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            argv: argv.into_iter().map(Into::into).collect(),
            cwd: None,
            env: Vec::new(),
            clear_env: false,
            stdout: OutputSink::Capture,
            stderr: OutputSink::Capture,
        }
    }

    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn envs(mut self, vars: impl IntoIterator<Item = (String, String)>) -> Self {
        self.env.extend(vars);
        self
    }

    /// Start from an empty environment instead of inheriting the parent's — used when replaying
    /// a previously captured environment delta (§4.C) so stale ambient state can't leak in.
    pub fn clear_env(mut self) -> Self {
        self.clear_env = true;
        self
    }

    pub fn stdout(mut self, sink: OutputSink) -> Self {
        self.stdout = sink;
        self
    }

    pub fn stderr(mut self, sink: OutputSink) -> Self {
        self.stderr = sink;
        self
    }

    /// Spawns the process, draining stdout/stderr concurrently, and blocks until it exits, the
    /// abort flag is raised, or both.
    ///
    /// On abort: SIGTERM (POSIX) / `GenerateConsoleCtrlEvent(CTRL_BREAK_EVENT)` (Windows) is sent
    /// to the child, the caller waits up to two seconds, then the child is killed outright.
    pub fn spawn(&self, abort: &AbortFlag) -> Result<SpawnOutcome, ProcessError> {
        let program = self.argv.first().cloned().unwrap_or_default();
        let mut cmd = Command::new(&program);
        cmd.args(&self.argv[1..]);
        if let Some(cwd) = &self.cwd {
            cmd.current_dir(cwd);
        }
        if self.clear_env {
            cmd.env_clear();
        }
        for (k, v) in &self.env {
            cmd.env(k, v);
        }

        cmd.stdin(Stdio::null());
        cmd.stdout(sink_stdio(&self.stdout));
        cmd.stderr(sink_stdio(&self.stderr));

        let mut child = cmd.spawn().map_err(|source| ProcessError::SpawnFailed {
            program: program.clone(),
            source,
        })?;

        let stdout_reader = spawn_reader(child.stdout.take());
        let stderr_reader = spawn_reader(child.stderr.take());

        let status = wait_with_cancellation(&mut child, abort);

        let stdout = join_reader(stdout_reader, &self.stdout);
        let stderr = join_reader(stderr_reader, &self.stderr);

        match status {
            WaitResult::Cancelled => Ok(SpawnOutcome { status: None, stdout, stderr, cancelled: true }),
            WaitResult::Exited(status) => {
                if status.success() {
                    Ok(SpawnOutcome { status: Some(status), stdout, stderr, cancelled: false })
                } else {
                    Err(ProcessError::NonZeroExit {
                        program,
                        status,
                        stderr: stderr.unwrap_or_default(),
                    })
                }
            }
            WaitResult::Abnormal => Err(ProcessError::AbnormalTermination { program }),
        }
    }
}

fn sink_stdio(sink: &OutputSink) -> Stdio {
    match sink {
        OutputSink::Capture => Stdio::piped(),
        OutputSink::Inherit => Stdio::inherit(),
        OutputSink::File(path) => std::fs::File::create(path)
            .map(Stdio::from)
            .unwrap_or_else(|_| Stdio::null()),
    }
}

fn spawn_reader(pipe: Option<impl Read + Send + 'static>) -> Option<thread::JoinHandle<String>> {
    pipe.map(|mut pipe| {
        thread::spawn(move || {
            let mut buf = String::new();
            let _ = pipe.read_to_string(&mut buf);
            buf
        })
    })
}

fn join_reader(handle: Option<thread::JoinHandle<String>>, sink: &OutputSink) -> Option<String> {
    match (handle, sink) {
        (Some(h), OutputSink::Capture) => h.join().ok(),
        (Some(h), _) => {
            let _ = h.join();
            None
        }
        (None, _) => None,
    }
}

enum WaitResult {
    Exited(ExitStatus),
    Abnormal,
    Cancelled,
}

fn wait_with_cancellation(child: &mut Child, abort: &AbortFlag) -> WaitResult {
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return WaitResult::Exited(status),
            Ok(None) => {
                if abort.is_raised() {
                    terminate_then_kill(child);
                    return WaitResult::Cancelled;
                }
                thread::sleep(Duration::from_millis(15));
            }
            Err(_) => return WaitResult::Abnormal,
        }
    }
}

/// Sends a polite termination signal, waits up to two seconds, then force-kills (§5).
fn terminate_then_kill(child: &mut Child) {
    send_terminate(child);
    let deadline = std::time::Instant::now() + Duration::from_secs(2);
    while std::time::Instant::now() < deadline {
        if matches!(child.try_wait(), Ok(Some(_))) {
            return;
        }
        thread::sleep(Duration::from_millis(25));
    }
    let _ = child.kill();
    let _ = child.wait();
}

#[cfg(unix)]
fn send_terminate(child: &Child) {
    unsafe {
        libc::kill(child.id() as libc::pid_t, libc::SIGTERM);
    }
}

#[cfg(windows)]
fn send_terminate(child: &mut Child) {
    // Best-effort: Windows has no signal-based graceful terminate for an arbitrary child without
    // it opting into CTRL_BREAK via CREATE_NEW_PROCESS_GROUP; fall back to an immediate kill.
    let _ = child.kill();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn captures_stdout() {
        let sp = Subprocess::new(["echo", "hello"]);
        let outcome = sp.spawn(&AbortFlag::new()).unwrap();
        assert_eq!(outcome.stdout.unwrap().trim(), "hello");
    }

    #[test]
    fn non_zero_exit_is_an_error() {
        let sp = Subprocess::new(["false"]);
        let err = sp.spawn(&AbortFlag::new()).unwrap_err();
        assert!(matches!(err, ProcessError::NonZeroExit { .. }));
    }

    #[test]
    fn spawn_failure_is_distinct_from_non_zero_exit() {
        let sp = Subprocess::new(["__chalet_core_definitely_missing_binary__"]);
        let err = sp.spawn(&AbortFlag::new()).unwrap_err();
        assert!(matches!(err, ProcessError::SpawnFailed { .. }));
    }
}
