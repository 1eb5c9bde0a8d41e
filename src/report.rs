//! Progress/diagnostic event sink, independent of the `tracing` subscriber.
//!
//! Grounded on the teacher's `report` module (referenced from `compilers/solc/version_manager.rs`
//! as `crate::report::solc_installation_start/success/error`): a narrow set of free functions the
//! rest of the crate calls at well-known points, plus a pluggable [`Reporter`] trait so the CLI
//! layer (out of scope here) can swap in its own spinner/colour rendering without this crate
//! depending on a terminal library.

use std::sync::{Arc, RwLock};

use once_cell::sync::Lazy;
use semver::Version;

/// Implemented by the terminal layer (out of scope) to render progress. The default reporter
/// only emits `tracing` events, so the core works headlessly without one installed.
pub trait Reporter: Send + Sync {
    fn toolchain_probe_start(&self, _name: &str) {}
    fn toolchain_probe_success(&self, _name: &str, _version: &str) {}
    fn toolchain_probe_error(&self, _name: &str, _message: &str) {}
    fn external_dep_start(&self, _name: &str) {}
    fn external_dep_success(&self, _name: &str) {}
    fn external_dep_error(&self, _name: &str, _message: &str) {}
    fn warning(&self, _message: &str) {}
}

struct TracingReporter;

impl Reporter for TracingReporter {
    fn toolchain_probe_start(&self, name: &str) {
        tracing::debug!(toolchain = name, "probing toolchain");
    }
    fn toolchain_probe_success(&self, name: &str, version: &str) {
        tracing::info!(toolchain = name, version, "toolchain resolved");
    }
    fn toolchain_probe_error(&self, name: &str, message: &str) {
        tracing::error!(toolchain = name, message, "toolchain probe failed");
    }
    fn external_dep_start(&self, name: &str) {
        tracing::debug!(dep = name, "materializing external dependency");
    }
    fn external_dep_success(&self, name: &str) {
        tracing::info!(dep = name, "external dependency ready");
    }
    fn external_dep_error(&self, name: &str, message: &str) {
        tracing::error!(dep = name, message, "external dependency failed");
    }
    fn warning(&self, message: &str) {
        tracing::warn!("{message}");
    }
}

static REPORTER: Lazy<RwLock<Arc<dyn Reporter>>> =
    Lazy::new(|| RwLock::new(Arc::new(TracingReporter)));

/// Installs a process-wide reporter, replacing the default `tracing`-only one.
pub fn set_reporter(reporter: Arc<dyn Reporter>) {
    *REPORTER.write().expect("report lock poisoned") = reporter;
}

fn current() -> Arc<dyn Reporter> {
    REPORTER.read().expect("report lock poisoned").clone()
}

pub fn toolchain_probe_start(name: &str) {
    current().toolchain_probe_start(name);
}

pub fn toolchain_probe_success(name: &str, version: &Version) {
    current().toolchain_probe_success(name, &version.to_string());
}

pub fn toolchain_probe_error(name: &str, message: &str) {
    current().toolchain_probe_error(name, message);
}

pub fn external_dep_start(name: &str) {
    current().external_dep_start(name);
}

pub fn external_dep_success(name: &str) {
    current().external_dep_success(name);
}

pub fn external_dep_error(name: &str, message: &str) {
    current().external_dep_error(name, message);
}

pub fn warning(message: impl AsRef<str>) {
    current().warning(message.as_ref());
}
