#![doc = include_str!("../README.md")]
#![warn(rustdoc::all)]
#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![deny(unused_must_use, rust_2018_idioms)]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

#[macro_use]
extern crate tracing;

pub mod error;
pub use error::{CoreError, Result};

pub mod fs;
pub use fs::{AbortFlag, FsError};

pub mod environment;
pub use environment::{EnvironmentError, VendorActivationSpec};

pub mod toolchain;
pub use toolchain::{CompilerFamily, Toolchain, ToolchainError, ToolchainSettings};

pub mod config;
pub use config::{ConfigError, Workspace};

pub mod cache;
pub use cache::{CacheError, SourceCache};

pub mod commandgen;
pub use commandgen::CommandGenError;

pub mod graph;
pub use graph::{GraphError, SchedulerError, TargetDependencyGraph, TargetGraphNode};

pub mod driver;
pub use driver::{Driver, DriverOptions, ExitCode, Route};

pub mod report;

pub mod utils;
