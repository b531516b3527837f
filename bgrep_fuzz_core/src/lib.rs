//! Differential fuzzing of an external binary pattern-search tool.
//!
//! Each iteration generates random data and a random pattern, computes the
//! expected offsets with a brute-force oracle, runs the tool as a subprocess
//! and compares its stdout byte for byte with the rendered expectation. The
//! first disagreement is persisted to disk and ends the run.

pub mod case;
pub mod config;
pub mod executor;
pub mod fuzzer;
pub mod generator;
pub mod oracle;
pub mod report;

pub use case::{CaseError, TestCase};
pub use config::{ExitStatusPolicy, HarnessConfig};
pub use executor::{Executor, ExecutorError, ToolExecutor, ToolExecutorConfig, ToolOutput};
pub use fuzzer::{DriverState, Fuzzer, HaltReason};
pub use generator::{CaseGenerator, RandomCaseGenerator};
pub use oracle::{MatchSet, NaiveOracle, ReferenceOracle, find_all};
pub use report::{Comparator, MismatchReason, MismatchReport, render_expected};
