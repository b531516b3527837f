use crate::config::HarnessConfig;
use crate::executor::{Executor, ToolExecutor, ToolExecutorConfig};
use crate::generator::{CaseGenerator, RandomCaseGenerator};
use crate::oracle::{NaiveOracle, ReferenceOracle};
use crate::report::{Comparator, MismatchReport, RunContext};
use anyhow::Context;
use rand_chacha::ChaCha8Rng;
use rand_core::SeedableRng;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::info;

/// Why the driver stopped.
#[derive(Debug, Clone)]
pub enum HaltReason {
    /// The tool disagreed with the reference; artifacts have been written.
    Mismatch(Box<MismatchReport>),
    /// The stop handle was raised.
    Interrupted,
    /// The configured iteration budget ran out without a mismatch.
    IterationLimit,
}

#[derive(Debug, Clone)]
pub enum DriverState {
    Running,
    Halted(HaltReason),
}

/// The generate, match, invoke, compare loop.
///
/// Each iteration is independent apart from the shared data file, which the
/// executor overwrites. The loop only ends through a `HaltReason` or an
/// environment error returned from `run`.
pub struct Fuzzer {
    generator: Box<dyn CaseGenerator<ChaCha8Rng>>,
    oracle: Box<dyn ReferenceOracle>,
    executor: Box<dyn Executor>,
    comparator: Comparator,
    rng: ChaCha8Rng,
    seed: u64,
    max_iterations: Option<u64>,
    progress_interval: u64,
    stop: Arc<AtomicBool>,
    state: DriverState,
    iterations: u64,
}

impl Fuzzer {
    pub fn new(
        generator: Box<dyn CaseGenerator<ChaCha8Rng>>,
        oracle: Box<dyn ReferenceOracle>,
        executor: Box<dyn Executor>,
        comparator: Comparator,
        seed: u64,
    ) -> Self {
        Self {
            generator,
            oracle,
            executor,
            comparator,
            rng: ChaCha8Rng::seed_from_u64(seed),
            seed,
            max_iterations: None,
            progress_interval: 0,
            stop: Arc::new(AtomicBool::new(false)),
            state: DriverState::Running,
            iterations: 0,
        }
    }

    /// Wires up the standard components from a validated configuration.
    pub fn from_config(config: &HarnessConfig) -> Result<Self, anyhow::Error> {
        config.validate()?;

        let generator = RandomCaseGenerator::new(
            config.generator.max_data_len,
            config.generator.max_pattern_len,
        )?;
        let executor = ToolExecutor::new(ToolExecutorConfig {
            command: config.tool.command.clone(),
            data_file: config.files.data.clone(),
            timeout: config.tool.timeout_ms.map(Duration::from_millis),
        })?;
        info!(
            max_data_len = generator.max_data_len(),
            max_pattern_len = generator.max_pattern_len(),
            offset_width = config.tool.offset_width,
            "Generator configured"
        );
        let comparator = Comparator::new(&config.files, config.tool.exit_status)
            .with_offset_width(config.tool.offset_width);
        let seed = config.generator.seed.unwrap_or_else(rand::random);

        Ok(Self::new(
            Box::new(generator),
            Box::new(NaiveOracle::new()),
            Box::new(executor),
            comparator,
            seed,
        )
        .with_max_iterations(config.fuzzer.max_iterations)
        .with_progress_interval(config.fuzzer.progress_interval))
    }

    pub fn with_max_iterations(mut self, max_iterations: Option<u64>) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_progress_interval(mut self, progress_interval: u64) -> Self {
        self.progress_interval = progress_interval;
        self
    }

    /// A flag that halts the loop before its next iteration once set.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn iterations(&self) -> u64 {
        self.iterations
    }

    pub fn state(&self) -> &DriverState {
        &self.state
    }

    /// Runs a single iteration. Returns the report if the tool disagreed.
    pub fn step(&mut self) -> Result<Option<MismatchReport>, anyhow::Error> {
        self.iterations += 1;

        let case = self.generator.generate(&mut self.rng)?;
        let match_set = self.oracle.matches(&case);
        let output = self.executor.invoke(&case).with_context(|| {
            format!(
                "Iteration {} (seed {}, pattern {})",
                self.iterations,
                self.seed,
                case.pattern_hex()
            )
        })?;

        let context = RunContext {
            iteration: self.iterations,
            seed: self.seed,
        };
        let report = self.comparator.check(
            &match_set,
            self.executor.data_file(),
            &output,
            &case,
            Some(context),
        )?;
        Ok(report)
    }

    /// Loops until a mismatch, an interruption or the iteration limit.
    ///
    /// Environment errors (spawn failures, unwritable files) are returned as
    /// `Err` immediately and are not retried.
    pub fn run(&mut self) -> Result<HaltReason, anyhow::Error> {
        if let DriverState::Halted(reason) = &self.state {
            return Ok(reason.clone());
        }

        info!(
            seed = self.seed,
            max_iterations = ?self.max_iterations,
            "Starting fuzz loop"
        );
        let start_time = Instant::now();

        let reason = loop {
            if self.stop.load(Ordering::Relaxed) {
                break HaltReason::Interrupted;
            }
            if self.max_iterations.is_some_and(|max| self.iterations >= max) {
                break HaltReason::IterationLimit;
            }

            if let Some(report) = self.step()? {
                break HaltReason::Mismatch(Box::new(report));
            }

            if self.progress_interval > 0 && self.iterations % self.progress_interval == 0 {
                let elapsed = start_time.elapsed().as_secs_f64();
                let execs_per_sec = if elapsed > 0.0 {
                    self.iterations as f64 / elapsed
                } else {
                    0.0
                };
                info!(
                    iterations = self.iterations,
                    execs_per_sec,
                    "Progress"
                );
            }
        };

        info!(
            iterations = self.iterations,
            elapsed = ?start_time.elapsed(),
            "Fuzz loop halted"
        );
        self.state = DriverState::Halted(reason.clone());
        Ok(reason)
    }
}
