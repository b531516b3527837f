use crate::case::TestCase;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

/// How often a child with a deadline is polled for exit.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Failures to run the tool at all. These point at the environment (missing
/// binary, unwritable working directory), never at a bug in the tool, and
/// are not retried.
#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error("Tool command is empty")]
    EmptyCommand,
    #[error("Failed to write data file {path:?}: {source}")]
    WriteData {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to spawn command '{command:?}': {source}")]
    Spawn {
        command: Vec<String>,
        #[source]
        source: std::io::Error,
    },
    #[error("Error waiting for child: {0}")]
    Wait(#[source] std::io::Error),
    #[error("Failed to read tool stdout: {0}")]
    ReadStdout(#[source] std::io::Error),
    #[error("Child stdout was not available after piping")]
    StdoutUnavailable,
    #[error("Tool did not exit within {0:?} and was killed")]
    Timeout(Duration),
}

/// Everything captured from one run of the tool under test.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ToolOutput {
    /// Raw stdout bytes; never decoded.
    pub stdout: Vec<u8>,
    pub exit_code: Option<i32>,
    pub signal: Option<i32>,
}

impl ToolOutput {
    pub fn from_stdout(stdout: Vec<u8>) -> Self {
        Self {
            stdout,
            exit_code: Some(0),
            signal: None,
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Human-readable exit status, e.g. `exited with code 1`.
    pub fn describe_status(&self) -> String {
        match (self.exit_code, self.signal) {
            (Some(code), _) => format!("exited with code {code}"),
            (None, Some(signal)) => format!("terminated by signal {signal}"),
            (None, None) => "exited abnormally".to_string(),
        }
    }

    fn from_status(stdout: Vec<u8>, status: ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = {
            use std::os::unix::process::ExitStatusExt;
            status.signal()
        };
        #[cfg(not(unix))]
        let signal = None;

        Self {
            stdout,
            exit_code: status.code(),
            signal,
        }
    }
}

/// Runs the tool under test against one test case.
pub trait Executor {
    /// Materializes the case, runs the tool to completion and captures stdout.
    fn invoke(&mut self, case: &TestCase) -> Result<ToolOutput, ExecutorError>;

    /// The data file path exactly as it is passed to the tool.
    fn data_file(&self) -> &Path;
}

pub struct ToolExecutorConfig {
    /// Program and leading arguments; pattern and data file are appended.
    pub command: Vec<String>,
    pub data_file: PathBuf,
    /// `None` blocks until the tool exits, however long that takes.
    pub timeout: Option<Duration>,
}

/// Invokes an external binary as `<command...> <pattern_hex> <data_file>`.
///
/// The data file is reused and overwritten on every call, so one executor (and
/// one harness process) must own its path exclusively.
pub struct ToolExecutor {
    config: ToolExecutorConfig,
}

impl ToolExecutor {
    pub fn new(config: ToolExecutorConfig) -> Result<Self, ExecutorError> {
        match config.command.first() {
            Some(program) if !program.is_empty() => Ok(Self { config }),
            _ => Err(ExecutorError::EmptyCommand),
        }
    }

    fn spawn(&self, case: &TestCase) -> Result<Child, ExecutorError> {
        let mut cmd = Command::new(&self.config.command[0]);
        cmd.args(&self.config.command[1..])
            .arg(case.pattern_hex())
            .arg(&self.config.data_file)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());
        // Own process group, so a timeout can take down wrapper scripts and
        // everything they started.
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }

        cmd.spawn().map_err(|source| ExecutorError::Spawn {
            command: self.config.command.clone(),
            source,
        })
    }

    fn wait_with_timeout(child: &mut Child, timeout: Duration) -> Result<ExitStatus, ExecutorError> {
        let start_time = Instant::now();

        loop {
            match child.try_wait() {
                Ok(Some(status)) => return Ok(status),
                Ok(None) => {
                    if start_time.elapsed() > timeout {
                        warn!(?timeout, "Tool timed out, killing");
                        if let Err(e) = kill_process_group(child) {
                            warn!("Failed to kill tool process group: {e}");
                            if let Err(e) = child.kill() {
                                warn!("Failed to kill child process: {e}");
                            }
                        }
                        // Reap so the child does not linger as a zombie.
                        let _ = child.wait();
                        return Err(ExecutorError::Timeout(timeout));
                    }
                    thread::sleep(POLL_INTERVAL);
                }
                Err(e) => return Err(ExecutorError::Wait(e)),
            }
        }
    }
}

/// Kills the child and every process in its group.
#[cfg(unix)]
fn kill_process_group(child: &mut Child) -> std::io::Result<()> {
    let pgid = libc::pid_t::try_from(child.id()).map_err(std::io::Error::other)?;
    // SAFETY: killpg takes plain integers. The child is not reaped yet, so its
    // pid still names the group created at spawn.
    if unsafe { libc::killpg(pgid, libc::SIGKILL) } == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

#[cfg(not(unix))]
fn kill_process_group(child: &mut Child) -> std::io::Result<()> {
    child.kill()
}

/// Drains a pipe on its own thread so a chatty child cannot block on a full
/// pipe while the harness waits for it to exit.
fn drain<R: Read + Send + 'static>(mut pipe: R) -> JoinHandle<std::io::Result<Vec<u8>>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        pipe.read_to_end(&mut buf)?;
        Ok(buf)
    })
}

fn join_reader(
    reader: JoinHandle<std::io::Result<Vec<u8>>>,
) -> Result<Vec<u8>, ExecutorError> {
    match reader.join() {
        Ok(result) => result.map_err(ExecutorError::ReadStdout),
        Err(_) => Err(ExecutorError::ReadStdout(std::io::Error::other(
            "stdout reader thread panicked",
        ))),
    }
}

impl Executor for ToolExecutor {
    fn invoke(&mut self, case: &TestCase) -> Result<ToolOutput, ExecutorError> {
        std::fs::write(&self.config.data_file, case.data()).map_err(|source| {
            ExecutorError::WriteData {
                path: self.config.data_file.clone(),
                source,
            }
        })?;

        let mut child = self.spawn(case)?;
        let Some(stdout) = child.stdout.take() else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(ExecutorError::StdoutUnavailable);
        };
        let reader = drain(stdout);

        let status = match self.config.timeout {
            None => child.wait().map_err(ExecutorError::Wait),
            Some(timeout) => Self::wait_with_timeout(&mut child, timeout),
        };
        // On failure the reader is detached: a descendant that escaped the
        // kill may hold the pipe open indefinitely.
        let status = status?;
        let stdout = join_reader(reader)?;

        let output = ToolOutput::from_status(stdout, status);
        debug!(
            data_len = case.data().len(),
            stdout_len = output.stdout.len(),
            status = %output.describe_status(),
            "Tool invocation finished"
        );
        Ok(output)
    }

    fn data_file(&self) -> &Path {
        &self.config.data_file
    }
}

#[cfg(all(test, unix))]
mod tool_executor_tests {
    use super::*;
    use tempfile::tempdir;

    fn sh(script: &str) -> Vec<String> {
        vec![
            "sh".to_string(),
            "-c".to_string(),
            script.to_string(),
            "tool".to_string(),
        ]
    }

    fn executor(command: Vec<String>, dir: &Path, timeout: Option<Duration>) -> ToolExecutor {
        ToolExecutor::new(ToolExecutorConfig {
            command,
            data_file: dir.join("data"),
            timeout,
        })
        .expect("non-empty command")
    }

    fn case(data: &[u8], pattern: &[u8]) -> TestCase {
        TestCase::new(data.to_vec(), pattern.to_vec()).unwrap()
    }

    #[test]
    fn passes_pattern_hex_and_data_file_as_arguments() {
        let dir = tempdir().unwrap();
        let mut executor = executor(sh(r#"printf '%s|%s' "$1" "$2""#), dir.path(), None);
        let output = executor.invoke(&case(b"xyz", &[0x01, 0xab])).unwrap();

        let expected = format!("01ab|{}", dir.path().join("data").display());
        assert_eq!(output.stdout, expected.into_bytes());
        assert!(output.success());
    }

    #[test]
    fn writes_data_file_verbatim_and_overwrites_it() {
        let dir = tempdir().unwrap();
        let mut executor = executor(sh(r#"cat "$2""#), dir.path(), None);

        let binary: Vec<u8> = (0..=255).collect();
        let first = executor.invoke(&case(&binary, b"\x00")).unwrap();
        assert_eq!(first.stdout, binary);

        let second = executor.invoke(&case(b"\x00\n", b"\x00")).unwrap();
        assert_eq!(second.stdout, b"\x00\n");
        assert_eq!(std::fs::read(dir.path().join("data")).unwrap(), b"\x00\n");
    }

    #[test]
    fn captures_non_zero_exit_without_failing() {
        let dir = tempdir().unwrap();
        let mut executor = executor(sh("printf partial; exit 3"), dir.path(), None);
        let output = executor.invoke(&case(b"", b"\x01")).unwrap();
        assert_eq!(output.stdout, b"partial");
        assert_eq!(output.exit_code, Some(3));
        assert!(!output.success());
        assert_eq!(output.describe_status(), "exited with code 3");
    }

    #[test]
    fn reports_signal_termination() {
        let dir = tempdir().unwrap();
        let mut executor = executor(sh("kill -9 $$"), dir.path(), None);
        let output = executor.invoke(&case(b"", b"\x01")).unwrap();
        assert_eq!(output.exit_code, None);
        assert_eq!(output.signal, Some(9));
        assert_eq!(output.describe_status(), "terminated by signal 9");
    }

    #[test]
    fn large_output_does_not_deadlock() {
        let dir = tempdir().unwrap();
        let mut executor = executor(
            sh("head -c 1000000 /dev/zero"),
            dir.path(),
            Some(Duration::from_secs(30)),
        );
        let output = executor.invoke(&case(b"", b"\x01")).unwrap();
        assert_eq!(output.stdout.len(), 1_000_000);
    }

    #[test]
    fn timeout_kills_hung_tool() {
        let dir = tempdir().unwrap();
        let mut executor = executor(
            sh("exec sleep 5"),
            dir.path(),
            Some(Duration::from_millis(100)),
        );
        let started = Instant::now();
        match executor.invoke(&case(b"", b"\x01")) {
            Err(ExecutorError::Timeout(timeout)) => {
                assert_eq!(timeout, Duration::from_millis(100))
            }
            other => panic!("Expected Timeout, got {other:?}"),
        }
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn timeout_kills_processes_started_by_the_tool() {
        let dir = tempdir().unwrap();
        let mut executor = executor(
            sh("sleep 5; true"),
            dir.path(),
            Some(Duration::from_millis(100)),
        );
        let started = Instant::now();
        let result = executor.invoke(&case(b"", b"\x01"));
        assert!(matches!(result, Err(ExecutorError::Timeout(_))), "{result:?}");
        assert!(
            started.elapsed() < Duration::from_secs(3),
            "invoke blocked for {:?}",
            started.elapsed()
        );
    }

    #[test]
    fn missing_binary_is_a_spawn_error() {
        let dir = tempdir().unwrap();
        let mut executor = executor(
            vec!["./this_command_does_not_exist_ever_12345".to_string()],
            dir.path(),
            None,
        );
        match executor.invoke(&case(b"abc", b"b")) {
            Err(ExecutorError::Spawn { command, .. }) => {
                assert_eq!(command[0], "./this_command_does_not_exist_ever_12345")
            }
            other => panic!("Expected Spawn error, got {other:?}"),
        }
    }

    #[test]
    fn unwritable_data_file_is_reported() {
        let dir = tempdir().unwrap();
        let mut executor = executor(sh("true"), &dir.path().join("missing_dir"), None);
        match executor.invoke(&case(b"abc", b"b")) {
            Err(ExecutorError::WriteData { path, .. }) => {
                assert!(path.ends_with("missing_dir/data"))
            }
            other => panic!("Expected WriteData error, got {other:?}"),
        }
    }

    #[test]
    fn empty_command_is_rejected() {
        let result = ToolExecutor::new(ToolExecutorConfig {
            command: Vec::new(),
            data_file: PathBuf::from("data"),
            timeout: None,
        });
        assert!(matches!(result, Err(ExecutorError::EmptyCommand)));
    }
}
