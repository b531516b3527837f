use crate::generator::{DEFAULT_MAX_DATA_LEN, DEFAULT_MAX_PATTERN_LEN};
use crate::report::DEFAULT_OFFSET_WIDTH;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Whether the tool's exit status takes part in the verdict.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ExitStatusPolicy {
    /// Only stdout is compared.
    #[default]
    Ignore,
    /// A non-success exit status is a mismatch even when stdout agrees.
    RequireSuccess,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct ToolSettings {
    /// Program followed by any leading arguments. The pattern and the data
    /// file are appended to these on every invocation.
    #[serde(default = "default_tool_command")]
    pub command: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub exit_status: ExitStatusPolicy,
    /// Minimum hex digits per offset in the tool's output: 8 for 32-bit
    /// builds, 16 for 64-bit ones.
    #[serde(default = "default_offset_width")]
    pub offset_width: usize,
}

pub fn default_tool_command() -> Vec<String> {
    vec!["../bgrep".to_string()]
}

fn default_offset_width() -> usize {
    DEFAULT_OFFSET_WIDTH
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            command: default_tool_command(),
            timeout_ms: None,
            exit_status: ExitStatusPolicy::default(),
            offset_width: default_offset_width(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct GeneratorSettings {
    #[serde(default = "default_max_data_len")]
    pub max_data_len: usize,
    #[serde(default = "default_max_pattern_len")]
    pub max_pattern_len: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

fn default_max_data_len() -> usize {
    DEFAULT_MAX_DATA_LEN
}

fn default_max_pattern_len() -> usize {
    DEFAULT_MAX_PATTERN_LEN
}

impl Default for GeneratorSettings {
    fn default() -> Self {
        Self {
            max_data_len: default_max_data_len(),
            max_pattern_len: default_max_pattern_len(),
            seed: None,
        }
    }
}

/// Fixed paths used by the harness. They are rewritten without locking, so
/// two harness instances must never share them.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct FileSettings {
    #[serde(default = "default_data_path")]
    pub data: PathBuf,
    #[serde(default = "default_expected_path")]
    pub expected: PathBuf,
    #[serde(default = "default_actual_path")]
    pub actual: PathBuf,
    #[serde(default = "default_summary_path")]
    pub summary: PathBuf,
}

pub fn default_data_path() -> PathBuf {
    PathBuf::from("data")
}

pub fn default_expected_path() -> PathBuf {
    PathBuf::from("res_expected")
}

pub fn default_actual_path() -> PathBuf {
    PathBuf::from("res_bgrep")
}

pub fn default_summary_path() -> PathBuf {
    PathBuf::from("mismatch.json")
}

impl Default for FileSettings {
    fn default() -> Self {
        Self {
            data: default_data_path(),
            expected: default_expected_path(),
            actual: default_actual_path(),
            summary: default_summary_path(),
        }
    }
}

impl FileSettings {
    /// Resolves every path against `dir`. Absolute paths are left unchanged.
    pub fn rooted_at(&self, dir: &Path) -> Self {
        Self {
            data: dir.join(&self.data),
            expected: dir.join(&self.expected),
            actual: dir.join(&self.actual),
            summary: dir.join(&self.summary),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct FuzzerSettings {
    /// Unbounded when absent: the loop runs until a mismatch or interruption.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_iterations: Option<u64>,
    /// Log a progress line every this many iterations; 0 disables it.
    #[serde(default = "default_progress_interval")]
    pub progress_interval: u64,
}

pub fn default_progress_interval() -> u64 {
    100
}

impl Default for FuzzerSettings {
    fn default() -> Self {
        Self {
            max_iterations: None,
            progress_interval: default_progress_interval(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct HarnessConfig {
    #[serde(default)]
    pub tool: ToolSettings,
    #[serde(default)]
    pub generator: GeneratorSettings,
    #[serde(default)]
    pub files: FileSettings,
    #[serde(default)]
    pub fuzzer: FuzzerSettings,
}

impl HarnessConfig {
    pub fn load_from_file(path: &Path) -> Result<Self, anyhow::Error> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file at {:?}: {}", path, e))?;

        let config: HarnessConfig = toml::from_str(&content).map_err(|e| {
            anyhow::anyhow!("Failed to parse TOML from config file {:?}: {}", path, e)
        })?;

        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String, anyhow::Error> {
        toml::to_string_pretty(self)
            .map_err(|e| anyhow::anyhow!("Failed to serialize configuration: {}", e))
    }

    /// Checks the invariants the fuzz loop relies on.
    pub fn validate(&self) -> Result<(), anyhow::Error> {
        match self.tool.command.first() {
            None => anyhow::bail!("tool.command must name the tool under test"),
            Some(program) if program.is_empty() => {
                anyhow::bail!("tool.command[0] must not be empty")
            }
            Some(_) => {}
        }
        if self.generator.max_pattern_len == 0 {
            anyhow::bail!("generator.max-pattern-len must be at least 1");
        }
        if self.tool.offset_width == 0 {
            anyhow::bail!("tool.offset-width must be at least 1");
        }
        if self.tool.timeout_ms == Some(0) {
            anyhow::bail!("tool.timeout-ms must be positive when set");
        }

        let files = [
            ("files.data", &self.files.data),
            ("files.expected", &self.files.expected),
            ("files.actual", &self.files.actual),
            ("files.summary", &self.files.summary),
        ];
        for (i, (name_a, path_a)) in files.iter().enumerate() {
            for (name_b, path_b) in &files[i + 1..] {
                if path_a == path_b {
                    anyhow::bail!("{name_a} and {name_b} both point at {path_a:?}");
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_reference_harness() {
        let config = HarnessConfig::default();
        assert_eq!(config.tool.command, vec!["../bgrep".to_string()]);
        assert_eq!(config.tool.timeout_ms, None);
        assert_eq!(config.tool.exit_status, ExitStatusPolicy::Ignore);
        assert_eq!(config.tool.offset_width, 8);
        assert_eq!(config.generator.max_data_len, 1024 * 1024);
        assert_eq!(config.generator.max_pattern_len, 50);
        assert_eq!(config.files.data, PathBuf::from("data"));
        assert_eq!(config.files.expected, PathBuf::from("res_expected"));
        assert_eq!(config.files.actual, PathBuf::from("res_bgrep"));
        assert_eq!(config.fuzzer.max_iterations, None);
        config.validate().expect("defaults are valid");
    }

    #[test]
    fn parses_partial_toml_with_defaults() {
        let config: HarnessConfig = toml::from_str(
            r#"
            [tool]
            command = ["./target/release/bgrep", "-f"]
            timeout-ms = 5000
            exit-status = "require-success"
            offset-width = 16

            [generator]
            max-pattern-len = 4
            seed = 7
            "#,
        )
        .expect("valid toml");
        assert_eq!(config.tool.command.len(), 2);
        assert_eq!(config.tool.timeout_ms, Some(5000));
        assert_eq!(config.tool.exit_status, ExitStatusPolicy::RequireSuccess);
        assert_eq!(config.tool.offset_width, 16);
        assert_eq!(config.generator.max_pattern_len, 4);
        assert_eq!(config.generator.max_data_len, DEFAULT_MAX_DATA_LEN);
        assert_eq!(config.generator.seed, Some(7));
        assert_eq!(config.files.summary, PathBuf::from("mismatch.json"));
    }

    #[test]
    fn rejects_unknown_fields() {
        let parsed: Result<HarnessConfig, _> = toml::from_str("[generator]\nmax-len = 3\n");
        assert!(parsed.is_err());
    }

    #[test]
    fn validate_rejects_bad_settings() {
        let mut config = HarnessConfig::default();
        config.tool.command.clear();
        assert!(config.validate().is_err());

        let mut config = HarnessConfig::default();
        config.generator.max_pattern_len = 0;
        assert!(config.validate().is_err());

        let mut config = HarnessConfig::default();
        config.tool.offset_width = 0;
        assert!(config.validate().is_err());

        let mut config = HarnessConfig::default();
        config.files.actual = config.files.expected.clone();
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("files.expected"), "unexpected error: {err}");
    }

    #[test]
    fn load_from_file_round_trips_serialized_config() -> Result<(), anyhow::Error> {
        let mut config = HarnessConfig::default();
        config.generator.seed = Some(99);
        config.fuzzer.max_iterations = Some(10);

        let mut file = tempfile::NamedTempFile::new()?;
        file.write_all(config.to_toml()?.as_bytes())?;

        let loaded = HarnessConfig::load_from_file(file.path())?;
        assert_eq!(loaded.generator.seed, Some(99));
        assert_eq!(loaded.fuzzer.max_iterations, Some(10));
        assert_eq!(loaded.tool.command, config.tool.command);
        Ok(())
    }

    #[test]
    fn load_from_missing_file_reports_path() {
        let err = HarnessConfig::load_from_file(Path::new("/nonexistent/harness.toml"))
            .unwrap_err()
            .to_string();
        assert!(err.contains("harness.toml"));
    }

    #[test]
    fn rooted_at_joins_relative_paths() {
        let files = FileSettings::default().rooted_at(Path::new("/tmp/work"));
        assert_eq!(files.data, PathBuf::from("/tmp/work/data"));
        assert_eq!(files.actual, PathBuf::from("/tmp/work/res_bgrep"));
    }
}
