use crate::case::TestCase;
use crate::config::{ExitStatusPolicy, FileSettings};
use crate::executor::ToolOutput;
use crate::oracle::MatchSet;
use serde::Serialize;
use std::collections::BTreeSet;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{error, info};

/// Minimum number of hex digits per offset, as in printf's `%08x`. Larger
/// offsets simply use more digits. 64-bit builds of the tool use 16.
pub const DEFAULT_OFFSET_WIDTH: usize = 8;

/// Upper bound on the offsets listed per side in a mismatch summary.
const DIFF_SAMPLE_LIMIT: usize = 16;

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("Failed to write artifact {path:?}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to serialize mismatch summary: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Why a line of tool output could not be read back as an offset.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("Output does not end with a newline")]
    MissingNewline,
    #[error("Line {line}: expected '<filename>: ' prefix")]
    WrongPrefix { line: usize },
    #[error("Line {line}: offset is not {width} or more lowercase hex digits")]
    BadOffset { line: usize, width: usize },
}

/// Renders offsets in the tool's output convention:
/// `<filename>: <offset zero-padded to width>\n` per match.
pub fn render_expected(match_set: &[u64], filename: &[u8], width: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(match_set.len() * (filename.len() + 2 + width + 1));
    for offset in match_set {
        out.extend_from_slice(filename);
        // Writing into a Vec cannot fail.
        let _ = writeln!(out, ": {offset:0width$x}");
    }
    out
}

/// Reads offsets back out of output in the tool convention.
pub fn parse_offsets(output: &[u8], filename: &[u8], width: usize) -> Result<MatchSet, ParseError> {
    if output.is_empty() {
        return Ok(MatchSet::new());
    }
    let Some(body) = output.strip_suffix(b"\n") else {
        return Err(ParseError::MissingNewline);
    };

    let mut offsets = MatchSet::new();
    for (index, line) in body.split(|&b| b == b'\n').enumerate() {
        let line_no = index + 1;
        let digits = line
            .strip_prefix(filename)
            .and_then(|rest| rest.strip_prefix(b": "))
            .ok_or(ParseError::WrongPrefix { line: line_no })?;

        let bad_offset = ParseError::BadOffset {
            line: line_no,
            width,
        };
        let well_formed = !digits.is_empty()
            && digits.len() >= width
            && digits
                .iter()
                .all(|d| d.is_ascii_digit() || (b'a'..=b'f').contains(d));
        if !well_formed {
            return Err(bad_offset);
        }
        let offset = std::str::from_utf8(digits)
            .ok()
            .and_then(|text| u64::from_str_radix(text, 16).ok())
            .ok_or(bad_offset)?;
        offsets.push(offset);
    }
    Ok(offsets)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum MismatchReason {
    /// stdout differs from the rendered reference.
    OutputDiffers,
    /// stdout matched but the exit status was rejected by the policy.
    ExitStatus { status: String },
}

/// Offsets present on only one side, when the tool's output parses at all.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OffsetDiff {
    pub missing_total: usize,
    pub unexpected_total: usize,
    pub missing: Vec<u64>,
    pub unexpected: Vec<u64>,
}

impl OffsetDiff {
    fn between(expected: &[u64], actual: &[u64]) -> Self {
        let expected: BTreeSet<u64> = expected.iter().copied().collect();
        let actual: BTreeSet<u64> = actual.iter().copied().collect();
        let missing: Vec<u64> = expected.difference(&actual).copied().collect();
        let unexpected: Vec<u64> = actual.difference(&expected).copied().collect();
        Self {
            missing_total: missing.len(),
            unexpected_total: unexpected.len(),
            missing: missing.into_iter().take(DIFF_SAMPLE_LIMIT).collect(),
            unexpected: unexpected.into_iter().take(DIFF_SAMPLE_LIMIT).collect(),
        }
    }
}

/// Where in a run a mismatch happened, for replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RunContext {
    pub iteration: u64,
    pub seed: u64,
}

/// The persisted record of one disagreement between the tool and the oracle.
#[derive(Debug, Clone, Serialize)]
pub struct MismatchReport {
    pub reason: MismatchReason,
    pub pattern_hex: String,
    pub data_len: usize,
    pub data_md5: String,
    pub data_file: PathBuf,
    pub expected_file: PathBuf,
    pub actual_file: PathBuf,
    pub expected_matches: usize,
    pub tool_status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset_diff: Option<OffsetDiff>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<RunContext>,
}

/// Compares tool output against the reference rendering and persists the
/// failing case when they disagree.
#[derive(Debug, Clone)]
pub struct Comparator {
    expected_file: PathBuf,
    actual_file: PathBuf,
    summary_file: PathBuf,
    exit_status: ExitStatusPolicy,
    offset_width: usize,
}

impl Comparator {
    pub fn new(files: &FileSettings, exit_status: ExitStatusPolicy) -> Self {
        Self {
            expected_file: files.expected.clone(),
            actual_file: files.actual.clone(),
            summary_file: files.summary.clone(),
            exit_status,
            offset_width: DEFAULT_OFFSET_WIDTH,
        }
    }

    /// Sets the offset width the tool under test prints.
    pub fn with_offset_width(mut self, offset_width: usize) -> Self {
        self.offset_width = offset_width;
        self
    }

    /// Returns `Ok(true)` when the tool agreed with the reference. Otherwise
    /// the artifacts are written and `Ok(false)` is returned; the caller is
    /// expected to stop fuzzing.
    pub fn compare_and_report(
        &self,
        match_set: &[u64],
        filename: &Path,
        tool_output: &ToolOutput,
        case: &TestCase,
    ) -> Result<bool, ReportError> {
        self.check(match_set, filename, tool_output, case, None)
            .map(|report| report.is_none())
    }

    /// Like `compare_and_report`, but hands back the full report.
    pub fn check(
        &self,
        match_set: &[u64],
        filename: &Path,
        tool_output: &ToolOutput,
        case: &TestCase,
        context: Option<RunContext>,
    ) -> Result<Option<MismatchReport>, ReportError> {
        let filename_bytes = filename.as_os_str().as_encoded_bytes();
        let expected = render_expected(match_set, filename_bytes, self.offset_width);

        let reason = if expected != tool_output.stdout {
            MismatchReason::OutputDiffers
        } else if self.exit_status == ExitStatusPolicy::RequireSuccess && !tool_output.success() {
            MismatchReason::ExitStatus {
                status: tool_output.describe_status(),
            }
        } else {
            return Ok(None);
        };

        let pattern_hex = case.pattern_hex();
        println!("search: {pattern_hex}");

        write_artifact(&self.expected_file, &expected)?;
        write_artifact(&self.actual_file, &tool_output.stdout)?;

        let offset_diff = match reason {
            MismatchReason::OutputDiffers => {
                parse_offsets(&tool_output.stdout, filename_bytes, self.offset_width)
                    .ok()
                    .map(|actual| OffsetDiff::between(match_set, &actual))
            }
            MismatchReason::ExitStatus { .. } => None,
        };

        let report = MismatchReport {
            reason,
            pattern_hex,
            data_len: case.data().len(),
            data_md5: case.fingerprint(),
            data_file: filename.to_path_buf(),
            expected_file: self.expected_file.clone(),
            actual_file: self.actual_file.clone(),
            expected_matches: match_set.len(),
            tool_status: tool_output.describe_status(),
            offset_diff,
            context,
        };
        write_artifact(&self.summary_file, &serde_json::to_vec_pretty(&report)?)?;

        error!(
            reason = ?report.reason,
            expected = ?report.expected_file,
            actual = ?report.actual_file,
            "Tool output disagrees with reference"
        );
        if let Some(diff) = &report.offset_diff {
            info!(
                missing = diff.missing_total,
                unexpected = diff.unexpected_total,
                "Offset difference"
            );
        }
        Ok(Some(report))
    }
}

fn write_artifact(path: &Path, contents: &[u8]) -> Result<(), ReportError> {
    std::fs::write(path, contents).map_err(|source| ReportError::Write {
        path: path.to_path_buf(),
        source,
    })
}
