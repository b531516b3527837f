use crate::case::TestCase;

/// Offsets into a data buffer at which a pattern occurs, ascending and
/// duplicate-free.
pub type MatchSet = Vec<u64>;

/// A `ReferenceOracle` computes the ground-truth answer the tool under test is
/// judged against.
///
/// Implementations must be obviously correct rather than fast: any
/// disagreement between the oracle and the tool is reported as a bug in the
/// tool.
pub trait ReferenceOracle: Send + Sync {
    /// Returns every offset at which `case.pattern()` occurs in `case.data()`.
    fn matches(&self, case: &TestCase) -> MatchSet;
}

/// Brute-force oracle: compares the pattern against every candidate offset.
#[derive(Debug, Default, Clone, Copy)]
pub struct NaiveOracle;

impl NaiveOracle {
    pub fn new() -> Self {
        NaiveOracle
    }
}

impl ReferenceOracle for NaiveOracle {
    fn matches(&self, case: &TestCase) -> MatchSet {
        find_all(case.data(), case.pattern())
    }
}

/// Finds all (possibly overlapping) occurrences of `pattern` in `data`.
///
/// Returns an empty set when the pattern is longer than the data. An empty
/// pattern is rejected earlier by `TestCase::new` and yields no matches here.
pub fn find_all(data: &[u8], pattern: &[u8]) -> MatchSet {
    let mut offsets = MatchSet::new();
    if pattern.is_empty() || pattern.len() > data.len() {
        return offsets;
    }
    for start in 0..=data.len() - pattern.len() {
        if &data[start..start + pattern.len()] == pattern {
            offsets.push(start as u64);
        }
    }
    offsets
}
