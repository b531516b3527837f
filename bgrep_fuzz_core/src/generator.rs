use crate::case::TestCase;
use rand::Rng;

/// Default upper bound on the data buffer length, in bytes.
pub const DEFAULT_MAX_DATA_LEN: usize = 1024 * 1024;
/// Default upper bound on the search pattern length, in bytes.
pub const DEFAULT_MAX_PATTERN_LEN: usize = 50;

/// A `CaseGenerator` produces fresh test cases for each iteration of the
/// fuzzing loop.
///
/// # Type Parameters
/// * `R`: The type of random number generator used for generation decisions.
pub trait CaseGenerator<R: Rng + ?Sized> {
    /// Produces a new, independent test case.
    ///
    /// Generation is pure: no I/O happens here, so the only failure mode is a
    /// misconfigured generator (e.g. a zero pattern bound).
    fn generate(&mut self, rng: &mut R) -> Result<TestCase, anyhow::Error>;
}

/// Generates data and patterns of uniformly random length and content.
///
/// Random content over a wide length range gives statistical coverage of the
/// interesting shapes (no match, matches at either end of the buffer,
/// overlapping repeats) without any structure-aware logic.
#[derive(Debug, Clone, Copy)]
pub struct RandomCaseGenerator {
    max_data_len: usize,
    max_pattern_len: usize,
}

impl RandomCaseGenerator {
    /// Creates a new generator.
    ///
    /// # Arguments
    /// * `max_data_len`: Inclusive upper bound on the data length (may be 0).
    /// * `max_pattern_len`: Inclusive upper bound on the pattern length (at least 1).
    pub fn new(max_data_len: usize, max_pattern_len: usize) -> Result<Self, anyhow::Error> {
        if max_pattern_len == 0 {
            anyhow::bail!("max pattern length must be at least 1");
        }
        Ok(Self {
            max_data_len,
            max_pattern_len,
        })
    }

    pub fn max_data_len(&self) -> usize {
        self.max_data_len
    }

    pub fn max_pattern_len(&self) -> usize {
        self.max_pattern_len
    }
}

impl<R: Rng + ?Sized> CaseGenerator<R> for RandomCaseGenerator {
    fn generate(&mut self, rng: &mut R) -> Result<TestCase, anyhow::Error> {
        Ok(generate(rng, self.max_data_len, self.max_pattern_len)?)
    }
}

/// Draws one test case with independent, uniformly distributed lengths.
///
/// Data length is drawn from `[0, max_data_len]` and pattern length from
/// `[1, max_pattern_len]`.
pub fn generate<R: Rng + ?Sized>(
    rng: &mut R,
    max_data_len: usize,
    max_pattern_len: usize,
) -> Result<TestCase, crate::case::CaseError> {
    let data_len = rng.random_range(0..=max_data_len);
    let pattern_len = rng.random_range(1..=max_pattern_len.max(1));

    let mut data = vec![0u8; data_len];
    rng.fill(data.as_mut_slice());
    let mut pattern = vec![0u8; pattern_len];
    rng.fill(pattern.as_mut_slice());

    TestCase::new(data, pattern)
}
