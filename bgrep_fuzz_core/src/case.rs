use std::fmt::Write as _;
use thiserror::Error;

/// Errors produced while building a `TestCase` or decoding pattern text.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum CaseError {
    #[error("Search pattern must contain at least one byte")]
    EmptyPattern,
    #[error("Hex string has odd length {0}")]
    OddHexLength(usize),
    #[error("Invalid hex digit {digit:?} at position {position}")]
    InvalidHexDigit { digit: char, position: usize },
}

/// One generated input for the tool under test: a data buffer and the pattern
/// to search for in it.
///
/// The data may be shorter than the pattern (that case simply has no matches),
/// but the pattern always holds at least one byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestCase {
    data: Vec<u8>,
    pattern: Vec<u8>,
}

impl TestCase {
    pub fn new(data: Vec<u8>, pattern: Vec<u8>) -> Result<Self, CaseError> {
        if pattern.is_empty() {
            return Err(CaseError::EmptyPattern);
        }
        Ok(Self { data, pattern })
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn pattern(&self) -> &[u8] {
        &self.pattern
    }

    /// The pattern as the tool expects it on its command line.
    pub fn pattern_hex(&self) -> String {
        encode_hex(&self.pattern)
    }

    /// MD5 digest of the data buffer, as lowercase hex.
    pub fn fingerprint(&self) -> String {
        format!("{:x}", md5::compute(&self.data))
    }
}

/// Encodes bytes as lowercase hex with no prefix or separators.
pub fn encode_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        // Writing into a String cannot fail.
        let _ = write!(out, "{byte:02x}");
    }
    out
}

/// Decodes a hex string (either case) into bytes.
///
/// An empty string decodes to an empty vector; callers that need a non-empty
/// pattern go through `TestCase::new`.
pub fn decode_hex(text: &str) -> Result<Vec<u8>, CaseError> {
    let digits = text.as_bytes();
    if digits.len() % 2 != 0 {
        return Err(CaseError::OddHexLength(digits.len()));
    }

    let nibble = |position: usize| -> Result<u8, CaseError> {
        let digit = digits[position];
        match digit {
            b'0'..=b'9' => Ok(digit - b'0'),
            b'a'..=b'f' => Ok(digit - b'a' + 10),
            b'A'..=b'F' => Ok(digit - b'A' + 10),
            _ => Err(CaseError::InvalidHexDigit {
                digit: char::from(digit),
                position,
            }),
        }
    };

    (0..digits.len())
        .step_by(2)
        .map(|i| Ok((nibble(i)? << 4) | nibble(i + 1)?))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_case_rejects_empty_pattern() {
        assert_eq!(
            TestCase::new(vec![1, 2, 3], Vec::new()),
            Err(CaseError::EmptyPattern)
        );
    }

    #[test]
    fn test_case_allows_data_shorter_than_pattern() {
        let case = TestCase::new(vec![], vec![0x01, 0x02]).expect("valid case");
        assert!(case.data().is_empty());
        assert_eq!(case.pattern(), &[0x01, 0x02]);
    }

    #[test]
    fn pattern_hex_is_lowercase_without_prefix() {
        let case = TestCase::new(vec![0], vec![0x00, 0xAB, 0x0f, 0xff]).unwrap();
        assert_eq!(case.pattern_hex(), "00ab0fff");
    }

    #[test]
    fn fingerprint_is_md5_of_data() {
        let case = TestCase::new(b"hello".to_vec(), vec![1]).unwrap();
        assert_eq!(case.fingerprint(), "5d41402abc4b2a76b9719d911017c592");
    }

    #[test]
    fn decode_hex_accepts_both_cases() {
        assert_eq!(decode_hex("00aBfF10").unwrap(), vec![0x00, 0xab, 0xff, 0x10]);
        assert_eq!(decode_hex("").unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn decode_hex_rejects_odd_length_and_bad_digits() {
        assert_eq!(decode_hex("abc"), Err(CaseError::OddHexLength(3)));
        assert_eq!(
            decode_hex("0g"),
            Err(CaseError::InvalidHexDigit {
                digit: 'g',
                position: 1
            })
        );
    }

    #[test]
    fn decode_inverts_encode() {
        let bytes: Vec<u8> = (0..=255).collect();
        assert_eq!(decode_hex(&encode_hex(&bytes)).unwrap(), bytes);
    }
}
