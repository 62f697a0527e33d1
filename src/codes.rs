//! Pulling product codes out of OCRed text.
//!
//! A product code is a run of 12 or 13 decimal digits (UPC-A or EAN-13
//! sized). We only ever look at whole runs of digits, so a 15-digit serial
//! number never yields a truncated "code".

use std::sync::LazyLock;

use regex::Regex;

/// Minimum number of digits in a code.
pub const MIN_CODE_DIGITS: usize = 12;

/// Maximum number of digits in a code.
pub const MAX_CODE_DIGITS: usize = 13;

/// Matches a maximal run of ASCII digits. Anything else, including letters,
/// ends a run.
static DIGIT_RUN_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[0-9]+").expect("failed to compile regex"));

/// Extract the first 12- or 13-digit code from `text`, if there is one.
pub fn extract_code(text: &str) -> Option<&str> {
    DIGIT_RUN_REGEX
        .find_iter(text)
        .map(|m| m.as_str())
        .find(|run| (MIN_CODE_DIGITS..=MAX_CODE_DIGITS).contains(&run.len()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_twelve_digit_code() {
        assert_eq!(
            extract_code("SKU:123456789012 lot 55"),
            Some("123456789012")
        );
    }

    #[test]
    fn letters_bound_a_thirteen_digit_code() {
        assert_eq!(extract_code("ab1234567890123cd"), Some("1234567890123"));
    }

    #[test]
    fn short_and_long_runs_are_not_codes() {
        assert_eq!(extract_code("12345"), None);
        assert_eq!(extract_code("123456789012345"), None);
        assert_eq!(extract_code("12345678901"), None);
        assert_eq!(extract_code(""), None);
        assert_eq!(extract_code("no digits here"), None);
    }

    #[test]
    fn first_qualifying_run_wins() {
        let text = "ref 123456789012345\nEAN 4006381333931 UPC 036000291452";
        assert_eq!(extract_code(text), Some("4006381333931"));
    }

    #[test]
    fn punctuation_splits_runs() {
        assert_eq!(extract_code("4006-381333931"), None);
        assert_eq!(extract_code("(036000291452)."), Some("036000291452"));
    }

    #[test]
    fn non_ascii_digits_end_a_run() {
        // Arabic-Indic digits are not part of a code.
        assert_eq!(extract_code("٣123456789012"), Some("123456789012"));
    }

    #[test]
    fn extraction_is_deterministic() {
        let text = "lot 7 / 5012345678900 / 999";
        assert_eq!(extract_code(text), extract_code(text));
    }
}
