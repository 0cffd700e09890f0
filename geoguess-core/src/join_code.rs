//! Numeric join codes players type to find a lobby.

use std::sync::LazyLock;

use rand::Rng;
use regex::Regex;

pub const JOIN_CODE_LENGTH: usize = 6;

static JOIN_CODE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9]{4,6}$").expect("join code pattern is valid"));

/// Random 6-digit code. Leading zeros are kept so every code has the same length.
pub fn generate_join_code() -> String {
    let mut rng = rand::thread_rng();
    (0..JOIN_CODE_LENGTH)
        .map(|_| char::from(b'0' + rng.gen_range(0..10u8)))
        .collect()
}

/// Cheap format check done before any store lookup.
pub fn is_valid_join_code(code: &str) -> bool {
    JOIN_CODE_PATTERN.is_match(code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_codes_are_valid() {
        for _ in 0..100 {
            let code = generate_join_code();
            assert_eq!(code.len(), JOIN_CODE_LENGTH);
            assert!(is_valid_join_code(&code), "{}", code);
        }
    }

    #[test]
    fn test_code_validation() {
        assert!(is_valid_join_code("1234"));
        assert!(is_valid_join_code("12345"));
        assert!(is_valid_join_code("000123"));

        assert!(!is_valid_join_code("123"));
        assert!(!is_valid_join_code("1234567"));
        assert!(!is_valid_join_code("12a456"));
        assert!(!is_valid_join_code(" 123456"));
        assert!(!is_valid_join_code(""));
    }
}
