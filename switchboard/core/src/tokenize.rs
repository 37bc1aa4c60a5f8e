//! Payload word splitting for [`ArgMode::Split`](crate::dispatch::ArgMode::Split)
//!
//! Words are separated by ASCII whitespace. A single-quoted run is kept as
//! one word with the quotes removed; `'a b'c` yields `a bc`. An unterminated
//! quote extends to the end of the payload. No escapes are recognised.

/// Split a payload into words
#[must_use]
pub fn split_words(payload: &[u8]) -> Vec<Vec<u8>> {
    let mut words = Vec::new();
    let mut current = Vec::new();
    let mut in_word = false;
    let mut quoted = false;

    for &byte in payload {
        match byte {
            b'\'' => {
                quoted = !quoted;
                in_word = true;
            }
            b if b.is_ascii_whitespace() && !quoted => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            b => {
                current.push(b);
                in_word = true;
            }
        }
    }
    if in_word {
        words.push(current);
    }
    words
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn words(input: &str) -> Vec<String> {
        split_words(input.as_bytes())
            .into_iter()
            .map(|w| String::from_utf8(w).unwrap())
            .collect()
    }

    #[test]
    fn test_plain_words() {
        assert_eq!(words("  one two\tthree\n"), vec!["one", "two", "three"]);
    }

    #[test]
    fn test_quoted_run_is_one_word() {
        assert_eq!(words("set 'hello world' now"), vec!["set", "hello world", "now"]);
    }

    #[test]
    fn test_quotes_join_adjacent_text() {
        assert_eq!(words("'a b'c d"), vec!["a bc", "d"]);
    }

    #[test]
    fn test_empty_quotes_yield_empty_word() {
        assert_eq!(words("x '' y"), vec!["x", "", "y"]);
    }

    #[test]
    fn test_unterminated_quote_runs_to_end() {
        assert_eq!(words("a 'b c"), vec!["a", "b c"]);
    }

    #[test]
    fn test_empty_payload() {
        assert!(split_words(b"").is_empty());
        assert!(split_words(b"   ").is_empty());
    }

    #[test]
    fn test_non_utf8_bytes_pass_through() {
        assert_eq!(split_words(&[0xFF, b' ', 0xFE]), vec![vec![0xFF], vec![0xFE]]);
    }
}
