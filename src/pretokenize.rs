//! Pre-tokenization: splitting text into pieces and locating special tokens.
//!
//! The piece patterns here have no look-around, so the `\s+(?!\S)` branch of
//! the reference patterns is emulated after the fact: a whitespace run that
//! is directly followed by a non-space character gives up its last character
//! to the next piece. [`WhitespaceMode`] records whether (and how) a pattern
//! needs that treatment.

use fancy_regex::Regex;
use rustc_hash::FxHashSet;

use crate::encoding::{CL100K_PATTERN, O200K_BASE_PATTERN, R50K_PATTERN};

/// How trailing whitespace in a matched piece is handed to the next piece.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WhitespaceMode {
    /// Pieces are used exactly as matched.
    None,
    /// Any whitespace run followed by a non-space gives up its last character.
    CollapseAll,
    /// Like `CollapseAll`, except runs containing `\r` or `\n` are kept whole.
    CollapseExceptNewline,
}

impl WhitespaceMode {
    /// Classify a piece pattern. Only the bundled patterns are known to need
    /// the look-ahead emulation; anything else is used as matched.
    pub fn for_pattern(pattern: &str) -> Self {
        if pattern == R50K_PATTERN {
            WhitespaceMode::CollapseAll
        } else if pattern == CL100K_PATTERN || pattern == O200K_BASE_PATTERN {
            WhitespaceMode::CollapseExceptNewline
        } else {
            WhitespaceMode::None
        }
    }

    /// Length in bytes that `piece` keeps once the look-ahead rule is
    /// applied. `rest` is the text following the piece.
    fn trimmed_len(self, piece: &str, rest: &str) -> usize {
        if self == WhitespaceMode::None || !is_whitespace_only(piece) {
            return piece.len();
        }
        if self == WhitespaceMode::CollapseExceptNewline && piece.contains(['\n', '\r']) {
            return piece.len();
        }
        match rest.chars().next() {
            Some(next) if !next.is_whitespace() => {}
            _ => return piece.len(),
        }
        match piece.char_indices().next_back() {
            Some((last_start, _)) if last_start > 0 => last_start,
            _ => piece.len(),
        }
    }
}

fn is_whitespace_only(s: &str) -> bool {
    !s.is_empty() && s.chars().all(char::is_whitespace)
}

/// Left-to-right partition of a text into pieces.
///
/// `regex` must be anchored at the start of its input. When it doesn't match
/// (or the backtracking engine gives up) a single character is emitted so
/// the split always makes progress.
pub struct Pieces<'r, 't> {
    regex: &'r Regex,
    mode: WhitespaceMode,
    text: &'t str,
}

impl<'r, 't> Pieces<'r, 't> {
    pub fn new(regex: &'r Regex, mode: WhitespaceMode, text: &'t str) -> Self {
        Pieces { regex, mode, text }
    }
}

impl<'t> Iterator for Pieces<'_, 't> {
    type Item = &'t str;

    fn next(&mut self) -> Option<&'t str> {
        let text = self.text;
        let first = text.chars().next()?;

        let len = match self.regex.find(text) {
            Ok(Some(m)) if m.start() == 0 && m.end() > 0 => {
                let piece = &text[..m.end()];
                self.mode.trimmed_len(piece, &text[m.end()..])
            }
            _ => first.len_utf8(),
        };

        let (piece, rest) = text.split_at(len);
        self.text = rest;
        Some(piece)
    }
}

/// Build an alternation matching any of `literals`, longest first so that a
/// literal is never shadowed by one of its own prefixes.
pub fn special_tokens_regex<'a, I>(literals: I) -> Result<Option<Regex>, fancy_regex::Error>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut keys: Vec<&str> = literals.into_iter().filter(|k| !k.is_empty()).collect();
    if keys.is_empty() {
        return Ok(None);
    }
    keys.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
    keys.dedup();

    let alternation = keys
        .iter()
        .map(|k| fancy_regex::escape(k))
        .collect::<Vec<_>>()
        .join("|");
    Regex::new(&alternation).map(Some)
}

/// Find the first special token at or after `start` that is in `allowed`.
///
/// Matches that are not allowed are treated as ordinary text; scanning
/// resumes one character past where they began. Returns the byte offset of
/// the token and the literal itself.
pub fn find_allowed_special<'t>(
    regex: Option<&Regex>,
    text: &'t str,
    start: usize,
    allowed: &FxHashSet<&str>,
) -> Option<(usize, &'t str)> {
    let regex = regex?;
    if allowed.is_empty() {
        return None;
    }

    let mut pos = start;
    while pos < text.len() {
        let m = regex.find_from_pos(text, pos).ok().flatten()?;
        let literal = m.as_str();
        if allowed.contains(literal) {
            return Some((m.start(), literal));
        }
        pos = m.start() + literal.chars().next().map_or(1, char::len_utf8);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn anchored(pattern: &str) -> Regex {
        Regex::new(&format!("^(?:{pattern})")).unwrap()
    }

    fn split(pattern: &str, text: &str) -> Vec<String> {
        let regex = anchored(pattern);
        Pieces::new(&regex, WhitespaceMode::for_pattern(pattern), text)
            .map(str::to_owned)
            .collect()
    }

    #[test]
    fn test_mode_classification() {
        assert_eq!(
            WhitespaceMode::for_pattern(O200K_BASE_PATTERN),
            WhitespaceMode::CollapseExceptNewline
        );
        assert_eq!(
            WhitespaceMode::for_pattern(CL100K_PATTERN),
            WhitespaceMode::CollapseExceptNewline
        );
        assert_eq!(
            WhitespaceMode::for_pattern(R50K_PATTERN),
            WhitespaceMode::CollapseAll
        );
        assert_eq!(WhitespaceMode::for_pattern(r"\S+|\s+"), WhitespaceMode::None);
    }

    #[test]
    fn test_o200k_words() {
        assert_eq!(split(O200K_BASE_PATTERN, "hello world"), ["hello", " world"]);
        assert_eq!(
            split(O200K_BASE_PATTERN, "Hello, world!"),
            ["Hello", ",", " world", "!"]
        );
        assert_eq!(split(O200K_BASE_PATTERN, "12345"), ["123", "45"]);
        assert_eq!(split(O200K_BASE_PATTERN, "don't"), ["don't"]);
    }

    #[test]
    fn test_whitespace_run_gives_last_space_to_next_word() {
        assert_eq!(split(O200K_BASE_PATTERN, "a   b"), ["a", "  ", " b"]);
        assert_eq!(split(O200K_BASE_PATTERN, "a\t\tb"), ["a", "\t", "\tb"]);
    }

    #[test]
    fn test_single_space_before_digit_is_kept() {
        assert_eq!(split(O200K_BASE_PATTERN, "a 1"), ["a", " ", "1"]);
    }

    #[test]
    fn test_trailing_whitespace_is_kept_whole() {
        assert_eq!(split(O200K_BASE_PATTERN, "a   "), ["a", "   "]);
    }

    #[test]
    fn test_whitespace_before_whitespace_is_kept_whole() {
        assert_eq!(split(O200K_BASE_PATTERN, "a  \n\nb"), ["a", "  \n\n", "b"]);
    }

    #[test]
    fn test_newline_runs_depend_on_mode() {
        assert_eq!(split(O200K_BASE_PATTERN, "a\n\nb"), ["a", "\n\n", "b"]);
        assert_eq!(split(R50K_PATTERN, "a\n\nb"), ["a", "\n", "\n", "b"]);
    }

    #[test]
    fn test_no_mode_uses_matches_as_is() {
        assert_eq!(split(r"\S+|\s+", "a   b"), ["a", "   ", "b"]);
    }

    #[test]
    fn test_unicode_whitespace_trims_by_char() {
        // U+3000 is three bytes; the split must land on a char boundary.
        assert_eq!(
            split(O200K_BASE_PATTERN, "a\u{3000}\u{3000}b"),
            ["a", "\u{3000}", "\u{3000}b"]
        );
    }

    #[test]
    fn test_unmatched_text_falls_back_to_single_chars() {
        assert_eq!(split("x", "xyé"), ["x", "y", "é"]);
    }

    #[test]
    fn test_pieces_partition_text() {
        let text = "Multi-line\ntext  with\r\n  odd   spacing, 12345 and émoji 🦀!";
        let pieces = split(O200K_BASE_PATTERN, text);
        assert_eq!(pieces.concat(), text);
        assert!(pieces.iter().all(|p| !p.is_empty()));
    }

    fn allowed<'a>(items: &[&'a str]) -> FxHashSet<&'a str> {
        items.iter().copied().collect()
    }

    #[test]
    fn test_special_regex_prefers_longest() {
        let regex = special_tokens_regex(["A", "AB"]).unwrap().unwrap();
        let found = find_allowed_special(Some(&regex), "xxABy", 0, &allowed(&["A", "AB"]));
        assert_eq!(found, Some((2, "AB")));
    }

    #[test]
    fn test_special_regex_escapes_literals() {
        let regex = special_tokens_regex(["<|endoftext|>"]).unwrap().unwrap();
        let text = "a<|endoftext|>b";
        let found = find_allowed_special(Some(&regex), text, 0, &allowed(&["<|endoftext|>"]));
        assert_eq!(found, Some((1, "<|endoftext|>")));
        assert_eq!(find_allowed_special(Some(&regex), "a<b", 0, &allowed(&["<|endoftext|>"])), None);
    }

    #[test]
    fn test_disallowed_special_is_skipped() {
        let regex = special_tokens_regex(["<a>", "<b>"]).unwrap().unwrap();
        let text = "<a> then <b>";
        assert_eq!(
            find_allowed_special(Some(&regex), text, 0, &allowed(&["<b>"])),
            Some((9, "<b>"))
        );
        assert_eq!(find_allowed_special(Some(&regex), text, 0, &allowed(&[])), None);
    }

    #[test]
    fn test_scan_resumes_on_char_boundary() {
        let regex = special_tokens_regex(["é<", "<x>"]).unwrap().unwrap();
        let found = find_allowed_special(Some(&regex), "é<x>", 0, &allowed(&["<x>"]));
        assert_eq!(found, Some((2, "<x>")));
    }

    #[test]
    fn test_empty_literals_are_ignored() {
        assert!(special_tokens_regex([""]).unwrap().is_none());
        assert!(special_tokens_regex(std::iter::empty()).unwrap().is_none());
    }

    #[test]
    fn test_scan_starts_at_offset() {
        let regex = special_tokens_regex(["<x>"]).unwrap().unwrap();
        let found = find_allowed_special(Some(&regex), "<x><x>", 1, &allowed(&["<x>"]));
        assert_eq!(found, Some((3, "<x>")));
    }
}
