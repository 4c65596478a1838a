//! Token streams consumed by the segment writer
//!
//! Linguistic analysis is out of scope for the engine; it only needs a
//! sequence of `(term, position, start_offset, end_offset)` per field.
//! `WhitespaceAnalyzer` is the minimal producer used by tests and tools.

use crate::segment::types::Term;

/// One token of a field
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Token {
    pub term: Term,
    pub position: u32,
    /// Byte offset of the token's first byte in the source text
    pub start_offset: u32,
    /// Byte offset one past the token's last byte
    pub end_offset: u32,
}

impl Token {
    pub fn new(term: impl Into<Term>, position: u32, start_offset: u32, end_offset: u32) -> Self {
        Self {
            term: term.into(),
            position,
            start_offset,
            end_offset,
        }
    }
}

/// Produces tokens from raw text
///
/// A token stream is finite; calling `tokens` again restarts it.
pub trait Analyzer: Send + Sync {
    fn tokens<'a>(&'a self, text: &'a str) -> Box<dyn Iterator<Item = Token> + 'a>;

    /// Collect the whole stream
    fn analyze(&self, text: &str) -> Vec<Token> {
        self.tokens(text).collect()
    }
}

/// Splits on Unicode whitespace, optionally lowercasing
#[derive(Clone, Debug)]
pub struct WhitespaceAnalyzer {
    lowercase: bool,
}

impl WhitespaceAnalyzer {
    pub fn new() -> Self {
        Self { lowercase: true }
    }

    pub fn preserving_case() -> Self {
        Self { lowercase: false }
    }
}

impl Default for WhitespaceAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl Analyzer for WhitespaceAnalyzer {
    fn tokens<'a>(&'a self, text: &'a str) -> Box<dyn Iterator<Item = Token> + 'a> {
        let mut start: Option<usize> = None;
        let mut bounds = Vec::new();
        for (i, c) in text.char_indices() {
            match (c.is_whitespace(), start) {
                (true, Some(s)) => {
                    bounds.push((s, i));
                    start = None;
                }
                (false, None) => start = Some(i),
                _ => {}
            }
        }
        if let Some(s) = start {
            bounds.push((s, text.len()));
        }

        Box::new(bounds.into_iter().enumerate().map(move |(position, (s, e))| {
            let word = &text[s..e];
            let term = if self.lowercase {
                Term::from(word.to_lowercase())
            } else {
                Term::from(word)
            };
            Token::new(term, position as u32, s as u32, e as u32)
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_whitespace_tokens() {
        let tokens = WhitespaceAnalyzer::new().analyze("  Hello  wide\tWorld ");
        assert_eq!(
            tokens,
            vec![
                Token::new("hello", 0, 2, 7),
                Token::new("wide", 1, 9, 13),
                Token::new("world", 2, 14, 19),
            ]
        );
    }

    #[test]
    fn test_preserving_case_and_restart() {
        let analyzer = WhitespaceAnalyzer::preserving_case();
        let first: Vec<Token> = analyzer.tokens("A b").collect();
        let second: Vec<Token> = analyzer.tokens("A b").collect();
        assert_eq!(first, second);
        assert_eq!(first[0].term, Term::from("A"));
        assert!(analyzer.analyze("   ").is_empty());
    }

    #[test]
    fn test_multibyte_offsets() {
        let tokens = WhitespaceAnalyzer::new().analyze("café au");
        assert_eq!(tokens[0].end_offset, 5);
        assert_eq!(tokens[1], Token::new("au", 1, 6, 8));
    }
}
