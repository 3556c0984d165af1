//! Lexer for Vela
//!
//! The lexer converts the bytes of one source file into a stream of
//! tokens, lazily. It uses the `logos` crate for the recognizer. An
//! unrecognized byte becomes a `TokenKind::Error` token; lexing never
//! halts early. `next_token` returns `None` at end of input.

use crate::source::SourceFile;
use crate::span::{SourceId, Span};
use crate::token::{Token, TokenKind};
use logos::Logos;

/// The lexer for one source file
///
/// Cloning a `Lexer` is cheap (a byte position over borrowed text), so
/// the parser can save and restore lexing state freely.
#[derive(Clone)]
pub struct Lexer<'src> {
    source: SourceId,
    text: &'src str,
    inner: logos::Lexer<'src, TokenKind>,
}

impl<'src> Lexer<'src> {
    /// Create a new lexer over a registered source file
    pub fn new(file: &'src SourceFile) -> Self {
        Self {
            source: file.id,
            text: &file.text,
            inner: TokenKind::lexer(&file.text),
        }
    }

    /// The id of the file being lexed
    pub fn source(&self) -> SourceId {
        self.source
    }

    /// The full text being lexed
    pub fn text(&self) -> &'src str {
        self.text
    }

    /// A span covering the end of input
    pub fn eof_span(&self) -> Span {
        Span::empty(self.source, self.text.len())
    }

    /// Get the next token, or `None` at end of input
    pub fn next_token(&mut self) -> Option<Token> {
        let kind = match self.inner.next()? {
            Ok(kind) => kind,
            // An unknown byte becomes an error token; callers diagnose
            // it and move on.
            Err(()) => TokenKind::Error,
        };
        let range = self.inner.span();
        Some(Token::new(kind, Span::new(self.source, range.start, range.end)))
    }

    /// Collect all remaining tokens into a vector
    pub fn tokenize(mut self) -> Vec<Token> {
        let mut tokens = Vec::new();
        while let Some(token) = self.next_token() {
            tokens.push(token);
        }
        tokens
    }
}

impl<'src> Iterator for Lexer<'src> {
    type Item = Token;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_token()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::SourceMap;

    fn lex(source: &str) -> Vec<Token> {
        let mut map = SourceMap::new();
        let id = map.load_synthesized("test.vl", source);
        Lexer::new(map.get(id)).tokenize()
    }

    fn token_kinds(source: &str) -> Vec<TokenKind> {
        lex(source).into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_empty_source() {
        assert!(token_kinds("").is_empty());
    }

    #[test]
    fn test_whitespace_only() {
        assert!(token_kinds("   \t\n  ").is_empty());
    }

    #[test]
    fn test_integers() {
        let kinds = token_kinds("42 0xFF 0b1010 0o77");
        assert_eq!(
            kinds,
            vec![TokenKind::Int, TokenKind::Int, TokenKind::Int, TokenKind::Int]
        );
    }

    #[test]
    fn test_floats() {
        let kinds = token_kinds("3.14 1e10 2.5e-3");
        assert_eq!(
            kinds,
            vec![TokenKind::Float, TokenKind::Float, TokenKind::Float]
        );
    }

    #[test]
    fn test_string_spans_quotes() {
        let tokens = lex(r#""Salut""#);
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].kind, TokenKind::Str);
        assert_eq!(tokens[0].span.start, 0);
        assert_eq!(tokens[0].span.end, 7);
    }

    #[test]
    fn test_keywords() {
        let kinds = token_kinds("val var fun type view extn match where ret");
        assert_eq!(
            kinds,
            vec![
                TokenKind::Val,
                TokenKind::Var,
                TokenKind::Fun,
                TokenKind::Type,
                TokenKind::View,
                TokenKind::Extn,
                TokenKind::Match,
                TokenKind::Where,
                TokenKind::Ret,
            ]
        );
    }

    #[test]
    fn test_angles_lex_individually() {
        // `>>` is two adjacent RAngle tokens; the parser glues them.
        let tokens = lex("a >> b");
        let kinds: Vec<_> = tokens.iter().map(|t| t.kind).collect();
        assert_eq!(
            kinds,
            vec![TokenKind::Name, TokenKind::RAngle, TokenKind::RAngle, TokenKind::Name]
        );
        assert!(tokens[1].span.touches(tokens[2].span));
    }

    #[test]
    fn test_operators() {
        let kinds = token_kinds("+ - == != && || -> = ::");
        assert_eq!(
            kinds,
            vec![
                TokenKind::Oper,
                TokenKind::Oper,
                TokenKind::Oper,
                TokenKind::Oper,
                TokenKind::Oper,
                TokenKind::Oper,
                TokenKind::Arrow,
                TokenKind::Assign,
                TokenKind::TwoColons,
            ]
        );
    }

    #[test]
    fn test_cast_tokens() {
        let kinds = token_kinds("x as? T as! U");
        assert_eq!(
            kinds,
            vec![
                TokenKind::Name,
                TokenKind::Cast,
                TokenKind::Name,
                TokenKind::Cast,
                TokenKind::Name,
            ]
        );
    }

    #[test]
    fn test_underscore() {
        let kinds = token_kinds("_ _tail");
        assert_eq!(kinds, vec![TokenKind::Under, TokenKind::Name]);
    }

    #[test]
    fn test_unknown_byte_is_error_token() {
        let kinds = token_kinds("val x @ 1");
        assert_eq!(
            kinds,
            vec![TokenKind::Val, TokenKind::Name, TokenKind::Error, TokenKind::Int]
        );
    }

    #[test]
    fn test_comments() {
        let kinds = token_kinds("// nothing here\nval x = 42 // tail");
        assert_eq!(
            kinds,
            vec![TokenKind::Val, TokenKind::Name, TokenKind::Assign, TokenKind::Int]
        );
    }

    #[test]
    fn test_tokens_cover_non_whitespace_content() {
        let source = "fun add(a: Int) -> Int { ret a }";
        let tokens = lex(source);
        let covered: String = tokens.iter().map(|t| t.text(source)).collect();
        let stripped: String = source.split_whitespace().collect();
        assert_eq!(covered, stripped);
    }
}
