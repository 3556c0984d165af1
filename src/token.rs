//! Token definitions for Vela
//!
//! This module defines all the tokens that the lexer can produce.

use crate::span::Span;
use logos::Logos;
use std::fmt;

/// A token produced by the lexer
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

impl Token {
    pub fn new(kind: TokenKind, span: Span) -> Self {
        Self { kind, span }
    }

    /// Get the text of this token from source
    pub fn text<'a>(&self, source: &'a str) -> &'a str {
        self.span.text(source)
    }
}

/// All possible token types in Vela
///
/// Angle brackets always lex as single `LAngle`/`RAngle` tokens; the
/// parser concatenates textually-contiguous runs back into operators
/// like `>>` or `<=` so generic argument lists stay unambiguous.
#[derive(Logos, Debug, Clone, Copy, PartialEq, Eq)]
#[logos(skip r"[ \t\r\n\f]+")] // Skip whitespace
#[logos(skip r"//[^\n]*")] // Skip line comments
pub enum TokenKind {
    // ============ Literals ============
    /// Integer literal: 42, 0xFF, 0b1010, 0o77
    #[regex(r"[0-9][0-9_]*", priority = 2)]
    #[regex(r"0[xX][0-9a-fA-F][0-9a-fA-F_]*")]
    #[regex(r"0[bB][01][01_]*")]
    #[regex(r"0[oO][0-7][0-7_]*")]
    Int,

    /// Float literal: 3.14, 1e10, 2.5e-3
    #[regex(r"[0-9][0-9_]*\.[0-9][0-9_]*([eE][+-]?[0-9][0-9_]*)?")]
    #[regex(r"[0-9][0-9_]*[eE][+-]?[0-9][0-9_]*")]
    Float,

    /// String literal: "hello", "with \"escapes\""
    #[regex(r#""([^"\\]|\\.)*""#)]
    Str,

    /// Boolean literals
    #[token("true")]
    True,
    #[token("false")]
    False,

    // ============ Keywords ============
    #[token("val")]
    Val,
    #[token("var")]
    Var,
    #[token("fun")]
    Fun,
    #[token("new")]
    New,
    #[token("del")]
    Del,
    #[token("type")]
    Type,
    #[token("view")]
    View,
    #[token("extn")]
    Extn,
    #[token("if")]
    If,
    #[token("match")]
    Match,
    #[token("case")]
    Case,
    #[token("where")]
    Where,
    #[token("ret")]
    Ret,
    #[token("break")]
    Break,
    #[token("continue")]
    Continue,
    #[token("async")]
    Async,
    #[token("await")]
    Await,
    #[token("for")]
    For,
    #[token("while")]
    While,
    #[token("pub")]
    Pub,
    #[token("mod")]
    Mod,
    #[token("mut")]
    Mut,
    #[token("infix")]
    Infix,
    #[token("prefix")]
    Prefix,
    #[token("postfix")]
    Postfix,
    #[token("volatile")]
    Volatile,
    #[token("static")]
    Static,
    #[token("moveonly")]
    Moveonly,

    /// Cast operator: `as?` (dynamic) or `as!` (unsafe)
    #[regex(r"as[?!]")]
    Cast,

    // ============ Punctuation ============
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token("[")]
    LBrack,
    #[token("]")]
    RBrack,
    #[token("<")]
    LAngle,
    #[token(">")]
    RAngle,
    #[token(",")]
    Comma,
    #[token(";")]
    Semi,
    #[token("::")]
    TwoColons,
    #[token(":")]
    Colon,
    #[token(".")]
    Dot,
    #[token("->")]
    Arrow,
    #[token("=", priority = 10)]
    Assign,
    #[token("_", priority = 10)]
    Under,

    // ============ Operators ============
    /// A maximal run of operator characters. Angle brackets are
    /// excluded; the parser glues them back on when contiguous.
    #[regex(r"[+\-*/%&|^!?~=]+", priority = 1)]
    Oper,

    // ============ Identifiers ============
    /// Identifier: foo, _bar, Collection
    #[regex(r"[a-zA-Z_][a-zA-Z0-9_]*")]
    Name,

    // ============ Special ============
    /// An unrecognized byte. Lexing continues past it.
    Error,
}

impl TokenKind {
    /// Check if this token is a keyword
    pub fn is_keyword(&self) -> bool {
        matches!(
            self,
            TokenKind::Val
                | TokenKind::Var
                | TokenKind::Fun
                | TokenKind::New
                | TokenKind::Del
                | TokenKind::Type
                | TokenKind::View
                | TokenKind::Extn
                | TokenKind::If
                | TokenKind::Match
                | TokenKind::Case
                | TokenKind::Where
                | TokenKind::Ret
                | TokenKind::Break
                | TokenKind::Continue
                | TokenKind::Async
                | TokenKind::Await
                | TokenKind::For
                | TokenKind::While
                | TokenKind::Pub
                | TokenKind::Mod
                | TokenKind::Mut
                | TokenKind::Infix
                | TokenKind::Prefix
                | TokenKind::Postfix
                | TokenKind::Volatile
                | TokenKind::Static
                | TokenKind::Moveonly
                | TokenKind::True
                | TokenKind::False
        )
    }

    /// Check if this token is a literal
    pub fn is_literal(&self) -> bool {
        matches!(
            self,
            TokenKind::Int | TokenKind::Float | TokenKind::Str | TokenKind::True | TokenKind::False
        )
    }

    /// Check if this token is a declaration modifier
    pub fn is_decl_modifier(&self) -> bool {
        matches!(
            self,
            TokenKind::Pub
                | TokenKind::Mod
                | TokenKind::Mut
                | TokenKind::Infix
                | TokenKind::Prefix
                | TokenKind::Postfix
                | TokenKind::Volatile
                | TokenKind::Static
                | TokenKind::Moveonly
        )
    }

    /// Check if this token can begin a declaration. Used by the
    /// top-level recovery loop.
    pub fn can_start_decl(&self) -> bool {
        self.is_decl_modifier()
            || matches!(
                self,
                TokenKind::Val
                    | TokenKind::Var
                    | TokenKind::Fun
                    | TokenKind::New
                    | TokenKind::Del
                    | TokenKind::Type
                    | TokenKind::View
                    | TokenKind::Extn
            )
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TokenKind::Int => "integer",
            TokenKind::Float => "float",
            TokenKind::Str => "string",
            TokenKind::True => "true",
            TokenKind::False => "false",
            TokenKind::Val => "val",
            TokenKind::Var => "var",
            TokenKind::Fun => "fun",
            TokenKind::New => "new",
            TokenKind::Del => "del",
            TokenKind::Type => "type",
            TokenKind::View => "view",
            TokenKind::Extn => "extn",
            TokenKind::If => "if",
            TokenKind::Match => "match",
            TokenKind::Case => "case",
            TokenKind::Where => "where",
            TokenKind::Ret => "ret",
            TokenKind::Break => "break",
            TokenKind::Continue => "continue",
            TokenKind::Async => "async",
            TokenKind::Await => "await",
            TokenKind::For => "for",
            TokenKind::While => "while",
            TokenKind::Pub => "pub",
            TokenKind::Mod => "mod",
            TokenKind::Mut => "mut",
            TokenKind::Infix => "infix",
            TokenKind::Prefix => "prefix",
            TokenKind::Postfix => "postfix",
            TokenKind::Volatile => "volatile",
            TokenKind::Static => "static",
            TokenKind::Moveonly => "moveonly",
            TokenKind::Cast => "cast operator",
            TokenKind::LParen => "(",
            TokenKind::RParen => ")",
            TokenKind::LBrace => "{",
            TokenKind::RBrace => "}",
            TokenKind::LBrack => "[",
            TokenKind::RBrack => "]",
            TokenKind::LAngle => "<",
            TokenKind::RAngle => ">",
            TokenKind::Comma => ",",
            TokenKind::Semi => ";",
            TokenKind::TwoColons => "::",
            TokenKind::Colon => ":",
            TokenKind::Dot => ".",
            TokenKind::Arrow => "->",
            TokenKind::Assign => "=",
            TokenKind::Under => "_",
            TokenKind::Oper => "operator",
            TokenKind::Name => "identifier",
            TokenKind::Error => "invalid character",
        };
        write!(f, "{}", s)
    }
}
