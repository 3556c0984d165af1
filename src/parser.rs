//! Parser for Vela
//!
//! A recursive descent parser with one token of lookahead and cheap
//! save/restore: parser state is a clonable lexer position plus the
//! buffered lookahead, so productions can backtrack arbitrary
//! distances. Errors recover at declaration, statement, and list
//! boundaries; the parser always returns a traversable unit and flags
//! `has_error` instead of aborting.

use crate::ast::*;
use crate::diag::{Diagnostic, DiagnosticConsumer, DiagnosticLog, Level};
use crate::source::SourceFile;
use crate::span::Span;
use crate::token::{Token, TokenKind};
use thiserror::Error;

/// Parser errors. Used for local backtracking inside one production;
/// never escapes `parse`: recovery converts these into diagnostics.
#[derive(Error, Debug, Clone)]
pub enum ParseError {
    #[error("expected {expected}, found {found}")]
    Unexpected {
        expected: String,
        found: String,
        span: Span,
    },

    #[error("unexpected end of file")]
    UnexpectedEof { span: Span },
}

impl ParseError {
    pub fn span(&self) -> Span {
        match self {
            ParseError::Unexpected { span, .. } => *span,
            ParseError::UnexpectedEof { span } => *span,
        }
    }
}

/// Parse result
pub type ParseResult<T> = Result<T, ParseError>;

/// Parse a source file into a unit plus its diagnostics
pub fn parse(file: &SourceFile) -> (SourceUnit, Vec<Diagnostic>) {
    let mut parser = Parser::new(file);
    let unit = parser.parse_unit();
    (unit, parser.diags.diags)
}

/// An operator as written in source, possibly glued together from
/// adjacent angle-bracket and operator tokens
#[derive(Debug, Clone, PartialEq)]
pub struct SourceOper {
    pub text: String,
    pub span: Span,
}

/// Precedence of an infix operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrecedenceGroup {
    pub weight: u8,
    pub right_assoc: bool,
}

const ASSIGNMENT: PrecedenceGroup = PrecedenceGroup { weight: 10, right_assoc: true };
const DISJUNCTION: PrecedenceGroup = PrecedenceGroup { weight: 20, right_assoc: false };
const CONJUNCTION: PrecedenceGroup = PrecedenceGroup { weight: 30, right_assoc: false };
const COMPARISON: PrecedenceGroup = PrecedenceGroup { weight: 40, right_assoc: false };
const IDENTIFIER: PrecedenceGroup = PrecedenceGroup { weight: 50, right_assoc: false };
const CASTING: PrecedenceGroup = PrecedenceGroup { weight: 60, right_assoc: false };
const ADDITION: PrecedenceGroup = PrecedenceGroup { weight: 70, right_assoc: false };
const MULTIPLICATION: PrecedenceGroup = PrecedenceGroup { weight: 80, right_assoc: false };
const SHIFT: PrecedenceGroup = PrecedenceGroup { weight: 90, right_assoc: false };

/// Can a token begin a prefix expression?
fn can_start_operand(kind: TokenKind) -> bool {
    matches!(
        kind,
        TokenKind::Name
            | TokenKind::Int
            | TokenKind::Float
            | TokenKind::Str
            | TokenKind::True
            | TokenKind::False
            | TokenKind::Under
            | TokenKind::LParen
            | TokenKind::Match
            | TokenKind::Async
            | TokenKind::Await
            | TokenKind::Oper
            | TokenKind::Error
    )
}

/// Precedence of an operator by its spelling
fn group_for_operator(text: &str) -> PrecedenceGroup {
    match text {
        "=" => ASSIGNMENT,
        "||" => DISJUNCTION,
        "&&" => CONJUNCTION,
        "==" | "!=" | "<" | ">" | "<=" | ">=" => COMPARISON,
        "<<" | ">>" => SHIFT,
        _ => {
            if text.ends_with('=') {
                // Compound assignments: `+=`, `<<=`, ...
                return ASSIGNMENT;
            }
            match text.as_bytes().first() {
                Some(b'+') | Some(b'-') | Some(b'|') | Some(b'^') => ADDITION,
                Some(b'*') | Some(b'/') | Some(b'%') | Some(b'&') => MULTIPLICATION,
                _ => COMPARISON,
            }
        }
    }
}

/// The right-hand side of an infix entry: expressions for ordinary
/// operators, a signature for casts
#[derive(Debug, Clone)]
enum InfixLeaf {
    Expr(Expr),
    Sign(Sign),
}

/// An auxiliary tree encoding precedence and associativity of a run of
/// infix operators before flattening to AST call nodes
#[derive(Debug, Clone)]
enum InfixTree {
    Leaf(InfixLeaf),
    Node {
        oper: SourceOper,
        group: PrecedenceGroup,
        left: Box<InfixTree>,
        right: Box<InfixTree>,
    },
}

impl InfixTree {
    fn leaf(expr: Expr) -> Self {
        InfixTree::Leaf(InfixLeaf::Expr(expr))
    }

    /// Insert `(oper, group, rhs)`: descend right while the new
    /// operator binds strictly tighter than the pending one, or as
    /// tight with right associativity; otherwise the new operator
    /// rotates up. A signature leaf is atomic (the cast it belongs to
    /// groups first).
    fn append(self, oper: SourceOper, group: PrecedenceGroup, rhs: InfixLeaf) -> InfixTree {
        match self {
            InfixTree::Leaf(_) => InfixTree::Node {
                oper,
                group,
                left: Box::new(self),
                right: Box::new(InfixTree::Leaf(rhs)),
            },
            InfixTree::Node {
                oper: pending,
                group: pending_group,
                left,
                right,
            } => {
                let descend = (group.weight > pending_group.weight
                    || (group.weight == pending_group.weight && group.right_assoc))
                    && !matches!(*right, InfixTree::Leaf(InfixLeaf::Sign(_)));
                if descend {
                    InfixTree::Node {
                        oper: pending,
                        group: pending_group,
                        left,
                        right: Box::new(right.append(oper, group, rhs)),
                    }
                } else {
                    InfixTree::Node {
                        oper,
                        group,
                        left: Box::new(InfixTree::Node {
                            oper: pending,
                            group: pending_group,
                            left,
                            right,
                        }),
                        right: Box::new(InfixTree::Leaf(rhs)),
                    }
                }
            }
        }
    }

    /// Produce the AST: `=` becomes an assignment, `as?`/`as!` become
    /// casts, everything else an infix call through an unresolved
    /// member.
    fn flatten(self) -> Expr {
        match self {
            InfixTree::Leaf(InfixLeaf::Expr(e)) => e,
            InfixTree::Leaf(InfixLeaf::Sign(_)) => {
                unreachable!("type signature leaf outside a cast")
            }
            InfixTree::Node {
                oper, left, right, ..
            } => {
                let lhs = left.flatten();
                if oper.text == "=" {
                    let rhs = right.flatten();
                    let span = lhs.span.merge(rhs.span);
                    Expr::new(
                        ExprKind::Assign {
                            target: Box::new(lhs),
                            value: Box::new(rhs),
                        },
                        span,
                    )
                } else if oper.text == "as?" || oper.text == "as!" {
                    let sign = match *right {
                        InfixTree::Leaf(InfixLeaf::Sign(s)) => s,
                        _ => unreachable!("cast without a signature operand"),
                    };
                    let span = lhs.span.merge(sign.span);
                    let kind = if oper.text == "as?" {
                        ExprKind::DynCast {
                            operand: Box::new(lhs),
                            target: sign,
                        }
                    } else {
                        ExprKind::UnsafeCast {
                            operand: Box::new(lhs),
                            target: sign,
                        }
                    };
                    Expr::new(kind, span)
                } else {
                    let rhs = right.flatten();
                    let span = lhs.span.merge(rhs.span);
                    let callee = Expr::new(
                        ExprKind::Member {
                            base: Box::new(lhs),
                            member: Ident::new(oper.text, oper.span),
                        },
                        span,
                    );
                    Expr::new(
                        ExprKind::Call {
                            callee: Box::new(callee),
                            args: vec![Argument {
                                label: None,
                                value: rhs,
                            }],
                            style: CallStyle::Infix,
                        },
                        span,
                    )
                }
            }
        }
    }
}

/// Which productions the parser is currently inside
#[derive(Debug, Clone, Copy, Default)]
struct Flags {
    top_level: bool,
    product_body: bool,
    view_body: bool,
    extension_body: bool,
    function_body: bool,
    #[allow(dead_code)]
    loop_body: bool,
}

/// A saved parser state, restorable at any time
struct Snapshot<'src> {
    lexer: crate::lexer::Lexer<'src>,
    lookahead: Option<Token>,
    space: DeclSpaceId,
    flags: Flags,
    has_error: bool,
    last_end: usize,
    diag_checkpoint: usize,
    spaces_len: usize,
    next_binding: u32,
}

/// The parser for Vela
pub struct Parser<'src> {
    file: &'src SourceFile,
    lexer: crate::lexer::Lexer<'src>,
    /// One buffered token of lookahead
    lookahead: Option<Token>,
    /// The declaration space new declarations are parented to
    space: DeclSpaceId,
    flags: Flags,
    /// Sticky: set by every error diagnostic
    has_error: bool,
    /// End offset of the last consumed token
    last_end: usize,
    diags: DiagnosticLog,
    spaces: Vec<DeclSpace>,
    next_binding: u32,
}

impl<'src> Parser<'src> {
    /// Create a new parser over a registered source file
    pub fn new(file: &'src SourceFile) -> Self {
        Self {
            file,
            lexer: crate::lexer::Lexer::new(file),
            lookahead: None,
            space: ROOT_SPACE,
            flags: Flags {
                top_level: true,
                ..Flags::default()
            },
            has_error: false,
            last_end: 0,
            diags: DiagnosticLog::new(),
            spaces: vec![DeclSpace {
                parent: None,
                kind: DeclSpaceKind::Unit,
            }],
            next_binding: 0,
        }
    }

    /// Get parse diagnostics accumulated so far
    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diags.diags
    }

    // ============ Primitives ============

    fn peek(&mut self) -> Option<&Token> {
        if self.lookahead.is_none() {
            self.lookahead = self.lexer.next_token();
        }
        self.lookahead.as_ref()
    }

    fn peek_kind(&mut self) -> Option<TokenKind> {
        self.peek().map(|t| t.kind)
    }

    fn take(&mut self) -> Option<Token> {
        let token = match self.lookahead.take() {
            Some(t) => Some(t),
            None => self.lexer.next_token(),
        };
        if let Some(ref t) = token {
            self.last_end = t.span.end;
        }
        token
    }

    fn take_kind(&mut self, kind: TokenKind) -> Option<Token> {
        if self.peek_kind() == Some(kind) {
            self.take()
        } else {
            None
        }
    }

    fn take_if(&mut self, pred: impl Fn(&Token) -> bool) -> Option<Token> {
        if self.peek().map(|t| pred(t)).unwrap_or(false) {
            self.take()
        } else {
            None
        }
    }

    /// Skip tokens while `pred` holds
    fn skip_while(&mut self, pred: impl Fn(TokenKind) -> bool) {
        while let Some(kind) = self.peek_kind() {
            if !pred(kind) {
                break;
            }
            self.take();
        }
    }

    fn expect(&mut self, kind: TokenKind, expected: &str) -> ParseResult<Token> {
        self.take_kind(kind).ok_or_else(|| self.unexpected(expected))
    }

    /// The range diagnostics anchor to: the next token, else EOF
    fn error_span(&mut self) -> Span {
        match self.peek() {
            Some(t) => t.span,
            None => self.lexer.eof_span(),
        }
    }

    fn unexpected(&mut self, expected: &str) -> ParseError {
        match self.peek() {
            Some(t) => ParseError::Unexpected {
                expected: expected.to_string(),
                found: t.kind.to_string(),
                span: t.span,
            },
            None => ParseError::UnexpectedEof {
                span: self.lexer.eof_span(),
            },
        }
    }

    fn save(&mut self) -> Snapshot<'src> {
        Snapshot {
            lexer: self.lexer.clone(),
            lookahead: self.lookahead.clone(),
            space: self.space,
            flags: self.flags,
            has_error: self.has_error,
            last_end: self.last_end,
            diag_checkpoint: self.diags.checkpoint(),
            spaces_len: self.spaces.len(),
            next_binding: self.next_binding,
        }
    }

    fn restore(&mut self, snap: Snapshot<'src>) {
        self.lexer = snap.lexer;
        self.lookahead = snap.lookahead;
        self.space = snap.space;
        self.flags = snap.flags;
        self.has_error = snap.has_error;
        self.last_end = snap.last_end;
        // Diagnostics issued while speculating are dropped on backtrack
        self.diags.truncate(snap.diag_checkpoint);
        self.spaces.truncate(snap.spaces_len);
        self.next_binding = snap.next_binding;
    }

    /// Run `f` speculatively: keep its results and diagnostics on
    /// success, roll everything back on failure.
    fn speculate<T>(&mut self, f: impl FnOnce(&mut Self) -> ParseResult<T>) -> Option<T> {
        let snap = self.save();
        match f(self) {
            Ok(v) => Some(v),
            Err(_) => {
                self.restore(snap);
                None
            }
        }
    }

    fn diagnose(&mut self, diag: Diagnostic) {
        if diag.level == Level::Error {
            self.has_error = true;
        }
        self.diags.report(diag);
    }

    fn text(&self, token: &Token) -> &'src str {
        token.span.text(&self.file.text)
    }

    fn same_line(&self, a: usize, b: usize) -> bool {
        self.file.line_index(a) == self.file.line_index(b)
    }

    /// True if the byte right after `pos` is whitespace or EOF
    fn followed_by_gap(&self, pos: usize) -> bool {
        match self.file.text.as_bytes().get(pos) {
            None => true,
            Some(b) => b.is_ascii_whitespace(),
        }
    }

    fn span_from(&self, start: usize) -> Span {
        Span::new(self.file.id, start, self.last_end)
    }

    fn fresh_binding(&mut self) -> BindingId {
        let id = BindingId(self.next_binding);
        self.next_binding += 1;
        id
    }

    /// Allocate a child declaration space and make it current.
    /// Returns the new space and the one to restore on exit.
    fn enter_space(&mut self, kind: DeclSpaceKind) -> (DeclSpaceId, DeclSpaceId) {
        let id = DeclSpaceId(self.spaces.len() as u32);
        self.spaces.push(DeclSpace {
            parent: Some(self.space),
            kind,
        });
        let saved = self.space;
        self.space = id;
        (id, saved)
    }

    /// Take one operator token, gluing a leading angle bracket onto
    /// the operator characters that textually touch it. This is how
    /// `>>` and `<=` come back out of the individually-lexed angle
    /// tokens.
    fn take_operator(&mut self, including_assign: bool) -> Option<SourceOper> {
        let first = self.peek()?.clone();
        match first.kind {
            TokenKind::Oper => {
                self.take();
                Some(SourceOper {
                    text: self.text(&first).to_string(),
                    span: first.span,
                })
            }
            TokenKind::Assign if including_assign => {
                self.take();
                Some(SourceOper {
                    text: "=".to_string(),
                    span: first.span,
                })
            }
            TokenKind::LAngle | TokenKind::RAngle => {
                self.take();
                let mut text = self.text(&first).to_string();
                let mut span = first.span;
                loop {
                    let next = match self.peek() {
                        Some(t) => t.clone(),
                        None => break,
                    };
                    let continues = matches!(
                        next.kind,
                        TokenKind::Oper
                            | TokenKind::Assign
                            | TokenKind::LAngle
                            | TokenKind::RAngle
                    );
                    if !continues || !span.touches(next.span) {
                        break;
                    }
                    self.take();
                    text.push_str(self.text(&next));
                    span = span.merge(next.span);
                }
                Some(SourceOper { text, span })
            }
            _ => None,
        }
    }

    /// Peek the spelling of the next plain operator token
    fn peek_oper_text(&mut self) -> Option<&'src str> {
        let file = self.file;
        match self.peek() {
            Some(t) if t.kind == TokenKind::Oper => Some(t.span.text(&file.text)),
            _ => None,
        }
    }

    // ============ Top level ============

    /// Parse the whole unit, recovering at declaration boundaries
    pub fn parse_unit(&mut self) -> SourceUnit {
        let mut decls = Vec::new();

        loop {
            while self.take_kind(TokenKind::Semi).is_some() {}
            if self.peek().is_none() {
                break;
            }
            let before = self.error_span().start;
            match self.parse_decl() {
                Ok(decl) => decls.push(decl),
                Err(e) => {
                    self.diagnose(Diagnostic::error(e.to_string(), e.span()));
                    self.recover_to_decl_boundary(before);
                }
            }
        }

        SourceUnit {
            decls,
            spaces: std::mem::take(&mut self.spaces),
            has_error: self.has_error,
            span: Span::new(self.file.id, 0, self.file.text.len()),
        }
    }

    /// Skip tokens until a `;`, a `}`, or something that can begin
    /// another declaration
    fn recover_to_decl_boundary(&mut self, before: usize) {
        // Always make progress, even when the failure consumed nothing
        if self.error_span().start == before {
            self.take();
        }
        while let Some(kind) = self.peek_kind() {
            match kind {
                TokenKind::Semi | TokenKind::RBrace => {
                    self.take();
                    return;
                }
                k if k.can_start_decl() => return,
                _ => {
                    self.take();
                }
            }
        }
    }

    // ============ Modifiers ============

    /// Parse zero or more declaration modifiers, enforcing the
    /// exclusivity sets and per-context legality
    fn parse_modifiers(&mut self) -> DeclModifiers {
        let mut mods = DeclModifiers::default();
        while let Some(token) = self.take_if(|t| t.kind.is_decl_modifier()) {
            let span = token.span;
            match token.kind {
                TokenKind::Pub | TokenKind::Mod => {
                    let access = if token.kind == TokenKind::Pub {
                        AccessModifier::Public
                    } else {
                        AccessModifier::Module
                    };
                    if mods.access.is_some() {
                        self.diagnose(Diagnostic::error(
                            "multiple access modifiers on a declaration",
                            span,
                        ));
                    } else {
                        mods.access = Some((access, span));
                    }
                }
                TokenKind::Infix | TokenKind::Prefix | TokenKind::Postfix => {
                    let notation = match token.kind {
                        TokenKind::Infix => OperatorNotation::Infix,
                        TokenKind::Prefix => OperatorNotation::Prefix,
                        _ => OperatorNotation::Postfix,
                    };
                    if mods.notation.is_some() {
                        self.diagnose(Diagnostic::error(
                            "infix, prefix, and postfix are mutually exclusive",
                            span,
                        ));
                    } else {
                        mods.notation = Some((notation, span));
                    }
                }
                TokenKind::Static => {
                    let in_type_body = self.flags.product_body
                        || self.flags.view_body
                        || self.flags.extension_body;
                    if !in_type_body {
                        self.diagnose(Diagnostic::error(
                            "'static' is only valid inside type bodies",
                            span,
                        ));
                    }
                    if mods.is_static.is_some() {
                        self.diagnose(Diagnostic::warning("duplicate 'static' modifier", span));
                    }
                    mods.is_static = Some(span);
                }
                TokenKind::Mut => {
                    if mods.is_mut.is_some() {
                        self.diagnose(Diagnostic::warning("duplicate 'mut' modifier", span));
                    }
                    mods.is_mut = Some(span);
                }
                TokenKind::Volatile => {
                    if mods.is_volatile.is_some() {
                        self.diagnose(Diagnostic::warning("duplicate 'volatile' modifier", span));
                    }
                    mods.is_volatile = Some(span);
                }
                TokenKind::Moveonly => {
                    if mods.is_moveonly.is_some() {
                        self.diagnose(Diagnostic::warning("duplicate 'moveonly' modifier", span));
                    }
                    mods.is_moveonly = Some(span);
                }
                _ => unreachable!("is_decl_modifier covers the modifier tokens"),
            }
        }
        mods
    }

    // ============ Declarations ============

    fn parse_decl(&mut self) -> ParseResult<Decl> {
        let start = self.error_span().start;
        let modifiers = self.parse_modifiers();

        match self.peek_kind() {
            Some(TokenKind::Val) | Some(TokenKind::Var) => {
                self.parse_binding_decl(modifiers, start)
            }
            Some(TokenKind::Fun) => self.parse_fun_decl(modifiers, start),
            Some(TokenKind::New) => self.parse_constructor_decl(modifiers, start),
            Some(TokenKind::Del) => {
                // No grammar exists for destructors yet.
                unimplemented!("destructor declarations are not implemented")
            }
            Some(TokenKind::Type) | Some(TokenKind::View) => {
                self.parse_type_decl(modifiers, start)
            }
            Some(TokenKind::Extn) => self.parse_extension_decl(modifiers, start),
            _ => Err(self.unexpected("a declaration")),
        }
    }

    /// `val`/`var` pattern with optional signature and initializer
    fn parse_binding_decl(&mut self, modifiers: DeclModifiers, start: usize) -> ParseResult<Decl> {
        if let Some((_, span)) = modifiers.notation {
            self.diagnose(Diagnostic::error(
                "operator notation is only valid on function declarations",
                span,
            ));
        }

        let intro = self.take().expect("caller saw val/var");
        let is_var = intro.kind == TokenKind::Var;
        let binding_id = self.fresh_binding();

        let sub = self.parse_pattern(binding_id)?;
        let sign = if self.take_kind(TokenKind::Colon).is_some() {
            Some(self.parse_sign()?)
        } else {
            None
        };
        let pattern = Pattern {
            span: self.span_from(sub.span.start),
            kind: PatternKind::Binding {
                is_var,
                sub: Box::new(sub),
                sign,
            },
        };

        let init = if self.take_kind(TokenKind::Assign).is_some() {
            Some(self.parse_expr()?)
        } else {
            None
        };

        Ok(Decl {
            kind: DeclKind::Binding(BindingDecl {
                is_var,
                binding_id,
                modifiers,
                pattern,
                init,
            }),
            span: self.span_from(start),
            space: self.space,
        })
    }

    /// Function, including operator functions
    fn parse_fun_decl(&mut self, modifiers: DeclModifiers, start: usize) -> ParseResult<Decl> {
        self.expect(TokenKind::Fun, "'fun'")?;

        let (name, is_operator) = if let Some(token) = self.take_kind(TokenKind::Name) {
            (Ident::new(self.text(&token), token.span), false)
        } else if let Some(op) = self.take_operator(false) {
            (Ident::new(op.text, op.span), true)
        } else {
            return Err(self.unexpected("a function name"));
        };

        if is_operator {
            let in_type_body =
                self.flags.product_body || self.flags.view_body || self.flags.extension_body;
            if !in_type_body {
                self.diagnose(Diagnostic::error(
                    "operator functions must be type members",
                    name.span,
                ));
            }
            if let Some(span) = modifiers.is_static {
                self.diagnose(Diagnostic::error(
                    "operator functions cannot be static",
                    span,
                ));
            }
        }

        let generics = self.parse_generic_clause_opt()?;

        let params = self.parse_list(
            TokenKind::LParen,
            TokenKind::RParen,
            "parameter list",
            &[TokenKind::Arrow, TokenKind::LBrace],
            |p| match p.peek_kind() {
                Some(TokenKind::Name) | Some(TokenKind::Under) => p.parse_param().map(Some),
                _ => Ok(None),
            },
        )?;

        if is_operator {
            match modifiers.notation {
                Some((OperatorNotation::Infix, _)) if params.len() != 1 => {
                    self.diagnose(Diagnostic::error(
                        "infix operator functions take exactly one parameter",
                        name.span,
                    ));
                }
                Some((OperatorNotation::Prefix, _)) | Some((OperatorNotation::Postfix, _))
                    if !params.is_empty() =>
                {
                    self.diagnose(Diagnostic::error(
                        "prefix and postfix operator functions take no parameters",
                        name.span,
                    ));
                }
                None => {
                    self.diagnose(Diagnostic::error(
                        "operator functions require an infix, prefix, or postfix modifier",
                        name.span,
                    ));
                }
                _ => {}
            }
        }

        let output = if self.take_kind(TokenKind::Arrow).is_some() {
            Some(self.parse_sign()?)
        } else {
            None
        };

        let (body_space, saved) = self.enter_space(DeclSpaceKind::Function);
        let body = if self.peek_kind() == Some(TokenKind::LBrace) {
            let saved_flags = self.flags;
            self.flags.top_level = false;
            self.flags.function_body = true;
            let stmts = self.parse_brace_stmts();
            self.flags = saved_flags;
            Some(stmts?)
        } else {
            if !self.flags.view_body {
                let span = self.error_span();
                self.diagnose(Diagnostic::error(
                    "function declaration requires a body",
                    span,
                ));
            }
            None
        };
        self.space = saved;

        Ok(Decl {
            kind: DeclKind::Function(FunDecl {
                name,
                is_operator,
                modifiers,
                generics,
                params,
                output,
                body,
                body_space,
            }),
            span: self.span_from(start),
            space: self.space,
        })
    }

    /// `new(params) { ... }`
    fn parse_constructor_decl(
        &mut self,
        modifiers: DeclModifiers,
        start: usize,
    ) -> ParseResult<Decl> {
        self.expect(TokenKind::New, "'new'")?;

        if !(self.flags.product_body || self.flags.extension_body) {
            let span = self.error_span();
            self.diagnose(Diagnostic::error(
                "constructors are only valid inside type bodies",
                span,
            ));
        }

        let params = self.parse_list(
            TokenKind::LParen,
            TokenKind::RParen,
            "parameter list",
            &[TokenKind::LBrace],
            |p| match p.peek_kind() {
                Some(TokenKind::Name) | Some(TokenKind::Under) => p.parse_param().map(Some),
                _ => Ok(None),
            },
        )?;

        let (body_space, saved) = self.enter_space(DeclSpaceKind::Function);
        let saved_flags = self.flags;
        self.flags.top_level = false;
        self.flags.function_body = true;
        let body = self.parse_brace_stmts();
        self.flags = saved_flags;
        self.space = saved;

        Ok(Decl {
            kind: DeclKind::Constructor(ConstructorDecl {
                modifiers,
                params,
                body: body?,
                body_space,
            }),
            span: self.span_from(start),
            space: self.space,
        })
    }

    /// Function parameter: `(label | '_')? name ':' sign`
    fn parse_param(&mut self) -> ParseResult<Param> {
        let start = self.error_span().start;

        let (label, name) = if self.take_kind(TokenKind::Under).is_some() {
            // `_ name: Sign` — anonymous argument
            let token = self.expect(TokenKind::Name, "a parameter name")?;
            (None, Ident::new(self.text(&token), token.span))
        } else {
            let first_token = self.expect(TokenKind::Name, "a parameter name")?;
            let first = Ident::new(self.text(&first_token), first_token.span);
            if let Some(second_token) = self.take_kind(TokenKind::Name) {
                let second = Ident::new(self.text(&second_token), second_token.span);
                if first.name == second.name {
                    self.diagnose(Diagnostic::warning(
                        format!("external label '{}' is identical to the parameter name", first),
                        second.span,
                    ));
                }
                (Some(first), second)
            } else {
                // A single bareword is both label and name
                (Some(first.clone()), first)
            }
        };

        self.expect(TokenKind::Colon, "':'")?;
        let sign = self.parse_sign()?;

        Ok(Param {
            label,
            name,
            sign,
            span: self.span_from(start),
        })
    }

    /// Shared head `(type|view) NAME genericClause? inheritanceList?`,
    /// then dispatch on what follows
    fn parse_type_decl(&mut self, modifiers: DeclModifiers, start: usize) -> ParseResult<Decl> {
        let intro = self.take().expect("caller saw type/view");
        let is_view = intro.kind == TokenKind::View;

        if let Some((_, span)) = modifiers.notation {
            self.diagnose(Diagnostic::error(
                "operator notation is only valid on function declarations",
                span,
            ));
        }
        if is_view && !self.flags.top_level {
            self.diagnose(Diagnostic::error(
                "views must appear at top level",
                intro.span,
            ));
        }

        let name_token = self.expect(TokenKind::Name, "a type name")?;
        let name = Ident::new(self.text(&name_token), name_token.span);

        let mut generics = self.parse_generic_clause_opt()?;
        if is_view {
            if let Some(ref clause) = generics {
                self.diagnose(Diagnostic::error(
                    "views cannot declare generic clauses; use abstract type members",
                    clause.span,
                ));
            }
        }

        let inheritances = if self.take_kind(TokenKind::Colon).is_some() {
            let mut list = vec![self.parse_sign()?];
            while self.take_kind(TokenKind::Comma).is_some() {
                list.push(self.parse_sign()?);
            }
            list
        } else {
            Vec::new()
        };

        // A trailing where clause attaches to an existing generic
        // clause; with no clause it declares an abstract type
        // requirement set instead.
        if self.peek_kind() == Some(TokenKind::Where) {
            if let Some(ref mut clause) = generics {
                self.take();
                let requirements = self.parse_requirement_list()?;
                clause.requirements.extend(requirements);
            } else {
                self.take();
                let requirements = self.parse_requirement_list()?;
                if !self.flags.view_body {
                    self.diagnose(Diagnostic::error(
                        "abstract type requirements are only valid inside views",
                        name.span,
                    ));
                }
                return Ok(Decl {
                    kind: DeclKind::AbstractType(AbstractTypeDecl { name, requirements }),
                    span: self.span_from(start),
                    space: self.space,
                });
            }
        }

        if self.take_kind(TokenKind::Assign).is_some() {
            // `type Name = Sign`
            if is_view {
                self.diagnose(Diagnostic::error(
                    "views cannot be type aliases",
                    name.span,
                ));
            }
            let aliased = self.parse_sign()?;
            return Ok(Decl {
                kind: DeclKind::Alias(AliasDecl {
                    name,
                    modifiers,
                    generics,
                    aliased,
                }),
                span: self.span_from(start),
                space: self.space,
            });
        }

        if self.peek_kind() == Some(TokenKind::LBrace) {
            return if is_view {
                let (body_space, saved) = self.enter_space(DeclSpaceKind::View);
                let saved_flags = self.flags;
                self.flags.top_level = false;
                self.flags.view_body = true;
                self.flags.product_body = false;
                let members = self.parse_member_decls(true);
                self.flags = saved_flags;
                self.space = saved;
                Ok(Decl {
                    kind: DeclKind::View(ViewDecl {
                        name,
                        modifiers,
                        inheritances,
                        members: members?,
                        body_space,
                    }),
                    span: self.span_from(start),
                    space: self.space,
                })
            } else {
                let (body_space, saved) = self.enter_space(DeclSpaceKind::ProductType);
                let saved_flags = self.flags;
                self.flags.top_level = false;
                self.flags.product_body = true;
                self.flags.view_body = false;
                let members = self.parse_member_decls(false);
                self.flags = saved_flags;
                self.space = saved;
                Ok(Decl {
                    kind: DeclKind::Product(ProductTypeDecl {
                        name,
                        modifiers,
                        generics,
                        inheritances,
                        members: members?,
                        body_space,
                    }),
                    span: self.span_from(start),
                    space: self.space,
                })
            };
        }

        if is_view {
            return Err(self.unexpected("a view body"));
        }

        // Inside views, a bare `type Name` is an abstract member with
        // no requirements. Elsewhere a bodiless product declaration is
        // accepted with an empty member list.
        if self.flags.view_body {
            return Ok(Decl {
                kind: DeclKind::AbstractType(AbstractTypeDecl {
                    name,
                    requirements: Vec::new(),
                }),
                span: self.span_from(start),
                space: self.space,
            });
        }

        let (body_space, saved) = self.enter_space(DeclSpaceKind::ProductType);
        self.space = saved;
        Ok(Decl {
            kind: DeclKind::Product(ProductTypeDecl {
                name,
                modifiers,
                generics,
                inheritances,
                members: Vec::new(),
                body_space,
            }),
            span: self.span_from(start),
            space: self.space,
        })
    }

    /// `extn Subject { members }`
    fn parse_extension_decl(
        &mut self,
        _modifiers: DeclModifiers,
        start: usize,
    ) -> ParseResult<Decl> {
        let intro = self.expect(TokenKind::Extn, "'extn'")?;
        if !self.flags.top_level {
            self.diagnose(Diagnostic::error(
                "extensions must appear at top level",
                intro.span,
            ));
        }

        let subject = self.parse_sign()?;

        let (body_space, saved) = self.enter_space(DeclSpaceKind::Extension);
        let saved_flags = self.flags;
        self.flags.top_level = false;
        self.flags.extension_body = true;
        let members = self.parse_member_decls(false);
        self.flags = saved_flags;
        self.space = saved;

        Ok(Decl {
            kind: DeclKind::Extension(ExtensionDecl {
                subject,
                members: members?,
                body_space,
            }),
            span: self.span_from(start),
            space: self.space,
        })
    }

    /// A `{ decl* }` type body with declaration-boundary recovery.
    /// `in_view` enables the view-body content checks.
    fn parse_member_decls(&mut self, in_view: bool) -> ParseResult<Vec<Decl>> {
        self.expect(TokenKind::LBrace, "'{'")?;
        let mut members = Vec::new();

        loop {
            while self.take_kind(TokenKind::Semi).is_some() {}
            match self.peek_kind() {
                None => {
                    let span = self.lexer.eof_span();
                    self.diagnose(Diagnostic::error("unterminated type body", span));
                    break;
                }
                Some(TokenKind::RBrace) => {
                    self.take();
                    break;
                }
                _ => {}
            }

            let before = self.error_span().start;
            match self.parse_decl() {
                Ok(decl) => {
                    match &decl.kind {
                        DeclKind::AbstractType(a) if !in_view => {
                            self.diagnose(Diagnostic::error(
                                "abstract types are only valid inside views",
                                a.name.span,
                            ));
                        }
                        DeclKind::Product(p) if in_view => {
                            self.diagnose(Diagnostic::error(
                                "views cannot contain non-abstract type declarations",
                                p.name.span,
                            ));
                        }
                        DeclKind::Alias(a) if in_view => {
                            self.diagnose(Diagnostic::error(
                                "views cannot contain non-abstract type declarations",
                                a.name.span,
                            ));
                        }
                        _ => {}
                    }
                    members.push(decl);
                }
                Err(e) => {
                    self.diagnose(Diagnostic::error(e.to_string(), e.span()));
                    if self.error_span().start == before {
                        self.take();
                    }
                    self.skip_while(|k| {
                        k != TokenKind::Semi && k != TokenKind::RBrace && !k.can_start_decl()
                    });
                    if self.take_kind(TokenKind::Semi).is_none()
                        && self.peek_kind() == Some(TokenKind::RBrace)
                    {
                        self.take();
                        break;
                    }
                }
            }
        }

        Ok(members)
    }

    // ============ Generics ============

    /// `<A, B where A: Eq>` if present
    fn parse_generic_clause_opt(&mut self) -> ParseResult<Option<GenericClause>> {
        let open = match self.take_kind(TokenKind::LAngle) {
            Some(t) => t,
            None => return Ok(None),
        };

        let mut params = Vec::new();
        loop {
            let token = self.expect(TokenKind::Name, "a generic parameter name")?;
            params.push(GenericParamDecl {
                name: Ident::new(self.text(&token), token.span),
                span: token.span,
            });
            if self.take_kind(TokenKind::Comma).is_none() {
                break;
            }
        }

        let requirements = if self.take_kind(TokenKind::Where).is_some() {
            self.parse_requirement_list()?
        } else {
            Vec::new()
        };

        if self.take_kind(TokenKind::RAngle).is_none() {
            let span = self.error_span();
            self.diagnose(Diagnostic::error("expected '>'", span));
            self.skip_while(|k| {
                k != TokenKind::RAngle && k != TokenKind::RBrace && k != TokenKind::Semi
            });
            self.take_kind(TokenKind::RAngle);
        }

        Ok(Some(GenericClause {
            params,
            requirements,
            span: self.span_from(open.span.start),
        }))
    }

    /// Comma-separated type requirements
    fn parse_requirement_list(&mut self) -> ParseResult<Vec<TypeRequirement>> {
        let mut out = vec![self.parse_type_requirement()?];
        while self.take_kind(TokenKind::Comma).is_some() {
            out.push(self.parse_type_requirement()?);
        }
        Ok(out)
    }

    /// `compound-ident-sign ('==' | ':') sign`
    fn parse_type_requirement(&mut self) -> ParseResult<TypeRequirement> {
        let start = self.error_span().start;
        let lhs = self.parse_compound_ident_sign()?;

        let relation = if self.peek_oper_text() == Some("==") {
            self.take();
            RequirementRelation::Equality
        } else {
            self.expect(TokenKind::Colon, "':' or '==' in a type requirement")?;
            RequirementRelation::Conformance
        };

        let rhs = self.parse_sign()?;
        Ok(TypeRequirement {
            lhs,
            relation,
            rhs,
            span: self.span_from(start),
        })
    }

    // ============ Statements ============

    /// `{ stmt* }` with statement-boundary recovery
    fn parse_brace_stmts(&mut self) -> ParseResult<Vec<Stmt>> {
        self.expect(TokenKind::LBrace, "'{'")?;
        let mut stmts = Vec::new();

        loop {
            while self.take_kind(TokenKind::Semi).is_some() {}
            match self.peek_kind() {
                None => {
                    let span = self.lexer.eof_span();
                    self.diagnose(Diagnostic::error("unterminated block", span));
                    break;
                }
                Some(TokenKind::RBrace) => {
                    self.take();
                    break;
                }
                _ => {}
            }

            let before = self.error_span().start;
            match self.parse_stmt() {
                Ok(stmt) => stmts.push(stmt),
                Err(e) => {
                    self.diagnose(Diagnostic::error(e.to_string(), e.span()));
                    if self.error_span().start == before {
                        self.take();
                    }
                    self.skip_while(|k| {
                        k != TokenKind::Semi && k != TokenKind::RBrace && !k.can_start_decl()
                    });
                    self.take_kind(TokenKind::Semi);
                }
            }
        }

        Ok(stmts)
    }

    fn parse_stmt(&mut self) -> ParseResult<Stmt> {
        let start = self.error_span().start;
        match self.peek_kind() {
            Some(TokenKind::LBrace) => {
                let stmts = self.parse_brace_stmts()?;
                Ok(Stmt {
                    kind: StmtKind::Block(stmts),
                    span: self.span_from(start),
                })
            }
            Some(TokenKind::Ret) => {
                self.take();
                let value = match self.peek_kind() {
                    None | Some(TokenKind::RBrace) | Some(TokenKind::Semi) => None,
                    _ => Some(self.parse_expr()?),
                };
                Ok(Stmt {
                    kind: StmtKind::Return(value),
                    span: self.span_from(start),
                })
            }
            Some(TokenKind::Break) => {
                // No grammar exists for break statements yet.
                unimplemented!("break statements are not implemented")
            }
            Some(TokenKind::Continue) => {
                unimplemented!("continue statements are not implemented")
            }
            Some(TokenKind::For) => {
                unimplemented!("for loops are not implemented")
            }
            Some(TokenKind::While) => {
                unimplemented!("while loops are not implemented")
            }
            Some(k) if k.can_start_decl() => {
                let decl = self.parse_decl()?;
                Ok(Stmt {
                    kind: StmtKind::Decl(Box::new(decl)),
                    span: self.span_from(start),
                })
            }
            _ => {
                let expr = self.parse_expr()?;
                Ok(Stmt {
                    kind: StmtKind::Expr(Box::new(expr)),
                    span: self.span_from(start),
                })
            }
        }
    }

    // ============ Expressions ============

    /// Parse a full expression: a prefix expression followed by any
    /// number of binary suffixes, assembled through the infix tree.
    pub fn parse_expr(&mut self) -> ParseResult<Expr> {
        let head = self.parse_prefix_expr()?;
        let mut tree = InfixTree::leaf(head);

        loop {
            // Casting: the right operand is a type signature
            if let Some(cast) = self.peek().filter(|t| t.kind == TokenKind::Cast).cloned() {
                self.take();
                let oper = SourceOper {
                    text: self.text(&cast).to_string(),
                    span: cast.span,
                };
                let sign = self.parse_sign()?;
                tree = tree.append(oper, CASTING, InfixLeaf::Sign(sign));
                continue;
            }

            // Standard operator
            let lhs_end = self.last_end;
            let is_oper = matches!(
                self.peek_kind(),
                Some(TokenKind::Oper)
                    | Some(TokenKind::Assign)
                    | Some(TokenKind::LAngle)
                    | Some(TokenKind::RAngle)
            );
            if is_oper {
                let op = self.take_operator(true).expect("peeked an operator");
                let rhs = self.parse_prefix_expr()?;

                // One-sided whitespace around an infix operator is
                // probably a mistake.
                let gap_left = op.span.start > lhs_end;
                let gap_right = rhs.span.start > op.span.end;
                if gap_left != gap_right {
                    self.diagnose(Diagnostic::warning(
                        format!("inconsistent whitespace around '{}'", op.text),
                        op.span,
                    ));
                }

                let group = group_for_operator(&op.text);
                tree = tree.append(op, group, InfixLeaf::Expr(rhs));
                continue;
            }

            // Identifier used as infix, same-line-only like call
            // parentheses
            let candidate = self.peek().filter(|t| t.kind == TokenKind::Name).cloned();
            if let Some(candidate) = candidate {
                if self.same_line(self.last_end.saturating_sub(1), candidate.span.start) {
                    let name_text = self.text(&candidate).to_string();
                    let parsed = self.speculate(|p| {
                        p.take();
                        p.parse_prefix_expr()
                    });
                    if let Some(rhs) = parsed {
                        let oper = SourceOper {
                            text: name_text,
                            span: candidate.span,
                        };
                        tree = tree.append(oper, IDENTIFIER, InfixLeaf::Expr(rhs));
                        continue;
                    }
                }
            }

            break;
        }

        Ok(tree.flatten())
    }

    /// An optional prefix operator (never `=`, never a cast) attached
    /// to a compound expression. `&x` is an address-of; any other
    /// prefix operator lowers to a call through an unresolved member.
    fn parse_prefix_expr(&mut self) -> ParseResult<Expr> {
        if self.peek_kind() == Some(TokenKind::Oper) {
            let op = self.take_operator(false).expect("peeked an operator");
            let operand = self.parse_compound_expr()?;

            if op.span.end != operand.span.start {
                self.diagnose(Diagnostic::error(
                    format!("prefix operator '{}' is not attached to its operand", op.text),
                    op.span,
                ));
            }

            let span = op.span.merge(operand.span);
            if op.text == "&" {
                return Ok(Expr::new(
                    ExprKind::AddrOf {
                        operand: Box::new(operand),
                    },
                    span,
                ));
            }

            let callee = Expr::new(
                ExprKind::Member {
                    base: Box::new(operand),
                    member: Ident::new(op.text, op.span),
                },
                span,
            );
            return Ok(Expr::new(
                ExprKind::Call {
                    callee: Box::new(callee),
                    args: Vec::new(),
                    style: CallStyle::Prefix,
                },
                span,
            ));
        }

        self.parse_compound_expr()
    }

    /// A primary expression followed by calls, subscripts, member
    /// accesses, and postfix operators
    fn parse_compound_expr(&mut self) -> ParseResult<Expr> {
        let mut expr = self.parse_primary_expr()?;

        loop {
            match self.peek_kind() {
                // Call arguments must open on the same line as the
                // callee to avoid newline ambiguity.
                Some(TokenKind::LParen)
                    if {
                        let peek_start = self.peek().map(|t| t.span.start).unwrap_or(0);
                        self.same_line(expr.span.end.saturating_sub(1), peek_start)
                    } =>
                {
                    let args = self.parse_call_args(TokenKind::LParen, TokenKind::RParen)?;
                    let span = self.span_from(expr.span.start);
                    expr = Expr::new(
                        ExprKind::Call {
                            callee: Box::new(expr),
                            args,
                            style: CallStyle::Function,
                        },
                        span,
                    );
                }
                Some(TokenKind::LBrack) => {
                    let args = self.parse_call_args(TokenKind::LBrack, TokenKind::RBrack)?;
                    let span = self.span_from(expr.span.start);
                    expr = Expr::new(
                        ExprKind::Call {
                            callee: Box::new(expr),
                            args,
                            style: CallStyle::Subscript,
                        },
                        span,
                    );
                }
                Some(TokenKind::Dot) => {
                    self.take();
                    if let Some(index) = self.take_kind(TokenKind::Int) {
                        let text = self.text(&index);
                        let value = match text.parse::<u32>() {
                            Ok(v) => v,
                            Err(_) => {
                                self.diagnose(Diagnostic::error(
                                    "tuple member index is out of range",
                                    index.span,
                                ));
                                0
                            }
                        };
                        let span = self.span_from(expr.span.start);
                        expr = Expr::new(
                            ExprKind::TupleMember {
                                base: Box::new(expr),
                                index: value,
                            },
                            span,
                        );
                    } else if let Some(name) = self.take_kind(TokenKind::Name) {
                        let member = Ident::new(self.text(&name), name.span);
                        let span = self.span_from(expr.span.start);
                        expr = Expr::new(
                            ExprKind::Member {
                                base: Box::new(expr),
                                member,
                            },
                            span,
                        );
                    } else if let Some(op) = self.take_operator(true) {
                        let span = self.span_from(expr.span.start);
                        expr = Expr::new(
                            ExprKind::Member {
                                base: Box::new(expr),
                                member: Ident::new(op.text, op.span),
                            },
                            span,
                        );
                    } else {
                        return Err(self.unexpected("a member name, operator, or tuple index"));
                    }
                }
                // A postfix operator is attached to its operand and
                // followed by whitespace or end of input. If an
                // operand follows, the operator is left for the infix
                // loop instead (which warns about the one-sided gap).
                Some(TokenKind::Oper) => {
                    let token = self.peek().expect("peeked").clone();
                    let attached = expr.span.end == token.span.start;
                    if !attached || !self.followed_by_gap(token.span.end) {
                        break;
                    }
                    let snap = self.save();
                    self.take();
                    let operand_follows = self
                        .peek_kind()
                        .map(can_start_operand)
                        .unwrap_or(false);
                    self.restore(snap);
                    if operand_follows {
                        break;
                    }
                    self.take();
                    let op_text = self.text(&token).to_string();
                    let span = self.span_from(expr.span.start);
                    let callee = Expr::new(
                        ExprKind::Member {
                            base: Box::new(expr),
                            member: Ident::new(op_text, token.span),
                        },
                        span,
                    );
                    expr = Expr::new(
                        ExprKind::Call {
                            callee: Box::new(callee),
                            args: Vec::new(),
                            style: CallStyle::Postfix,
                        },
                        span,
                    );
                }
                _ => break,
            }
        }

        Ok(expr)
    }

    /// Labeled call arguments
    fn parse_call_args(
        &mut self,
        left: TokenKind,
        right: TokenKind,
    ) -> ParseResult<Vec<Argument>> {
        let desc = if right == TokenKind::RParen { "')'" } else { "']'" };
        self.parse_list(left, right, desc, &[], |p| {
            if p.peek_kind() == Some(right) {
                return Ok(None);
            }
            let label = p.speculate(|p| {
                let token = p.expect(TokenKind::Name, "a label")?;
                let ident = Ident::new(p.text(&token), token.span);
                p.expect(TokenKind::Colon, "':'")?;
                Ok(ident)
            });
            let value = p.parse_expr()?;
            Ok(Some(Argument { label, value }))
        })
    }

    fn parse_primary_expr(&mut self) -> ParseResult<Expr> {
        let token = match self.peek() {
            Some(t) => t.clone(),
            None => return Err(self.unexpected("an expression")),
        };

        match token.kind {
            TokenKind::True | TokenKind::False => {
                self.take();
                Ok(Expr::new(
                    ExprKind::BoolLit(token.kind == TokenKind::True),
                    token.span,
                ))
            }
            TokenKind::Int => {
                self.take();
                let value = self.parse_int_text(&token);
                Ok(Expr::new(ExprKind::IntLit(value), token.span))
            }
            TokenKind::Float => {
                self.take();
                let text: String = self.text(&token).chars().filter(|&c| c != '_').collect();
                let value = text.parse::<f64>().unwrap_or_else(|_| {
                    self.diagnose(Diagnostic::error("invalid float literal", token.span));
                    0.0
                });
                Ok(Expr::new(ExprKind::FloatLit(value), token.span))
            }
            TokenKind::Str => {
                self.take();
                let value = self.unescape_string(&token);
                Ok(Expr::new(ExprKind::StrLit(value), token.span))
            }
            TokenKind::Under => {
                self.take();
                Ok(Expr::new(ExprKind::Wildcard, token.span))
            }
            TokenKind::Name => {
                let text = self.text(&token);
                if text == "self" || text == "this" {
                    self.take();
                    return Ok(Expr::new(ExprKind::Receiver, token.span));
                }
                self.parse_decl_ref()
            }
            TokenKind::LParen => self.parse_tuple_expr(),
            TokenKind::Match => self.parse_match_expr(),
            TokenKind::Async => {
                self.take();
                let operand = self.parse_prefix_expr()?;
                let span = token.span.merge(operand.span);
                Ok(Expr::new(
                    ExprKind::Async {
                        operand: Box::new(operand),
                    },
                    span,
                ))
            }
            TokenKind::Await => {
                self.take();
                let operand = self.parse_prefix_expr()?;
                let span = token.span.merge(operand.span);
                Ok(Expr::new(
                    ExprKind::Await {
                        operand: Box::new(operand),
                    },
                    span,
                ))
            }
            TokenKind::Error => {
                self.take();
                self.diagnose(Diagnostic::error(
                    format!("unknown character '{}'", self.text(&token)),
                    token.span,
                ));
                Ok(Expr::new(ExprKind::Error, token.span))
            }
            _ => Err(self.unexpected("an expression")),
        }
    }

    /// A possibly-qualified reference: a speculative `::`-separated
    /// path of type identifiers. Diagnostics raised while speculating
    /// are committed only if the path resolves; otherwise the parse
    /// backtracks to a bare reference.
    fn parse_decl_ref(&mut self) -> ParseResult<Expr> {
        let first_token = self.expect(TokenKind::Name, "an identifier")?;
        let first = Ident::new(self.text(&first_token), first_token.span);

        if self.peek_kind() != Some(TokenKind::TwoColons) {
            return Ok(Expr::new(
                ExprKind::UnresolvedRef {
                    qualification: Vec::new(),
                    name: first.clone(),
                },
                first.span,
            ));
        }

        let qualified = self.speculate(|p| {
            let mut components = vec![first.clone()];
            while p.take_kind(TokenKind::TwoColons).is_some() {
                let token = p.expect(TokenKind::Name, "an identifier after '::'")?;
                components.push(Ident::new(p.text(&token), token.span));
            }
            Ok(components)
        });

        match qualified {
            Some(mut components) if components.len() > 1 => {
                let name = components.pop().expect("at least two components");
                let span = self.span_from(first.span.start);
                Ok(Expr::new(
                    ExprKind::UnresolvedRef {
                        qualification: components,
                        name,
                    },
                    span,
                ))
            }
            _ => Ok(Expr::new(
                ExprKind::UnresolvedRef {
                    qualification: Vec::new(),
                    name: first.clone(),
                },
                first.span,
            )),
        }
    }

    /// `(a, b)` or `(label: a)`; a single unlabeled element is just a
    /// parenthesized expression
    fn parse_tuple_expr(&mut self) -> ParseResult<Expr> {
        let start = self.error_span().start;
        let mut elems = self.parse_list(
            TokenKind::LParen,
            TokenKind::RParen,
            "')'",
            &[],
            |p| {
                if p.peek_kind() == Some(TokenKind::RParen) {
                    return Ok(None);
                }
                let label = p.speculate(|p| {
                    let token = p.expect(TokenKind::Name, "a label")?;
                    let ident = Ident::new(p.text(&token), token.span);
                    p.expect(TokenKind::Colon, "':'")?;
                    Ok(ident)
                });
                let value = p.parse_expr()?;
                Ok(Some(TupleElem { label, value }))
            },
        )?;

        let span = self.span_from(start);
        if elems.len() == 1 && elems[0].label.is_none() {
            return Ok(elems.pop().expect("one element").value);
        }
        Ok(Expr::new(ExprKind::Tuple(elems), span))
    }

    /// `match subject { case pattern (where guard)? { ... } ... }`
    fn parse_match_expr(&mut self) -> ParseResult<Expr> {
        let start = self.error_span().start;
        self.expect(TokenKind::Match, "'match'")?;
        let subject = self.parse_expr()?;

        self.expect(TokenKind::LBrace, "'{'")?;
        let mut cases = Vec::new();
        loop {
            match self.peek_kind() {
                Some(TokenKind::Case) => {
                    let case_start = self.error_span().start;
                    self.take();
                    let binding = self.fresh_binding();
                    let pattern = self.parse_pattern(binding)?;
                    let guard = if self.take_kind(TokenKind::Where).is_some() {
                        Some(self.parse_expr()?)
                    } else {
                        None
                    };
                    let body = self.parse_brace_stmts()?;
                    cases.push(MatchCase {
                        pattern,
                        guard,
                        body,
                        span: self.span_from(case_start),
                    });
                }
                Some(TokenKind::RBrace) => {
                    self.take();
                    break;
                }
                _ => {
                    let span = self.error_span();
                    self.diagnose(Diagnostic::error("expected 'case' or '}'", span));
                    self.skip_while(|k| k != TokenKind::Case && k != TokenKind::RBrace);
                    if self.peek().is_none() {
                        break;
                    }
                }
            }
        }

        let span = self.span_from(start);
        Ok(Expr::new(
            ExprKind::Match {
                subject: Box::new(subject),
                cases,
            },
            span,
        ))
    }

    fn parse_int_text(&mut self, token: &Token) -> i64 {
        let raw: String = self.text(token).chars().filter(|&c| c != '_').collect();
        let parsed = if let Some(hex) = raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
            i64::from_str_radix(hex, 16)
        } else if let Some(bin) = raw.strip_prefix("0b").or_else(|| raw.strip_prefix("0B")) {
            i64::from_str_radix(bin, 2)
        } else if let Some(oct) = raw.strip_prefix("0o").or_else(|| raw.strip_prefix("0O")) {
            i64::from_str_radix(oct, 8)
        } else {
            raw.parse::<i64>()
        };
        parsed.unwrap_or_else(|_| {
            self.diagnose(Diagnostic::error(
                "integer literal is too large",
                token.span,
            ));
            0
        })
    }

    fn unescape_string(&mut self, token: &Token) -> String {
        let raw = self.text(token);
        let inner = &raw[1..raw.len() - 1];
        let mut out = String::with_capacity(inner.len());
        let mut chars = inner.chars();
        while let Some(c) = chars.next() {
            if c != '\\' {
                out.push(c);
                continue;
            }
            match chars.next() {
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some('r') => out.push('\r'),
                Some('0') => out.push('\0'),
                Some('\\') => out.push('\\'),
                Some('"') => out.push('"'),
                Some('\'') => out.push('\''),
                Some(other) => {
                    self.diagnose(Diagnostic::warning(
                        format!("unknown escape sequence '\\{}'", other),
                        token.span,
                    ));
                    out.push(other);
                }
                None => {}
            }
        }
        out
    }

    // ============ Patterns ============

    fn parse_pattern(&mut self, binding: BindingId) -> ParseResult<Pattern> {
        let start = self.error_span().start;
        match self.peek_kind() {
            Some(TokenKind::Val) | Some(TokenKind::Var) => {
                let intro = self.take().expect("peeked val/var");
                let is_var = intro.kind == TokenKind::Var;
                let sub = self.parse_pattern(binding)?;
                let sign = if self.take_kind(TokenKind::Colon).is_some() {
                    Some(self.parse_sign()?)
                } else {
                    None
                };
                Ok(Pattern {
                    kind: PatternKind::Binding {
                        is_var,
                        sub: Box::new(sub),
                        sign,
                    },
                    span: self.span_from(start),
                })
            }
            Some(TokenKind::Under) => {
                let token = self.take().expect("peeked _");
                Ok(Pattern {
                    kind: PatternKind::Wildcard,
                    span: token.span,
                })
            }
            Some(TokenKind::LParen) => {
                let elems = self.parse_list(
                    TokenKind::LParen,
                    TokenKind::RParen,
                    "')'",
                    &[],
                    |p| {
                        if p.peek_kind() == Some(TokenKind::RParen) {
                            return Ok(None);
                        }
                        let label = p.speculate(|p| {
                            let token = p.expect(TokenKind::Name, "a label")?;
                            let ident = Ident::new(p.text(&token), token.span);
                            p.expect(TokenKind::Colon, "':'")?;
                            Ok(ident)
                        });
                        let pattern = p.parse_pattern(binding)?;
                        Ok(Some(TuplePatternElem { label, pattern }))
                    },
                )?;
                Ok(Pattern {
                    kind: PatternKind::Tuple(elems),
                    span: self.span_from(start),
                })
            }
            Some(TokenKind::Name) => {
                let token = self.take().expect("peeked a name");
                Ok(Pattern {
                    kind: PatternKind::Named(VarDecl {
                        name: Ident::new(self.text(&token), token.span),
                        binding,
                        ty: TypeSlot::Unresolved,
                    }),
                    span: token.span,
                })
            }
            _ => Err(self.unexpected("a pattern")),
        }
    }

    // ============ Type signatures ============

    /// `sign ::= ('mut'|'volatile')* async-sign ('->' sign)?`
    pub fn parse_sign(&mut self) -> ParseResult<Sign> {
        let start = self.error_span().start;

        let mut mut_spans = Vec::new();
        let mut volatile_spans = Vec::new();
        loop {
            if let Some(t) = self.take_kind(TokenKind::Mut) {
                mut_spans.push(t.span);
            } else if let Some(t) = self.take_kind(TokenKind::Volatile) {
                volatile_spans.push(t.span);
            } else {
                break;
            }
        }

        let lhs = self.parse_async_sign()?;

        let mut sign = if self.take_kind(TokenKind::Arrow).is_some() {
            // Function signatures are right-recursive.
            let output = self.parse_sign()?;
            let params = match lhs.kind {
                SignKind::Tuple(elems) => elems.into_iter().map(|e| e.sign).collect(),
                _ => vec![lhs],
            };
            Sign {
                kind: SignKind::Function {
                    params,
                    output: Box::new(output),
                    is_volatile: !volatile_spans.is_empty(),
                },
                span: self.span_from(start),
            }
        } else {
            if let Some(&span) = volatile_spans.first() {
                self.diagnose(Diagnostic::error(
                    "'volatile' is only valid on function signatures",
                    span,
                ));
            }
            lhs
        };

        // `mut` wraps the result as an inout signature.
        for _ in &mut_spans {
            sign = Sign {
                span: self.span_from(start),
                kind: SignKind::Inout(Box::new(sign)),
            };
        }

        Ok(sign)
    }

    /// `'async'? maxterm`
    fn parse_async_sign(&mut self) -> ParseResult<Sign> {
        if let Some(token) = self.take_kind(TokenKind::Async) {
            let inner = self.parse_maxterm_sign()?;
            let span = token.span.merge(inner.span);
            return Ok(Sign {
                kind: SignKind::Async(Box::new(inner)),
                span,
            });
        }
        self.parse_maxterm_sign()
    }

    /// `|`-separated union of minterms
    fn parse_maxterm_sign(&mut self) -> ParseResult<Sign> {
        let start = self.error_span().start;
        let first = self.parse_minterm_sign()?;
        if self.peek_oper_text() != Some("|") {
            return Ok(first);
        }
        let mut members = vec![first];
        while self.peek_oper_text() == Some("|") {
            self.take();
            members.push(self.parse_minterm_sign()?);
        }
        Ok(Sign {
            kind: SignKind::Union(members),
            span: self.span_from(start),
        })
    }

    /// `&`-separated view composition
    fn parse_minterm_sign(&mut self) -> ParseResult<Sign> {
        let start = self.error_span().start;
        let first = self.parse_primary_sign()?;
        if self.peek_oper_text() != Some("&") {
            return Ok(first);
        }
        let mut members = vec![first];
        while self.peek_oper_text() == Some("&") {
            self.take();
            members.push(self.parse_primary_sign()?);
        }
        Ok(Sign {
            kind: SignKind::Composition(members),
            span: self.span_from(start),
        })
    }

    fn parse_primary_sign(&mut self) -> ParseResult<Sign> {
        match self.peek_kind() {
            Some(TokenKind::Name) => self.parse_compound_ident_sign(),
            Some(TokenKind::LParen) => {
                let start = self.error_span().start;
                let elems = self.parse_list(
                    TokenKind::LParen,
                    TokenKind::RParen,
                    "')'",
                    &[TokenKind::Arrow],
                    |p| {
                        if p.peek_kind() == Some(TokenKind::RParen) {
                            return Ok(None);
                        }
                        let label = p.speculate(|p| {
                            let token = p.expect(TokenKind::Name, "a label")?;
                            let ident = Ident::new(p.text(&token), token.span);
                            p.expect(TokenKind::Colon, "':'")?;
                            Ok(ident)
                        });
                        let sign = p.parse_sign()?;
                        Ok(Some(TupleSignElem { label, sign }))
                    },
                )?;
                Ok(Sign {
                    kind: SignKind::Tuple(elems),
                    span: self.span_from(start),
                })
            }
            _ => Err(self.unexpected("a type signature")),
        }
    }

    /// `Name<Args>` optionally followed by `::`-separated components
    fn parse_compound_ident_sign(&mut self) -> ParseResult<Sign> {
        let start = self.error_span().start;
        let mut components = vec![self.parse_sign_component()?];
        while self.peek_kind() == Some(TokenKind::TwoColons) {
            self.take();
            components.push(self.parse_sign_component()?);
        }

        let span = self.span_from(start);
        if components.len() == 1 {
            let only = components.pop().expect("one component");
            if only.args.is_empty() {
                return Ok(Sign {
                    kind: SignKind::Bare(only.name),
                    span,
                });
            }
            return Ok(Sign {
                kind: SignKind::Specialized {
                    base: only.name,
                    args: only.args,
                },
                span,
            });
        }
        Ok(Sign {
            kind: SignKind::Compound { components },
            span,
        })
    }

    fn parse_sign_component(&mut self) -> ParseResult<SignComponent> {
        let token = self.expect(TokenKind::Name, "a type name")?;
        let name = Ident::new(self.text(&token), token.span);

        let args = if self.peek_kind() == Some(TokenKind::LAngle) {
            self.take();
            let mut args = vec![self.parse_sign()?];
            while self.take_kind(TokenKind::Comma).is_some() {
                args.push(self.parse_sign()?);
            }
            self.expect(TokenKind::RAngle, "'>'")?;
            args
        } else {
            Vec::new()
        };

        Ok(SignComponent { name, args })
    }

    // ============ Lists ============

    /// The generic list production: left delimiter, comma-separated
    /// items until the item parser returns `None`, right delimiter.
    ///
    /// A missing right delimiter diagnoses `expected <desc>`, then
    /// recovers by skipping to the next instance of the right
    /// delimiter, a `}`, a `;`, or any of the caller's `resume`
    /// tokens, and tries once more to take the delimiter.
    fn parse_list<T>(
        &mut self,
        left: TokenKind,
        right: TokenKind,
        desc: &str,
        resume: &[TokenKind],
        mut item: impl FnMut(&mut Self) -> ParseResult<Option<T>>,
    ) -> ParseResult<Vec<T>> {
        self.expect(left, &left.to_string())?;

        let mut items = Vec::new();
        loop {
            match item(self)? {
                Some(v) => items.push(v),
                None => break,
            }
            if self.take_kind(TokenKind::Comma).is_none() {
                break;
            }
        }

        if self.take_kind(right).is_none() {
            let span = self.error_span();
            self.diagnose(Diagnostic::error(format!("expected {}", desc), span));
            self.skip_while(|k| {
                k != right && k != TokenKind::RBrace && k != TokenKind::Semi && !resume.contains(&k)
            });
            self.take_kind(right);
        }

        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::SourceMap;

    fn parse_source(source: &str) -> (SourceUnit, Vec<Diagnostic>) {
        let mut map = SourceMap::new();
        let id = map.load_synthesized("test.vl", source);
        parse(map.get(id))
    }

    fn parse_ok(source: &str) -> SourceUnit {
        let (unit, diags) = parse_source(source);
        let errors: Vec<_> = diags.iter().filter(|d| d.level == Level::Error).collect();
        assert!(errors.is_empty(), "parse errors: {:?}", errors);
        unit
    }

    fn only_fun(unit: &SourceUnit) -> &FunDecl {
        match &unit.decls[0].kind {
            DeclKind::Function(f) => f,
            other => panic!("expected a function, got {:?}", other),
        }
    }

    fn first_stmt_expr(f: &FunDecl) -> &Expr {
        match &f.body.as_ref().expect("body")[0].kind {
            StmtKind::Expr(e) => e,
            other => panic!("expected an expression statement, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_unit() {
        let unit = parse_ok("");
        assert!(unit.decls.is_empty());
        assert!(!unit.has_error);
    }

    #[test]
    fn test_val_binding() {
        let unit = parse_ok("val x: Int = 42");
        assert!(!unit.has_error);
        let binding = match &unit.decls[0].kind {
            DeclKind::Binding(b) => b,
            other => panic!("expected a binding, got {:?}", other),
        };
        assert!(!binding.is_var);

        let (sub, sign) = match &binding.pattern.kind {
            PatternKind::Binding { sub, sign, .. } => (sub, sign),
            other => panic!("expected a binding pattern, got {:?}", other),
        };
        match &sub.kind {
            PatternKind::Named(v) => {
                assert_eq!(v.name.name, "x");
                assert_eq!(v.binding, binding.binding_id);
            }
            other => panic!("expected a named pattern, got {:?}", other),
        }
        match &sign.as_ref().expect("signature").kind {
            SignKind::Bare(name) => assert_eq!(name.name, "Int"),
            other => panic!("expected a bare signature, got {:?}", other),
        }
        match &binding.init.as_ref().expect("initializer").kind {
            ExprKind::IntLit(42) => {}
            other => panic!("expected 42, got {:?}", other),
        }
    }

    #[test]
    fn test_simple_function() {
        let unit = parse_ok("fun main() { ret 0 }");
        let f = only_fun(&unit);
        assert_eq!(f.name.name, "main");
        assert!(f.params.is_empty());
        assert!(f.output.is_none());
        assert_eq!(f.body.as_ref().expect("body").len(), 1);
    }

    #[test]
    fn test_function_params_and_labels() {
        let unit = parse_ok("fun move(_ x: Int, into target: Sink) { x }");
        let f = only_fun(&unit);
        assert_eq!(f.params.len(), 2);
        assert!(f.params[0].label.is_none());
        assert_eq!(f.params[0].name.name, "x");
        assert_eq!(f.params[1].label.as_ref().expect("label").name, "into");
        assert_eq!(f.params[1].name.name, "target");
    }

    #[test]
    fn test_redundant_param_label_warns() {
        let (_, diags) = parse_source("fun f(x x: Int) { x }");
        assert!(diags
            .iter()
            .any(|d| d.level == Level::Warning && d.message.contains("identical")));
    }

    #[test]
    fn test_precedence_multiplication_binds_tighter() {
        let unit = parse_ok("fun main() { 1 + 2 * 3 }");
        let expr = first_stmt_expr(only_fun(&unit));

        // Expect (+ 1 (* 2 3)): the outer infix call is `+`.
        let (callee, args) = match &expr.kind {
            ExprKind::Call {
                callee,
                args,
                style: CallStyle::Infix,
            } => (callee, args),
            other => panic!("expected an infix call, got {:?}", other),
        };
        let (base, member) = match &callee.kind {
            ExprKind::Member { base, member } => (base, member),
            other => panic!("expected a member callee, got {:?}", other),
        };
        assert_eq!(member.name, "+");
        assert!(matches!(base.kind, ExprKind::IntLit(1)));

        match &args[0].value.kind {
            ExprKind::Call {
                callee,
                style: CallStyle::Infix,
                ..
            } => match &callee.kind {
                ExprKind::Member { member, .. } => assert_eq!(member.name, "*"),
                other => panic!("expected a member callee, got {:?}", other),
            },
            other => panic!("expected a nested infix call, got {:?}", other),
        }
    }

    #[test]
    fn test_equal_weight_groups_left() {
        let unit = parse_ok("fun main() { 1 - 2 - 3 }");
        let expr = first_stmt_expr(only_fun(&unit));
        // ((1 - 2) - 3): the right argument of the outer call is 3.
        match &expr.kind {
            ExprKind::Call { args, .. } => {
                assert!(matches!(args[0].value.kind, ExprKind::IntLit(3)))
            }
            other => panic!("expected an infix call, got {:?}", other),
        }
    }

    #[test]
    fn test_assignment_is_right_associative() {
        let unit = parse_ok("fun main() { a = b = c }");
        let expr = first_stmt_expr(only_fun(&unit));
        match &expr.kind {
            ExprKind::Assign { value, .. } => {
                assert!(matches!(value.kind, ExprKind::Assign { .. }))
            }
            other => panic!("expected an assignment, got {:?}", other),
        }
    }

    #[test]
    fn test_glued_shift_operator() {
        let unit = parse_ok("fun main() { a >> b }");
        let expr = first_stmt_expr(only_fun(&unit));
        match &expr.kind {
            ExprKind::Call { callee, .. } => match &callee.kind {
                ExprKind::Member { member, .. } => assert_eq!(member.name, ">>"),
                other => panic!("expected a member callee, got {:?}", other),
            },
            other => panic!("expected an infix call, got {:?}", other),
        }
    }

    #[test]
    fn test_glued_less_equal() {
        let unit = parse_ok("fun main() { a <= b }");
        let expr = first_stmt_expr(only_fun(&unit));
        match &expr.kind {
            ExprKind::Call { callee, .. } => match &callee.kind {
                ExprKind::Member { member, .. } => assert_eq!(member.name, "<="),
                other => panic!("expected a member callee, got {:?}", other),
            },
            other => panic!("expected an infix call, got {:?}", other),
        }
    }

    #[test]
    fn test_inconsistent_whitespace_warns() {
        let (_, diags) = parse_source("fun main() { a+ b }");
        assert!(diags
            .iter()
            .any(|d| d.level == Level::Warning && d.message.contains("whitespace")));
    }

    #[test]
    fn test_prefix_operator_lowers_to_member_call() {
        let unit = parse_ok("fun main() { -x }");
        let expr = first_stmt_expr(only_fun(&unit));
        match &expr.kind {
            ExprKind::Call {
                callee,
                style: CallStyle::Prefix,
                args,
            } => {
                assert!(args.is_empty());
                match &callee.kind {
                    ExprKind::Member { member, .. } => assert_eq!(member.name, "-"),
                    other => panic!("expected a member callee, got {:?}", other),
                }
            }
            other => panic!("expected a prefix call, got {:?}", other),
        }
    }

    #[test]
    fn test_addr_of() {
        let unit = parse_ok("fun main() { &x }");
        let expr = first_stmt_expr(only_fun(&unit));
        assert!(matches!(expr.kind, ExprKind::AddrOf { .. }));
    }

    #[test]
    fn test_casts() {
        let unit = parse_ok("fun main() { x as! Int }");
        let expr = first_stmt_expr(only_fun(&unit));
        match &expr.kind {
            ExprKind::UnsafeCast { target, .. } => match &target.kind {
                SignKind::Bare(name) => assert_eq!(name.name, "Int"),
                other => panic!("expected a bare signature, got {:?}", other),
            },
            other => panic!("expected an unsafe cast, got {:?}", other),
        }

        let unit = parse_ok("fun main() { x as? Num }");
        let expr = first_stmt_expr(only_fun(&unit));
        assert!(matches!(expr.kind, ExprKind::DynCast { .. }));
    }

    #[test]
    fn test_cast_groups_before_comparison() {
        let unit = parse_ok("fun main() { x as! Int == y }");
        let expr = first_stmt_expr(only_fun(&unit));
        // (x as! Int) == y
        match &expr.kind {
            ExprKind::Call { callee, .. } => match &callee.kind {
                ExprKind::Member { base, member } => {
                    assert_eq!(member.name, "==");
                    assert!(matches!(base.kind, ExprKind::UnsafeCast { .. }));
                }
                other => panic!("expected a member callee, got {:?}", other),
            },
            other => panic!("expected an infix call, got {:?}", other),
        }
    }

    #[test]
    fn test_call_requires_same_line() {
        let unit = parse_ok("fun main() { f(1)\n(2) }");
        let f = only_fun(&unit);
        // Two statements: the call, then a parenthesized expression.
        assert_eq!(f.body.as_ref().expect("body").len(), 2);
    }

    #[test]
    fn test_subscript_and_member() {
        let unit = parse_ok("fun main() { buf[0].count }");
        let expr = first_stmt_expr(only_fun(&unit));
        match &expr.kind {
            ExprKind::Member { base, member } => {
                assert_eq!(member.name, "count");
                assert!(matches!(
                    base.kind,
                    ExprKind::Call {
                        style: CallStyle::Subscript,
                        ..
                    }
                ));
            }
            other => panic!("expected a member access, got {:?}", other),
        }
    }

    #[test]
    fn test_tuple_member() {
        let unit = parse_ok("fun main() { pair.0 }");
        let expr = first_stmt_expr(only_fun(&unit));
        assert!(matches!(
            expr.kind,
            ExprKind::TupleMember { index: 0, .. }
        ));
    }

    #[test]
    fn test_postfix_operator() {
        let unit = parse_ok("fun main() { x! }");
        let expr = first_stmt_expr(only_fun(&unit));
        match &expr.kind {
            ExprKind::Call {
                style: CallStyle::Postfix,
                callee,
                ..
            } => match &callee.kind {
                ExprKind::Member { member, .. } => assert_eq!(member.name, "!"),
                other => panic!("expected a member callee, got {:?}", other),
            },
            other => panic!("expected a postfix call, got {:?}", other),
        }
    }

    #[test]
    fn test_qualified_ref() {
        let unit = parse_ok("fun main() { Collection::first }");
        let expr = first_stmt_expr(only_fun(&unit));
        match &expr.kind {
            ExprKind::UnresolvedRef {
                qualification,
                name,
            } => {
                assert_eq!(qualification.len(), 1);
                assert_eq!(qualification[0].name, "Collection");
                assert_eq!(name.name, "first");
            }
            other => panic!("expected a reference, got {:?}", other),
        }
    }

    #[test]
    fn test_receiver() {
        let unit = parse_ok("type T { fun get() { ret self } }");
        match &unit.decls[0].kind {
            DeclKind::Product(p) => match &p.members[0].kind {
                DeclKind::Function(f) => match &f.body.as_ref().expect("body")[0].kind {
                    StmtKind::Return(Some(e)) => {
                        assert!(matches!(e.kind, ExprKind::Receiver))
                    }
                    other => panic!("expected a return, got {:?}", other),
                },
                other => panic!("expected a function, got {:?}", other),
            },
            other => panic!("expected a product type, got {:?}", other),
        }
    }

    #[test]
    fn test_match_statement() {
        let unit = parse_ok(
            r#"
            fun classify(x: Int) {
                match x {
                    case n where n { ret 1 }
                    case _ { ret 0 }
                }
            }
            "#,
        );
        let expr = first_stmt_expr(only_fun(&unit));
        match &expr.kind {
            ExprKind::Match { cases, .. } => {
                assert_eq!(cases.len(), 2);
                assert!(cases[0].guard.is_some());
                assert!(matches!(cases[1].pattern.kind, PatternKind::Wildcard));
            }
            other => panic!("expected a match, got {:?}", other),
        }
    }

    #[test]
    fn test_generic_clause_with_requirements() {
        let unit = parse_ok("type Pair<A, B> where A: Eq {}");
        let p = match &unit.decls[0].kind {
            DeclKind::Product(p) => p,
            other => panic!("expected a product type, got {:?}", other),
        };
        let generics = p.generics.as_ref().expect("generic clause");
        assert_eq!(generics.params.len(), 2);
        assert_eq!(generics.params[0].name.name, "A");
        assert_eq!(generics.params[1].name.name, "B");
        assert_eq!(generics.requirements.len(), 1);
        let req = &generics.requirements[0];
        assert_eq!(req.relation, RequirementRelation::Conformance);
        match (&req.lhs.kind, &req.rhs.kind) {
            (SignKind::Bare(l), SignKind::Bare(r)) => {
                assert_eq!(l.name, "A");
                assert_eq!(r.name, "Eq");
            }
            other => panic!("expected bare signatures, got {:?}", other),
        }
    }

    #[test]
    fn test_generic_clause_without_body() {
        // The body may be omitted entirely.
        let unit = parse_ok("type Pair<A, B> where A: Eq");
        match &unit.decls[0].kind {
            DeclKind::Product(p) => {
                assert!(p.members.is_empty());
                assert_eq!(p.generics.as_ref().expect("clause").requirements.len(), 1);
            }
            other => panic!("expected a product type, got {:?}", other),
        }
    }

    #[test]
    fn test_equality_requirement_inside_clause() {
        let unit = parse_ok("fun f<A, B where A == B>(x: A) { x }");
        let f = only_fun(&unit);
        let generics = f.generics.as_ref().expect("clause");
        assert_eq!(
            generics.requirements[0].relation,
            RequirementRelation::Equality
        );
    }

    #[test]
    fn test_nested_generic_args_close_with_adjacent_angles() {
        let unit = parse_ok("val x: Outer<Inner<Int>> = y");
        let binding = match &unit.decls[0].kind {
            DeclKind::Binding(b) => b,
            other => panic!("expected a binding, got {:?}", other),
        };
        let sign = match &binding.pattern.kind {
            PatternKind::Binding { sign, .. } => sign.as_ref().expect("signature"),
            other => panic!("expected a binding pattern, got {:?}", other),
        };
        match &sign.kind {
            SignKind::Specialized { base, args } => {
                assert_eq!(base.name, "Outer");
                assert!(matches!(args[0].kind, SignKind::Specialized { .. }));
            }
            other => panic!("expected a specialized signature, got {:?}", other),
        }
    }

    #[test]
    fn test_union_and_composition_signs() {
        let unit = parse_ok("val x: A | B & C = y");
        let binding = match &unit.decls[0].kind {
            DeclKind::Binding(b) => b,
            other => panic!("expected a binding, got {:?}", other),
        };
        let sign = match &binding.pattern.kind {
            PatternKind::Binding { sign, .. } => sign.as_ref().expect("signature"),
            other => panic!("expected a binding pattern, got {:?}", other),
        };
        match &sign.kind {
            SignKind::Union(members) => {
                assert_eq!(members.len(), 2);
                assert!(matches!(&members[1].kind, SignKind::Composition(m) if m.len() == 2));
            }
            other => panic!("expected a union, got {:?}", other),
        }
    }

    #[test]
    fn test_function_sign_right_recursive() {
        let unit = parse_ok("val f: (Int) -> Int -> Bool = g");
        let binding = match &unit.decls[0].kind {
            DeclKind::Binding(b) => b,
            other => panic!("expected a binding, got {:?}", other),
        };
        let sign = match &binding.pattern.kind {
            PatternKind::Binding { sign, .. } => sign.as_ref().expect("signature"),
            other => panic!("expected a binding pattern, got {:?}", other),
        };
        match &sign.kind {
            SignKind::Function { params, output, .. } => {
                assert_eq!(params.len(), 1);
                assert!(matches!(output.kind, SignKind::Function { .. }));
            }
            other => panic!("expected a function signature, got {:?}", other),
        }
    }

    #[test]
    fn test_mut_wraps_inout() {
        let unit = parse_ok("fun f(x: mut Int) { x }");
        let f = only_fun(&unit);
        assert!(matches!(f.params[0].sign.kind, SignKind::Inout(_)));
    }

    #[test]
    fn test_volatile_requires_function_sign() {
        let (_, diags) = parse_source("val x: volatile Int = y");
        assert!(diags
            .iter()
            .any(|d| d.message.contains("volatile")));
    }

    #[test]
    fn test_error_recovery_missing_param_list() {
        let (unit, diags) = parse_source("fun f( -> Int { ret 1 }");
        assert!(unit.has_error);
        assert!(diags
            .iter()
            .any(|d| d.message.contains("expected parameter list")));

        // The AST still carries the function with what could be read.
        let f = only_fun(&unit);
        assert_eq!(f.name.name, "f");
        assert!(f.params.is_empty());
        match &f.output.as_ref().expect("return signature").kind {
            SignKind::Bare(name) => assert_eq!(name.name, "Int"),
            other => panic!("expected a bare signature, got {:?}", other),
        }
        let body = f.body.as_ref().expect("body");
        assert!(matches!(body[0].kind, StmtKind::Return(Some(_))));
    }

    #[test]
    fn test_error_recovery_continues_to_next_decl() {
        let (unit, diags) = parse_source("val = ;\nfun ok() { ret 1 }");
        assert!(unit.has_error);
        assert!(!diags.is_empty());
        assert!(unit
            .decls
            .iter()
            .any(|d| matches!(&d.kind, DeclKind::Function(f) if f.name.name == "ok")));
    }

    #[test]
    fn test_views_forbid_generic_clauses() {
        let (_, diags) = parse_source("view V<T> { fun f() -> T }");
        assert!(diags
            .iter()
            .any(|d| d.message.contains("views cannot declare generic clauses")));
    }

    #[test]
    fn test_view_body_forbids_product_types() {
        let (_, diags) = parse_source("view V { type Inner {} }");
        assert!(diags
            .iter()
            .any(|d| d.message.contains("non-abstract type declarations")));
    }

    #[test]
    fn test_view_abstract_type_member() {
        let unit = parse_ok("view Collection { type Element where Element: Eq\nfun count() -> Int }");
        let v = match &unit.decls[0].kind {
            DeclKind::View(v) => v,
            other => panic!("expected a view, got {:?}", other),
        };
        match &v.members[0].kind {
            DeclKind::AbstractType(a) => {
                assert_eq!(a.name.name, "Element");
                assert_eq!(a.requirements.len(), 1);
            }
            other => panic!("expected an abstract type, got {:?}", other),
        }
        match &v.members[1].kind {
            DeclKind::Function(f) => assert!(f.body.is_none()),
            other => panic!("expected a function requirement, got {:?}", other),
        }
    }

    #[test]
    fn test_views_must_be_top_level() {
        let (_, diags) = parse_source("type T { view V { } }");
        assert!(diags
            .iter()
            .any(|d| d.message.contains("views must appear at top level")));
    }

    #[test]
    fn test_static_only_in_type_bodies() {
        let (_, diags) = parse_source("static fun f() { ret 1 }");
        assert!(diags
            .iter()
            .any(|d| d.message.contains("'static' is only valid inside type bodies")));
    }

    #[test]
    fn test_operator_function_arity() {
        let (_, diags) =
            parse_source("type T { infix fun +(other: T, extra: T) -> T { other } }");
        assert!(diags
            .iter()
            .any(|d| d.message.contains("exactly one parameter")));

        let unit = parse_ok("type T { infix fun +(other: T) -> T { other } }");
        match &unit.decls[0].kind {
            DeclKind::Product(p) => match &p.members[0].kind {
                DeclKind::Function(f) => {
                    assert!(f.is_operator);
                    assert_eq!(f.name.name, "+");
                }
                other => panic!("expected a function, got {:?}", other),
            },
            other => panic!("expected a product type, got {:?}", other),
        }
    }

    #[test]
    fn test_alias_decl() {
        let unit = parse_ok("type Text = Array<Char>");
        match &unit.decls[0].kind {
            DeclKind::Alias(a) => {
                assert_eq!(a.name.name, "Text");
                assert!(matches!(a.aliased.kind, SignKind::Specialized { .. }));
            }
            other => panic!("expected an alias, got {:?}", other),
        }
    }

    #[test]
    fn test_extension_decl() {
        let unit = parse_ok("extn Array<Int> { fun sum() -> Int { ret 0 } }");
        match &unit.decls[0].kind {
            DeclKind::Extension(e) => {
                assert!(matches!(e.subject.kind, SignKind::Specialized { .. }));
                assert_eq!(e.members.len(), 1);
            }
            other => panic!("expected an extension, got {:?}", other),
        }
    }

    #[test]
    fn test_body_spaces_parent_to_decl_space() {
        let unit = parse_ok("type T { fun f() { ret 1 } }");
        let p = match &unit.decls[0].kind {
            DeclKind::Product(p) => p,
            other => panic!("expected a product type, got {:?}", other),
        };
        // The product body's parent is the space the type lives in.
        assert_eq!(unit.space(p.body_space).parent, Some(unit.decls[0].space));
        let f = match &p.members[0].kind {
            DeclKind::Function(f) => f,
            other => panic!("expected a function, got {:?}", other),
        };
        // The member function lives in the product body, and its own
        // body space hangs off it.
        assert_eq!(p.members[0].space, p.body_space);
        assert_eq!(unit.space(f.body_space).parent, Some(p.body_space));
    }

    #[test]
    fn test_pattern_variables_point_back_to_binding() {
        let unit = parse_ok("val (a, b) = pair");
        let binding = match &unit.decls[0].kind {
            DeclKind::Binding(b) => b,
            other => panic!("expected a binding, got {:?}", other),
        };
        let vars = binding.pattern.variables();
        assert_eq!(vars.len(), 2);
        assert!(vars.iter().all(|v| v.binding == binding.binding_id));
    }

    #[test]
    fn test_unknown_character_recovers() {
        let (unit, diags) = parse_source("fun f() { @ ret 1 }\nfun g() { ret 2 }");
        assert!(unit.has_error);
        assert!(diags.iter().any(|d| d.message.contains("unknown character")));
        assert_eq!(unit.decls.len(), 2);
    }

    #[test]
    fn test_node_spans_are_ordered_and_in_file() {
        let source = "fun f(x: Int) -> Int { ret x }";
        let unit = parse_ok(source);
        let f = only_fun(&unit);
        assert!(unit.decls[0].span.start <= unit.decls[0].span.end);
        assert!(unit.decls[0].span.end <= source.len());
        for p in &f.params {
            assert!(p.span.start <= p.span.end);
            assert!(p.span.end <= source.len());
        }
    }
}
