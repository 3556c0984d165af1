//! Abstract Syntax Tree (AST) for Vela
//!
//! The AST represents the structure of a Vela source unit after
//! parsing. Each node family is a `{ kind, span }` struct with a tagged
//! kind enum. Nodes never hold pointers to one another across the tree:
//! a node's declaration space and a variable's owning pattern-binding
//! are arena indices into tables owned by the `SourceUnit`.

use crate::sema::ModelType;
use crate::span::{Span, Spanned};
use std::fmt;

/// Index of a declaration space in `SourceUnit::spaces`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeclSpaceId(pub u32);

/// The root declaration space of every unit
pub const ROOT_SPACE: DeclSpaceId = DeclSpaceId(0);

/// Identifies a pattern-binding declaration within one unit. Variable
/// declarations point back at their owning binding through this id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BindingId(pub u32);

/// The type slot carried by typed nodes. Unresolved until the external
/// checker runs; passes after that mutate only this field.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum TypeSlot {
    #[default]
    Unresolved,
    Resolved(ModelType),
}

/// What kind of scope a declaration space is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclSpaceKind {
    /// The source unit itself
    Unit,
    Function,
    ProductType,
    View,
    Extension,
}

/// One node of the declaration-space tree. Parents never form cycles:
/// every space's parent index is allocated before it.
#[derive(Debug, Clone)]
pub struct DeclSpace {
    pub parent: Option<DeclSpaceId>,
    pub kind: DeclSpaceKind,
}

/// A parsed source file: its top-level declarations plus the
/// declaration-space table
#[derive(Debug)]
pub struct SourceUnit {
    pub decls: Vec<Decl>,
    pub spaces: Vec<DeclSpace>,
    /// True if any error was diagnosed while parsing. The AST is still
    /// traversable.
    pub has_error: bool,
    pub span: Span,
}

impl SourceUnit {
    pub fn space(&self, id: DeclSpaceId) -> &DeclSpace {
        &self.spaces[id.0 as usize]
    }

    /// Walk up the space tree from `id` to the root
    pub fn space_ancestors(&self, mut id: DeclSpaceId) -> Vec<DeclSpaceId> {
        let mut out = vec![id];
        while let Some(parent) = self.space(id).parent {
            out.push(parent);
            id = parent;
        }
        out
    }
}

// ============ Identifiers ============

/// Identifier with its source range
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Ident {
    pub name: String,
    pub span: Span,
}

impl Ident {
    pub fn new(name: impl Into<String>, span: Span) -> Self {
        Self {
            name: name.into(),
            span,
        }
    }
}

impl fmt::Display for Ident {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

// ============ Declarations ============

/// A declaration
#[derive(Debug, Clone)]
pub struct Decl {
    pub kind: DeclKind,
    pub span: Span,
    /// The space this declaration lives in
    pub space: DeclSpaceId,
}

/// Kind of declaration
#[derive(Debug, Clone)]
pub enum DeclKind {
    /// `val x: Int = 42` / `var (a, b) = pair`
    Binding(BindingDecl),
    /// `fun f(x: Int) -> Int { ... }`, including operator functions
    Function(FunDecl),
    /// `new(x: Int) { ... }`
    Constructor(ConstructorDecl),
    /// `del { ... }` — reserved, the parser does not accept it yet
    Destructor(DestructorDecl),
    /// `type Pair<A, B> { ... }`
    Product(ProductTypeDecl),
    /// `view Eq { ... }` — abstract requirements only
    View(ViewDecl),
    /// `type Element where ...` inside a view body
    AbstractType(AbstractTypeDecl),
    /// `type Alias = Sign`
    Alias(AliasDecl),
    /// `extn Subject { ... }`
    Extension(ExtensionDecl),
}

impl Decl {
    /// The introduced name, for diagnostics. Bindings have none.
    pub fn name_for_display(&self) -> Option<&str> {
        match &self.kind {
            DeclKind::Binding(_) | DeclKind::Constructor(_) | DeclKind::Destructor(_) => None,
            DeclKind::Function(d) => Some(&d.name.name),
            DeclKind::Product(d) => Some(&d.name.name),
            DeclKind::View(d) => Some(&d.name.name),
            DeclKind::AbstractType(d) => Some(&d.name.name),
            DeclKind::Alias(d) => Some(&d.name.name),
            DeclKind::Extension(_) => None,
        }
    }
}

impl Spanned for Decl {
    fn span(&self) -> Span {
        self.span
    }
}

/// Access level modifiers: `pub` or `mod`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessModifier {
    Public,
    Module,
}

/// Operator position for operator functions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorNotation {
    Infix,
    Prefix,
    Postfix,
}

impl fmt::Display for OperatorNotation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperatorNotation::Infix => write!(f, "infix"),
            OperatorNotation::Prefix => write!(f, "prefix"),
            OperatorNotation::Postfix => write!(f, "postfix"),
        }
    }
}

/// The modifiers attached to a declaration. Each records the span it
/// was written at so misuse diagnostics point at the keyword.
#[derive(Debug, Clone, Default)]
pub struct DeclModifiers {
    pub access: Option<(AccessModifier, Span)>,
    pub notation: Option<(OperatorNotation, Span)>,
    pub is_static: Option<Span>,
    pub is_mut: Option<Span>,
    pub is_volatile: Option<Span>,
    pub is_moveonly: Option<Span>,
}

impl DeclModifiers {
    pub fn is_empty(&self) -> bool {
        self.access.is_none()
            && self.notation.is_none()
            && self.is_static.is_none()
            && self.is_mut.is_none()
            && self.is_volatile.is_none()
            && self.is_moveonly.is_none()
    }
}

/// Pattern-binding declaration: `val`/`var` pattern with optional
/// initializer. Variable decls inside the pattern are owned here and
/// point back through `binding_id`.
#[derive(Debug, Clone)]
pub struct BindingDecl {
    /// `var` if true, `val` otherwise
    pub is_var: bool,
    pub binding_id: BindingId,
    pub modifiers: DeclModifiers,
    pub pattern: Pattern,
    pub init: Option<Expr>,
}

/// Variable declaration introduced by a named pattern
#[derive(Debug, Clone)]
pub struct VarDecl {
    pub name: Ident,
    /// The pattern-binding declaration that owns this variable
    pub binding: BindingId,
    pub ty: TypeSlot,
}

/// Function declaration
#[derive(Debug, Clone)]
pub struct FunDecl {
    /// Function name; operator functions use the operator's text
    pub name: Ident,
    /// True if the name is an operator rather than an identifier
    pub is_operator: bool,
    pub modifiers: DeclModifiers,
    pub generics: Option<GenericClause>,
    pub params: Vec<Param>,
    pub output: Option<Sign>,
    /// None for bodiless requirements inside views
    pub body: Option<Vec<Stmt>>,
    /// The space the body's declarations live in
    pub body_space: DeclSpaceId,
}

/// Function parameter: `(label | '_')? name ':' sign`.
/// `label == None` means the parameter is anonymous (external `_`);
/// a single bareword serves as both label and name.
#[derive(Debug, Clone)]
pub struct Param {
    pub label: Option<Ident>,
    pub name: Ident,
    pub sign: Sign,
    pub span: Span,
}

/// Constructor declaration: `new(params) { ... }`
#[derive(Debug, Clone)]
pub struct ConstructorDecl {
    pub modifiers: DeclModifiers,
    pub params: Vec<Param>,
    pub body: Vec<Stmt>,
    pub body_space: DeclSpaceId,
}

/// Destructor declaration. The grammar is reserved; the parser rejects
/// `del` until it is implemented.
#[derive(Debug, Clone)]
pub struct DestructorDecl {
    pub body: Vec<Stmt>,
    pub body_space: DeclSpaceId,
}

/// Product type declaration: `type Name<T> : View { members }`
#[derive(Debug, Clone)]
pub struct ProductTypeDecl {
    pub name: Ident,
    pub modifiers: DeclModifiers,
    pub generics: Option<GenericClause>,
    pub inheritances: Vec<Sign>,
    pub members: Vec<Decl>,
    pub body_space: DeclSpaceId,
}

/// View declaration. Views carry abstract requirements only and never
/// have a generic clause; their associated types are abstract members.
#[derive(Debug, Clone)]
pub struct ViewDecl {
    pub name: Ident,
    pub modifiers: DeclModifiers,
    pub inheritances: Vec<Sign>,
    pub members: Vec<Decl>,
    pub body_space: DeclSpaceId,
}

/// Abstract type requirement inside a view: `type Element where ...`
#[derive(Debug, Clone)]
pub struct AbstractTypeDecl {
    pub name: Ident,
    pub requirements: Vec<TypeRequirement>,
}

/// Type alias: `type Name<T> = Sign`
#[derive(Debug, Clone)]
pub struct AliasDecl {
    pub name: Ident,
    pub modifiers: DeclModifiers,
    pub generics: Option<GenericClause>,
    pub aliased: Sign,
}

/// Extension declaration: `extn Subject { members }`
#[derive(Debug, Clone)]
pub struct ExtensionDecl {
    pub subject: Sign,
    pub members: Vec<Decl>,
    pub body_space: DeclSpaceId,
}

// ============ Generics ============

/// Generic parameter declaration inside a clause
#[derive(Debug, Clone)]
pub struct GenericParamDecl {
    pub name: Ident,
    pub span: Span,
}

/// `<A, B where A: Eq, A == B>`
#[derive(Debug, Clone)]
pub struct GenericClause {
    pub params: Vec<GenericParamDecl>,
    pub requirements: Vec<TypeRequirement>,
    pub span: Span,
}

/// How a type requirement relates its sides
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequirementRelation {
    /// `A == B`
    Equality,
    /// `A: V`
    Conformance,
}

/// One `where` requirement
#[derive(Debug, Clone)]
pub struct TypeRequirement {
    pub lhs: Sign,
    pub relation: RequirementRelation,
    pub rhs: Sign,
    pub span: Span,
}

// ============ Statements ============

/// A statement
#[derive(Debug, Clone)]
pub struct Stmt {
    pub kind: StmtKind,
    pub span: Span,
}

/// Kind of statement
#[derive(Debug, Clone)]
pub enum StmtKind {
    /// `{ ... }`
    Block(Vec<Stmt>),
    /// `ret expr?`
    Return(Option<Expr>),
    /// Reserved; the parser does not accept `break` yet
    Break,
    /// Reserved; the parser does not accept `continue` yet
    Continue,
    /// An embedded declaration
    Decl(Box<Decl>),
    /// An expression in statement position
    Expr(Box<Expr>),
}

impl Spanned for Stmt {
    fn span(&self) -> Span {
        self.span
    }
}

// ============ Expressions ============

/// An expression
#[derive(Debug, Clone)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
    pub ty: TypeSlot,
}

impl Expr {
    pub fn new(kind: ExprKind, span: Span) -> Self {
        Self {
            kind,
            span,
            ty: TypeSlot::Unresolved,
        }
    }
}

impl Spanned for Expr {
    fn span(&self) -> Span {
        self.span
    }
}

/// How a call was written
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallStyle {
    /// `f(a, b)`
    Function,
    /// `a + b`, lowered through an unresolved member on the left side
    Infix,
    /// `-a`
    Prefix,
    /// `a!`
    Postfix,
    /// `a[i]`
    Subscript,
}

/// A labeled call argument
#[derive(Debug, Clone)]
pub struct Argument {
    pub label: Option<Ident>,
    pub value: Expr,
}

/// A labeled tuple element
#[derive(Debug, Clone)]
pub struct TupleElem {
    pub label: Option<Ident>,
    pub value: Expr,
}

/// One case of a match expression
#[derive(Debug, Clone)]
pub struct MatchCase {
    pub pattern: Pattern,
    pub guard: Option<Expr>,
    pub body: Vec<Stmt>,
    pub span: Span,
}

/// Kind of expression
#[derive(Debug, Clone)]
pub enum ExprKind {
    BoolLit(bool),
    IntLit(i64),
    FloatLit(f64),
    StrLit(String),

    /// A name not yet resolved to a declaration, optionally qualified
    /// by a `::` path: `x`, `Collection::first`
    UnresolvedRef {
        qualification: Vec<Ident>,
        name: Ident,
    },

    /// `(a, b)` or `(x: 1, y: 2)`
    Tuple(Vec<TupleElem>),

    /// `pair.0`
    TupleMember { base: Box<Expr>, index: u32 },

    /// Any call form; see `CallStyle`
    Call {
        callee: Box<Expr>,
        args: Vec<Argument>,
        style: CallStyle,
    },

    /// `base.member`, member not yet resolved
    Member { base: Box<Expr>, member: Ident },

    /// `self`
    Receiver,

    /// `async expr`
    Async { operand: Box<Expr> },

    /// `await expr`
    Await { operand: Box<Expr> },

    /// `match subject { case ... }`
    Match {
        subject: Box<Expr>,
        cases: Vec<MatchCase>,
    },

    /// `target = value`
    Assign {
        target: Box<Expr>,
        value: Box<Expr>,
    },

    /// `&operand`
    AddrOf { operand: Box<Expr> },

    /// `operand as? Sign`
    DynCast { operand: Box<Expr>, target: Sign },

    /// `operand as! Sign`
    UnsafeCast { operand: Box<Expr>, target: Sign },

    /// `_` in expression position
    Wildcard,

    /// Produced after a reported error so parsing can continue
    Error,
}

// ============ Patterns ============

/// A pattern
#[derive(Debug, Clone)]
pub struct Pattern {
    pub kind: PatternKind,
    pub span: Span,
}

impl Spanned for Pattern {
    fn span(&self) -> Span {
        self.span
    }
}

/// A labeled tuple pattern element
#[derive(Debug, Clone)]
pub struct TuplePatternElem {
    pub label: Option<Ident>,
    pub pattern: Pattern,
}

/// Kind of pattern
#[derive(Debug, Clone)]
pub enum PatternKind {
    /// `x` — introduces a variable owned by the enclosing binding
    Named(VarDecl),
    /// `val x: Int` / `var (a, b)` inside a larger pattern
    Binding {
        is_var: bool,
        sub: Box<Pattern>,
        sign: Option<Sign>,
    },
    /// `(a, b)`
    Tuple(Vec<TuplePatternElem>),
    /// `_`
    Wildcard,
}

impl Pattern {
    /// All variable declarations introduced by this pattern, in source
    /// order
    pub fn variables(&self) -> Vec<&VarDecl> {
        let mut out = Vec::new();
        self.collect_variables(&mut out);
        out
    }

    fn collect_variables<'a>(&'a self, out: &mut Vec<&'a VarDecl>) {
        match &self.kind {
            PatternKind::Named(v) => out.push(v),
            PatternKind::Binding { sub, .. } => sub.collect_variables(out),
            PatternKind::Tuple(elems) => {
                for elem in elems {
                    elem.pattern.collect_variables(out);
                }
            }
            PatternKind::Wildcard => {}
        }
    }
}

// ============ Type signatures ============

/// A type signature as written in source
#[derive(Debug, Clone)]
pub struct Sign {
    pub kind: SignKind,
    pub span: Span,
}

impl Spanned for Sign {
    fn span(&self) -> Span {
        self.span
    }
}

/// One component of a compound (path) signature: `Name<Args>`
#[derive(Debug, Clone)]
pub struct SignComponent {
    pub name: Ident,
    pub args: Vec<Sign>,
}

/// A labeled tuple signature element
#[derive(Debug, Clone)]
pub struct TupleSignElem {
    pub label: Option<Ident>,
    pub sign: Sign,
}

/// Kind of type signature
#[derive(Debug, Clone)]
pub enum SignKind {
    /// `Int`
    Bare(Ident),
    /// `Array<Int>`
    Specialized { base: Ident, args: Vec<Sign> },
    /// `A::B<Int>::C`
    Compound { components: Vec<SignComponent> },
    /// `(Int, label: Bool)`
    Tuple(Vec<TupleSignElem>),
    /// `(Int) -> Bool`, optionally `volatile`
    Function {
        params: Vec<Sign>,
        output: Box<Sign>,
        is_volatile: bool,
    },
    /// `mut Sign`
    Inout(Box<Sign>),
    /// `async Sign`
    Async(Box<Sign>),
    /// `A | B`
    Union(Vec<Sign>),
    /// `A & B`
    Composition(Vec<Sign>),
    /// Produced after a reported error
    Error,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::span::SourceId;

    fn sp(start: usize, end: usize) -> Span {
        Span::new(SourceId(0), start, end)
    }

    #[test]
    fn test_pattern_variables_in_source_order() {
        let binding = BindingId(7);
        let pattern = Pattern {
            kind: PatternKind::Tuple(vec![
                TuplePatternElem {
                    label: None,
                    pattern: Pattern {
                        kind: PatternKind::Named(VarDecl {
                            name: Ident::new("a", sp(1, 2)),
                            binding,
                            ty: TypeSlot::Unresolved,
                        }),
                        span: sp(1, 2),
                    },
                },
                TuplePatternElem {
                    label: None,
                    pattern: Pattern {
                        kind: PatternKind::Named(VarDecl {
                            name: Ident::new("b", sp(4, 5)),
                            binding,
                            ty: TypeSlot::Unresolved,
                        }),
                        span: sp(4, 5),
                    },
                },
            ]),
            span: sp(0, 6),
        };

        let vars = pattern.variables();
        assert_eq!(vars.len(), 2);
        assert_eq!(vars[0].name.name, "a");
        assert_eq!(vars[1].name.name, "b");
        assert!(vars.iter().all(|v| v.binding == binding));
    }

    #[test]
    fn test_space_ancestors_reach_root() {
        let unit = SourceUnit {
            decls: Vec::new(),
            spaces: vec![
                DeclSpace {
                    parent: None,
                    kind: DeclSpaceKind::Unit,
                },
                DeclSpace {
                    parent: Some(ROOT_SPACE),
                    kind: DeclSpaceKind::ProductType,
                },
                DeclSpace {
                    parent: Some(DeclSpaceId(1)),
                    kind: DeclSpaceKind::Function,
                },
            ],
            has_error: false,
            span: sp(0, 0),
        };

        let chain = unit.space_ancestors(DeclSpaceId(2));
        assert_eq!(chain, vec![DeclSpaceId(2), DeclSpaceId(1), ROOT_SPACE]);
    }
}
