//! Semantic program model
//!
//! The shape of the type checker's outputs, as consumed by the IR
//! passes: canonical model types, specializations of generic
//! parameters, and conformance lookup. The checker itself lives
//! outside this crate; these tables are what it hands over.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// A reference to a declaration known to the semantic program.
///
/// Identity is the numeric id; the name rides along so that function
/// identities and diagnostics can print without a table lookup.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeclRef {
    pub id: u32,
    pub name: String,
}

impl DeclRef {
    pub fn new(id: u32, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

impl fmt::Display for DeclRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// A generic parameter, identified across the whole program
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GenericParamId(pub u32);

impl fmt::Display for GenericParamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%T{}", self.0)
    }
}

/// A lexical scope, used to qualify specialization and
/// canonicalization requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ScopeId(pub u32);

/// Built-in machine-level types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BuiltinType {
    Bool,
    /// Signed integer of the given bit width
    Int(u32),
    /// IEEE float of the given bit width
    Float(u32),
    /// An untyped address
    Pointer,
    /// The empty tuple / no value
    Void,
}

impl fmt::Display for BuiltinType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuiltinType::Bool => write!(f, "Bool"),
            BuiltinType::Int(w) => write!(f, "Int{}", w),
            BuiltinType::Float(w) => write!(f, "Float{}", w),
            BuiltinType::Pointer => write!(f, "Pointer"),
            BuiltinType::Void => write!(f, "Void"),
        }
    }
}

/// A canonical semantic type
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ModelType {
    Builtin(BuiltinType),
    /// A nominal product type, possibly applied to generic arguments
    Product {
        decl: DeclRef,
        args: Vec<ModelType>,
    },
    /// A generic parameter not yet substituted
    Generic(GenericParamId),
    Tuple(Vec<ModelType>),
    /// An anonymous union of alternatives
    Union(Vec<ModelType>),
    /// A function type
    Arrow {
        inputs: Vec<ModelType>,
        output: Box<ModelType>,
    },
    /// The type of a type
    Metatype(Box<ModelType>),
    /// Stand-in produced after a reported error
    Error,
}

impl ModelType {
    pub fn bool() -> Self {
        ModelType::Builtin(BuiltinType::Bool)
    }

    pub fn int(width: u32) -> Self {
        ModelType::Builtin(BuiltinType::Int(width))
    }

    pub fn float(width: u32) -> Self {
        ModelType::Builtin(BuiltinType::Float(width))
    }

    pub fn void() -> Self {
        ModelType::Builtin(BuiltinType::Void)
    }

    pub fn product(decl: DeclRef, args: Vec<ModelType>) -> Self {
        ModelType::Product { decl, args }
    }

    pub fn metatype(of: ModelType) -> Self {
        ModelType::Metatype(Box::new(of))
    }

    /// Does this type mention any unsubstituted generic parameter?
    pub fn is_generic(&self) -> bool {
        match self {
            ModelType::Generic(_) => true,
            ModelType::Builtin(_) | ModelType::Error => false,
            ModelType::Product { args, .. } => args.iter().any(ModelType::is_generic),
            ModelType::Tuple(elems) | ModelType::Union(elems) => {
                elems.iter().any(ModelType::is_generic)
            }
            ModelType::Arrow { inputs, output } => {
                inputs.iter().any(ModelType::is_generic) || output.is_generic()
            }
            ModelType::Metatype(inner) => inner.is_generic(),
        }
    }

    /// The head under which conformances for this type are registered
    pub fn head(&self) -> TypeHead {
        match self {
            ModelType::Builtin(b) => TypeHead::Builtin(*b),
            ModelType::Product { decl, .. } => TypeHead::Product(decl.clone()),
            ModelType::Tuple(_) => TypeHead::Tuple,
            ModelType::Union(_) => TypeHead::Union,
            ModelType::Arrow { .. } => TypeHead::Arrow,
            ModelType::Metatype(_) => TypeHead::Metatype,
            ModelType::Generic(p) => TypeHead::Generic(*p),
            ModelType::Error => TypeHead::Error,
        }
    }
}

impl fmt::Display for ModelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelType::Builtin(b) => write!(f, "{}", b),
            ModelType::Product { decl, args } => {
                write!(f, "{}", decl)?;
                if !args.is_empty() {
                    write!(f, "<")?;
                    for (i, a) in args.iter().enumerate() {
                        if i > 0 {
                            write!(f, ", ")?;
                        }
                        write!(f, "{}", a)?;
                    }
                    write!(f, ">")?;
                }
                Ok(())
            }
            ModelType::Generic(p) => write!(f, "{}", p),
            ModelType::Tuple(elems) => {
                write!(f, "(")?;
                for (i, e) in elems.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", e)?;
                }
                write!(f, ")")
            }
            ModelType::Union(elems) => {
                for (i, e) in elems.iter().enumerate() {
                    if i > 0 {
                        write!(f, " | ")?;
                    }
                    write!(f, "{}", e)?;
                }
                Ok(())
            }
            ModelType::Arrow { inputs, output } => {
                write!(f, "(")?;
                for (i, p) in inputs.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", p)?;
                }
                write!(f, ") -> {}", output)
            }
            ModelType::Metatype(inner) => write!(f, "Metatype<{}>", inner),
            ModelType::Error => write!(f, "<error>"),
        }
    }
}

/// The dispatch key for conformance lookup
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeHead {
    Builtin(BuiltinType),
    Product(DeclRef),
    Tuple,
    Union,
    Arrow,
    Metatype,
    Generic(GenericParamId),
    Error,
}

/// A mapping from generic parameters to the concrete arguments that
/// replace them.
///
/// Ordered so that equal mappings hash and print identically, which is
/// what keys monomorphized copies.
pub type Specialization = BTreeMap<GenericParamId, ModelType>;

/// Formats a specialization the way function identities print it:
/// `<Int64, Bool>`
pub fn display_specialization(spec: &Specialization) -> String {
    let mut out = String::from("<");
    for (i, ty) in spec.values().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        out.push_str(&ty.to_string());
    }
    out.push('>');
    out
}

/// Evidence that a type satisfies a view: the map from each of the
/// view's requirements to the declaration implementing it.
#[derive(Debug, Clone)]
pub struct Conformance {
    pub view: DeclRef,
    pub implementations: HashMap<DeclRef, DeclRef>,
}

impl Conformance {
    /// The declaration implementing `requirement`, if the table has one
    pub fn implementation(&self, requirement: &DeclRef) -> Option<&DeclRef> {
        self.implementations.get(requirement)
    }
}

/// A view definition: the generic parameter standing for the
/// conforming type, and the view's abstract requirements
#[derive(Debug, Clone)]
pub struct ViewInfo {
    pub receiver: GenericParamId,
    pub requirements: Vec<DeclRef>,
}

/// The semantic program: everything the IR passes need to know about
/// the type checker's conclusions.
#[derive(Debug, Default)]
pub struct Program {
    /// Views by declaration
    pub views: HashMap<DeclRef, ViewInfo>,
    /// Requirement declaration -> the view it belongs to
    pub requirements: HashMap<DeclRef, DeclRef>,
    /// Conformance tables keyed by (conforming type head, view)
    conformances: HashMap<(TypeHead, DeclRef), Conformance>,
}

impl Program {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a view and remember which view each requirement
    /// belongs to
    pub fn declare_view(
        &mut self,
        view: DeclRef,
        receiver: GenericParamId,
        requirements: Vec<DeclRef>,
    ) {
        for req in &requirements {
            self.requirements.insert(req.clone(), view.clone());
        }
        self.views.insert(
            view,
            ViewInfo {
                receiver,
                requirements,
            },
        );
    }

    /// Is `decl` one of some view's abstract requirements?
    pub fn is_requirement(&self, decl: &DeclRef) -> bool {
        self.requirements.contains_key(decl)
    }

    /// Record that `model` conforms to `conformance.view`
    pub fn declare_conformance(&mut self, model: &ModelType, conformance: Conformance) {
        self.conformances
            .insert((model.head(), conformance.view.clone()), conformance);
    }

    /// Locate the conformance of `model` to `view` visible from
    /// `scope`.
    ///
    /// Conformances in this model are program-wide, so the scope only
    /// participates in the request shape; lookup is by type head.
    pub fn conformance(
        &self,
        model: &ModelType,
        view: &DeclRef,
        _exposed_to: ScopeId,
    ) -> Option<&Conformance> {
        self.conformances.get(&(model.head(), view.clone()))
    }

    /// Substitute `spec` through `ty`. Parameters without a binding in
    /// `spec` are left in place.
    pub fn specialize(&self, ty: &ModelType, spec: &Specialization, scope: ScopeId) -> ModelType {
        match ty {
            ModelType::Generic(p) => spec.get(p).cloned().unwrap_or_else(|| ty.clone()),
            ModelType::Builtin(_) | ModelType::Error => ty.clone(),
            ModelType::Product { decl, args } => ModelType::Product {
                decl: decl.clone(),
                args: args.iter().map(|a| self.specialize(a, spec, scope)).collect(),
            },
            ModelType::Tuple(elems) => ModelType::Tuple(
                elems.iter().map(|e| self.specialize(e, spec, scope)).collect(),
            ),
            ModelType::Union(elems) => ModelType::Union(
                elems.iter().map(|e| self.specialize(e, spec, scope)).collect(),
            ),
            ModelType::Arrow { inputs, output } => ModelType::Arrow {
                inputs: inputs.iter().map(|i| self.specialize(i, spec, scope)).collect(),
                output: Box::new(self.specialize(output, spec, scope)),
            },
            ModelType::Metatype(inner) => {
                ModelType::Metatype(Box::new(self.specialize(inner, spec, scope)))
            }
        }
    }

    /// Compose two specializations: rewrite the arguments of `inner`
    /// through `outer` in the given scope of use. The keys stay
    /// `inner`'s keys.
    pub fn specialize_map(
        &self,
        inner: &Specialization,
        outer: &Specialization,
        scope: ScopeId,
    ) -> Specialization {
        inner
            .iter()
            .map(|(param, ty)| (*param, self.specialize(ty, outer, scope)))
            .collect()
    }

    /// Produce the canonical representative of `ty` in `scope`.
    ///
    /// Unions are flattened, deduplicated, and sorted; a one-member
    /// union is its member. Everything else canonicalizes recursively.
    pub fn canonical(&self, ty: &ModelType, scope: ScopeId) -> ModelType {
        match ty {
            ModelType::Builtin(_) | ModelType::Generic(_) | ModelType::Error => ty.clone(),
            ModelType::Product { decl, args } => ModelType::Product {
                decl: decl.clone(),
                args: args.iter().map(|a| self.canonical(a, scope)).collect(),
            },
            ModelType::Tuple(elems) => {
                ModelType::Tuple(elems.iter().map(|e| self.canonical(e, scope)).collect())
            }
            ModelType::Union(elems) => {
                let mut members = Vec::new();
                for e in elems {
                    match self.canonical(e, scope) {
                        ModelType::Union(inner) => members.extend(inner),
                        other => members.push(other),
                    }
                }
                members.sort();
                members.dedup();
                if members.len() == 1 {
                    members.pop().unwrap()
                } else {
                    ModelType::Union(members)
                }
            }
            ModelType::Arrow { inputs, output } => ModelType::Arrow {
                inputs: inputs.iter().map(|i| self.canonical(i, scope)).collect(),
                output: Box::new(self.canonical(output, scope)),
            },
            ModelType::Metatype(inner) => {
                ModelType::Metatype(Box::new(self.canonical(inner, scope)))
            }
        }
    }

    /// Canonicalize every argument of a specialization
    pub fn canonical_specialization(
        &self,
        spec: &Specialization,
        scope: ScopeId,
    ) -> Specialization {
        spec.iter()
            .map(|(param, ty)| (*param, self.canonical(ty, scope)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(id: u32) -> GenericParamId {
        GenericParamId(id)
    }

    #[test]
    fn test_specialize_substitutes_parameters() {
        let program = Program::new();
        let scope = ScopeId(0);
        let mut spec = Specialization::new();
        spec.insert(t(0), ModelType::int(64));

        let ty = ModelType::Tuple(vec![ModelType::Generic(t(0)), ModelType::bool()]);
        let got = program.specialize(&ty, &spec, scope);
        assert_eq!(
            got,
            ModelType::Tuple(vec![ModelType::int(64), ModelType::bool()])
        );
    }

    #[test]
    fn test_specialize_map_composes() {
        let program = Program::new();
        let scope = ScopeId(0);

        // inner: U := T, outer: T := Int64
        let mut inner = Specialization::new();
        inner.insert(t(1), ModelType::Generic(t(0)));
        let mut outer = Specialization::new();
        outer.insert(t(0), ModelType::int(64));

        let composed = program.specialize_map(&inner, &outer, scope);
        assert_eq!(composed.get(&t(1)), Some(&ModelType::int(64)));
    }

    #[test]
    fn test_canonical_flattens_unions() {
        let program = Program::new();
        let scope = ScopeId(0);
        let ty = ModelType::Union(vec![
            ModelType::int(64),
            ModelType::Union(vec![ModelType::bool(), ModelType::int(64)]),
        ]);
        let got = program.canonical(&ty, scope);
        assert_eq!(
            got,
            ModelType::Union(vec![ModelType::bool(), ModelType::int(64)])
        );
    }

    #[test]
    fn test_canonical_unwraps_singleton_union() {
        let program = Program::new();
        let scope = ScopeId(0);
        let ty = ModelType::Union(vec![ModelType::int(64), ModelType::int(64)]);
        assert_eq!(program.canonical(&ty, scope), ModelType::int(64));
    }

    #[test]
    fn test_conformance_lookup_by_head() {
        let mut program = Program::new();
        let view = DeclRef::new(1, "Eq");
        let req = DeclRef::new(2, "equals");
        let imp = DeclRef::new(3, "Int64.equals");
        program.declare_view(view.clone(), t(9), vec![req.clone()]);

        let model = ModelType::int(64);
        let mut implementations = HashMap::new();
        implementations.insert(req.clone(), imp.clone());
        program.declare_conformance(
            &model,
            Conformance {
                view: view.clone(),
                implementations,
            },
        );

        let found = program
            .conformance(&model, &view, ScopeId(0))
            .expect("conformance registered");
        assert_eq!(found.implementation(&req), Some(&imp));
        assert!(program.is_requirement(&req));
    }
}
