//! IR Types
//!
//! Lowered type representations and function identities for the Vela
//! IR.

use crate::sema::{display_specialization, DeclRef, ModelType, Specialization};
use std::fmt;

/// How a parameter is passed to a function
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PassingConvention {
    /// Read-only access to the argument
    Let,
    /// In-place mutable access
    Inout,
    /// Ownership is consumed
    Sink,
}

impl fmt::Display for PassingConvention {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PassingConvention::Let => write!(f, "let"),
            PassingConvention::Inout => write!(f, "inout"),
            PassingConvention::Sink => write!(f, "sink"),
        }
    }
}

/// A type as the IR sees it: a model type plus whether the value is an
/// address
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LoweredType {
    pub model: ModelType,
    pub is_address: bool,
}

impl LoweredType {
    /// An owned object of the given type
    pub fn object(model: ModelType) -> Self {
        Self {
            model,
            is_address: false,
        }
    }

    /// The address of a value of the given type
    pub fn address(model: ModelType) -> Self {
        Self {
            model,
            is_address: true,
        }
    }
}

impl fmt::Display for LoweredType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_address {
            write!(f, "&{}", self.model)
        } else {
            write!(f, "{}", self.model)
        }
    }
}

/// The type of one function input
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ParameterType {
    pub convention: PassingConvention,
    pub ty: LoweredType,
}

impl ParameterType {
    pub fn new(convention: PassingConvention, ty: LoweredType) -> Self {
        Self { convention, ty }
    }
}

impl fmt::Display for ParameterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.convention, self.ty)
    }
}

/// Function linkage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Linkage {
    /// Visible outside the module
    External,
    /// Private to the module
    Module,
}

/// Identifies a global constant in a module
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GlobalId(pub u32);

impl fmt::Display for GlobalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.0)
    }
}

/// The identity of an IR function
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FunctionId {
    /// Lowered from a function declaration
    Lowered(DeclRef),
    /// The constructor form of an initializer declaration
    Constructor(DeclRef),
    /// The accessor of a global binding
    Accessor(DeclRef),
    /// The initializer of a global binding
    Initializer(DeclRef),
    /// A requirement implementation synthesized for a type
    Synthesized {
        requirement: DeclRef,
        model: ModelType,
    },
    /// A monomorphized copy of a generic function, keyed by its
    /// canonical specialization
    Monomorphized {
        base: Box<FunctionId>,
        specialization: Specialization,
    },
}

impl fmt::Display for FunctionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FunctionId::Lowered(d) => write!(f, "{}.lowered", d),
            FunctionId::Constructor(d) => write!(f, "{}.constructor", d),
            FunctionId::Accessor(d) => write!(f, "{}.accessor", d),
            FunctionId::Initializer(d) => write!(f, "{}.initializer", d),
            FunctionId::Synthesized { requirement, model } => {
                write!(f, "synthesized {} for {}", requirement, model)
            }
            FunctionId::Monomorphized {
                base,
                specialization,
            } => {
                write!(f, "{}{}", base, display_specialization(specialization))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sema::GenericParamId;

    #[test]
    fn test_function_id_serialized_forms() {
        let decl = DeclRef::new(1, "min");
        assert_eq!(FunctionId::Lowered(decl.clone()).to_string(), "min.lowered");
        assert_eq!(
            FunctionId::Constructor(decl.clone()).to_string(),
            "min.constructor"
        );
        assert_eq!(
            FunctionId::Accessor(decl.clone()).to_string(),
            "min.accessor"
        );
        assert_eq!(
            FunctionId::Initializer(decl.clone()).to_string(),
            "min.initializer"
        );

        let synthesized = FunctionId::Synthesized {
            requirement: DeclRef::new(2, "equals"),
            model: ModelType::int(64),
        };
        assert_eq!(synthesized.to_string(), "synthesized equals for Int64");

        let mut spec = Specialization::new();
        spec.insert(GenericParamId(0), ModelType::int(64));
        let mono = FunctionId::Monomorphized {
            base: Box::new(FunctionId::Lowered(decl)),
            specialization: spec,
        };
        assert_eq!(mono.to_string(), "min.lowered<Int64>");
    }
}
