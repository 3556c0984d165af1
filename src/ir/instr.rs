//! IR Instructions
//!
//! Instruction and operand definitions for the Vela IR.

use super::function::{BlockAddress, InstructionId};
use super::types::{FunctionId, GlobalId};
use crate::sema::{ModelType, Specialization};
use std::fmt;

/// A reference to a function, together with the specialization its
/// generic parameters are applied to
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FunctionRef {
    pub id: FunctionId,
    pub specialization: Specialization,
}

impl FunctionRef {
    /// A reference with no generic arguments
    pub fn monomorphic(id: FunctionId) -> Self {
        Self {
            id,
            specialization: Specialization::new(),
        }
    }

    pub fn new(id: FunctionId, specialization: Specialization) -> Self {
        Self { id, specialization }
    }
}

impl fmt::Display for FunctionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.id)?;
        if !self.specialization.is_empty() {
            write!(f, "{}", crate::sema::display_specialization(&self.specialization))?;
        }
        Ok(())
    }
}

/// A compile-time constant operand
#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    Int { value: i64, width: u32 },
    Float { value: f64, width: u32 },
    Bool(bool),
    Void,
    /// A reference to another function
    Function(FunctionRef),
    /// A type used as a value
    Metatype(ModelType),
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constant::Int { value, width } => write!(f, "{}i{}", value, width),
            Constant::Float { value, width } => write!(f, "{}f{}", value, width),
            Constant::Bool(v) => write!(f, "{}", v),
            Constant::Void => write!(f, "void"),
            Constant::Function(r) => write!(f, "{}", r),
            Constant::Metatype(t) => write!(f, "metatype {}", t),
        }
    }
}

/// An instruction operand: a constant, a block parameter, or the
/// result of another instruction
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Constant(Constant),
    /// The `index`-th input of `block`
    Parameter { block: BlockAddress, index: usize },
    /// The result of an instruction
    Result(InstructionId),
}

impl Operand {
    pub fn function(r: FunctionRef) -> Self {
        Operand::Constant(Constant::Function(r))
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Constant(c) => write!(f, "{}", c),
            Operand::Parameter { block, index } => write!(f, "{}#{}", block, index),
            Operand::Result(id) => write!(f, "%{}", id),
        }
    }
}

/// The capability an access or projection grants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessEffect {
    Let,
    Inout,
    Set,
    Sink,
}

impl fmt::Display for AccessEffect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessEffect::Let => write!(f, "let"),
            AccessEffect::Inout => write!(f, "inout"),
            AccessEffect::Set => write!(f, "set"),
            AccessEffect::Sink => write!(f, "sink"),
        }
    }
}

/// Kinds of instructions
#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    // ============ Memory ============
    /// Allocate stack storage for a value of `ty`; yields its address
    AllocStack { ty: ModelType },
    /// Free storage produced by `AllocStack`
    DeallocStack { target: Operand },
    /// Load the value stored at an address
    Load { source: Operand, ty: ModelType },
    /// Store a value at an address
    Store { value: Operand, target: Operand },
    /// Mark storage as (de)initialized
    MarkState { target: Operand, initialized: bool },
    /// Erase an address into a raw pointer
    AddressToPointer { source: Operand },
    /// Interpret a raw pointer as the address of a `ty`
    PointerToAddress { source: Operand, ty: ModelType },
    /// Address advanced by a byte offset
    AdvancedByBytes { base: Operand, offset: Operand },
    /// Address advanced by `offset` strides of `ty`
    AdvancedByStrides {
        base: Operand,
        ty: ModelType,
        offset: usize,
    },
    /// The address of a stored part of a record
    SubfieldView { base: Operand, path: Vec<u32> },

    // ============ Control flow ============
    /// Unconditional branch, forwarding arguments to the target's
    /// inputs
    Branch {
        target: BlockAddress,
        args: Vec<Operand>,
    },
    /// Two-way branch on a boolean
    CondBranch {
        condition: Operand,
        on_true: BlockAddress,
        on_false: BlockAddress,
    },
    /// Multi-way branch on an integer index
    Switch {
        index: Operand,
        successors: Vec<BlockAddress>,
    },
    /// Return a value to the caller
    Return { value: Operand },
    /// Control never reaches here
    Unreachable,
    /// Yield a projected value to the caller of a projection
    Yield {
        capability: AccessEffect,
        projected: Operand,
    },

    // ============ Access ============
    /// Begin an access on storage with one of the given capabilities
    Access {
        capabilities: Vec<AccessEffect>,
        source: Operand,
    },
    /// End an access started by `Access`
    EndAccess { start: Operand },
    /// Store a capture into a capture container
    CaptureIn { source: Operand, target: Operand },
    /// Open a captured access
    OpenCapture { source: Operand },
    /// Close an access opened by `OpenCapture`
    CloseCapture { start: Operand },
    /// Release all captures held by a container
    ReleaseCaptures { container: Operand },

    // ============ Unions ============
    /// View a union container as one of its payload types
    OpenUnion {
        container: Operand,
        payload: ModelType,
        for_initialization: bool,
    },
    /// End a view opened by `OpenUnion`
    CloseUnion { start: Operand },
    /// The discriminator of the value held by a union container
    UnionDiscriminator { container: Operand },

    // ============ Calls ============
    /// Apply a function to fully-evaluated arguments
    Call {
        callee: Operand,
        args: Vec<Operand>,
        result: ModelType,
    },
    /// Apply a foreign function by symbol name
    CallFFI {
        callee: String,
        args: Vec<Operand>,
        result: ModelType,
    },
    /// Apply a machine-level primitive by its LLVM spelling
    Llvm {
        op: String,
        operands: Vec<Operand>,
        result: ModelType,
    },

    // ============ Projections ============
    /// Begin projecting a value through a subscript
    Project {
        capability: AccessEffect,
        callee: FunctionRef,
        args: Vec<Operand>,
        result: ModelType,
    },
    /// End a projection started by `Project`
    EndProject { start: Operand },

    // ============ Literals ============
    /// The address of a constant string
    ConstantString { value: Vec<u8> },
    /// The address of a global
    GlobalAddr { id: GlobalId, ty: ModelType },
}

impl Instruction {
    /// Terminators may appear only as the last instruction of a block
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            Instruction::Branch { .. }
                | Instruction::CondBranch { .. }
                | Instruction::Switch { .. }
                | Instruction::Return { .. }
                | Instruction::Unreachable
                | Instruction::Yield { .. }
        )
    }

    /// The blocks control may transfer to from this instruction
    pub fn successors(&self) -> Vec<BlockAddress> {
        match self {
            Instruction::Branch { target, .. } => vec![*target],
            Instruction::CondBranch {
                on_true, on_false, ..
            } => vec![*on_true, *on_false],
            Instruction::Switch { successors, .. } => successors.clone(),
            _ => Vec::new(),
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn list(f: &mut fmt::Formatter<'_>, items: &[Operand]) -> fmt::Result {
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}", item)?;
            }
            Ok(())
        }

        match self {
            Instruction::AllocStack { ty } => write!(f, "alloc_stack {}", ty),
            Instruction::DeallocStack { target } => write!(f, "dealloc_stack {}", target),
            Instruction::Load { source, ty } => write!(f, "load {} as {}", source, ty),
            Instruction::Store { value, target } => write!(f, "store {}, {}", value, target),
            Instruction::MarkState {
                target,
                initialized,
            } => write!(
                f,
                "mark_state [{}] {}",
                if *initialized { "init" } else { "deinit" },
                target
            ),
            Instruction::AddressToPointer { source } => {
                write!(f, "address_to_pointer {}", source)
            }
            Instruction::PointerToAddress { source, ty } => {
                write!(f, "pointer_to_address {} as {}", source, ty)
            }
            Instruction::AdvancedByBytes { base, offset } => {
                write!(f, "advanced {} by bytes {}", base, offset)
            }
            Instruction::AdvancedByStrides { base, ty, offset } => {
                write!(f, "advanced {} by {} strides of {}", base, offset, ty)
            }
            Instruction::SubfieldView { base, path } => {
                write!(f, "subfield_view {} at ", base)?;
                for (i, p) in path.iter().enumerate() {
                    if i > 0 {
                        write!(f, ".")?;
                    }
                    write!(f, "{}", p)?;
                }
                Ok(())
            }
            Instruction::Branch { target, args } => {
                write!(f, "branch {}(", target)?;
                list(f, args)?;
                write!(f, ")")
            }
            Instruction::CondBranch {
                condition,
                on_true,
                on_false,
            } => write!(f, "cond_branch {}, {}, {}", condition, on_true, on_false),
            Instruction::Switch { index, successors } => {
                write!(f, "switch {} [", index)?;
                for (i, s) in successors.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", s)?;
                }
                write!(f, "]")
            }
            Instruction::Return { value } => write!(f, "return {}", value),
            Instruction::Unreachable => write!(f, "unreachable"),
            Instruction::Yield {
                capability,
                projected,
            } => write!(f, "yield [{}] {}", capability, projected),
            Instruction::Access {
                capabilities,
                source,
            } => {
                write!(f, "access [")?;
                for (i, c) in capabilities.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{}", c)?;
                }
                write!(f, "] {}", source)
            }
            Instruction::EndAccess { start } => write!(f, "end_access {}", start),
            Instruction::CaptureIn { source, target } => {
                write!(f, "capture {} in {}", source, target)
            }
            Instruction::OpenCapture { source } => write!(f, "open_capture {}", source),
            Instruction::CloseCapture { start } => write!(f, "close_capture {}", start),
            Instruction::ReleaseCaptures { container } => {
                write!(f, "release_captures {}", container)
            }
            Instruction::OpenUnion {
                container,
                payload,
                for_initialization,
            } => write!(
                f,
                "open_union {} as {}{}",
                container,
                payload,
                if *for_initialization { " [init]" } else { "" }
            ),
            Instruction::CloseUnion { start } => write!(f, "close_union {}", start),
            Instruction::UnionDiscriminator { container } => {
                write!(f, "union_discriminator {}", container)
            }
            Instruction::Call {
                callee,
                args,
                result,
            } => {
                write!(f, "call {}(", callee)?;
                list(f, args)?;
                write!(f, ") -> {}", result)
            }
            Instruction::CallFFI {
                callee,
                args,
                result,
            } => {
                write!(f, "call_ffi {}(", callee)?;
                list(f, args)?;
                write!(f, ") -> {}", result)
            }
            Instruction::Llvm {
                op,
                operands,
                result,
            } => {
                write!(f, "llvm {}(", op)?;
                list(f, operands)?;
                write!(f, ") -> {}", result)
            }
            Instruction::Project {
                capability,
                callee,
                args,
                result,
            } => {
                write!(f, "project [{}] {}(", capability, callee)?;
                list(f, args)?;
                write!(f, ") -> {}", result)
            }
            Instruction::EndProject { start } => write!(f, "end_project {}", start),
            Instruction::ConstantString { value } => {
                write!(f, "constant_string {:?}", String::from_utf8_lossy(value))
            }
            Instruction::GlobalAddr { id, ty } => write!(f, "global_addr {} as {}", id, ty),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminators() {
        assert!(Instruction::Unreachable.is_terminator());
        assert!(Instruction::Return {
            value: Operand::Constant(Constant::Void)
        }
        .is_terminator());
        assert!(Instruction::Yield {
            capability: AccessEffect::Let,
            projected: Operand::Constant(Constant::Void),
        }
        .is_terminator());
        assert!(!Instruction::AllocStack {
            ty: ModelType::int(64)
        }
        .is_terminator());
    }

    #[test]
    fn test_successors() {
        let branch = Instruction::Branch {
            target: BlockAddress(2),
            args: Vec::new(),
        };
        assert_eq!(branch.successors(), vec![BlockAddress(2)]);

        let cond = Instruction::CondBranch {
            condition: Operand::Constant(Constant::Bool(true)),
            on_true: BlockAddress(1),
            on_false: BlockAddress(2),
        };
        assert_eq!(cond.successors(), vec![BlockAddress(1), BlockAddress(2)]);

        let switch = Instruction::Switch {
            index: Operand::Constant(Constant::Int { value: 0, width: 8 }),
            successors: vec![BlockAddress(1), BlockAddress(2), BlockAddress(3)],
        };
        assert_eq!(switch.successors().len(), 3);

        let ret = Instruction::Return {
            value: Operand::Constant(Constant::Void),
        };
        assert!(ret.successors().is_empty());
    }
}
