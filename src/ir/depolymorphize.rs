//! Depolymorphization
//!
//! Rewrites generic IR functions into specialized copies. For every
//! function with a body:
//! - non-generic functions have their calls to generic callees (and
//!   projections through generic subscripts) redirected to
//!   monomorphized copies;
//! - public (externally linked) generic functions keep an
//!   existentialized entry point, recorded on the module; the wrapper
//!   is currently the identity stub. Module-private generics are left
//!   alone: they are reachable only through calls that monomorphize
//!   them.
//!
//! A monomorphized copy is keyed by `(base, canonical specialization)`
//! and its declaration is installed before its body is rewritten, so
//! recursive generics terminate. Blocks are rewritten in dominator
//! BFS order, guaranteeing every operand's definition is mapped
//! before any of its uses.

use super::analysis::DominatorTree;
use super::function::{BlockAddress, Function, InstAddress, InstructionId, Module};
use super::instr::{Constant, FunctionRef, Instruction, Operand};
use super::types::{FunctionId, Linkage, LoweredType, ParameterType};
use crate::sema::{display_specialization, ModelType, Program, ScopeId, Specialization};
use std::collections::HashMap;

/// Rewrite a whole module so that no reachable call goes through an
/// unspecialized generic function.
pub fn depolymorphize(module: &mut Module, program: &Program) {
    let scope = ScopeId(0);
    let ids: Vec<FunctionId> = module.ids().cloned().collect();
    for id in ids {
        let (has_body, is_generic, linkage) = match module.get(&id) {
            Some(f) => (f.has_body(), f.is_generic(), f.linkage),
            None => continue,
        };
        if !has_body {
            continue;
        }
        if is_generic {
            // Only public generic entry points stay callable from
            // outside the module, through an existentialized wrapper.
            if linkage == Linkage::External {
                let wrapper = existentialize(module, &id);
                module.record_existentialized(id.clone(), wrapper);
            }
            continue;
        }
        rewrite_generic_uses(module, program, &id, scope);
    }
}

/// Produce an API-compatible non-generic wrapper for a generic public
/// function.
///
/// Not implemented: a faithful version adds witness-table and size
/// parameters plus a uniform raw-pointer representation for generic
/// operands. Until then this returns its input unchanged, and
/// monomorphization of all reachable generics is the only path to
/// executable code.
pub fn existentialize(_module: &mut Module, id: &FunctionId) -> FunctionId {
    id.clone()
}

/// Replace, in the non-generic function `id`, every call to a generic
/// callee and every projection through a generic subscript with a
/// reference to a specialized copy. Instruction addresses are
/// preserved.
fn rewrite_generic_uses(module: &mut Module, program: &Program, id: &FunctionId, scope: ScopeId) {
    let mut work: Vec<(BlockAddress, InstAddress, Instruction)> = Vec::new();
    {
        let function = module.get(id).expect("function exists");
        for (baddr, block) in function.blocks.iter() {
            for (iaddr, inst) in block.instructions.iter() {
                let needs_rewrite = match inst {
                    Instruction::Call {
                        callee: Operand::Constant(Constant::Function(fref)),
                        ..
                    } => !fref.specialization.is_empty(),
                    Instruction::Project { callee, .. } => !callee.specialization.is_empty(),
                    _ => false,
                };
                if needs_rewrite {
                    work.push((BlockAddress(baddr), InstAddress(iaddr), inst.clone()));
                }
            }
        }
    }

    let outer = Specialization::new();
    for (baddr, iaddr, inst) in work {
        let rewritten = match inst {
            Instruction::Call {
                callee: Operand::Constant(Constant::Function(fref)),
                args,
                result,
            } => {
                let callee = specialize_callee(module, program, &fref, &outer, scope);
                Instruction::Call {
                    callee: Operand::function(callee),
                    args,
                    result,
                }
            }
            Instruction::Project {
                capability,
                callee,
                args,
                result,
            } => {
                let callee = specialize_callee(module, program, &callee, &outer, scope);
                Instruction::Project {
                    capability,
                    callee,
                    args,
                    result,
                }
            }
            _ => unreachable!("worklist holds only calls and projections"),
        };
        module
            .get_mut(id)
            .expect("function exists")
            .block_mut(baddr)
            .replace(iaddr, rewritten);
    }
}

/// Monomorphize `base` for its specialization, memoized on
/// `(base id, canonical specialization)`. Returns the identity of the
/// specialized copy, or `base`'s own identity when nothing applies to
/// its generic parameters (monomorphizing a monomorphic function is
/// the identity).
pub fn monomorphize(
    module: &mut Module,
    program: &Program,
    base: &FunctionRef,
    scope: ScopeId,
) -> FunctionId {
    let source_generics = match module.get(&base.id) {
        Some(f) => f.generic_parameters.clone(),
        None => panic!("monomorphizing unknown function {}", base.id),
    };

    // Only the parameters the base declares participate in its key.
    let restricted: Specialization = base
        .specialization
        .iter()
        .filter(|(p, _)| source_generics.contains(p))
        .map(|(p, t)| (*p, t.clone()))
        .collect();
    if restricted.is_empty() {
        return base.id.clone();
    }

    let spec = program.canonical_specialization(&restricted, scope);
    let result_id = FunctionId::Monomorphized {
        base: Box::new(base.id.clone()),
        specialization: spec.clone(),
    };
    if module.contains(&result_id) {
        return result_id;
    }

    let source = module.get(&base.id).expect("looked up above").clone();

    // Install the declaration before walking the body so recursive
    // references resolve to the copy under construction.
    let inputs: Vec<ParameterType> = source
        .inputs
        .iter()
        .map(|p| ParameterType::new(p.convention, specialize_lowered(program, &p.ty, &spec, scope)))
        .collect();
    let output = specialize_lowered(program, &source.output, &spec, scope);
    let declaration = Function::new(
        format!("{}{}", source.name, display_specialization(&spec)),
        source.anchor,
        source.linkage,
        inputs,
        output,
        Vec::new(),
    );
    module.declare(result_id.clone(), declaration);

    // Mirror every source block with specialized input types.
    let mut block_map: HashMap<BlockAddress, BlockAddress> = HashMap::new();
    for (baddr, block) in source.blocks.iter() {
        let inputs = block
            .inputs
            .iter()
            .map(|t| specialize_lowered(program, t, &spec, scope))
            .collect();
        let target = module
            .get_mut(&result_id)
            .expect("just declared")
            .append_block(inputs);
        block_map.insert(BlockAddress(baddr), target);
    }

    // Rewrite in dominator BFS order: definitions before uses.
    let cfg = source.cfg();
    let dom = DominatorTree::new(&cfg);
    let mut inst_map: HashMap<InstructionId, InstructionId> = HashMap::new();
    for &baddr in dom.bfs_order() {
        let target_block = block_map[&baddr];
        for (iaddr, inst) in source.block(baddr).instructions.iter() {
            let cx = RewriteCx {
                program,
                spec: &spec,
                scope,
                block_map: &block_map,
                inst_map: &inst_map,
            };
            let rewritten = cx.instruction(module, inst);
            let new_addr = module
                .get_mut(&result_id)
                .expect("just declared")
                .block_mut(target_block)
                .append(rewritten);
            inst_map.insert(
                InstructionId {
                    block: baddr,
                    instruction: InstAddress(iaddr),
                },
                InstructionId {
                    block: target_block,
                    instruction: new_addr,
                },
            );
        }
    }

    result_id
}

/// Resolve a callee reference under an outer specialization:
/// specializations compose through substitution in the callee's scope
/// of use, and view requirements dispatch through the conformance of
/// the receiver's model type.
fn specialize_callee(
    module: &mut Module,
    program: &Program,
    callee: &FunctionRef,
    outer: &Specialization,
    scope: ScopeId,
) -> FunctionRef {
    let composed = program
        .canonical_specialization(&program.specialize_map(&callee.specialization, outer, scope), scope);

    if let FunctionId::Lowered(decl) = &callee.id {
        if program.is_requirement(decl) {
            let view = program.requirements[decl].clone();
            let info = &program.views[&view];
            let receiver = composed
                .get(&info.receiver)
                .cloned()
                .unwrap_or_else(|| panic!("requirement call to {} has no receiver argument", decl));
            let conformance = program
                .conformance(&receiver, &view, scope)
                .unwrap_or_else(|| panic!("no conformance of {} to {}", receiver, view));
            let implementation = conformance
                .implementation(decl)
                .unwrap_or_else(|| {
                    panic!("conformance of {} to {} lacks {}", receiver, view, decl)
                })
                .clone();
            let impl_ref = FunctionRef::new(FunctionId::Lowered(implementation), composed);
            return FunctionRef::monomorphic(monomorphize(module, program, &impl_ref, scope));
        }
    }

    if composed.is_empty() {
        return FunctionRef::monomorphic(callee.id.clone());
    }
    let specialized = FunctionRef::new(callee.id.clone(), composed);
    FunctionRef::monomorphic(monomorphize(module, program, &specialized, scope))
}

fn specialize_lowered(
    program: &Program,
    ty: &LoweredType,
    spec: &Specialization,
    scope: ScopeId,
) -> LoweredType {
    LoweredType {
        model: program.canonical(&program.specialize(&ty.model, spec, scope), scope),
        is_address: ty.is_address,
    }
}

/// Everything one instruction rewrite needs, besides the module
struct RewriteCx<'a> {
    program: &'a Program,
    spec: &'a Specialization,
    scope: ScopeId,
    block_map: &'a HashMap<BlockAddress, BlockAddress>,
    inst_map: &'a HashMap<InstructionId, InstructionId>,
}

impl RewriteCx<'_> {
    fn ty(&self, t: &ModelType) -> ModelType {
        self.program
            .canonical(&self.program.specialize(t, self.spec, self.scope), self.scope)
    }

    fn operand(&self, module: &mut Module, operand: &Operand) -> Operand {
        match operand {
            Operand::Constant(c) => Operand::Constant(self.constant(module, c)),
            Operand::Parameter { block, index } => Operand::Parameter {
                block: *self
                    .block_map
                    .get(block)
                    .unwrap_or_else(|| panic!("parameter of unmapped block {}", block)),
                index: *index,
            },
            Operand::Result(id) => Operand::Result(*self.inst_map.get(id).unwrap_or_else(|| {
                panic!("definition of {} does not dominate its use", id)
            })),
        }
    }

    fn operands(&self, module: &mut Module, operands: &[Operand]) -> Vec<Operand> {
        operands.iter().map(|o| self.operand(module, o)).collect()
    }

    fn constant(&self, module: &mut Module, constant: &Constant) -> Constant {
        match constant {
            Constant::Function(fref) => Constant::Function(specialize_callee(
                module,
                self.program,
                fref,
                self.spec,
                self.scope,
            )),
            Constant::Metatype(t) => Constant::Metatype(self.ty(t)),
            other => other.clone(),
        }
    }

    fn block(&self, address: BlockAddress) -> BlockAddress {
        *self
            .block_map
            .get(&address)
            .unwrap_or_else(|| panic!("branch to unmapped block {}", address))
    }

    /// Rewrite one instruction. The match is total over the
    /// instruction set; a kind added without a case here fails to
    /// compile rather than being skipped silently.
    fn instruction(&self, module: &mut Module, inst: &Instruction) -> Instruction {
        match inst {
            Instruction::AllocStack { ty } => Instruction::AllocStack { ty: self.ty(ty) },
            Instruction::DeallocStack { target } => Instruction::DeallocStack {
                target: self.operand(module, target),
            },
            Instruction::Load { source, ty } => Instruction::Load {
                source: self.operand(module, source),
                ty: self.ty(ty),
            },
            Instruction::Store { value, target } => Instruction::Store {
                value: self.operand(module, value),
                target: self.operand(module, target),
            },
            Instruction::MarkState {
                target,
                initialized,
            } => Instruction::MarkState {
                target: self.operand(module, target),
                initialized: *initialized,
            },
            Instruction::AddressToPointer { source } => Instruction::AddressToPointer {
                source: self.operand(module, source),
            },
            Instruction::PointerToAddress { source, ty } => Instruction::PointerToAddress {
                source: self.operand(module, source),
                ty: self.ty(ty),
            },
            Instruction::AdvancedByBytes { base, offset } => Instruction::AdvancedByBytes {
                base: self.operand(module, base),
                offset: self.operand(module, offset),
            },
            Instruction::AdvancedByStrides { base, ty, offset } => {
                Instruction::AdvancedByStrides {
                    base: self.operand(module, base),
                    ty: self.ty(ty),
                    offset: *offset,
                }
            }
            Instruction::SubfieldView { base, path } => Instruction::SubfieldView {
                base: self.operand(module, base),
                path: path.clone(),
            },
            Instruction::Branch { target, args } => Instruction::Branch {
                target: self.block(*target),
                args: self.operands(module, args),
            },
            Instruction::CondBranch {
                condition,
                on_true,
                on_false,
            } => Instruction::CondBranch {
                condition: self.operand(module, condition),
                on_true: self.block(*on_true),
                on_false: self.block(*on_false),
            },
            Instruction::Switch { index, successors } => Instruction::Switch {
                index: self.operand(module, index),
                successors: successors.iter().map(|s| self.block(*s)).collect(),
            },
            Instruction::Return { value } => Instruction::Return {
                value: self.operand(module, value),
            },
            Instruction::Unreachable => Instruction::Unreachable,
            Instruction::Yield {
                capability,
                projected,
            } => Instruction::Yield {
                capability: *capability,
                projected: self.operand(module, projected),
            },
            Instruction::Access {
                capabilities,
                source,
            } => Instruction::Access {
                capabilities: capabilities.clone(),
                source: self.operand(module, source),
            },
            Instruction::EndAccess { start } => Instruction::EndAccess {
                start: self.operand(module, start),
            },
            Instruction::CaptureIn { source, target } => Instruction::CaptureIn {
                source: self.operand(module, source),
                target: self.operand(module, target),
            },
            Instruction::OpenCapture { source } => Instruction::OpenCapture {
                source: self.operand(module, source),
            },
            Instruction::CloseCapture { start } => Instruction::CloseCapture {
                start: self.operand(module, start),
            },
            Instruction::ReleaseCaptures { container } => Instruction::ReleaseCaptures {
                container: self.operand(module, container),
            },
            Instruction::OpenUnion {
                container,
                payload,
                for_initialization,
            } => Instruction::OpenUnion {
                container: self.operand(module, container),
                payload: self.ty(payload),
                for_initialization: *for_initialization,
            },
            Instruction::CloseUnion { start } => Instruction::CloseUnion {
                start: self.operand(module, start),
            },
            Instruction::UnionDiscriminator { container } => Instruction::UnionDiscriminator {
                container: self.operand(module, container),
            },
            Instruction::Call {
                callee,
                args,
                result,
            } => Instruction::Call {
                callee: self.operand(module, callee),
                args: self.operands(module, args),
                result: self.ty(result),
            },
            Instruction::CallFFI {
                callee,
                args,
                result,
            } => Instruction::CallFFI {
                callee: callee.clone(),
                args: self.operands(module, args),
                result: self.ty(result),
            },
            Instruction::Llvm {
                op,
                operands,
                result,
            } => Instruction::Llvm {
                op: op.clone(),
                operands: self.operands(module, operands),
                result: self.ty(result),
            },
            Instruction::Project {
                capability,
                callee,
                args,
                result,
            } => Instruction::Project {
                capability: *capability,
                callee: specialize_callee(module, self.program, callee, self.spec, self.scope),
                args: self.operands(module, args),
                result: self.ty(result),
            },
            Instruction::EndProject { start } => Instruction::EndProject {
                start: self.operand(module, start),
            },
            Instruction::ConstantString { value } => Instruction::ConstantString {
                value: value.clone(),
            },
            Instruction::GlobalAddr { id, ty } => Instruction::GlobalAddr {
                id: *id,
                ty: self.ty(ty),
            },
        }
    }
}
