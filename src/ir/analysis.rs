//! Control-flow and dominance analysis over IR functions
//!
//! The CFG is rebuilt on demand by walking block terminators. The
//! dominator sets are computed by iterating the predecessor
//! intersection to a fixpoint, then collapsed into immediate
//! dominators and a tree whose breadth-first order visits every block
//! only after all of its dominators.

use super::function::{BlockAddress, Function};
use std::collections::{HashMap, HashSet, VecDeque};

/// Predecessor/successor maps of a function's blocks
#[derive(Debug, Default)]
pub struct ControlFlowGraph {
    pub entry: Option<BlockAddress>,
    successors: HashMap<BlockAddress, Vec<BlockAddress>>,
    predecessors: HashMap<BlockAddress, Vec<BlockAddress>>,
}

impl ControlFlowGraph {
    pub fn successors(&self, block: BlockAddress) -> &[BlockAddress] {
        self.successors.get(&block).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn predecessors(&self, block: BlockAddress) -> &[BlockAddress] {
        self.predecessors.get(&block).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Blocks reachable from the entry, in deterministic BFS order
    pub fn reachable(&self) -> Vec<BlockAddress> {
        let mut seen = HashSet::new();
        let mut order = Vec::new();
        let mut queue = VecDeque::new();
        if let Some(entry) = self.entry {
            queue.push_back(entry);
            seen.insert(entry);
        }
        while let Some(block) = queue.pop_front() {
            order.push(block);
            for &next in self.successors(block) {
                if seen.insert(next) {
                    queue.push_back(next);
                }
            }
        }
        order
    }
}

impl Function {
    /// Build the predecessor/successor graph by walking terminators
    pub fn cfg(&self) -> ControlFlowGraph {
        let mut graph = ControlFlowGraph {
            entry: self.entry(),
            ..ControlFlowGraph::default()
        };
        for (addr, block) in self.blocks.iter() {
            let from = BlockAddress(addr);
            graph.successors.entry(from).or_default();
            graph.predecessors.entry(from).or_default();
            let targets = block
                .terminator()
                .map(|t| t.successors())
                .unwrap_or_default();
            for target in targets {
                graph.successors.entry(from).or_default().push(target);
                graph.predecessors.entry(target).or_default().push(from);
            }
        }
        graph
    }
}

/// The dominator tree of a function's CFG
#[derive(Debug)]
pub struct DominatorTree {
    /// Immediate dominator of each block except the entry
    idom: HashMap<BlockAddress, BlockAddress>,
    /// Breadth-first order over the tree: every block appears after
    /// all of its dominators
    order: Vec<BlockAddress>,
}

impl DominatorTree {
    pub fn new(cfg: &ControlFlowGraph) -> Self {
        let entry = match cfg.entry {
            Some(entry) => entry,
            None => {
                return Self {
                    idom: HashMap::new(),
                    order: Vec::new(),
                }
            }
        };

        let all: Vec<BlockAddress> = cfg.reachable();
        let everything: HashSet<BlockAddress> = all.iter().copied().collect();

        // Dominator sets: the entry dominates itself; everything else
        // starts at the full set and shrinks to a fixpoint.
        let mut dominators: HashMap<BlockAddress, HashSet<BlockAddress>> = HashMap::new();
        dominators.insert(entry, [entry].into_iter().collect());
        for &block in all.iter().filter(|&&b| b != entry) {
            dominators.insert(block, everything.clone());
        }

        let mut changed = true;
        while changed {
            changed = false;
            for &block in all.iter().filter(|&&b| b != entry) {
                let mut incoming = cfg
                    .predecessors(block)
                    .iter()
                    .filter(|p| everything.contains(p))
                    .filter_map(|p| dominators.get(p));
                let mut meet = match incoming.next() {
                    Some(first) => first.clone(),
                    None => HashSet::new(),
                };
                for set in incoming {
                    meet.retain(|b| set.contains(b));
                }
                meet.insert(block);
                if meet != dominators[&block] {
                    dominators.insert(block, meet);
                    changed = true;
                }
            }
        }

        // The immediate dominator is the strict dominator with the
        // largest dominator set.
        let mut idom = HashMap::new();
        for &block in all.iter().filter(|&&b| b != entry) {
            let strict: Vec<BlockAddress> = dominators[&block]
                .iter()
                .copied()
                .filter(|&d| d != block)
                .collect();
            let immediate = strict
                .iter()
                .copied()
                .max_by_key(|d| dominators[d].len())
                .expect("a reachable block has at least the entry as dominator");
            idom.insert(block, immediate);
        }

        // Breadth-first over the tree, children in address order so
        // the traversal is deterministic.
        let mut children: HashMap<BlockAddress, Vec<BlockAddress>> = HashMap::new();
        for (&block, &parent) in &idom {
            children.entry(parent).or_default().push(block);
        }
        for list in children.values_mut() {
            list.sort();
        }
        let mut order = Vec::with_capacity(all.len());
        let mut queue = VecDeque::from([entry]);
        while let Some(block) = queue.pop_front() {
            order.push(block);
            if let Some(kids) = children.get(&block) {
                queue.extend(kids.iter().copied());
            }
        }

        Self { idom, order }
    }

    /// Visit order for rewrites: definitions precede uses
    pub fn bfs_order(&self) -> &[BlockAddress] {
        &self.order
    }

    pub fn immediate_dominator(&self, block: BlockAddress) -> Option<BlockAddress> {
        self.idom.get(&block).copied()
    }

    /// Does `a` dominate `b`? Every block dominates itself.
    pub fn dominates(&self, a: BlockAddress, b: BlockAddress) -> bool {
        let mut cursor = b;
        loop {
            if cursor == a {
                return true;
            }
            match self.immediate_dominator(cursor) {
                Some(up) => cursor = up,
                None => return false,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Constant, Instruction, Linkage, LoweredType, Operand};
    use crate::sema::ModelType;
    use crate::span::Span;

    /// entry -> (left | right) -> merge
    fn diamond() -> Function {
        let mut f = Function::new(
            "diamond",
            Span::default(),
            Linkage::Module,
            Vec::new(),
            LoweredType::object(ModelType::void()),
            Vec::new(),
        );
        let entry = f.append_block(vec![]);
        let left = f.append_block(vec![]);
        let right = f.append_block(vec![]);
        let merge = f.append_block(vec![]);

        f.block_mut(entry).append(Instruction::CondBranch {
            condition: Operand::Constant(Constant::Bool(true)),
            on_true: left,
            on_false: right,
        });
        f.block_mut(left).append(Instruction::Branch {
            target: merge,
            args: Vec::new(),
        });
        f.block_mut(right).append(Instruction::Branch {
            target: merge,
            args: Vec::new(),
        });
        f.block_mut(merge).append(Instruction::Return {
            value: Operand::Constant(Constant::Void),
        });
        f
    }

    #[test]
    fn test_cfg_edges() {
        let f = diamond();
        let cfg = f.cfg();
        let entry = f.entry().expect("entry");
        assert_eq!(cfg.successors(entry).len(), 2);
        let merge = BlockAddress(3);
        assert_eq!(cfg.predecessors(merge).len(), 2);
        assert!(cfg.predecessors(entry).is_empty());
    }

    #[test]
    fn test_dominator_tree_of_diamond() {
        let f = diamond();
        let cfg = f.cfg();
        let dom = DominatorTree::new(&cfg);
        let (entry, left, right, merge) = (
            BlockAddress(0),
            BlockAddress(1),
            BlockAddress(2),
            BlockAddress(3),
        );

        assert_eq!(dom.immediate_dominator(left), Some(entry));
        assert_eq!(dom.immediate_dominator(right), Some(entry));
        // Neither branch dominates the merge; the entry does.
        assert_eq!(dom.immediate_dominator(merge), Some(entry));
        assert!(dom.dominates(entry, merge));
        assert!(!dom.dominates(left, merge));
        assert!(dom.dominates(merge, merge));
    }

    #[test]
    fn test_bfs_order_visits_dominators_first() {
        let f = diamond();
        let cfg = f.cfg();
        let dom = DominatorTree::new(&cfg);
        let order = dom.bfs_order();
        assert_eq!(order.len(), 4);
        assert_eq!(order[0], f.entry().expect("entry"));
        for (i, &block) in order.iter().enumerate() {
            if let Some(parent) = dom.immediate_dominator(block) {
                let parent_pos = order.iter().position(|&b| b == parent).expect("in order");
                assert!(parent_pos < i, "dominator visited after dominated block");
            }
        }
    }
}
