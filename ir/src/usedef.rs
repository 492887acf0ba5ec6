//! Use/def index over a program: who defines each variable, who consumes
//! it.
//!
//! Built in one pass and never mutated. Program inputs have no def entry.
//! Use sets are ordered so every traversal that walks consumers is
//! deterministic.

use std::collections::{BTreeSet, HashMap};

use crate::op::Program;

#[derive(Debug, Clone, Default)]
pub struct UseDef {
    op_defs: HashMap<String, usize>,
    uses: HashMap<String, BTreeSet<usize>>,
}

impl UseDef {
    pub fn new(prog: &Program) -> Self {
        let mut op_defs = HashMap::new();
        let mut uses: HashMap<String, BTreeSet<usize>> = HashMap::new();
        for (i, op) in prog.ops.iter().enumerate() {
            op_defs.insert(op.output.clone(), i);
            for input in &op.inputs {
                uses.entry(input.clone()).or_default().insert(i);
            }
        }
        Self { op_defs, uses }
    }

    /// Index of the op defining `name`, if any op does.
    pub fn op_def(&self, name: &str) -> Option<usize> {
        self.op_defs.get(name).copied()
    }

    /// Ops consuming `name`, in ascending program order.
    pub fn uses(&self, name: &str) -> impl Iterator<Item = usize> + '_ {
        self.uses.get(name).into_iter().flatten().copied()
    }
}
