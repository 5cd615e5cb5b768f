//! Germ brains: evolvable code, its interpreter and its mutation engine.
//!
//! - `code`: expression trees, instructions, marks and memory
//! - `interpreter`: turns code plus a state snapshot into an action
//! - `mutations`: structural random edits that keep marks consistent

mod code;
mod interpreter;
mod mutations;

pub use code::{Code, Expression, Instruction, MarkId, Memory, Op, Sense, MEMORY_SIZE};
pub use interpreter::{
    evaluate, Action, ActionKind, GermState, Interpreter, Outcome, Sighting, Value, View,
    DIVIDE_BY_ZERO, MAX_EXECUTIONS,
};
pub use mutations::{delete_command, mutation_count, sites, Mutation, Mutator, Site, SiteKind};

use serde::{Deserialize, Serialize};

/// Code and memory owned by one germ.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Brain {
    pub code: Code,
    pub memory: Memory,
}

impl Brain {
    /// Fresh memory around the given code.
    pub fn new(code: Code) -> Self {
        Self {
            code,
            memory: Memory::new(),
        }
    }

    /// Offspring brain: cloned code with `mutations` edits and blank memory.
    pub fn offspring<R: rand::Rng + ?Sized>(&self, mutator: &Mutator, mutations: usize, rng: &mut R) -> Self {
        let mut code = self.code.clone();
        mutator.mutate_n(&mut code, mutations, rng);
        Self::new(code)
    }
}
