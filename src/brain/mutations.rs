//! Structural code mutations.
//!
//! Every edit keeps the code mark-consistent: a branch is always created
//! together with a fresh `Mark`, and deleting the last branch to a mark
//! deletes the mark as well.

use super::code::{Code, Expression, Instruction, MarkId, Op, Sense};
use rand::seq::SliceRandom;
use rand::Rng;

/// Hard ceiling on mutations applied in one burst.
const MAX_MUTATION_RUN: usize = 64;

/// Chance that an operand of a generated operator is itself an operator.
const NESTING_CHANCE: f64 = 0.25;

/// What kind of node a site addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SiteKind {
    /// A whole instruction other than `Mark`
    Command,
    /// An operator whose operands are all leaves
    Operator,
    /// A literal or symbol
    Value,
}

/// Address of a mutable node: `[instruction, operand, child, child, ...]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Site {
    pub path: Vec<usize>,
    pub kind: SiteKind,
}

/// The edit applied by one call to [`Mutator::mutate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mutation {
    Deleted(usize),
    Inserted(usize),
    Replaced(SiteKind),
    NoSites,
}

/// Literal range to draw from, depending on where the literal lands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LiteralKind {
    Direction,
    Power,
    General,
}

impl LiteralKind {
    fn for_instruction(inst: &Instruction) -> Self {
        match inst {
            Instruction::SetActionX(_) | Instruction::SetActionY(_) => LiteralKind::Direction,
            Instruction::SetPower(_) => LiteralKind::Power,
            _ => LiteralKind::General,
        }
    }

    fn sample<R: Rng + ?Sized>(self, rng: &mut R) -> f64 {
        let value: i32 = match self {
            LiteralKind::Direction => rng.gen_range(-1..=1),
            LiteralKind::Power => rng.gen_range(0..=5),
            LiteralKind::General => rng.gen_range(-100..=100),
        };
        value as f64
    }
}

/// Enumerate every mutable site in `code`.
pub fn sites(code: &Code) -> Vec<Site> {
    let mut out = Vec::new();
    for (i, inst) in code.instructions().iter().enumerate() {
        if matches!(inst, Instruction::Mark(_)) {
            continue;
        }
        out.push(Site {
            path: vec![i],
            kind: SiteKind::Command,
        });
        for slot in 0..inst.operand_count() {
            if let Some(expr) = inst.operand(slot) {
                let mut path = vec![i, slot];
                collect(expr, &mut path, &mut out);
            }
        }
    }
    out
}

fn collect(expr: &Expression, path: &mut Vec<usize>, out: &mut Vec<Site>) {
    if expr.is_leaf() {
        out.push(Site {
            path: path.clone(),
            kind: SiteKind::Value,
        });
        return;
    }
    if expr.is_shallow_operator() {
        out.push(Site {
            path: path.clone(),
            kind: SiteKind::Operator,
        });
    }
    for (c, child) in expr.children().iter().enumerate() {
        path.push(c);
        collect(child, path, out);
        path.pop();
    }
}

fn node_mut<'a>(code: &'a mut Code, path: &[usize]) -> Option<&'a mut Expression> {
    let (&i, rest) = path.split_first()?;
    let (&slot, rest) = rest.split_first()?;
    let mut node = code.instructions_mut().get_mut(i)?.operand_mut(slot)?;
    for &c in rest {
        node = node.children_mut().get_mut(c)?;
    }
    Some(node)
}

/// Draw how many mutations an offspring gets: none with probability
/// `1 - rate`, otherwise one plus a geometric tail with continuation `multi_rate`.
pub fn mutation_count<R: Rng + ?Sized>(rng: &mut R, rate: f64, multi_rate: f64) -> usize {
    if rng.gen::<f64>() >= rate {
        return 0;
    }
    let mut count = 1;
    while count < MAX_MUTATION_RUN && rng.gen::<f64>() < multi_rate {
        count += 1;
    }
    count
}

/// Produces random, structurally valid edits to germ code.
#[derive(Debug, Clone, Copy)]
pub struct Mutator {
    /// Maximum operator nesting inside one operand
    pub max_depth: usize,
}

impl Default for Mutator {
    fn default() -> Self {
        Self { max_depth: 3 }
    }
}

impl Mutator {
    pub fn new(max_depth: usize) -> Self {
        Self { max_depth }
    }

    /// Apply one random edit.
    pub fn mutate<R: Rng + ?Sized>(&self, code: &mut Code, rng: &mut R) -> Mutation {
        let candidates = sites(code);
        let Some(site) = candidates.choose(rng) else {
            return Mutation::NoSites;
        };

        match site.kind {
            SiteKind::Command => {
                let index = site.path[0];
                if rng.gen_bool(0.5) {
                    delete_command(code, index);
                    Mutation::Deleted(index)
                } else {
                    let at = if rng.gen_bool(0.5) { index } else { index + 1 };
                    self.insert_command(code, at, rng);
                    Mutation::Inserted(at)
                }
            }
            SiteKind::Operator | SiteKind::Value => {
                let kind = code
                    .get(site.path[0])
                    .map(LiteralKind::for_instruction)
                    .unwrap_or(LiteralKind::General);
                let budget = self.max_depth.saturating_sub(site.path.len() - 2);
                let replacement = self.random_expression(budget, kind, rng);
                if let Some(node) = node_mut(code, &site.path) {
                    *node = replacement;
                }
                Mutation::Replaced(site.kind)
            }
        }
    }

    /// Apply `count` edits in sequence.
    pub fn mutate_n<R: Rng + ?Sized>(&self, code: &mut Code, count: usize, rng: &mut R) {
        for _ in 0..count {
            self.mutate(code, rng);
        }
    }

    /// Insert a fresh random instruction at `at`. A branch also gets its
    /// `Mark`, placed anywhere in the code.
    pub fn insert_command<R: Rng + ?Sized>(&self, code: &mut Code, at: usize, rng: &mut R) {
        let inst = self.random_instruction(code.fresh_mark(), rng);
        let branch_mark = match &inst {
            Instruction::BranchIfTrue(_, mark) => Some(*mark),
            _ => None,
        };
        let instructions = code.instructions_mut();
        let at = at.min(instructions.len());
        instructions.insert(at, inst);
        if let Some(mark) = branch_mark {
            let pos = rng.gen_range(0..=instructions.len());
            instructions.insert(pos, Instruction::Mark(mark));
        }
    }

    /// A random non-`Mark` instruction; branches target `mark`.
    pub fn random_instruction<R: Rng + ?Sized>(&self, mark: MarkId, rng: &mut R) -> Instruction {
        let budget = self.max_depth;
        match rng.gen_range(0..10) {
            0 => Instruction::SetMemory(
                self.random_expression(budget, LiteralKind::General, rng),
                self.random_expression(budget, LiteralKind::General, rng),
            ),
            1 => Instruction::BranchIfTrue(self.random_expression(budget, LiteralKind::General, rng), mark),
            2 => Instruction::SetActionX(self.random_expression(budget, LiteralKind::Direction, rng)),
            3 => Instruction::SetActionY(self.random_expression(budget, LiteralKind::Direction, rng)),
            4 => Instruction::SetBurst(self.random_expression(budget, LiteralKind::General, rng)),
            5 => Instruction::SetPower(self.random_expression(budget, LiteralKind::Power, rng)),
            6 => Instruction::Move,
            7 => Instruction::Birth,
            8 => Instruction::Attack,
            _ => Instruction::Return,
        }
    }

    /// A leaf, or (if `budget` allows) an operator subtree at most `budget` deep.
    fn random_expression<R: Rng + ?Sized>(&self, budget: usize, kind: LiteralKind, rng: &mut R) -> Expression {
        if budget == 0 || rng.gen_bool(0.5) {
            random_leaf(kind, rng)
        } else {
            random_operator(budget, rng)
        }
    }
}

fn random_leaf<R: Rng + ?Sized>(kind: LiteralKind, rng: &mut R) -> Expression {
    if rng.gen_bool(0.5) {
        Expression::Literal(kind.sample(rng))
    } else {
        let sense = Sense::ALL.choose(rng).copied().unwrap_or(Sense::Energy);
        Expression::Symbol(sense)
    }
}

fn random_operator<R: Rng + ?Sized>(budget: usize, rng: &mut R) -> Expression {
    let op = Op::ALL.choose(rng).copied().unwrap_or(Op::Add);
    let args = (0..op.arity())
        .map(|_| {
            if budget > 1 && rng.gen_bool(NESTING_CHANCE) {
                random_operator(budget - 1, rng)
            } else {
                random_leaf(LiteralKind::General, rng)
            }
        })
        .collect();
    Expression::Operator(op, args)
}

/// Remove the instruction at `index`; a removed branch takes its mark along
/// unless another branch still jumps there.
pub fn delete_command(code: &mut Code, index: usize) {
    let instructions = code.instructions_mut();
    if index >= instructions.len() {
        return;
    }
    let removed = instructions.remove(index);
    if let Instruction::BranchIfTrue(_, mark) = removed {
        if code.branches_to(mark) == 0 {
            if let Some(pos) = code.find_mark(mark) {
                code.instructions_mut().remove(pos);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn test_starter_sites() {
        let found = sites(&Code::starter());
        let count = |kind| found.iter().filter(|s| s.kind == kind).count();

        assert_eq!(count(SiteKind::Command), 4);
        assert_eq!(count(SiteKind::Operator), 1);
        assert_eq!(count(SiteKind::Value), 3);
        assert!(found.iter().all(|s| s.path[0] != 2), "marks are not sites");
    }

    #[test]
    fn test_nested_operators_are_not_sites() {
        let code = Code::parse("ax (! (< 1 2))").unwrap();
        let operators: Vec<_> = sites(&code)
            .into_iter()
            .filter(|s| s.kind == SiteKind::Operator)
            .map(|s| s.path)
            .collect();
        assert_eq!(operators, vec![vec![0, 0, 0]]);
    }

    #[test]
    fn test_empty_code_has_no_sites() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let mut code = Code::default();
        assert_eq!(Mutator::default().mutate(&mut code, &mut rng), Mutation::NoSites);
        assert!(code.is_empty());

        let mut marks_only = Code::parse("mark @0").unwrap();
        assert_eq!(Mutator::default().mutate(&mut marks_only, &mut rng), Mutation::NoSites);
    }

    #[test]
    fn test_deleting_branch_frees_mark() {
        let mut code = Code::starter();
        delete_command(&mut code, 0);
        assert_eq!(code.to_string(), "ret; ax 1; bir");
        assert_eq!(code.fresh_mark(), 0);
    }

    #[test]
    fn test_shared_mark_survives_one_branch_deletion() {
        let mut code = Code::parse("if 1 @0; if 0 @0; mark @0; mv").unwrap();
        delete_command(&mut code, 0);
        assert!(code.check_marks().is_ok());
        assert_eq!(code.find_mark(0), Some(1));
    }

    #[test]
    fn test_inserted_branch_gets_fresh_mark() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let mutator = Mutator::default();
        let mut code = Code::starter();
        for _ in 0..200 {
            let before = code.len();
            mutator.insert_command(&mut code, 1, &mut rng);
            assert!(code.len() == before + 1 || code.len() == before + 2);
            assert!(code.check_marks().is_ok());
        }
        let marks = code.marks();
        assert!(marks.len() > 1);
        assert!(marks.iter().all(|&m| code.branches_to(m) == 1));
    }

    #[test]
    fn test_long_mutation_chain_stays_valid() {
        let mut rng = ChaCha8Rng::seed_from_u64(0xC0DE);
        let mutator = Mutator::new(3);
        let mut code = Code::starter();

        for step in 0..5000 {
            mutator.mutate(&mut code, &mut rng);
            assert!(code.check_marks().is_ok(), "step {}: {}", step, code);
            for inst in code.instructions() {
                for slot in 0..inst.operand_count() {
                    let depth = inst.operand(slot).map(Expression::depth).unwrap_or(0);
                    assert!(depth <= 3, "step {}: {}", step, inst);
                }
            }
        }

        let reparsed = Code::parse(&code.to_string()).unwrap();
        assert_eq!(reparsed, code);
    }

    #[test]
    fn test_mutation_count_distribution() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        assert!((0..100).all(|_| mutation_count(&mut rng, 0.0, 0.9) == 0));
        assert!((0..100).all(|_| mutation_count(&mut rng, 1.0, 0.0) == 1));
        assert!((0..100).all(|_| mutation_count(&mut rng, 1.0, 1.0) == MAX_MUTATION_RUN));
    }

    #[test]
    fn test_direction_literals_stay_small() {
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        let mutator = Mutator::new(0);
        for _ in 0..200 {
            match mutator.random_instruction(0, &mut rng) {
                Instruction::SetActionX(Expression::Literal(v)) | Instruction::SetActionY(Expression::Literal(v)) => {
                    assert!((-1.0..=1.0).contains(&v))
                }
                Instruction::SetPower(Expression::Literal(v)) => assert!((0.0..=5.0).contains(&v)),
                _ => {}
            }
        }
    }
}
