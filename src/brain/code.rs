//! Germ code representation: expressions, instructions, code and memory.

use crate::error::{EvalError, MemorySizeError, ParseError, StructuralError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Number of numeric registers each germ owns.
pub const MEMORY_SIZE: usize = 100;

/// Name of a branch target inside a code sequence.
pub type MarkId = u32;

/// Operator tags usable inside an expression tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Add,
    Sub,
    Mul,
    Div,
    And,
    Or,
    Not,
    Lt,
    Gt,
    Eq,
    Ne,
    /// Memory read, `(m index)`
    Memory,
    /// Relative x of the indexed visible germ
    GermX,
    /// Relative y of the indexed visible germ
    GermY,
    /// Relative x of the indexed visible food particle
    FoodX,
    /// Relative y of the indexed visible food particle
    FoodY,
}

impl Op {
    pub const ALL: [Op; 16] = [
        Op::Add,
        Op::Sub,
        Op::Mul,
        Op::Div,
        Op::And,
        Op::Or,
        Op::Not,
        Op::Lt,
        Op::Gt,
        Op::Eq,
        Op::Ne,
        Op::Memory,
        Op::GermX,
        Op::GermY,
        Op::FoodX,
        Op::FoodY,
    ];

    /// Number of operands the operator takes.
    pub fn arity(self) -> usize {
        match self {
            Op::Not | Op::Memory | Op::GermX | Op::GermY | Op::FoodX | Op::FoodY => 1,
            _ => 2,
        }
    }

    pub fn mnemonic(self) -> &'static str {
        match self {
            Op::Add => "+",
            Op::Sub => "-",
            Op::Mul => "*",
            Op::Div => "/",
            Op::And => "&",
            Op::Or => "|",
            Op::Not => "!",
            Op::Lt => "<",
            Op::Gt => ">",
            Op::Eq => "==",
            Op::Ne => "!=",
            Op::Memory => "m",
            Op::GermX => "ox",
            Op::GermY => "oy",
            Op::FoodX => "fx",
            Op::FoodY => "fy",
        }
    }

    pub fn from_mnemonic(token: &str) -> Option<Op> {
        Op::ALL.into_iter().find(|op| op.mnemonic() == token)
    }
}

/// Named fields of the germ state readable from code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Sense {
    Energy,
    Brightness,
    Stamina,
    Pain,
    Success,
}

impl Sense {
    pub const ALL: [Sense; 5] = [
        Sense::Energy,
        Sense::Brightness,
        Sense::Stamina,
        Sense::Pain,
        Sense::Success,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Sense::Energy => "energy",
            Sense::Brightness => "brightness",
            Sense::Stamina => "stamina",
            Sense::Pain => "pain",
            Sense::Success => "success",
        }
    }

    pub fn from_name(token: &str) -> Option<Sense> {
        Sense::ALL.into_iter().find(|s| s.name() == token)
    }
}

/// A node of an expression tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Literal(f64),
    Symbol(Sense),
    Operator(Op, Vec<Expression>),
}

impl Expression {
    /// Literal or symbol.
    pub fn is_leaf(&self) -> bool {
        !matches!(self, Expression::Operator(..))
    }

    /// Operator whose operands are all leaves.
    pub fn is_shallow_operator(&self) -> bool {
        match self {
            Expression::Operator(_, args) => args.iter().all(Expression::is_leaf),
            _ => false,
        }
    }

    /// Nesting depth; leaves are 0.
    pub fn depth(&self) -> usize {
        match self {
            Expression::Operator(_, args) => 1 + args.iter().map(Expression::depth).max().unwrap_or(0),
            _ => 0,
        }
    }

    pub fn children(&self) -> &[Expression] {
        match self {
            Expression::Operator(_, args) => args,
            _ => &[],
        }
    }

    pub fn children_mut(&mut self) -> &mut [Expression] {
        match self {
            Expression::Operator(_, args) => args,
            _ => &mut [],
        }
    }

    pub fn op(op: Op, args: Vec<Expression>) -> Self {
        Expression::Operator(op, args)
    }
}

impl From<f64> for Expression {
    fn from(value: f64) -> Self {
        Expression::Literal(value)
    }
}

impl From<Sense> for Expression {
    fn from(sense: Sense) -> Self {
        Expression::Symbol(sense)
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expression::Literal(value) => write!(f, "{}", value),
            Expression::Symbol(sense) => f.write_str(sense.name()),
            Expression::Operator(op, args) => {
                write!(f, "({}", op.mnemonic())?;
                for arg in args {
                    write!(f, " {}", arg)?;
                }
                f.write_str(")")
            }
        }
    }
}

/// One step of germ code.
#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    SetMemory(Expression, Expression),
    BranchIfTrue(Expression, MarkId),
    Mark(MarkId),
    SetActionX(Expression),
    SetActionY(Expression),
    SetBurst(Expression),
    SetPower(Expression),
    Move,
    Birth,
    Attack,
    Return,
}

impl Instruction {
    /// Instructions that end the turn.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Instruction::Move | Instruction::Birth | Instruction::Attack | Instruction::Return
        )
    }

    pub fn mnemonic(&self) -> &'static str {
        match self {
            Instruction::SetMemory(..) => "set",
            Instruction::BranchIfTrue(..) => "if",
            Instruction::Mark(_) => "mark",
            Instruction::SetActionX(_) => "ax",
            Instruction::SetActionY(_) => "ay",
            Instruction::SetBurst(_) => "bst",
            Instruction::SetPower(_) => "pwr",
            Instruction::Move => "mv",
            Instruction::Birth => "bir",
            Instruction::Attack => "att",
            Instruction::Return => "ret",
        }
    }

    pub fn operand_count(&self) -> usize {
        match self {
            Instruction::SetMemory(..) => 2,
            Instruction::BranchIfTrue(..)
            | Instruction::SetActionX(_)
            | Instruction::SetActionY(_)
            | Instruction::SetBurst(_)
            | Instruction::SetPower(_) => 1,
            _ => 0,
        }
    }

    pub fn operand(&self, slot: usize) -> Option<&Expression> {
        match (self, slot) {
            (Instruction::SetMemory(index, _), 0) => Some(index),
            (Instruction::SetMemory(_, value), 1) => Some(value),
            (Instruction::BranchIfTrue(cond, _), 0)
            | (Instruction::SetActionX(cond), 0)
            | (Instruction::SetActionY(cond), 0)
            | (Instruction::SetBurst(cond), 0)
            | (Instruction::SetPower(cond), 0) => Some(cond),
            _ => None,
        }
    }

    pub fn operand_mut(&mut self, slot: usize) -> Option<&mut Expression> {
        match (self, slot) {
            (Instruction::SetMemory(index, _), 0) => Some(index),
            (Instruction::SetMemory(_, value), 1) => Some(value),
            (Instruction::BranchIfTrue(cond, _), 0)
            | (Instruction::SetActionX(cond), 0)
            | (Instruction::SetActionY(cond), 0)
            | (Instruction::SetBurst(cond), 0)
            | (Instruction::SetPower(cond), 0) => Some(cond),
            _ => None,
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())?;
        match self {
            Instruction::SetMemory(index, value) => write!(f, " {} {}", index, value),
            Instruction::BranchIfTrue(cond, mark) => write!(f, " {} @{}", cond, mark),
            Instruction::Mark(mark) => write!(f, " @{}", mark),
            Instruction::SetActionX(e)
            | Instruction::SetActionY(e)
            | Instruction::SetBurst(e)
            | Instruction::SetPower(e) => write!(f, " {}", e),
            _ => Ok(()),
        }
    }
}

/// Ordered instruction sequence owned by a single germ.
///
/// Serialized as its `;`-separated listing, so every document format carries
/// human-readable code.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Code {
    instructions: Vec<Instruction>,
}

impl Code {
    /// Wrap instructions without checking marks.
    pub fn new(instructions: Vec<Instruction>) -> Self {
        Self { instructions }
    }

    /// The program every germ starts from: reproduce when energy exceeds 70.
    pub fn starter() -> Self {
        Self::new(vec![
            Instruction::BranchIfTrue(
                Expression::op(Op::Gt, vec![Sense::Energy.into(), 70.0.into()]),
                0,
            ),
            Instruction::Return,
            Instruction::Mark(0),
            Instruction::SetActionX(1.0.into()),
            Instruction::Birth,
        ])
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    pub(crate) fn instructions_mut(&mut self) -> &mut Vec<Instruction> {
        &mut self.instructions
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Instruction> {
        self.instructions.get(index)
    }

    /// Position of the `Mark` named `mark`, by linear scan.
    pub fn find_mark(&self, mark: MarkId) -> Option<usize> {
        self.instructions
            .iter()
            .position(|inst| matches!(inst, Instruction::Mark(m) if *m == mark))
    }

    /// All mark names present in the code.
    pub fn marks(&self) -> BTreeSet<MarkId> {
        self.instructions
            .iter()
            .filter_map(|inst| match inst {
                Instruction::Mark(m) => Some(*m),
                _ => None,
            })
            .collect()
    }

    /// Smallest mark name not yet in use.
    pub fn fresh_mark(&self) -> MarkId {
        let used = self.marks();
        (0..).find(|m| !used.contains(m)).unwrap_or_default()
    }

    /// Number of branches jumping to `mark`.
    pub fn branches_to(&self, mark: MarkId) -> usize {
        self.instructions
            .iter()
            .filter(|inst| matches!(inst, Instruction::BranchIfTrue(_, m) if *m == mark))
            .count()
    }

    /// Check that mark names are unique and every branch resolves.
    pub fn check_marks(&self) -> Result<(), StructuralError> {
        let mut seen = BTreeSet::new();
        for inst in &self.instructions {
            if let Instruction::Mark(m) = inst {
                if !seen.insert(*m) {
                    return Err(StructuralError::DuplicateMark(*m));
                }
            }
        }
        for inst in &self.instructions {
            if let Instruction::BranchIfTrue(_, m) = inst {
                if !seen.contains(m) {
                    return Err(StructuralError::UnresolvedMark(*m));
                }
            }
        }
        Ok(())
    }

    /// Numbered multi-line dump for diagnostics.
    pub fn listing(&self) -> String {
        let mut out = String::new();
        for (i, inst) in self.instructions.iter().enumerate() {
            out.push_str(&format!("{:>4}: {}\n", i, inst));
        }
        out
    }

    /// Read a listing. Instructions are separated by `;` or newlines.
    pub fn parse(text: &str) -> Result<Self, ParseError> {
        let mut instructions = Vec::new();
        for source in text.split(|c| c == ';' || c == '\n') {
            let tokens = tokenize(source);
            if tokens.is_empty() {
                continue;
            }
            let line = instructions.len();
            let mut parser = Parser { tokens: &tokens, pos: 0, line };
            let inst = parser.instruction()?;
            if let Some(extra) = parser.peek() {
                return Err(ParseError::UnexpectedToken {
                    line,
                    token: extra.to_string(),
                });
            }
            instructions.push(inst);
        }
        Ok(Self::new(instructions))
    }
}

impl From<Vec<Instruction>> for Code {
    fn from(instructions: Vec<Instruction>) -> Self {
        Self::new(instructions)
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, inst) in self.instructions.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{}", inst)?;
        }
        Ok(())
    }
}

impl TryFrom<String> for Code {
    type Error = ParseError;

    fn try_from(text: String) -> Result<Self, Self::Error> {
        let code = Code::parse(&text)?;
        code.check_marks()?;
        Ok(code)
    }
}

impl From<Code> for String {
    fn from(code: Code) -> Self {
        code.to_string()
    }
}

fn tokenize(source: &str) -> Vec<&str> {
    let mut tokens = Vec::new();
    let mut start = None;
    for (i, c) in source.char_indices() {
        if c.is_whitespace() || c == '(' || c == ')' {
            if let Some(s) = start.take() {
                tokens.push(&source[s..i]);
            }
            if c == '(' || c == ')' {
                tokens.push(&source[i..i + 1]);
            }
        } else if start.is_none() {
            start = Some(i);
        }
    }
    if let Some(s) = start {
        tokens.push(&source[s..]);
    }
    tokens
}

struct Parser<'a> {
    tokens: &'a [&'a str],
    pos: usize,
    line: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&'a str> {
        self.tokens.get(self.pos).copied()
    }

    fn next(&mut self) -> Result<&'a str, ParseError> {
        let token = self.peek().ok_or(ParseError::UnexpectedEnd(self.line))?;
        self.pos += 1;
        Ok(token)
    }

    fn instruction(&mut self) -> Result<Instruction, ParseError> {
        let command = self.next()?;
        let inst = match command {
            "set" => Instruction::SetMemory(self.expression()?, self.expression()?),
            "if" => Instruction::BranchIfTrue(self.expression()?, self.mark()?),
            "mark" => Instruction::Mark(self.mark()?),
            "ax" => Instruction::SetActionX(self.expression()?),
            "ay" => Instruction::SetActionY(self.expression()?),
            "bst" => Instruction::SetBurst(self.expression()?),
            "pwr" => Instruction::SetPower(self.expression()?),
            "mv" => Instruction::Move,
            "bir" => Instruction::Birth,
            "att" => Instruction::Attack,
            "ret" => Instruction::Return,
            other => {
                return Err(ParseError::UnknownCommand {
                    line: self.line,
                    token: other.to_string(),
                })
            }
        };
        Ok(inst)
    }

    fn mark(&mut self) -> Result<MarkId, ParseError> {
        let token = self.next()?;
        token
            .strip_prefix('@')
            .and_then(|digits| digits.parse().ok())
            .ok_or_else(|| ParseError::BadMark {
                line: self.line,
                token: token.to_string(),
            })
    }

    fn expression(&mut self) -> Result<Expression, ParseError> {
        let token = self.next()?;
        if token == "(" {
            let tag = self.next()?;
            let op = Op::from_mnemonic(tag)
                .ok_or_else(|| EvalError::UnknownOperator(tag.to_string()))?;
            let mut args = Vec::new();
            while self.peek() != Some(")") {
                args.push(self.expression()?);
            }
            self.pos += 1;
            if args.len() != op.arity() {
                return Err(EvalError::Arity {
                    op: op.mnemonic(),
                    expected: op.arity(),
                    found: args.len(),
                }
                .into());
            }
            return Ok(Expression::Operator(op, args));
        }
        if token == ")" {
            return Err(ParseError::UnexpectedToken {
                line: self.line,
                token: token.to_string(),
            });
        }
        if let Ok(value) = token.parse::<f64>() {
            return Ok(Expression::Literal(value));
        }
        Sense::from_name(token)
            .map(Expression::Symbol)
            .ok_or_else(|| EvalError::UnknownSymbol(token.to_string()).into())
    }
}

/// Fixed-size register file, addressed modulo its size.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f64>", into = "Vec<f64>")]
pub struct Memory {
    cells: Vec<f64>,
}

impl Memory {
    pub fn new() -> Self {
        Self {
            cells: vec![0.0; MEMORY_SIZE],
        }
    }

    /// Register addressed by an arbitrary evaluated index.
    pub fn register(index: f64) -> usize {
        let index = if index.is_finite() { index.floor() as i64 } else { 0 };
        index.rem_euclid(MEMORY_SIZE as i64) as usize
    }

    pub fn read(&self, index: f64) -> f64 {
        self.cells[Self::register(index)]
    }

    /// Store a value; non-finite values are saturated so memory stays serializable.
    pub fn write(&mut self, index: f64, value: f64) {
        let value = if value.is_nan() {
            0.0
        } else {
            value.clamp(-f64::MAX, f64::MAX)
        };
        self.cells[Self::register(index)] = value;
    }

    pub fn cells(&self) -> &[f64] {
        &self.cells
    }
}

impl Default for Memory {
    fn default() -> Self {
        Self::new()
    }
}

impl TryFrom<Vec<f64>> for Memory {
    type Error = MemorySizeError;

    fn try_from(cells: Vec<f64>) -> Result<Self, Self::Error> {
        if cells.len() != MEMORY_SIZE {
            return Err(MemorySizeError {
                expected: MEMORY_SIZE,
                found: cells.len(),
            });
        }
        Ok(Self { cells })
    }
}

impl From<Memory> for Vec<f64> {
    fn from(memory: Memory) -> Self {
        memory.cells
    }
}
