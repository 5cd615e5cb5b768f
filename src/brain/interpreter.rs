//! Expression evaluation and the per-turn code interpreter.

use super::code::{Code, Expression, Instruction, Memory, Op, Sense};
use crate::error::{BrainFault, EvalError, FaultCause, StructuralError};
use serde::{Deserialize, Serialize};

/// Default step budget for a single turn.
pub const MAX_EXECUTIONS: usize = 10_000;

/// Result of any division by zero.
pub const DIVIDE_BY_ZERO: f64 = 1_000_000.0;

/// Upper bound (exclusive) of attack power.
pub const POWER_LEVELS: i64 = 6;

/// Value produced by an expression.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    Number(f64),
    Bool(bool),
}

impl Value {
    pub fn as_number(self) -> f64 {
        match self {
            Value::Number(n) => n,
            Value::Bool(true) => 1.0,
            Value::Bool(false) => 0.0,
        }
    }

    pub fn is_truthy(self) -> bool {
        match self {
            Value::Number(n) => n != 0.0 && !n.is_nan(),
            Value::Bool(b) => b,
        }
    }
}

/// Another entity as seen from the observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sighting {
    pub dx: i32,
    pub dy: i32,
}

/// Visible entities, nearest first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct View {
    pub germs: Vec<Sighting>,
    pub food: Vec<Sighting>,
}

/// Snapshot of the germ handed to its code each turn.
#[derive(Debug, Clone, Copy)]
pub struct GermState<'a> {
    pub energy: f64,
    /// 0 to 100, percent of the maximum absorbable light
    pub brightness: f64,
    pub stamina: f64,
    pub pain: f64,
    /// False if the last action failed to change anything
    pub success: bool,
    pub view: &'a View,
}

/// What a germ asked to do this turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionKind {
    /// Code returned or ran off the end
    Idle,
    Move,
    Birth,
    Attack,
    /// Step budget exhausted
    Halt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Action {
    pub kind: ActionKind,
    pub dx: i32,
    pub dy: i32,
    pub burst: bool,
    pub power: u8,
}

impl Action {
    pub fn idle() -> Self {
        Self::bare(ActionKind::Idle)
    }

    pub fn halt() -> Self {
        Self::bare(ActionKind::Halt)
    }

    fn bare(kind: ActionKind) -> Self {
        Self {
            kind,
            dx: 0,
            dy: 0,
            burst: false,
            power: 0,
        }
    }
}

/// Action plus the number of steps it took to decide.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Outcome {
    pub action: Action,
    pub steps: usize,
}

/// Evaluate an expression against the germ's state and memory.
pub fn evaluate(expr: &Expression, state: &GermState, memory: &Memory) -> Result<Value, EvalError> {
    match expr {
        Expression::Literal(value) => Ok(Value::Number(*value)),
        Expression::Symbol(sense) => Ok(match sense {
            Sense::Energy => Value::Number(state.energy),
            Sense::Brightness => Value::Number(state.brightness),
            Sense::Stamina => Value::Number(state.stamina),
            Sense::Pain => Value::Number(state.pain),
            Sense::Success => Value::Bool(state.success),
        }),
        Expression::Operator(op, args) => {
            if args.len() != op.arity() {
                return Err(EvalError::Arity {
                    op: op.mnemonic(),
                    expected: op.arity(),
                    found: args.len(),
                });
            }
            let first = evaluate(&args[0], state, memory)?;
            if op.arity() == 1 {
                return Ok(unary(*op, first, state, memory));
            }
            let second = evaluate(&args[1], state, memory)?;
            Ok(binary(*op, first, second))
        }
    }
}

fn unary(op: Op, arg: Value, state: &GermState, memory: &Memory) -> Value {
    match op {
        Op::Not => Value::Bool(!arg.is_truthy()),
        Op::Memory => Value::Number(memory.read(arg.as_number())),
        Op::GermX => perceive(&state.view.germs, arg, |s| s.dx),
        Op::GermY => perceive(&state.view.germs, arg, |s| s.dy),
        Op::FoodX => perceive(&state.view.food, arg, |s| s.dx),
        Op::FoodY => perceive(&state.view.food, arg, |s| s.dy),
        _ => unreachable!("{} is binary", op.mnemonic()),
    }
}

fn binary(op: Op, a: Value, b: Value) -> Value {
    let (x, y) = (a.as_number(), b.as_number());
    match op {
        Op::Add => Value::Number(x + y),
        Op::Sub => Value::Number(x - y),
        Op::Mul => Value::Number(x * y),
        Op::Div => Value::Number(if y == 0.0 { DIVIDE_BY_ZERO } else { x / y }),
        Op::And => Value::Bool(a.is_truthy() && b.is_truthy()),
        Op::Or => Value::Bool(a.is_truthy() || b.is_truthy()),
        Op::Lt => Value::Bool(x < y),
        Op::Gt => Value::Bool(x > y),
        Op::Eq => Value::Bool(x == y),
        Op::Ne => Value::Bool(x != y),
        _ => unreachable!("{} is unary", op.mnemonic()),
    }
}

/// Ranked lookup into a visibility list; an empty list reads as 0.
fn perceive(list: &[Sighting], index: Value, axis: impl Fn(&Sighting) -> i32) -> Value {
    if list.is_empty() {
        return Value::Number(0.0);
    }
    let index = index.as_number();
    let index = if index.is_finite() { index.floor() as i64 } else { 0 };
    let slot = index.rem_euclid(list.len() as i64) as usize;
    Value::Number(axis(&list[slot]) as f64)
}

fn direction(value: Value) -> i32 {
    let n = value.as_number();
    if n < 0.0 {
        -1
    } else if n > 0.0 {
        1
    } else {
        0
    }
}

fn power(value: Value) -> u8 {
    let n = value.as_number();
    let n = if n.is_finite() { n.floor() as i64 } else { 0 };
    n.rem_euclid(POWER_LEVELS) as u8
}

#[derive(Default)]
struct Accumulator {
    ax: i32,
    ay: i32,
    burst: bool,
    power: u8,
}

impl Accumulator {
    fn action(&self, kind: ActionKind) -> Action {
        Action {
            kind,
            dx: self.ax,
            dy: self.ay,
            burst: self.burst,
            power: if kind == ActionKind::Attack { self.power } else { 0 },
        }
    }
}

enum Flow {
    Next,
    Jump(usize),
    Finish(Action),
}

/// Runs germ code until it picks an action or exhausts its budget.
#[derive(Debug, Clone, Copy)]
pub struct Interpreter {
    pub max_executions: usize,
}

impl Default for Interpreter {
    fn default() -> Self {
        Self {
            max_executions: MAX_EXECUTIONS,
        }
    }
}

impl Interpreter {
    pub fn new(max_executions: usize) -> Self {
        Self { max_executions }
    }

    /// Execute `code` from the top. Memory persists across turns; the
    /// action accumulators do not.
    pub fn run(&self, code: &Code, memory: &mut Memory, state: &GermState) -> Result<Outcome, BrainFault> {
        let mut acc = Accumulator::default();
        let mut head = 0;
        let mut steps = 0;

        while steps < self.max_executions {
            steps += 1;
            let Some(inst) = code.get(head) else {
                return Ok(Outcome {
                    action: Action::idle(),
                    steps,
                });
            };

            let flow = Self::step(code, inst, &mut acc, memory, state).map_err(|cause| BrainFault {
                index: head,
                listing: code.listing(),
                cause,
            })?;

            match flow {
                Flow::Next => head += 1,
                Flow::Jump(target) => head = target,
                Flow::Finish(action) => return Ok(Outcome { action, steps }),
            }
        }

        Ok(Outcome {
            action: Action::halt(),
            steps,
        })
    }

    fn step(
        code: &Code,
        inst: &Instruction,
        acc: &mut Accumulator,
        memory: &mut Memory,
        state: &GermState,
    ) -> Result<Flow, FaultCause> {
        match inst {
            Instruction::SetMemory(index, value) => {
                let index = evaluate(index, state, memory)?.as_number();
                let value = evaluate(value, state, memory)?.as_number();
                memory.write(index, value);
            }
            Instruction::BranchIfTrue(cond, mark) => {
                if evaluate(cond, state, memory)?.is_truthy() {
                    let target = code
                        .find_mark(*mark)
                        .ok_or(StructuralError::UnresolvedMark(*mark))?;
                    return Ok(Flow::Jump(target));
                }
            }
            Instruction::Mark(_) => {}
            Instruction::SetActionX(e) => acc.ax = direction(evaluate(e, state, memory)?),
            Instruction::SetActionY(e) => acc.ay = direction(evaluate(e, state, memory)?),
            Instruction::SetBurst(e) => acc.burst = evaluate(e, state, memory)?.is_truthy(),
            Instruction::SetPower(e) => acc.power = power(evaluate(e, state, memory)?),
            Instruction::Move => return Ok(Flow::Finish(acc.action(ActionKind::Move))),
            Instruction::Birth => return Ok(Flow::Finish(acc.action(ActionKind::Birth))),
            Instruction::Attack => return Ok(Flow::Finish(acc.action(ActionKind::Attack))),
            Instruction::Return => return Ok(Flow::Finish(Action::idle())),
        }
        Ok(Flow::Next)
    }
}
