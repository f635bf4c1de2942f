//! Test Utilities
//!
//! Example programs, allocation invariant checkers, a deterministic
//! generator for random programs and move sets and a tiny AMD64
//! interpreter for running lowered code.

#![allow(dead_code)]

use linscan_core::backend::allocation::result::AllocationResult;
use linscan_core::backend::block::{BlockId, ExitArity, Function, FunctionBuilder};
use linscan_core::backend::config::TargetConfig;
use linscan_core::backend::instructions::{Instruction, Relation};
use linscan_core::backend::lifetime::analysis::LifetimeAnalysisResult;
use linscan_core::backend::lifetime::position::BlockPosition;
use linscan_core::backend::operands::{AddressingMode, Operand};
use linscan_core::backend::registers::{Amd64Register, OperandWidth, Register, VirtualRegister, VirtualRegisterSupply};
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

/// Route backend logs to the test harness.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// The default target restricted to the first `count` allocatable registers.
pub fn registers(count: usize) -> TargetConfig {
    TargetConfig::with_allocatable(&Amd64Register::ALLOCATABLE[..count])
}

pub fn imm(value: i64) -> Operand {
    Operand::imm(OperandWidth::Quad, value)
}

pub fn vreg(register: VirtualRegister) -> Operand {
    Operand::reg(OperandWidth::Quad, register)
}

pub fn preg(register: Amd64Register) -> Operand {
    Operand::reg(OperandWidth::Quad, register)
}

pub fn slot(index: i64) -> Operand {
    Operand::mem(OperandWidth::Quad, AddressingMode::offset(Amd64Register::Bp, -8 * (index + 1)))
}

/// A fresh quad-word register from `supply`, as an operand.
fn fresh(supply: &mut VirtualRegisterSupply) -> Operand {
    vreg(supply.next(OperandWidth::Quad))
}

/// Counts from 0 to 5 in a loop and prints the counter.
///
/// ```text
/// i = 0; while (5 > i) i = i + 1; print_int(i)
/// ```
pub fn loop_counting_to_five() -> Function {
    let mut supply = VirtualRegisterSupply::new();
    let r0 = fresh(&mut supply);
    let r1 = fresh(&mut supply);
    let r2 = fresh(&mut supply);
    let r3 = fresh(&mut supply);
    let r4 = fresh(&mut supply);

    let mut builder = FunctionBuilder::new("countToFive");
    let entry = builder.block("countToFive");
    let header = builder.block("header");
    let loop_trampoline = builder.block("loopTrampoline");
    let footer = builder.block("footer");
    let exit_trampoline = builder.block("exitTrampoline");
    let exit = builder.block("exit");

    builder
        .push(entry, Instruction::Enter)
        .push(entry, Instruction::mov(imm(5), r0))
        .push(entry, Instruction::mov(imm(0), r1))
        .push(entry, Instruction::mov(imm(1), r2))
        .exit(entry, ExitArity::One { target: header });

    builder
        .phi(header, r3, [(entry, r1), (footer, r4)])
        .push(header, Instruction::cmp(r3, r0))
        .exit(
            header,
            ExitArity::Two {
                relation: Relation::Greater,
                true_target: loop_trampoline,
                false_target: exit_trampoline,
            },
        )
        .loop_body(header, [loop_trampoline, footer]);

    builder.exit(loop_trampoline, ExitArity::One { target: footer });
    builder
        .push(footer, Instruction::mov(r3, r4))
        .push(footer, Instruction::add(r2, r4))
        .exit(footer, ExitArity::One { target: header });

    builder.exit(exit_trampoline, ExitArity::One { target: exit });
    builder
        .push(exit, Instruction::mov(r3, preg(Amd64Register::Di)))
        .push(exit, Instruction::call("print_int", &[Amd64Register::Di]))
        .push(exit, Instruction::Leave)
        .exit(exit, ExitArity::Zero);

    builder.build().expect("countToFive is well formed")
}

/// Computes 5! twice, in two registers updated side by side.
///
/// ```text
/// i = 0; j = 1; k = 1
/// while (5 > i) { i = i + 1; j = j * i; k = k * i }
/// print_int(j); print_int(k)
/// ```
pub fn double_fib() -> Function {
    let mut supply = VirtualRegisterSupply::new();
    let r: Vec<Operand> = (0..11).map(|_| fresh(&mut supply)).collect();

    let mut builder = FunctionBuilder::new("doubleFib");
    let entry = builder.block("doubleFib");
    let header = builder.block("header");
    let loop_trampoline = builder.block("loopTrampoline");
    let footer = builder.block("footer");
    let exit_trampoline = builder.block("exitTrampoline");
    let exit = builder.block("exit");

    builder
        .push(entry, Instruction::Enter)
        .push(entry, Instruction::mov(imm(5), r[0]))
        .push(entry, Instruction::mov(imm(0), r[1]))
        .push(entry, Instruction::mov(imm(1), r[2]))
        .push(entry, Instruction::mov(imm(1), r[5]))
        .push(entry, Instruction::mov(imm(1), r[8]))
        .exit(entry, ExitArity::One { target: header });

    builder
        .phi(header, r[3], [(entry, r[1]), (footer, r[4])])
        .phi(header, r[6], [(entry, r[5]), (footer, r[7])])
        .phi(header, r[9], [(entry, r[8]), (footer, r[10])])
        .push(header, Instruction::cmp(r[3], r[0]))
        .exit(
            header,
            ExitArity::Two {
                relation: Relation::Greater,
                true_target: loop_trampoline,
                false_target: exit_trampoline,
            },
        )
        .loop_body(header, [loop_trampoline, footer]);

    builder.exit(loop_trampoline, ExitArity::One { target: footer });
    builder
        .push(footer, Instruction::mov(r[3], r[4]))
        .push(footer, Instruction::add(r[2], r[4]))
        .push(footer, Instruction::mov(r[6], r[7]))
        .push(footer, Instruction::imul(r[4], r[7]))
        .push(footer, Instruction::mov(r[9], r[10]))
        .push(footer, Instruction::imul(r[4], r[10]))
        .exit(footer, ExitArity::One { target: header });

    builder.exit(exit_trampoline, ExitArity::One { target: exit });
    builder
        .push(exit, Instruction::mov(r[6], preg(Amd64Register::Di)))
        .push(exit, Instruction::call("print_int", &[Amd64Register::Di]))
        .push(exit, Instruction::mov(r[9], preg(Amd64Register::Di)))
        .push(exit, Instruction::call("print_int", &[Amd64Register::Di]))
        .push(exit, Instruction::Leave)
        .exit(exit, ExitArity::Zero);

    builder.build().expect("doubleFib is well formed")
}

/// The counting loop with a second copy of the bound compared after it, so
/// that three registers are not enough.
///
/// ```text
/// limit = 5; bound = 5; i = 0
/// while (bound > i) i = i + 1
/// print_int(limit == i)
/// ```
pub fn count_and_compare() -> Function {
    let mut supply = VirtualRegisterSupply::new();
    let r: Vec<Operand> = (0..7).map(|_| fresh(&mut supply)).collect();

    let mut builder = FunctionBuilder::new("countAndCompare");
    let entry = builder.block("countAndCompare");
    let header = builder.block("header");
    let loop_trampoline = builder.block("loopTrampoline");
    let footer = builder.block("footer");
    let exit_trampoline = builder.block("exitTrampoline");
    let exit = builder.block("exit");

    builder
        .push(entry, Instruction::Enter)
        .push(entry, Instruction::mov(imm(5), r[5]))
        .push(entry, Instruction::mov(imm(5), r[0]))
        .push(entry, Instruction::mov(imm(0), r[1]))
        .push(entry, Instruction::mov(imm(1), r[2]))
        .exit(entry, ExitArity::One { target: header });

    builder
        .phi(header, r[3], [(entry, r[1]), (footer, r[4])])
        .push(header, Instruction::cmp(r[3], r[0]))
        .exit(
            header,
            ExitArity::Two {
                relation: Relation::Greater,
                true_target: loop_trampoline,
                false_target: exit_trampoline,
            },
        )
        .loop_body(header, [loop_trampoline, footer]);

    builder.exit(loop_trampoline, ExitArity::One { target: footer });
    builder
        .push(footer, Instruction::mov(r[3], r[4]))
        .push(footer, Instruction::add(r[2], r[4]))
        .exit(footer, ExitArity::One { target: header });

    builder.exit(exit_trampoline, ExitArity::One { target: exit });
    builder
        .push(exit, Instruction::cmp(r[3], r[5]))
        .push(
            exit,
            Instruction::Setcc {
                relation: Relation::Equal,
                output: r[6],
            },
        )
        .push(exit, Instruction::mov(r[6], preg(Amd64Register::Di)))
        .push(exit, Instruction::call("print_int", &[Amd64Register::Di]))
        .push(exit, Instruction::Leave)
        .exit(exit, ExitArity::Zero);

    builder.build().expect("countAndCompare is well formed")
}

/// One block where a value survives a call and another is defined between
/// two calls; prints 5 and 0.
pub fn values_across_calls() -> Function {
    let mut supply = VirtualRegisterSupply::new();
    let r0 = fresh(&mut supply);
    let r1 = fresh(&mut supply);
    let di = preg(Amd64Register::Di);

    let mut builder = FunctionBuilder::new("acrossCalls");
    let entry = builder.block("acrossCalls");
    builder
        .push(entry, Instruction::Enter)
        .push(entry, Instruction::mov(imm(5), r0))
        .push(entry, Instruction::call("moop", &[]))
        .push(entry, Instruction::mov(imm(0), r1))
        .push(entry, Instruction::mov(r0, di))
        .push(entry, Instruction::call("print_int", &[Amd64Register::Di]))
        .push(entry, Instruction::mov(r1, di))
        .push(entry, Instruction::call("print_int", &[Amd64Register::Di]))
        .push(entry, Instruction::Leave)
        .exit(entry, ExitArity::Zero);
    builder.build().expect("acrossCalls is well formed")
}

/// Straight-line arithmetic over four values, printing `(1 + 2) * 2 - 3`.
pub fn straight_line_arithmetic() -> Function {
    let mut supply = VirtualRegisterSupply::new();
    let r: Vec<Operand> = (0..5).map(|_| fresh(&mut supply)).collect();

    let mut builder = FunctionBuilder::new("straightLine");
    let entry = builder.block("straightLine");
    builder
        .push(entry, Instruction::Enter)
        .push(entry, Instruction::mov(imm(1), r[0]))
        .push(entry, Instruction::mov(imm(2), r[1]))
        .push(entry, Instruction::mov(imm(3), r[2]))
        .push(entry, Instruction::mov(r[0], r[3]))
        .push(entry, Instruction::add(r[1], r[3]))
        .push(entry, Instruction::imul(r[1], r[3]))
        .push(entry, Instruction::mov(r[3], r[4]))
        .push(entry, Instruction::sub(r[2], r[4]))
        .push(entry, Instruction::mov(r[4], preg(Amd64Register::Di)))
        .push(entry, Instruction::call("print_int", &[Amd64Register::Di]))
        .push(entry, Instruction::Leave)
        .exit(entry, ExitArity::Zero);
    builder.build().expect("straightLine is well formed")
}

/// Deterministic pseudo random numbers, seeded per test case.
pub struct Generator {
    state: u64,
}

impl Generator {
    pub fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    pub fn next_u64(&mut self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.state.hash(&mut hasher);
        self.state = hasher.finish();
        self.state
    }

    /// Uniform-ish value in `0..bound`.
    pub fn below(&mut self, bound: usize) -> usize {
        (self.next_u64() % bound as u64) as usize
    }

    /// A random permutation of `items`.
    pub fn shuffle<T>(&mut self, items: &mut [T]) {
        for index in (1..items.len()).rev() {
            let other = self.below(index + 1);
            items.swap(index, other);
        }
    }
}

const RELATIONS: [Relation; 6] = [
    Relation::Equal,
    Relation::NotEqual,
    Relation::Less,
    Relation::LessEqual,
    Relation::Greater,
    Relation::GreaterEqual,
];

/// A random program of straight-line code, if/else diamonds and counting
/// loops, together with what it prints.
///
/// Every conditional edge leads to a block with a single predecessor, as
/// instruction selection guarantees. The value of each register is tracked
/// while generating, so prints only happen on code that always runs.
pub fn random_function(seed: u64) -> (Function, Vec<i64>) {
    let mut program = ProgramGenerator::new(seed);
    program.emit_program();
    let ProgramGenerator { builder, printed, .. } = program;
    (builder.build().expect("random programs are well formed"), printed)
}

struct ProgramGenerator {
    generator: Generator,
    supply: VirtualRegisterSupply,
    builder: FunctionBuilder,
    current: BlockId,
    /// Registers defined on every path to `current`, with their values.
    values: Vec<(Operand, i64)>,
    printed: Vec<i64>,
    blocks: usize,
}

impl ProgramGenerator {
    fn new(seed: u64) -> Self {
        let mut builder = FunctionBuilder::new("random");
        let current = builder.block("random");
        Self {
            generator: Generator::new(seed),
            supply: VirtualRegisterSupply::new(),
            builder,
            current,
            values: Vec::new(),
            printed: Vec::new(),
            blocks: 0,
        }
    }

    fn emit_program(&mut self) {
        self.builder.push(self.current, Instruction::Enter);
        for _ in 0..2 + self.generator.below(3) {
            let constant = self.generator.below(20) as i64;
            let output = fresh(&mut self.supply);
            self.builder.push(self.current, Instruction::mov(imm(constant), output));
            self.values.push((output, constant));
        }
        for _ in 0..1 + self.generator.below(5) {
            match self.generator.below(4) {
                0 | 1 => self.straight_line(),
                2 => self.diamond(),
                _ => self.counting_loop(),
            }
        }
        let (operand, value) = self.pick();
        self.print(operand, value);
        self.builder.push(self.current, Instruction::Leave);
        self.builder.exit(self.current, ExitArity::Zero);
    }

    fn block(&mut self, kind: &str) -> BlockId {
        self.blocks += 1;
        self.builder.block(format!("{}{}", kind, self.blocks))
    }

    fn pick(&mut self) -> (Operand, i64) {
        self.values[self.generator.below(self.values.len())]
    }

    /// Append the computation of a new value to `block`.
    fn compute(&mut self, block: BlockId) -> (Operand, i64) {
        let (left, a) = self.pick();
        let (right, b) = self.pick();
        let output = fresh(&mut self.supply);
        let value = match self.generator.below(5) {
            0 => {
                let constant = self.generator.below(100) as i64 - 50;
                self.builder.push(block, Instruction::mov(imm(constant), output));
                constant
            }
            1 => {
                self.builder
                    .push(block, Instruction::mov(right, output))
                    .push(block, Instruction::add(left, output));
                b.wrapping_add(a)
            }
            2 => {
                self.builder
                    .push(block, Instruction::mov(right, output))
                    .push(block, Instruction::sub(left, output));
                b.wrapping_sub(a)
            }
            3 => {
                self.builder
                    .push(block, Instruction::mov(right, output))
                    .push(block, Instruction::imul(left, output));
                b.wrapping_mul(a)
            }
            _ => {
                let relation = RELATIONS[self.generator.below(RELATIONS.len())];
                self.builder
                    .push(block, Instruction::cmp(left, right))
                    .push(block, Instruction::Setcc { relation, output });
                evaluate(relation, (b, a)) as i64
            }
        };
        (output, value)
    }

    fn print(&mut self, operand: Operand, value: i64) {
        self.builder
            .push(self.current, Instruction::mov(operand, preg(Amd64Register::Di)))
            .push(self.current, Instruction::call("print_int", &[Amd64Register::Di]));
        self.printed.push(value);
    }

    fn straight_line(&mut self) {
        for _ in 0..1 + self.generator.below(4) {
            let value = self.compute(self.current);
            self.values.push(value);
        }
        if self.generator.below(2) == 0 {
            let (operand, value) = self.pick();
            self.print(operand, value);
        }
    }

    /// `if (right relation left) x = ... else x = ...`, where the else side
    /// is sometimes an empty block passing an existing value on.
    fn diamond(&mut self) {
        let (left, a) = self.pick();
        let (right, b) = self.pick();
        let relation = RELATIONS[self.generator.below(RELATIONS.len())];
        let skip = self.generator.below(2) == 0;

        let then_block = self.block("then");
        let else_block = self.block(if skip { "skip" } else { "else" });
        let join = self.block("join");
        self.builder.push(self.current, Instruction::cmp(left, right)).exit(
            self.current,
            ExitArity::Two {
                relation,
                true_target: then_block,
                false_target: else_block,
            },
        );

        let mut then_value = self.compute(then_block);
        for _ in 0..self.generator.below(3) {
            then_value = self.compute(then_block);
        }
        self.builder.exit(then_block, ExitArity::One { target: join });
        let else_value = if skip { self.pick() } else { self.compute(else_block) };
        self.builder.exit(else_block, ExitArity::One { target: join });

        let output = fresh(&mut self.supply);
        self.builder
            .phi(join, output, [(then_block, then_value.0), (else_block, else_value.0)]);
        let taken = if evaluate(relation, (b, a)) { then_value.1 } else { else_value.1 };
        self.values.push((output, taken));
        self.current = join;
    }

    /// `i = 0; while (bound > i) { i = i + 1; sum = sum + i }`
    fn counting_loop(&mut self) {
        let iterations = 1 + self.generator.below(4) as i64;
        let (start, start_value) = self.pick();
        let [bound, one, zero, counter, sum, next, next_sum] = [(); 7].map(|_| fresh(&mut self.supply));

        let pre = self.current;
        let header = self.block("header");
        let loop_trampoline = self.block("loopTrampoline");
        let footer = self.block("footer");
        let exit_trampoline = self.block("exitTrampoline");
        let exit = self.block("loopExit");

        self.builder
            .push(pre, Instruction::mov(imm(iterations), bound))
            .push(pre, Instruction::mov(imm(1), one))
            .push(pre, Instruction::mov(imm(0), zero))
            .exit(pre, ExitArity::One { target: header });
        self.builder
            .phi(header, counter, [(pre, zero), (footer, next)])
            .phi(header, sum, [(pre, start), (footer, next_sum)])
            .push(header, Instruction::cmp(counter, bound))
            .exit(
                header,
                ExitArity::Two {
                    relation: Relation::Greater,
                    true_target: loop_trampoline,
                    false_target: exit_trampoline,
                },
            )
            .loop_body(header, [loop_trampoline, footer]);
        self.builder.exit(loop_trampoline, ExitArity::One { target: footer });
        self.builder
            .push(footer, Instruction::mov(counter, next))
            .push(footer, Instruction::add(one, next))
            .push(footer, Instruction::mov(sum, next_sum))
            .push(footer, Instruction::add(next, next_sum))
            .exit(footer, ExitArity::One { target: header });
        self.builder.exit(exit_trampoline, ExitArity::One { target: exit });

        self.values.push((counter, iterations));
        self.values
            .push((sum, start_value.wrapping_add(iterations * (iterations + 1) / 2)));
        self.current = exit;
    }
}

/// Invariants every allocation must satisfy:
/// - every split of a register lies inside its whole lifetime, and the splits
///   exactly tile that lifetime
/// - no two splits holding the same physical register overlap
/// - no split holding a register overlaps a fixed range of that register
/// - registers sharing a spill slot have disjoint lifetimes
pub fn check_allocation(lifetimes: &LifetimeAnalysisResult, allocation: &AllocationResult) {
    check_splits_tile_lifetimes(lifetimes, allocation);
    check_no_double_occupancy(lifetimes, allocation);
    check_spill_slots_are_disjoint(lifetimes, allocation);
}

fn check_splits_tile_lifetimes(lifetimes: &LifetimeAnalysisResult, allocation: &AllocationResult) {
    for (register, whole) in &lifetimes.virtual_intervals {
        if whole.ranges.is_empty() {
            continue;
        }
        let splits = allocation.splits(*register);
        assert!(!splits.is_empty(), "{} has no splits", register);
        let first = allocation.interval(splits[0]);
        let last = allocation.interval(splits[splits.len() - 1]);
        assert_eq!(first.from(), whole.from(), "first split of {} starts late", register);
        assert_eq!(last.to(), whole.to(), "last split of {} ends early", register);

        for pair in splits.windows(2) {
            let before = allocation.interval(pair[0]);
            let after = allocation.interval(pair[1]);
            assert!(
                before.to() < after.from(),
                "splits {} and {} of {} overlap",
                before,
                after,
                register
            );
            if before.to().block == after.from().block {
                assert_eq!(
                    before.to().pos + 1,
                    after.from().pos,
                    "splits {} and {} of {} leave a hole",
                    before,
                    after,
                    register
                );
            }
        }

        for range in whole.ranges.iter() {
            for pos in range.from..=range.to {
                let position = BlockPosition::new(range.block, pos);
                let covering = splits
                    .iter()
                    .filter(|id| allocation.interval(**id).covers(position))
                    .count();
                assert_eq!(covering, 1, "{} is covered by {} splits at {}", register, covering, position);
            }
        }
    }
}

fn check_no_double_occupancy(lifetimes: &LifetimeAnalysisResult, allocation: &AllocationResult) {
    let assigned: Vec<_> = allocation
        .registers()
        .flat_map(|register| allocation.splits(register).iter().copied())
        .filter_map(|id| allocation.assigned(id).map(|physical| (id, physical)))
        .collect();

    for (index, (id, physical)) in assigned.iter().enumerate() {
        let interval = allocation.interval(*id);
        for (other, other_physical) in &assigned[index + 1..] {
            if physical != other_physical {
                continue;
            }
            let conflict = interval
                .ranges
                .first_intersection_with(&allocation.interval(*other).ranges);
            assert!(
                conflict.is_none(),
                "{} and {} both hold {} at {:?}",
                interval,
                allocation.interval(*other),
                physical,
                conflict
            );
        }
        if let Some(fixed) = lifetimes.fixed_intervals.get(physical) {
            let conflict = fixed.ranges.first_intersection_with(&interval.ranges);
            assert!(conflict.is_none(), "{} holds {} across a fixed use at {:?}", interval, physical, conflict);
        }
    }
}

fn check_spill_slots_are_disjoint(lifetimes: &LifetimeAnalysisResult, allocation: &AllocationResult) {
    let slots: Vec<(&VirtualRegister, &u32)> = allocation.spill_slots().iter().collect();
    for (index, (register, slot)) in slots.iter().enumerate() {
        for (other, other_slot) in &slots[index + 1..] {
            if slot != other_slot {
                continue;
            }
            let ours = &lifetimes.virtual_intervals[*register];
            let theirs = &lifetimes.virtual_intervals[*other];
            let disjoint = ours.to() < theirs.from() || theirs.to() < ours.from();
            assert!(disjoint, "{} and {} share slot {} while both alive", register, other, slot);
        }
    }
}

/// Registers the interpreter destroys at every call.
const CLOBBER: i64 = 0x0dea_dbee_f000;

/// Executes lowered AMD64 instructions.
///
/// Every value is a 64-bit integer regardless of operand width, and
/// `setcc` writes the whole register. `print_int` records `%rdi`; every
/// call then overwrites all registers except the stack and frame pointer.
#[derive(Debug)]
pub struct Machine {
    registers: [i64; 16],
    memory: HashMap<i64, i64>,
    /// `(right, left)` of the last comparison.
    flags: (i64, i64),
    pub output: Vec<i64>,
}

impl Machine {
    const STACK_TOP: i64 = 0x10000;
    const STEP_LIMIT: usize = 100_000;

    pub fn new() -> Self {
        let mut registers = [0; 16];
        registers[Amd64Register::Sp as usize] = Self::STACK_TOP;
        registers[Amd64Register::Bp as usize] = Self::STACK_TOP;
        Self {
            registers,
            memory: HashMap::new(),
            flags: (0, 0),
            output: Vec::new(),
        }
    }

    /// Run `instructions` from the top until `ret`.
    pub fn run(mut self, instructions: &[Instruction]) -> Self {
        let labels: HashMap<&str, usize> = instructions
            .iter()
            .enumerate()
            .filter_map(|(index, instruction)| match instruction {
                Instruction::Label { label } => Some((label.as_str(), index)),
                _ => None,
            })
            .collect();

        let mut pc = 0;
        for _ in 0..Self::STEP_LIMIT {
            let instruction = &instructions[pc];
            pc += 1;
            match instruction {
                Instruction::Add { left, right } => {
                    let left = self.read(left);
                    self.update(right, |value| value.wrapping_add(left));
                }
                Instruction::Sub { left, right } => {
                    let left = self.read(left);
                    self.update(right, |value| value.wrapping_sub(left));
                }
                Instruction::And { left, right } => {
                    let left = self.read(left);
                    self.update(right, |value| value & left);
                }
                Instruction::IMul { left, right } => {
                    let left = self.read(left);
                    self.update(right, |value| value.wrapping_mul(left));
                }
                Instruction::Neg { operand } => self.update(operand, i64::wrapping_neg),
                Instruction::Mov { src, dest } => {
                    assert!(!(src.is_memory() && dest.is_memory()), "mov {} -> {} has two memory operands", src, dest);
                    let value = self.read(src);
                    self.write(dest, value);
                }
                Instruction::Cmp { left, right } => self.flags = (self.read(right), self.read(left)),
                Instruction::Test { left, right } => self.flags = (self.read(right) & self.read(left), 0),
                Instruction::Setcc { relation, output } => {
                    let value = evaluate(*relation, self.flags) as i64;
                    self.write(output, value);
                }
                Instruction::Cqto { .. } => {
                    let sign = if self.registers[Amd64Register::A as usize] < 0 { -1 } else { 0 };
                    self.registers[Amd64Register::D as usize] = sign;
                }
                Instruction::IDiv { divisor } => {
                    let divisor = self.read(divisor);
                    let dividend = self.registers[Amd64Register::A as usize];
                    self.registers[Amd64Register::A as usize] = dividend / divisor;
                    self.registers[Amd64Register::D as usize] = dividend % divisor;
                }
                Instruction::Push { operand } => {
                    let value = self.read(operand);
                    self.push(value);
                }
                Instruction::Pop { operand } => {
                    let value = self.pop();
                    self.write(operand, value);
                }
                Instruction::Xchg { left, right } => {
                    let (a, b) = (self.read(left), self.read(right));
                    self.write(left, b);
                    self.write(right, a);
                }
                Instruction::Call { label, .. } => self.call(label),
                Instruction::Jmp { label } => pc = labels[label.as_str()],
                Instruction::Jcc { relation, label } => {
                    if evaluate(*relation, self.flags) {
                        pc = labels[label.as_str()];
                    }
                }
                Instruction::Label { .. } => {}
                Instruction::Ret => return self,
                Instruction::Enter | Instruction::Leave => panic!("{} survived lowering", instruction),
            }
        }
        panic!("program did not return within {} steps", Self::STEP_LIMIT)
    }

    pub fn register(&self, register: Amd64Register) -> i64 {
        self.registers[register as usize]
    }

    pub fn set_register(&mut self, register: Amd64Register, value: i64) {
        self.registers[register as usize] = value;
    }

    pub fn load(&self, address: i64) -> i64 {
        self.memory.get(&address).copied().unwrap_or(CLOBBER)
    }

    pub fn store(&mut self, address: i64, value: i64) {
        self.memory.insert(address, value);
    }

    /// Value of an operand that may be a stack slot relative to `%rbp`.
    pub fn read(&self, operand: &Operand) -> i64 {
        match operand {
            Operand::Immediate { value, .. } => *value,
            Operand::Register { register, .. } => self.registers[physical(*register) as usize],
            Operand::Memory { mode, .. } => self.load(self.address(mode)),
        }
    }

    pub fn write(&mut self, operand: &Operand, value: i64) {
        match operand {
            Operand::Immediate { .. } => panic!("write to immediate {}", operand),
            Operand::Register { register, .. } => self.registers[physical(*register) as usize] = value,
            Operand::Memory { mode, .. } => {
                let address = self.address(mode);
                self.store(address, value);
            }
        }
    }

    fn update(&mut self, operand: &Operand, f: impl FnOnce(i64) -> i64) {
        let value = f(self.read(operand));
        self.write(operand, value);
    }

    fn address(&self, mode: &AddressingMode) -> i64 {
        let base = mode.base.map_or(0, |base| self.registers[physical(base) as usize]);
        let index = mode.index.map_or(0, |index| self.registers[physical(index) as usize]);
        mode.displacement + base + index * mode.scale as i64
    }

    fn push(&mut self, value: i64) {
        let sp = Amd64Register::Sp as usize;
        self.registers[sp] -= 8;
        let address = self.registers[sp];
        self.store(address, value);
    }

    fn pop(&mut self) -> i64 {
        let sp = Amd64Register::Sp as usize;
        let value = self.load(self.registers[sp]);
        self.registers[sp] += 8;
        value
    }

    fn call(&mut self, label: &str) {
        if label == "print_int" {
            self.output.push(self.register(Amd64Register::Di));
        }
        for register in Amd64Register::ALLOCATABLE {
            self.registers[register as usize] = CLOBBER;
        }
    }
}

impl Default for Machine {
    fn default() -> Self {
        Self::new()
    }
}

fn physical(register: Register) -> Amd64Register {
    match register {
        Register::Physical(register) => register,
        Register::Virtual(register) => panic!("{} survived allocation", register),
    }
}

/// Whether `right relation left` holds for the flags of `cmp left, right`.
fn evaluate(relation: Relation, (right, left): (i64, i64)) -> bool {
    match relation {
        Relation::Equal => right == left,
        Relation::NotEqual => right != left,
        Relation::Less => right < left,
        Relation::LessEqual => right <= left,
        Relation::Greater => right > left,
        Relation::GreaterEqual => right >= left,
    }
}

/// Run a compiled instruction list and return what it printed.
pub fn run(instructions: &[Instruction]) -> Vec<i64> {
    Machine::new().run(instructions).output
}
