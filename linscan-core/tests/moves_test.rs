//! Tests for parallel move resolution

mod utils;

use linscan_core::backend::deconstruction::{Move, MoveResolver};
use linscan_core::backend::instructions::Instruction;
use linscan_core::backend::operands::Operand;
use linscan_core::backend::registers::Amd64Register;
use utils::*;

const REGISTERS: [Amd64Register; 8] = [
    Amd64Register::A,
    Amd64Register::B,
    Amd64Register::C,
    Amd64Register::D,
    Amd64Register::Si,
    Amd64Register::Di,
    Amd64Register::R8,
    Amd64Register::R9,
];

fn locations() -> Vec<Operand> {
    REGISTERS
        .iter()
        .map(|register| preg(*register))
        .chain((0..6).map(slot))
        .collect()
}

/// A machine whose registers and slots all hold distinct values, with the
/// stack pointer below the slots.
fn seeded_machine() -> Machine {
    let mut machine = Machine::new();
    let frame = machine.register(Amd64Register::Bp);
    machine.set_register(Amd64Register::Sp, frame - 256);
    for (index, location) in locations().iter().enumerate() {
        machine.write(location, 100 + index as i64);
    }
    machine
}

/// Execute the resolved `moves` and check every destination got the value
/// its source held before any of them ran.
fn assert_parallel(moves: &[Move]) {
    let before = seeded_machine();
    let expected: Vec<i64> = moves.iter().map(|next| before.read(&next.src)).collect();
    let untouched: Vec<(Operand, i64)> = locations()
        .into_iter()
        .filter(|location| {
            moves
                .iter()
                .all(|next| !next.src.same_location(location) && !next.dest.same_location(location))
        })
        .map(|location| (location, before.read(&location)))
        .collect();
    let stack_pointer = before.register(Amd64Register::Sp);

    let mut instructions = MoveResolver::resolve(moves.iter().copied()).unwrap();
    instructions.push(Instruction::Ret);
    let after = seeded_machine().run(&instructions);

    for (next, value) in moves.iter().zip(expected) {
        assert_eq!(after.read(&next.dest), value, "{} lost its value in {:?}", next, instructions);
    }
    for (location, value) in untouched {
        assert_eq!(after.read(&location), value, "{} was clobbered by {:?}", location, instructions);
    }
    assert_eq!(after.register(Amd64Register::Sp), stack_pointer);
}

#[test]
fn test_three_cycle_of_registers() {
    let (a, b, c) = (preg(Amd64Register::A), preg(Amd64Register::B), preg(Amd64Register::C));
    let moves = [Move::new(a, b), Move::new(b, c), Move::new(c, a)];
    let instructions = MoveResolver::resolve(moves).unwrap();

    assert_eq!(instructions.len(), 2);
    assert!(instructions.iter().all(|instruction| matches!(instruction, Instruction::Xchg { .. })));
    assert_parallel(&moves);
}

#[test]
fn test_swap_of_stack_slots() {
    let moves = [Move::new(slot(0), slot(1)), Move::new(slot(1), slot(0))];
    let instructions = MoveResolver::resolve(moves).unwrap();

    assert_eq!(instructions.len(), 4);
    assert_parallel(&moves);
}

#[test]
fn test_register_and_slot_cycle() {
    let moves = [
        Move::new(preg(Amd64Register::A), slot(2)),
        Move::new(slot(2), preg(Amd64Register::B)),
        Move::new(preg(Amd64Register::B), preg(Amd64Register::A)),
    ];
    assert_parallel(&moves);
}

#[test]
fn test_fan_out_from_a_cycle() {
    let (a, b, c) = (preg(Amd64Register::A), preg(Amd64Register::B), preg(Amd64Register::C));
    let moves = [Move::new(a, b), Move::new(b, a), Move::new(a, c), Move::new(b, slot(0))];
    assert_parallel(&moves);
}

#[test]
fn test_noop_moves_emit_nothing() {
    let a = preg(Amd64Register::A);
    let instructions = MoveResolver::resolve([Move::new(a, a), Move::new(slot(1), slot(1))]).unwrap();
    assert!(instructions.is_empty());
}

#[test]
fn test_random_parallel_moves() {
    init_logging();
    let pool = locations();
    for seed in 0..300 {
        let mut generator = Generator::new(seed);
        let mut destinations = pool.clone();
        generator.shuffle(&mut destinations);
        let count = 1 + generator.below(destinations.len());

        let moves: Vec<Move> = destinations[..count]
            .iter()
            .map(|dest| {
                let src = if generator.below(10) == 0 {
                    imm(generator.below(1000) as i64)
                } else {
                    pool[generator.below(pool.len())]
                };
                Move::new(src, *dest)
            })
            .collect();
        assert_parallel(&moves);
    }
}

#[test]
fn test_random_permutations() {
    let pool = locations();
    for seed in 0u64..300 {
        let mut generator = Generator::new(seed.wrapping_mul(7919));
        let count = 2 + generator.below(pool.len() - 1);
        let mut sources: Vec<Operand> = pool[..count].to_vec();
        generator.shuffle(&mut sources);

        let moves: Vec<Move> = sources.into_iter().zip(pool[..count].iter().copied()).map(|(src, dest)| Move::new(src, dest)).collect();
        assert_parallel(&moves);
    }
}
