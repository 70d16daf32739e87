//! Arithmetic question generation per difficulty tier.
//!
//! Answers are always non-negative integers of at most four digits. Division
//! is built from the quotient up (`dividend = divisor * quotient`), so it is
//! exact by construction.

use rand::Rng;
use shared::{Difficulty, Operator, QuestionPrompt};

/// A generated problem, answer included. Never sent to clients as is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Question {
    pub a: u32,
    pub b: u32,
    pub op: Operator,
    pub answer: u32,
}

impl Question {
    pub fn prompt(&self) -> QuestionPrompt {
        QuestionPrompt {
            a: self.a,
            b: self.b,
            op: self.op,
        }
    }
}

const EASY_OPS: [Operator; 3] = [Operator::Add, Operator::Subtract, Operator::Multiply];
const FULL_OPS: [Operator; 4] = [
    Operator::Add,
    Operator::Subtract,
    Operator::Multiply,
    Operator::Divide,
];

/// Produces a question whose answer length fits the tier:
/// easy 1-2 digits, medium 2-3 (mostly 3), hard 3-4 (mostly 4).
pub fn generate<R: Rng + ?Sized>(difficulty: Difficulty, rng: &mut R) -> Question {
    match difficulty {
        Difficulty::Easy => easy(rng),
        Difficulty::Medium => medium(rng),
        Difficulty::Hard => hard(rng),
    }
}

fn easy<R: Rng + ?Sized>(rng: &mut R) -> Question {
    let op = EASY_OPS[rng.gen_range(0..EASY_OPS.len())];
    match op {
        Operator::Add => {
            let a = rng.gen_range(0..50);
            let b = rng.gen_range(0..50);
            Question { a, b, op, answer: a + b }
        }
        Operator::Subtract => {
            let mut a = rng.gen_range(0..100);
            let mut b = rng.gen_range(0..100);
            if b > a {
                std::mem::swap(&mut a, &mut b);
            }
            Question { a, b, op, answer: a - b }
        }
        _ => {
            let a = rng.gen_range(0..10);
            let b = rng.gen_range(0..10);
            Question {
                a,
                b,
                op: Operator::Multiply,
                answer: a * b,
            }
        }
    }
}

fn medium<R: Rng + ?Sized>(rng: &mut R) -> Question {
    let op = FULL_OPS[rng.gen_range(0..FULL_OPS.len())];
    match op {
        Operator::Add => split_sum(rng, 100..=999),
        Operator::Subtract => difference(rng, 100..=999, 1..=500),
        Operator::Multiply => {
            let a = rng.gen_range(5..=34);
            let b = rng.gen_range(5..=34);
            Question { a, b, op, answer: a * b }
        }
        Operator::Divide => exact_division(rng, 10..=99),
    }
}

fn hard<R: Rng + ?Sized>(rng: &mut R) -> Question {
    let op = FULL_OPS[rng.gen_range(0..FULL_OPS.len())];
    match op {
        Operator::Add => split_sum(rng, 1000..=9999),
        Operator::Subtract => difference(rng, 1000..=9999, 1..=2000),
        Operator::Multiply => {
            let a = rng.gen_range(20..=109);
            // Keep the product on the four-digit board.
            let b_max = (9999 / a).min(109);
            let b = rng.gen_range(20..=b_max);
            Question { a, b, op, answer: a * b }
        }
        Operator::Divide => exact_division(rng, 100..=999),
    }
}

fn split_sum<R: Rng + ?Sized>(rng: &mut R, target: std::ops::RangeInclusive<u32>) -> Question {
    let answer = rng.gen_range(target);
    let a = rng.gen_range(0..answer);
    Question {
        a,
        b: answer - a,
        op: Operator::Add,
        answer,
    }
}

fn difference<R: Rng + ?Sized>(
    rng: &mut R,
    target: std::ops::RangeInclusive<u32>,
    subtrahend: std::ops::RangeInclusive<u32>,
) -> Question {
    let answer = rng.gen_range(target);
    let b = rng.gen_range(subtrahend);
    Question {
        a: answer + b,
        b,
        op: Operator::Subtract,
        answer,
    }
}

fn exact_division<R: Rng + ?Sized>(
    rng: &mut R,
    quotient: std::ops::RangeInclusive<u32>,
) -> Question {
    let answer = rng.gen_range(quotient);
    let divisor = rng.gen_range(2..=10);
    Question {
        a: answer * divisor,
        b: divisor,
        op: Operator::Divide,
        answer,
    }
}
