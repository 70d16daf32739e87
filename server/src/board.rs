//! Per-team digit board for the round in progress.
//!
//! The board holds the four decimal places of the answer being assembled.
//! Thousands and hundreds are auto-filled by the server depending on the
//! difficulty; tens and ones are written by the team's two players. The board
//! never stores the answer itself; callers pass it in when a write needs to be
//! checked.

use shared::{ConnectionId, Difficulty, DigitBoardView, Place};

/// Splits `n` into `[thousands, hundreds, tens, ones]`.
///
/// Only the lowest four decimal places are kept.
pub fn digits_of(n: u32) -> [u8; 4] {
    [
        ((n / 1000) % 10) as u8,
        ((n / 100) % 10) as u8,
        ((n / 10) % 10) as u8,
        (n % 10) as u8,
    ]
}

/// Number of decimal digits in `n`; zero has one digit.
pub fn answer_length(n: u32) -> u8 {
    let mut len = 1;
    let mut rest = n / 10;
    while rest > 0 {
        len += 1;
        rest /= 10;
    }
    len
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Cell {
    pub value: Option<u8>,
    pub set_by: Option<ConnectionId>,
    pub locked: bool,
}

/// Result of a single-digit write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Rejected,
    Accepted,
    /// Both tens and ones are now set and the board is locked.
    Completed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigitBoard {
    cells: [Cell; 4],
    pub overall_locked: bool,
    /// Server time (ms) at which the board locked.
    pub locked_at: Option<u64>,
    /// Set once the round result has been scored.
    pub finalized: bool,
    pub submitted_value: Option<u32>,
    pub submitted_by: Option<ConnectionId>,
    pub submitted_at: Option<u64>,
    pub answer_length: u8,
}

impl DigitBoard {
    /// Fresh board for `answer`, with high places pre-filled for the tier:
    /// medium fills hundreds of a 3-digit answer, hard fills thousands and
    /// hundreds of a 4-digit answer or hundreds of a 3-digit one.
    pub fn new(answer: u32, difficulty: Difficulty) -> Self {
        let answer_length = answer_length(answer);
        let mut board = Self {
            cells: Default::default(),
            overall_locked: false,
            locked_at: None,
            finalized: false,
            submitted_value: None,
            submitted_by: None,
            submitted_at: None,
            answer_length,
        };

        let prefilled: &[Place] = match (difficulty, answer_length) {
            (Difficulty::Easy, _) => &[],
            (Difficulty::Medium, len) if len >= 3 => &[Place::Hundreds],
            (Difficulty::Medium, _) => &[],
            (Difficulty::Hard, 4) => &[Place::Thousands, Place::Hundreds],
            (Difficulty::Hard, 3) => &[Place::Hundreds],
            (Difficulty::Hard, _) => &[],
        };
        let expected = digits_of(answer);
        for place in prefilled {
            let cell = &mut board.cells[place.index()];
            cell.value = Some(expected[place.index()]);
            cell.locked = true;
        }

        board
    }

    pub fn cell(&self, place: Place) -> &Cell {
        &self.cells[place.index()]
    }

    pub fn value(&self, place: Place) -> Option<u8> {
        self.cells[place.index()].value
    }

    pub fn is_locked(&self, place: Place) -> bool {
        self.cells[place.index()].locked
    }

    /// Writes one player digit. Ownership of the place is checked by the
    /// caller; the board only enforces range, writability and locks.
    pub fn write(
        &mut self,
        place: Place,
        digit: u8,
        by: ConnectionId,
        answer: u32,
        now: u64,
    ) -> WriteOutcome {
        if self.overall_locked || digit > 9 || !place.is_player_writable() {
            return WriteOutcome::Rejected;
        }
        if self.is_locked(place) {
            return WriteOutcome::Rejected;
        }

        self.set_cell(place, digit, by, answer);
        self.submitted_value = None;
        self.submitted_by = None;
        self.submitted_at = None;

        if self.value(Place::Tens).is_some() && self.value(Place::Ones).is_some() {
            self.lock(now);
            WriteOutcome::Completed
        } else {
            WriteOutcome::Accepted
        }
    }

    /// Sets tens and ones together and locks the board. A place that is
    /// already locked keeps its value. Returns false if the board was locked.
    pub fn submit(&mut self, tens: u8, ones: u8, by: ConnectionId, answer: u32, now: u64) -> bool {
        if self.overall_locked || tens > 9 || ones > 9 {
            return false;
        }

        for (place, digit) in [(Place::Tens, tens), (Place::Ones, ones)] {
            if !self.is_locked(place) {
                self.set_cell(place, digit, by, answer);
            }
        }

        self.submitted_value = Some(self.built_value(answer));
        self.submitted_by = Some(by);
        self.submitted_at = Some(now);
        self.lock(now);
        true
    }

    /// Number assembled from the board, read at the answer's width.
    /// Missing high places fall back to the answer's own digits (they are
    /// server-owned); missing tens or ones count as zero.
    pub fn built_value(&self, answer: u32) -> u32 {
        let expected = digits_of(answer);
        let digit = |place: Place| -> u32 {
            let fallback = if place.is_player_writable() {
                0
            } else {
                expected[place.index()]
            };
            u32::from(self.value(place).unwrap_or(fallback))
        };

        let tens = digit(Place::Tens);
        let ones = digit(Place::Ones);
        match answer_length(answer) {
            1 => ones,
            2 => tens * 10 + ones,
            3 => digit(Place::Hundreds) * 100 + tens * 10 + ones,
            _ => digit(Place::Thousands) * 1000 + digit(Place::Hundreds) * 100 + tens * 10 + ones,
        }
    }

    pub fn view(&self) -> DigitBoardView {
        let [thousands, hundreds, tens, ones] = &self.cells;
        DigitBoardView {
            thousands: thousands.value,
            hundreds: hundreds.value,
            tens: tens.value,
            ones: ones.value,
            who_thousands: thousands.set_by,
            who_hundreds: hundreds.set_by,
            who_tens: tens.set_by,
            who_ones: ones.set_by,
            locked_thousands: thousands.locked,
            locked_hundreds: hundreds.locked,
            locked_tens: tens.locked,
            locked_ones: ones.locked,
            overall_locked: self.overall_locked,
            submitted_value: self.submitted_value,
            submitted_by: self.submitted_by,
            submitted_at: self.submitted_at,
            answer_length: self.answer_length,
        }
    }

    fn set_cell(&mut self, place: Place, digit: u8, by: ConnectionId, answer: u32) {
        let cell = &mut self.cells[place.index()];
        cell.value = Some(digit);
        cell.set_by = Some(by);
        if digit == digits_of(answer)[place.index()] {
            cell.locked = true;
        }
    }

    fn lock(&mut self, now: u64) {
        self.overall_locked = true;
        self.locked_at = Some(now);
        self.cells[Place::Tens.index()].locked = true;
        self.cells[Place::Ones.index()].locked = true;
    }
}
