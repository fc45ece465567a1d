use std::fmt;

use serde::{Deserialize, Serialize};

/// Set in a [`MoveMask`] when no move is legal. Sent as an [`Action`] it requests a reset.
pub const TERMINAL_BIT: u8 = 0b1_0000;

const MOVE_BITS: u8 = 0b1111;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Move {
    Left = 0b0001,
    Right = 0b0010,
    Up = 0b0100,
    Down = 0b1000,
}

impl Move {
    pub const ALL: [Self; 4] = [Self::Left, Self::Right, Self::Up, Self::Down];

    pub fn iter() -> impl Iterator<Item = Self> {
        Self::ALL.into_iter()
    }

    pub const fn bit(self) -> u8 {
        self as u8
    }

    pub const fn from_bit(bit: u8) -> Option<Self> {
        match bit {
            0b0001 => Some(Self::Left),
            0b0010 => Some(Self::Right),
            0b0100 => Some(Self::Up),
            0b1000 => Some(Self::Down),
            _ => None,
        }
    }
}

/// Legal moves for a board: one bit per [`Move`], plus [`TERMINAL_BIT`] iff no move is legal.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct MoveMask(u8);

impl MoveMask {
    pub const TERMINAL: Self = Self(TERMINAL_BIT);

    /// Builds the canonical mask from the move bits, adding the terminal bit when they are empty.
    pub const fn from_moves(bits: u8) -> Self {
        let bits = bits & MOVE_BITS;

        if bits == 0 {
            Self::TERMINAL
        } else {
            Self(bits)
        }
    }

    /// Accepts only canonical masks, as produced by [`MoveMask::from_moves`].
    pub const fn from_bits(bits: u8) -> Option<Self> {
        if bits == TERMINAL_BIT || (bits != 0 && bits & !MOVE_BITS == 0) {
            Some(Self(bits))
        } else {
            None
        }
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn contains(self, mv: Move) -> bool {
        self.0 & mv.bit() != 0
    }

    pub const fn is_terminal(self) -> bool {
        self.0 & TERMINAL_BIT != 0
    }

    pub fn iter(self) -> impl Iterator<Item = Move> {
        Move::iter().filter(move |&mv| self.contains(mv))
    }
}

impl fmt::Debug for MoveMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MoveMask({:#07b})", self.0)
    }
}

/// What a consumer sends to an instance: a move, or the terminal bit asking for a fresh game.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Action {
    Move(Move),
    Reset,
}

impl Action {
    pub const fn bits(self) -> u8 {
        match self {
            Self::Move(mv) => mv.bit(),
            Self::Reset => TERMINAL_BIT,
        }
    }

    pub const fn from_bits(bits: u8) -> Option<Self> {
        if bits == TERMINAL_BIT {
            return Some(Self::Reset);
        }

        match Move::from_bit(bits) {
            Some(mv) => Some(Self::Move(mv)),
            None => None,
        }
    }
}

impl From<Move> for Action {
    fn from(mv: Move) -> Self {
        Self::Move(mv)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_move_set_is_terminal() {
        assert_eq!(MoveMask::from_moves(0), MoveMask::TERMINAL);
        assert!(MoveMask::from_moves(0).is_terminal());
        assert_eq!(MoveMask::from_moves(0).iter().count(), 0);

        let mask = MoveMask::from_moves(Move::Left.bit() | Move::Down.bit());
        assert!(!mask.is_terminal());
        assert!(mask.contains(Move::Left));
        assert!(!mask.contains(Move::Up));
        assert_eq!(mask.iter().collect::<Vec<_>>(), [Move::Left, Move::Down]);
    }

    #[test]
    fn rejects_non_canonical_masks() {
        assert_eq!(MoveMask::from_bits(0), None);
        assert_eq!(MoveMask::from_bits(TERMINAL_BIT | 1), None);
        assert_eq!(MoveMask::from_bits(0b10_0000), None);
        assert_eq!(MoveMask::from_bits(0b1010), Some(MoveMask::from_moves(0b1010)));
    }

    #[test]
    fn actions_use_one_hot_bits() {
        for mv in Move::iter() {
            assert_eq!(Action::from_bits(mv.bit()), Some(Action::Move(mv)));
        }

        assert_eq!(Action::from_bits(TERMINAL_BIT), Some(Action::Reset));
        assert_eq!(Action::Reset.bits(), TERMINAL_BIT);
        assert_eq!(Action::from_bits(0), None);
        assert_eq!(Action::from_bits(0b0011), None);
    }
}
