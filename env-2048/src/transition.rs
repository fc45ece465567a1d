use core_2048::{pack_board, unpack_board, CELL_COUNT};
use serde::Serialize;

use crate::{
    moves::{Move, MoveMask},
    EnvId,
};

/// The state of an instance as seen by a policy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct Observation {
    pub id: EnvId,
    pub board: u64,
    pub moves: MoveMask,
}

impl Observation {
    pub fn cells(&self) -> [u8; CELL_COUNT] {
        unpack_board(self.board)
    }

    pub const fn is_terminal(&self) -> bool {
        self.moves.is_terminal()
    }
}

/// One experience record for the replay buffer.
///
/// `action` is `None` for the record produced by a reset, in which case both states are the fresh
/// board and the reward is zero.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct Transition {
    pub id: EnvId,
    pub action: Option<Move>,
    pub prior_state: [u8; CELL_COUNT],
    pub next_state: [u8; CELL_COUNT],
    pub moves: MoveMask,
    pub reward: f64,
    pub terminal: bool,
}

impl Transition {
    pub fn reset(observation: Observation) -> Self {
        let cells = observation.cells();

        Self {
            id: observation.id,
            action: None,
            prior_state: cells,
            next_state: cells,
            moves: observation.moves,
            reward: 0.0,
            terminal: observation.is_terminal(),
        }
    }

    pub fn prior_board(&self) -> u64 {
        pack_board(&self.prior_state)
    }

    pub fn next_board(&self) -> u64 {
        pack_board(&self.next_state)
    }

    pub fn observation(&self) -> Observation {
        Observation {
            id: self.id,
            board: self.next_board(),
            moves: self.moves,
        }
    }
}
