use std::sync::Arc;

use core_2048::{unpack_board, CELL_COUNT};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use tracing::trace;

use crate::{
    config::SpawnConfig,
    error::SimError,
    logic,
    moves::{Move, MoveMask},
    reward::RewardConfig,
    table::LookupTable,
    transition::{Observation, Transition},
    EnvId,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum SimState {
    Active,
    /// No move is legal. Only [`Simulator::reset`] leaves this state.
    Terminated,
}

/// Random stream for instance `id`: stream `id` of `seed`, or fresh entropy.
pub fn instance_rng(id: EnvId, seed: Option<u64>) -> ChaCha8Rng {
    match seed {
        Some(seed) => {
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            rng.set_stream(u64::from(id));
            rng
        }
        None => ChaCha8Rng::from_entropy(),
    }
}

/// A single game instance.
pub struct Simulator<R = ChaCha8Rng> {
    id: EnvId,
    table: Arc<LookupTable>,
    rng: R,
    spawn: SpawnConfig,
    reward: RewardConfig,
    board: u64,
    prev_board: u64,
    score: u32,
    prev_score: u32,
    moves: MoveMask,
    state: SimState,
    last_move: Option<Move>,
    last_reward: f64,
}

impl<R: Rng> Simulator<R> {
    /// Creates an instance holding a fresh two-tile game.
    pub fn new(
        id: EnvId,
        table: Arc<LookupTable>,
        rng: R,
        spawn: SpawnConfig,
        reward: RewardConfig,
    ) -> Result<Self, SimError> {
        let mut simulator = Self {
            id,
            table,
            rng,
            spawn,
            reward,
            board: 0,
            prev_board: 0,
            score: 0,
            prev_score: 0,
            moves: MoveMask::TERMINAL,
            state: SimState::Terminated,
            last_move: None,
            last_reward: 0.0,
        };

        simulator.reset()?;

        Ok(simulator)
    }

    pub fn reset(&mut self) -> Result<(), SimError> {
        let board = self.spawn(0)?;
        let board = self.spawn(board)?;

        self.board = board;
        self.prev_board = board;
        self.score = 0;
        self.prev_score = 0;
        self.moves = logic::valid_moves(board);
        self.state = SimState::Active;
        self.last_move = None;
        self.last_reward = 0.0;

        trace!(id = self.id, board = format_args!("{board:#018x}"), "reset");

        Ok(())
    }

    /// Plays `mv`, spawns a tile and returns the shaped reward.
    ///
    /// Fails without touching the game if the instance is terminated or `mv` is not legal.
    pub fn make_move(&mut self, mv: Move) -> Result<f64, SimError> {
        if self.state == SimState::Terminated {
            return Err(SimError::IllegalOperation {
                id: self.id,
                operation: "make a move in",
            });
        }

        if !self.moves.contains(mv) {
            return Err(SimError::InvalidMove {
                id: self.id,
                mv,
                moves: self.moves,
            });
        }

        let (shifted, gained) = logic::apply_move(&self.table, self.board, mv);
        let board = self.spawn(shifted)?;

        self.prev_board = self.board;
        self.prev_score = self.score;
        self.board = board;
        self.score += gained;
        self.moves = logic::valid_moves(board);
        self.state = if self.moves.is_terminal() {
            SimState::Terminated
        } else {
            SimState::Active
        };
        self.last_move = Some(mv);
        self.last_reward = self
            .reward
            .reward(&self.table, self.prev_board, board, gained);

        Ok(self.last_reward)
    }

    fn spawn(&mut self, board: u64) -> Result<u64, SimError> {
        logic::spawn_tile(&mut self.rng, board, &self.spawn).ok_or(SimError::Internal {
            id: self.id,
            reason: "no empty cell to spawn a tile into",
        })
    }
}

impl<R> Simulator<R> {
    pub const fn id(&self) -> EnvId {
        self.id
    }

    pub const fn board(&self) -> u64 {
        self.board
    }

    pub const fn prev_board(&self) -> u64 {
        self.prev_board
    }

    pub fn cells(&self) -> [u8; CELL_COUNT] {
        unpack_board(self.board)
    }

    pub const fn score(&self) -> u32 {
        self.score
    }

    pub const fn prev_score(&self) -> u32 {
        self.prev_score
    }

    pub const fn moves(&self) -> MoveMask {
        self.moves
    }

    pub const fn state(&self) -> SimState {
        self.state
    }

    pub fn is_terminated(&self) -> bool {
        self.state == SimState::Terminated
    }

    pub const fn last_reward(&self) -> f64 {
        self.last_reward
    }

    pub const fn observation(&self) -> Observation {
        Observation {
            id: self.id,
            board: self.board,
            moves: self.moves,
        }
    }

    /// The record describing the most recent move, or the reset if no move was made since.
    pub fn experience(&self) -> Transition {
        Transition {
            id: self.id,
            action: self.last_move,
            prior_state: unpack_board(self.prev_board),
            next_state: unpack_board(self.board),
            moves: self.moves,
            reward: self.last_reward,
            terminal: self.is_terminated(),
        }
    }

    /// Continues from `board` as if a game had just reached it, with the score starting over.
    ///
    /// Used by a replacement worker picking up the last state its predecessor published.
    pub fn restore(&mut self, board: u64) {
        self.board = board;
        self.prev_board = board;
        self.score = 0;
        self.prev_score = 0;
        self.moves = logic::valid_moves(board);
        self.state = if self.moves.is_terminal() {
            SimState::Terminated
        } else {
            SimState::Active
        };
        self.last_move = None;
        self.last_reward = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use core_2048::{board_from_rows, count_tiles};

    use super::*;

    fn simulator(seed: u64) -> Simulator {
        Simulator::new(
            0,
            Arc::new(LookupTable::build()),
            instance_rng(0, Some(seed)),
            SpawnConfig::default(),
            RewardConfig::default(),
        )
        .unwrap()
    }

    #[test]
    fn starts_with_two_tiles() {
        let sim = simulator(1);

        assert_eq!(count_tiles(sim.board()), 2);
        assert_eq!(sim.score(), 0);
        assert_eq!(sim.state(), SimState::Active);
        assert_eq!(sim.experience().action, None);
        assert_eq!(sim.experience().prior_state, sim.experience().next_state);
    }

    #[test]
    fn merging_pair_scores_and_spawns() {
        let mut sim = simulator(2);
        sim.restore(board_from_rows([0x1100, 0, 0, 0]));

        sim.make_move(Move::Left).unwrap();

        assert_eq!(sim.score(), 4);
        assert_eq!(sim.prev_score(), 0);
        assert_eq!(count_tiles(sim.board()), 2);
        assert_eq!(sim.board() & 0xf000_0000_0000_0000, 0x2000_0000_0000_0000);

        let experience = sim.experience();
        assert_eq!(experience.action, Some(Move::Left));
        assert_eq!(experience.prior_state[..2], [1, 1]);
        assert_eq!(experience.next_state[0], 2);
    }

    #[test]
    fn rejects_illegal_moves_without_changing_state() {
        let mut sim = simulator(3);
        sim.restore(board_from_rows([0x1000, 0, 0, 0]));

        let err = sim.make_move(Move::Left).unwrap_err();

        assert!(matches!(err, SimError::InvalidMove { mv: Move::Left, .. }));
        assert_eq!(sim.board(), board_from_rows([0x1000, 0, 0, 0]));
        assert_eq!(sim.score(), 0);
    }

    #[test]
    fn locked_board_terminates() {
        let mut sim = simulator(4);
        sim.restore(board_from_rows([0x1212, 0x2121, 0x1212, 0x3345]));
        assert_eq!(sim.state(), SimState::Active);

        sim.restore(board_from_rows([0x1212, 0x2121, 0x1212, 0x2121]));
        assert_eq!(sim.state(), SimState::Terminated);
        assert!(sim.moves().is_terminal());

        let err = sim.make_move(Move::Left).unwrap_err();
        assert!(matches!(err, SimError::IllegalOperation { .. }));
    }

    #[test]
    fn reset_restores_a_fresh_game() {
        let mut sim = simulator(5);
        sim.restore(board_from_rows([0x1212, 0x2121, 0x1212, 0x2121]));

        sim.reset().unwrap();

        assert_eq!(sim.state(), SimState::Active);
        assert_eq!(count_tiles(sim.board()), 2);
        assert_eq!(sim.score(), 0);
        assert_eq!(sim.last_reward(), 0.0);
    }

    #[test]
    fn seeded_instances_replay_identically() {
        let mut a = simulator(9);
        let mut b = simulator(9);

        for _ in 0..200 {
            assert_eq!(a.board(), b.board());
            let Some(mv) = a.moves().iter().next() else {
                break;
            };
            assert_eq!(a.make_move(mv).unwrap(), b.make_move(mv).unwrap());
        }
    }

    #[test]
    fn streams_differ_between_instances() {
        let boards: Vec<u64> = (0..8)
            .map(|id| {
                Simulator::new(
                    id,
                    Arc::new(LookupTable::build()),
                    instance_rng(id, Some(42)),
                    SpawnConfig::default(),
                    RewardConfig::default(),
                )
                .unwrap()
                .board()
            })
            .collect();

        assert!(boards.iter().any(|&board| board != boards[0]));
    }
}
