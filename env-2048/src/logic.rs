use core_2048::{board_rows, mark_empty_cells, mirror_board, row, transpose_board};
use rand::Rng;

use crate::{
    config::SpawnConfig,
    moves::{Move, MoveMask},
    table::LookupTable,
};

/// Rewrites the board so that `mv` becomes a left move.
const fn to_left_frame(board: u64, mv: Move) -> u64 {
    match mv {
        Move::Left => board,
        Move::Right => mirror_board(board),
        Move::Up => transpose_board(board),
        Move::Down => mirror_board(transpose_board(board)),
    }
}

/// Inverse of [`to_left_frame`].
const fn from_left_frame(board: u64, mv: Move) -> u64 {
    match mv {
        Move::Left => board,
        Move::Right => mirror_board(board),
        Move::Up => transpose_board(board),
        Move::Down => transpose_board(mirror_board(board)),
    }
}

/// Applies a move without spawning a tile. An illegal move returns the board unchanged and no
/// points.
pub fn apply_move(table: &LookupTable, board: u64, mv: Move) -> (u64, u32) {
    let (new_board, score) = table.shift_board_left(to_left_frame(board, mv));

    (from_left_frame(new_board, mv), score)
}

pub fn is_legal(board: u64, mv: Move) -> bool {
    board_rows(to_left_frame(board, mv))
        .into_iter()
        .any(row::can_move_left)
}

pub fn valid_moves(board: u64) -> MoveMask {
    let bits = Move::iter()
        .filter(|&mv| is_legal(board, mv))
        .fold(0, |bits, mv| bits | mv.bit());

    MoveMask::from_moves(bits)
}

/// Places a 2 or a 4 in a uniformly chosen empty cell. Returns `None` if the board is full.
pub fn spawn_tile(rng: &mut impl Rng, board: u64, spawn: &SpawnConfig) -> Option<u64> {
    let empty_cells = mark_empty_cells(board);
    let slot_count = empty_cells.count_ones();

    if slot_count == 0 {
        return None;
    }

    let slot_idx = rng.gen_range(0..slot_count);

    // Clear the `slot_idx` lowest empty markers; the next one is the chosen cell.
    let slot = (0..slot_idx)
        .fold(empty_cells, |cells, _| cells & (cells - 1))
        .trailing_zeros();

    let two_probability = spawn.two_probability(rng);
    let cell: u64 = if rng.gen_bool(two_probability) {
        1
    } else {
        2
    };

    Some(board | (cell << slot))
}
