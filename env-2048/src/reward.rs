use core_2048::{count_empty_cells, max_cell_in_corner};
use serde::{Deserialize, Serialize};

use crate::table::LookupTable;

/// Weights of the shaped reward handed to the learner:
///
/// `log2(score_delta + 1) + c_empty * Δempty + c_mono * monotonicity + c_corner * corner`
///
/// `Δempty` is the change in empty cells from the board before the move to the board after the
/// spawn, `monotonicity` is the number of monotonic rows and columns (0 to 8) and `corner` is 1
/// when a largest tile sits in a corner.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RewardConfig {
    pub c_empty: f64,
    pub c_mono: f64,
    pub c_corner: f64,
}

impl Default for RewardConfig {
    fn default() -> Self {
        Self {
            c_empty: 0.10,
            c_mono: 0.15,
            c_corner: 0.25,
        }
    }
}

impl RewardConfig {
    pub fn reward(&self, table: &LookupTable, prev_board: u64, board: u64, score_delta: u32) -> f64 {
        let scaled_score = (f64::from(score_delta) + 1.0).log2();

        let empty_delta =
            f64::from(count_empty_cells(board)) - f64::from(count_empty_cells(prev_board));
        let monotonicity = f64::from(table.board_monotonicity(board));
        let corner = if max_cell_in_corner(board) { 1.0 } else { 0.0 };

        self.c_corner.mul_add(
            corner,
            self.c_mono
                .mul_add(monotonicity, self.c_empty.mul_add(empty_delta, scaled_score)),
        )
    }
}

#[cfg(test)]
mod tests {
    use core_2048::board_from_rows;

    use super::*;

    #[test]
    fn rewards_a_corner_merge() {
        let table = LookupTable::build();
        let config = RewardConfig::default();

        let prev_board = board_from_rows([0x1100, 0, 0, 0]);
        // After merging left and spawning a 2 in the bottom right corner.
        let board = board_from_rows([0x2000, 0, 0, 0x0001]);

        let reward = config.reward(&table, prev_board, board, 4);

        // log2(5) + 0.10 * (14 - 14) + 0.15 * 8 + 0.25 * 1
        let expected = 5f64.log2() + 0.15 * 8.0 + 0.25;
        assert!((reward - expected).abs() < 1e-9, "{reward} != {expected}");
    }

    #[test]
    fn penalises_lost_space_and_disorder() {
        let table = LookupTable::build();
        let config = RewardConfig {
            c_empty: 1.0,
            c_mono: 0.0,
            c_corner: 0.0,
        };

        let prev_board = board_from_rows([0x1000, 0, 0, 0]);
        let board = board_from_rows([0x1200, 0x0100, 0, 0]);

        assert_eq!(config.reward(&table, prev_board, board, 0), -2.0);
    }
}
