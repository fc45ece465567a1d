//! Single-row algorithms. A row is four nibbles with the leftmost cell in the high nibble.

use crate::MAX_EXPONENT;

pub const ROW_COUNT: usize = 1 << 16;

pub const fn row_cells(row: u16) -> [u8; 4] {
    [
        (row >> 12) as u8 & 0xf,
        (row >> 8) as u8 & 0xf,
        (row >> 4) as u8 & 0xf,
        row as u8 & 0xf,
    ]
}

pub const fn pack_row(cells: [u8; 4]) -> u16 {
    ((cells[0] as u16 & 0xf) << 12)
        | ((cells[1] as u16 & 0xf) << 8)
        | ((cells[2] as u16 & 0xf) << 4)
        | (cells[3] as u16 & 0xf)
}

pub const fn reverse_row(row: u16) -> u16 {
    let row = row.rotate_left(8);
    ((row & 0x0f0f) << 4) | ((row & 0xf0f0) >> 4)
}

/// True if the cells never decrease, or never increase, from left to right.
pub fn is_monotonic(row: u16) -> bool {
    let cells = row_cells(row);

    cells.windows(2).all(|pair| pair[0] <= pair[1])
        || cells.windows(2).all(|pair| pair[0] >= pair[1])
}

const fn can_merge(left: u8, right: u8) -> bool {
    left != 0 && left == right && left < MAX_EXPONENT
}

/// True if a left move changes the row: some tile has an empty or equal cell to its left.
pub fn can_move_left(row: u16) -> bool {
    row_cells(row)
        .windows(2)
        .any(|pair| pair[1] != 0 && (pair[0] == 0 || can_merge(pair[0], pair[1])))
}

fn compact(cells: [u8; 4]) -> [u8; 4] {
    let mut compacted = [0; 4];

    for (slot, cell) in compacted
        .iter_mut()
        .zip(cells.into_iter().filter(|&cell| cell != 0))
    {
        *slot = cell;
    }

    compacted
}

/// Slides a row left, merging each pair of equal neighbours at most once.
///
/// Returns the new row and the points gained, which is the value of every tile created by a merge.
/// The merge scan runs over the compacted row and zeroes the absorbed cell, so a freshly merged
/// tile is compared against that zero next and can never merge twice in one move.
pub fn shift_row_left(row: u16) -> (u16, u32) {
    let mut cells = compact(row_cells(row));
    let mut score = 0;

    for i in 1..4 {
        if can_merge(cells[i - 1], cells[i]) {
            cells[i - 1] += 1;
            cells[i] = 0;
            score += 1 << cells[i - 1];
        }
    }

    (pack_row(compact(cells)), score)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packs_and_unpacks_rows() {
        assert_eq!(pack_row([1, 2, 3, 4]), 0x1234);
        assert_eq!(pack_row([15, 15, 15, 15]), 0xffff);
        assert_eq!(pack_row([8, 4, 2, 1]), 0x8421);
        assert_eq!(row_cells(0x8421), [8, 4, 2, 1]);
        assert_eq!(row_cells(0x0000), [0, 0, 0, 0]);
    }

    #[test]
    fn reverses_rows() {
        assert_eq!(reverse_row(0b1000_0101_1111_1010), 0b1010_1111_0101_1000);
        assert_eq!(reverse_row(0x1230), 0x0321);
    }

    #[test]
    fn slides_without_merging() {
        for (row, expected) in [
            (0x0000, 0x0000),
            (0x0001, 0x1000),
            (0x0010, 0x1000),
            (0x2001, 0x2100),
            (0x0021, 0x2100),
            (0x3021, 0x3210),
            (0x0321, 0x3210),
            (0x1234, 0x1234),
        ] {
            assert_eq!(shift_row_left(row), (expected, 0), "row {row:#06x}");
        }
    }

    #[test]
    fn merges_once_per_tile() {
        for (row, expected, score) in [
            (0x1100, 0x2000, 4),
            (0x1001, 0x2000, 4),
            (0x0101, 0x2000, 4),
            (0x1122, 0x2300, 12),
            (0x1102, 0x2200, 4),
            (0x1221, 0x1310, 8),
            (0x1110, 0x2100, 4),
            (0x2211, 0x3200, 12),
            (0x1111, 0x2200, 8),
        ] {
            assert_eq!(shift_row_left(row), (expected, score), "row {row:#06x}");
        }
    }

    #[test]
    fn largest_tiles_do_not_merge() {
        assert_eq!(shift_row_left(0xff00), (0xff00, 0));
        assert!(!can_move_left(0xff00));
        assert!(can_move_left(0x0ff0));
    }

    #[test]
    fn detects_monotonic_rows() {
        assert!(is_monotonic(0x1234));
        assert!(is_monotonic(0x4321));
        assert!(is_monotonic(0x2000));
        assert!(is_monotonic(0x1100));
        assert!(!is_monotonic(0x1210));
        assert!(!is_monotonic(0x0101));
    }

    #[test]
    fn move_predicate_matches_shift() {
        for row in 0..=u16::MAX {
            assert_eq!(can_move_left(row), shift_row_left(row).0 != row, "row {row:#06x}");
        }
    }
}
