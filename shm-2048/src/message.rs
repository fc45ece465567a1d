//! Fixed-size little-endian wire format of the two message kinds.
//!
//! ```text
//! result (worker -> consumer), 20 bytes: id u16 | board u64 | moves u8 | reward f64 | terminated u8
//! action (consumer -> worker),  3 bytes: id u16 | action u8
//! ```

use env_2048::{Action, EnvId, MoveMask, Simulator};

use crate::error::ChannelError;

pub const RESULT_SIZE: usize = 20;
pub const ACTION_SIZE: usize = 3;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ResultMessage {
    pub id: EnvId,
    pub board: u64,
    pub moves: MoveMask,
    pub reward: f64,
    pub terminated: bool,
}

impl ResultMessage {
    pub fn from_simulator<R>(simulator: &Simulator<R>, reward: f64) -> Self {
        Self {
            id: simulator.id(),
            board: simulator.board(),
            moves: simulator.moves(),
            reward,
            terminated: simulator.is_terminated(),
        }
    }

    pub fn encode(&self) -> [u8; RESULT_SIZE] {
        let mut bytes = [0; RESULT_SIZE];

        bytes[0..2].copy_from_slice(&self.id.to_le_bytes());
        bytes[2..10].copy_from_slice(&self.board.to_le_bytes());
        bytes[10] = self.moves.bits();
        bytes[11..19].copy_from_slice(&self.reward.to_le_bytes());
        bytes[19] = u8::from(self.terminated);

        bytes
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ChannelError> {
        let bytes: &[u8; RESULT_SIZE] = bytes.try_into().map_err(|_| {
            ChannelError::Protocol(format!(
                "result message is {} bytes, expected {RESULT_SIZE}",
                bytes.len()
            ))
        })?;

        let id = EnvId::from_le_bytes([bytes[0], bytes[1]]);
        let board = u64::from_le_bytes(le_array(&bytes[2..10]));
        let moves = MoveMask::from_bits(bytes[10]).ok_or_else(|| {
            ChannelError::Protocol(format!("id {id}: invalid move mask {:#07b}", bytes[10]))
        })?;
        let reward = f64::from_le_bytes(le_array(&bytes[11..19]));
        let terminated = match bytes[19] {
            0 => false,
            1 => true,
            flag => {
                return Err(ChannelError::Protocol(format!(
                    "id {id}: invalid terminated flag {flag}"
                )))
            }
        };

        if !reward.is_finite() {
            return Err(ChannelError::Protocol(format!(
                "id {id}: non-finite reward {reward}"
            )));
        }

        if terminated != moves.is_terminal() {
            return Err(ChannelError::Protocol(format!(
                "id {id}: terminated flag disagrees with move mask {moves:?}"
            )));
        }

        Ok(Self {
            id,
            board,
            moves,
            reward,
            terminated,
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ActionMessage {
    pub id: EnvId,
    pub action: Action,
}

impl ActionMessage {
    pub fn encode(&self) -> [u8; ACTION_SIZE] {
        let [lo, hi] = self.id.to_le_bytes();

        [lo, hi, self.action.bits()]
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ChannelError> {
        let &[lo, hi, bits] = bytes else {
            return Err(ChannelError::Protocol(format!(
                "action message is {} bytes, expected {ACTION_SIZE}",
                bytes.len()
            )));
        };

        let id = EnvId::from_le_bytes([lo, hi]);
        let action = Action::from_bits(bits).ok_or_else(|| {
            ChannelError::Protocol(format!("id {id}: invalid action bits {bits:#07b}"))
        })?;

        Ok(Self { id, action })
    }
}

fn le_array(bytes: &[u8]) -> [u8; 8] {
    let mut array = [0; 8];
    array.copy_from_slice(bytes);
    array
}
