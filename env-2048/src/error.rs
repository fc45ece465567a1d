use std::{io, time::Duration};

use crate::{
    moves::{Move, MoveMask},
    EnvId,
};

#[derive(Debug, thiserror::Error)]
pub enum SimError {
    #[error("instance {id}: move {mv:?} is not legal, valid moves are {moves:?}")]
    InvalidMove { id: EnvId, mv: Move, moves: MoveMask },
    #[error("instance {id}: cannot {operation} a terminated game")]
    IllegalOperation { id: EnvId, operation: &'static str },
    #[error("instance {id}: internal invariant violated: {reason}")]
    Internal { id: EnvId, reason: &'static str },
}

/// Errors surfaced through the [`EnvManager`](crate::manager::EnvManager) interface by either
/// backend.
#[derive(Debug, thiserror::Error)]
pub enum EnvError {
    #[error(transparent)]
    Sim(#[from] SimError),
    #[error("unknown environment id {0}")]
    UnknownEnv(EnvId),
    #[error("environment {0} already has an action awaiting its result")]
    DuplicateAction(EnvId),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("timed out after {waited:?} waiting for environments {ids:?}")]
    Timeout { ids: Vec<EnvId>, waited: Duration },
    #[error("channel shut down")]
    Shutdown,
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}
