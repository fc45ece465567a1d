use std::{io, time::Duration};

use env_2048::{EnvError, EnvId, SimError};

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("timed out after {waited:?} waiting for {ids:?}")]
    Timeout { ids: Vec<EnvId>, waited: Duration },
    #[error("channel shut down")]
    Shutdown,
    #[error("environment {0} already has an action awaiting its result")]
    DuplicateAction(EnvId),
    #[error("unknown environment id {0}")]
    UnknownEnv(EnvId),
    #[error(transparent)]
    Sim(#[from] SimError),
    #[error("{call} failed: {source}")]
    Os {
        call: &'static str,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl ChannelError {
    pub(crate) fn last_os_error(call: &'static str) -> Self {
        Self::Os {
            call,
            source: io::Error::last_os_error(),
        }
    }
}

impl From<ChannelError> for EnvError {
    fn from(err: ChannelError) -> Self {
        match err {
            ChannelError::Protocol(message) => Self::Protocol(message),
            ChannelError::Timeout { ids, waited } => Self::Timeout { ids, waited },
            ChannelError::Shutdown => Self::Shutdown,
            ChannelError::DuplicateAction(id) => Self::DuplicateAction(id),
            ChannelError::UnknownEnv(id) => Self::UnknownEnv(id),
            ChannelError::Sim(err) => Self::Sim(err),
            ChannelError::Os { call, source } => {
                Self::Io(io::Error::new(source.kind(), format!("{call}: {source}")))
            }
            ChannelError::Io(err) => Self::Io(err),
        }
    }
}
