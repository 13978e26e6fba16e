use crate::{
    backend::BackendError, command::Route, magnet::MagnetError,
    task::DownloadRequestBuilderError,
};

/// Why a single magnet line could not be dispatched.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error(transparent)]
    InvalidMagnet(#[from] MagnetError),
    #[error("No backend configured for {0:?} requests")]
    NoBackend(Route),
    #[error("Failed to build download request: {0}")]
    Request(#[from] DownloadRequestBuilderError),
    #[error(transparent)]
    Backend(#[from] BackendError),
}
