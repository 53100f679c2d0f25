use std::io;
use std::str::Utf8Error;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("invalid config: {0}")]
    Config(&'static str),
    #[error("sink destroyed")]
    Destroyed,
    #[error("sink already ended")]
    Ended,
    #[error("descriptor not ready")]
    NotReady,
    #[error("no backing path to reopen")]
    MissingPath,
    #[error("text sink requires utf-8 data")]
    Utf8(#[from] Utf8Error),
    #[error("internal error: {0}")]
    Internal(&'static str),
}

impl Error {
    /// Rebuilds an equivalent error so one failure can be handed to several
    /// pending callbacks. `io::Error` is not `Clone`; the copy keeps the
    /// kind and message.
    pub(crate) fn duplicate(&self) -> Error {
        match self {
            Error::Io(err) => Error::Io(io::Error::new(err.kind(), err.to_string())),
            Error::Config(msg) => Error::Config(msg),
            Error::Destroyed => Error::Destroyed,
            Error::Ended => Error::Ended,
            Error::NotReady => Error::NotReady,
            Error::MissingPath => Error::MissingPath,
            Error::Utf8(err) => Error::Utf8(*err),
            Error::Internal(msg) => Error::Internal(msg),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
