use std::{error::Error, fmt::Display, io, sync::mpsc};

#[derive(Debug)]
/// Failures of the terminal screens.
pub enum GuiError {
    /// The terminal could not be read or written
    IOError(io::Error),
    /// The poll thread stopped listening
    MPSCSendError,
    /// The session thread panicked
    JoinError,
    /// There is nothing to choose from
    NoDevices,
}

impl Display for GuiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#?}", self)
    }
}

impl Error for GuiError {}

impl From<io::Error> for GuiError {
    fn from(value: io::Error) -> Self {
        Self::IOError(value)
    }
}

impl<T> From<mpsc::SendError<T>> for GuiError {
    fn from(_: mpsc::SendError<T>) -> Self {
        Self::MPSCSendError
    }
}
