//! The error type shared by every layer of the crate.
//!
//! Parsing anomalies (malformed log lines, missing fields on the trial that
//! is still running) never show up here; the codec absorbs them. Everything
//! in [ArduError] is something the top-level loop has to decide about.

use crate::gui::GuiError;
use std::{borrow::Cow, error::Error, fmt, io};

/// Everything that can go wrong while running a session.
#[derive(Debug)]
pub enum ArduError {
    /// The serial port is missing or could not be opened. The session cannot
    /// start.
    DeviceUnavailable {
        /// The port we tried to open
        port: String,
        /// What the OS told us
        source: io::Error,
    },

    /// Writing to an open serial handle failed. Not retried.
    TransportWrite(io::Error),

    /// The log implies a state that the protocol does not allow, e.g. two
    /// `TRL_RELEASED` lines in one trial or a trial that began without being
    /// released.
    ProtocolViolation(String),

    /// Tried to encode a value that cannot go on the wire: zero, or a
    /// "must-define" parameter that nobody defined.
    InvalidParameterValue {
        /// The parameter abbreviation
        param: String,
        /// Why the value was refused
        reason: Cow<'static, str>,
    },

    /// Reading or writing the session logfile failed.
    Io(io::Error),

    /// The configuration file could not be parsed or is inconsistent.
    Config(String),

    /// The terminal UI failed.
    Gui(GuiError),
}

impl ArduError {
    pub(crate) fn violation(msg: impl Into<String>) -> Self {
        Self::ProtocolViolation(msg.into())
    }

    pub(crate) fn invalid_value(
        param: impl Into<String>,
        reason: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self::InvalidParameterValue {
            param: param.into(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for ArduError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use ArduError as AE;
        let msg = match self {
            AE::DeviceUnavailable { port, source } => {
                Cow::from(format!("device {} unavailable: {}", port, source))
            }
            AE::TransportWrite(error) => Cow::from(format!("write to device failed: {}", error)),
            AE::ProtocolViolation(what) => Cow::from(format!("protocol violation: {}", what)),
            AE::InvalidParameterValue { param, reason } => {
                Cow::from(format!("invalid value for {}: {}", param, reason))
            }
            AE::Io(error) => Cow::from(format!("io error: {}", error)),
            AE::Config(what) => Cow::from(format!("config error: {}", what)),
            AE::Gui(error) => Cow::from(format!("gui error: {}", error)),
        };

        write!(f, "{}", msg)
    }
}

impl Error for ArduError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ArduError::DeviceUnavailable { source, .. } => Some(source),
            ArduError::TransportWrite(error) | ArduError::Io(error) => Some(error),
            ArduError::Gui(error) => Some(error),
            _ => None,
        }
    }
}

impl From<io::Error> for ArduError {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<ron::error::SpannedError> for ArduError {
    fn from(value: ron::error::SpannedError) -> Self {
        Self::Config(value.to_string())
    }
}

impl From<ron::Error> for ArduError {
    fn from(value: ron::Error) -> Self {
        Self::Config(value.to_string())
    }
}

impl From<GuiError> for ArduError {
    fn from(value: GuiError) -> Self {
        Self::Gui(value)
    }
}

/// Shorthand used throughout the crate.
pub type Result<T> = std::result::Result<T, ArduError>;
