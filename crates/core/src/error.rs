/// Result alias that carries the custom [`StripError`] type.
pub type Result<T> = std::result::Result<T, StripError>;

/// Common error type for the core crate.
#[derive(Debug, thiserror::Error)]
pub enum StripError {
    /// A single pixel index fell outside `[-len, len)`.
    #[error("pixel index {index} is out of range for a strip of {len} pixels")]
    IndexOutOfRange { index: isize, len: usize },
    /// Slice assignment received a different number of colors than the
    /// slice selects.
    #[error("slice selects {expected} pixels but {actual} colors were supplied")]
    LengthMismatch { expected: usize, actual: usize },
    /// Parameters that can never be valid, such as a zero slice step.
    #[error("{0}")]
    InvalidInput(&'static str),
    /// The physical bus or GPIO lines rejected a write.
    #[error("transport failure: {0}")]
    Transport(String),
    /// The strip was flushed after its transport had been released.
    #[error("the pixel transport has already been released")]
    Released,
    /// A mode name that is not part of the catalogue.
    #[error("unknown mode `{0}`")]
    UnknownMode(String),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("audio source failure: {0}")]
    Audio(String),
    /// Free-form message for failures that have no dedicated variant.
    #[error("{0}")]
    Message(String),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Json(#[from] serde_json::Error),
}

impl StripError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }

    pub fn transport<T: Into<String>>(msg: T) -> Self {
        Self::Transport(msg.into())
    }

    pub fn config<T: Into<String>>(msg: T) -> Self {
        Self::Config(msg.into())
    }

    pub fn audio<T: Into<String>>(msg: T) -> Self {
        Self::Audio(msg.into())
    }
}

impl From<&str> for StripError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for StripError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}

impl From<realfft::FftError> for StripError {
    fn from(value: realfft::FftError) -> Self {
        Self::Audio(value.to_string())
    }
}
