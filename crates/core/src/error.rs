use crate::star_power::ActivationRejected;

/// Result alias that carries the custom [`KaraokeError`] type.
pub type Result<T> = std::result::Result<T, KaraokeError>;

/// Common error type for the core crate.
///
/// Silence and out-of-band pitch are not errors; they surface as a
/// [`PitchEstimate`](crate::PitchEstimate) without a frequency.
#[derive(Debug, thiserror::Error)]
pub enum KaraokeError {
    /// Free-form message for the odd failure that has no dedicated variant.
    #[error("{0}")]
    Message(String),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    /// Chart or configuration JSON could not be decoded.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    /// The FFT backend rejected a buffer.
    #[error("fft error: {0}")]
    Fft(#[from] realfft::FftError),
    /// Caller supplied data the core cannot work with.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Configuration failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// Chart data failed validation.
    #[error("invalid timeline: {0}")]
    InvalidTimeline(String),
    /// Star power could not be activated.
    #[error(transparent)]
    StarPower(#[from] ActivationRejected),
    /// A shared lock was poisoned by a panicking writer.
    #[error("{0} has been poisoned")]
    Poisoned(&'static str),
}

impl KaraokeError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }

    pub(crate) fn config<T: Into<String>>(msg: T) -> Self {
        Self::InvalidConfig(msg.into())
    }

    pub(crate) fn timeline<T: Into<String>>(msg: T) -> Self {
        Self::InvalidTimeline(msg.into())
    }
}

impl From<&str> for KaraokeError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for KaraokeError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}
