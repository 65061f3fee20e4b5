//! Error types for the memorizer scheduler.

/// Top-level error type for the interval playback scheduler.
///
/// Only [`MemorizerError::InvalidInput`] is ever returned to a caller of the
/// scheduler; the remaining scheduling categories are handled inside the core
/// and surface as log lines.
#[derive(Debug, thiserror::Error)]
pub enum MemorizerError {
    /// A start command carried no usable media reference.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The shared output device could not be acquired.
    #[error("output focus denied")]
    FocusDenied,

    /// The playback adapter reported an error.
    #[error("playback failed (code {code}): {reason}")]
    PlaybackFailure { code: i32, reason: String },

    /// Output focus was revoked while a clip was playing.
    #[error("output focus lost during playback")]
    ResourceLoss,

    /// Persisted schedule state is unreadable or inconsistent.
    #[error("state corruption: {0}")]
    StateCorruption(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// Audio device, stream, or decoder error.
    #[error("audio error: {0}")]
    Audio(String),

    /// Safety-net alarm could not be armed or cancelled.
    #[error("alarm error: {0}")]
    Alarm(String),

    /// Wake lock could not be taken.
    #[error("wake lock error: {0}")]
    WakeLock(String),

    /// Schedule or lease file could not be written.
    #[error("persistence error: {0}")]
    Persistence(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A host protocol frame was malformed or of a foreign version.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Channel send/receive error.
    #[error("channel error: {0}")]
    Channel(String),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, MemorizerError>;
