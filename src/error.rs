use thiserror::Error;

/// Playback and streaming errors.
///
/// These represent per-session failures: a failed session releases its
/// emitters and is removed from the registry, other sessions are unaffected.

#[derive(Error, Debug)]
pub enum SoundError {
    #[error("Failed to download {url}")]
    DownloadFailed {
        url: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Failed to open audio stream at {url}")]
    StreamOpenFailed {
        url: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Failed to read audio source")]
    SourceIo(#[source] std::io::Error),

    #[error("Failed to decode audio")]
    DecodeFailed(#[source] symphonia::core::errors::Error),

    #[error("No supported audio track in source")]
    NoAudioTrack,

    #[error("Source is missing sample rate or channel layout")]
    UnknownFormat,

    #[error("Unsupported channel count: {0}")]
    UnsupportedChannels(u16),

    #[error("Audio backend error: {0}")]
    Backend(String),

    #[error("Emitter has no free buffer")]
    NoFreeBuffer,

    #[error("Emitter not started")]
    NotStarted,

    #[error("Failed to spawn playback thread")]
    ThreadSpawnFailed(#[source] std::io::Error),
}

/// Wire connection validation failures.
///
/// These are rejections surfaced to the player placing the wire, never
/// fatal: the graph is left untouched.
#[derive(Error, Debug, PartialEq)]
pub enum ConnectionError {
    #[error("Cannot connect an object to itself")]
    SameObject,

    #[error("Cable too long: {length:.1} exceeds maximum {max:.1}")]
    TooLong { length: f64, max: f64 },
}

pub type Result<T> = std::result::Result<T, SoundError>;
