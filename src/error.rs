use thiserror::Error;

/// Everything that can go wrong while resolving or downloading a stream.
///
/// The variants follow the recovery semantics of the resolver: playability
/// and validation failures are never retried, transport-level 5xx failures
/// are retried with bounded backoff before surfacing as `RetriesExhausted`.
#[derive(Debug, Error)]
pub enum Error {
    /// The platform reported the video as unplayable (age/region/availability
    /// restriction, login requirement, offline live stream). Surfaced
    /// verbatim and never retried.
    #[error("video {video_id} is not playable ({status}): {reason}")]
    Unplayable {
        video_id: String,
        status: String,
        reason: String,
    },

    /// A device-profile response carried a different video id than requested.
    /// The response is discarded; another profile may still succeed.
    #[error("response video id {got} does not match requested id {requested}")]
    IdMismatch { requested: String, got: String },

    /// The response body did not have the expected shape.
    #[error("malformed response: {0}")]
    BadResponse(String),

    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// A 5xx-class failure survived every retry attempt.
    #[error("request failed with status {status} after {attempts} attempts")]
    RetriesExhausted { status: u16, attempts: u32 },

    /// Player-script parsing produced no usable cipher fragment.
    #[error("cipher extraction failed: {0}")]
    Extraction(String),

    /// No format in the candidate list satisfied the requested quality.
    #[error("no format found matching quality {0:?}")]
    FormatNotFound(String),

    /// Zero usable, playable formats remained after all fallbacks.
    #[error("no usable formats for video {0}")]
    NoUsableFormats(String),

    #[error("could not extract a video id from {0:?}")]
    InvalidId(String),

    /// The download stream was destroyed by the caller.
    #[error("stream destroyed")]
    Destroyed,
}

pub type Result<T> = std::result::Result<T, Error>;
