use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::formats::Format;

/// Device profiles that can be enabled for the player API pass.
///
/// The base web watch-page fetch always happens and is not listed here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientKind {
    Web,
    WebEmbedded,
    Tv,
    Ios,
    Android,
}

/// Retry knobs for 5xx-class failures on player API calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Initial backoff; doubles per attempt.
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
    /// Ceiling applied to the exponential backoff.
    #[serde(default = "default_backoff_cap_ms")]
    pub backoff_cap_ms: u64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_backoff_ms() -> u64 {
    500
}

fn default_backoff_cap_ms() -> u64 {
    8_000
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff_ms: default_backoff_ms(),
            backoff_cap_ms: default_backoff_cap_ms(),
        }
    }
}

impl RetryPolicy {
    /// Backoff delay before retry number `attempt` (0-based), capped.
    pub fn delay(&self, attempt: u32) -> Duration {
        let ms = self
            .backoff_ms
            .saturating_mul(1u64 << attempt.min(16))
            .min(self.backoff_cap_ms);
        Duration::from_millis(ms)
    }
}

/// Options for a resolution pass (`get_basic_info` / `get_info`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Options {
    /// Device profiles queried in addition to the base web watch page,
    /// reconciled in this order.
    #[serde(default = "default_clients")]
    pub clients: Vec<ClientKind>,
    #[serde(default = "default_lang")]
    pub lang: String,
    #[serde(default)]
    pub retry: RetryPolicy,
    /// TTL of the compiled cipher-script cache. Scripts rotate frequently;
    /// the default only allows reuse across back-to-back calls.
    #[serde(default = "default_cipher_ttl_secs")]
    pub cipher_cache_ttl_secs: u64,
    /// TTL of the per-(operation, id, lang) resolution result cache.
    #[serde(default = "default_response_ttl_secs")]
    pub response_cache_ttl_secs: u64,
    /// Bind outgoing requests to this local address (multi-homed hosts,
    /// rotated egress ranges). `None` uses the process-wide client.
    #[serde(default)]
    pub local_address: Option<std::net::IpAddr>,
}

fn default_clients() -> Vec<ClientKind> {
    vec![ClientKind::WebEmbedded, ClientKind::Tv, ClientKind::Ios]
}

fn default_lang() -> String {
    "en".to_string()
}

fn default_cipher_ttl_secs() -> u64 {
    1
}

fn default_response_ttl_secs() -> u64 {
    60
}

impl Default for Options {
    fn default() -> Self {
        Self {
            clients: default_clients(),
            lang: default_lang(),
            retry: RetryPolicy::default(),
            cipher_cache_ttl_secs: default_cipher_ttl_secs(),
            response_cache_ttl_secs: default_response_ttl_secs(),
            local_address: None,
        }
    }
}

/// Which kind of streams a format filter keeps.
#[derive(Clone, Default)]
pub enum FormatFilter {
    /// Keep every format that carries a playable URL.
    #[default]
    All,
    /// Combined audio+video streams only.
    AudioAndVideo,
    /// Anything with a video track.
    Video,
    /// Video-only (adaptive) streams.
    VideoOnly,
    /// Anything with an audio track.
    Audio,
    /// Audio-only (adaptive) streams.
    AudioOnly,
    /// Arbitrary caller predicate.
    Custom(std::sync::Arc<dyn Fn(&Format) -> bool + Send + Sync>),
}

impl std::fmt::Debug for FormatFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::All => write!(f, "All"),
            Self::AudioAndVideo => write!(f, "AudioAndVideo"),
            Self::Video => write!(f, "Video"),
            Self::VideoOnly => write!(f, "VideoOnly"),
            Self::Audio => write!(f, "Audio"),
            Self::AudioOnly => write!(f, "AudioOnly"),
            Self::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

/// Requested quality mode for `choose_format`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Quality {
    Highest,
    Lowest,
    HighestAudio,
    LowestAudio,
    HighestVideo,
    LowestVideo,
    /// A specific itag.
    Itag(u32),
    /// Ordered preference list of itags; first match wins.
    ItagList(Vec<u32>),
}

impl Default for Quality {
    fn default() -> Self {
        Self::Highest
    }
}

/// Explicit byte range for non-chunked progressive downloads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ByteRange {
    pub start: Option<u64>,
    pub end: Option<u64>,
}

/// Options for `download` / `download_from_info`.
#[derive(Debug, Clone, Default)]
pub struct DownloadOptions {
    pub resolve: Options,
    pub quality: Quality,
    pub filter: FormatFilter,
    /// A pre-chosen format; passes through unchanged when it carries a URL.
    pub format: Option<Format>,
    /// Caller byte range, honored on single-request downloads.
    pub range: Option<ByteRange>,
    /// Chunk size for adaptive formats. `0` disables chunking.
    /// Defaults to 10 MiB when unset.
    pub chunk_size: Option<u64>,
    /// Relative start offset for live streams, in milliseconds.
    pub begin_ms: Option<u64>,
    /// Read-ahead bound (number of segments) for live playlists.
    pub live_buffer: Option<usize>,
}

pub const DEFAULT_CHUNK_SIZE: u64 = 10 * 1024 * 1024;
pub const DEFAULT_LIVE_BUFFER: usize = 4;
