use serde_json::Value;

pub mod itags;
pub mod pipeline;

pub use pipeline::{choose_format, filter_formats, sort_formats};

/// One stream descriptor, normalized from whichever client profile or
/// manifest produced it.
///
/// Invariant: once resolution completes, `url` is an absolute playable URL
/// and `signature_cipher` is cleared.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Format {
    pub itag: u32,
    pub url: Option<String>,
    pub signature_cipher: Option<String>,
    pub mime_type: Option<String>,
    /// Container short name parsed from the MIME type (mp4, webm, ts, …).
    pub container: Option<String>,
    pub codecs: Option<String>,
    pub video_codec: Option<String>,
    pub audio_codec: Option<String>,
    /// Peak bitrate, bits per second.
    pub bitrate: Option<u64>,
    pub average_bitrate: Option<u64>,
    /// Audio bitrate in kbps, backfilled when the response omits it.
    pub audio_bitrate: Option<u64>,
    pub audio_sample_rate: Option<u64>,
    pub audio_quality: Option<String>,
    pub quality: Option<String>,
    pub quality_label: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub fps: Option<u32>,
    pub content_length: Option<u64>,
    pub approx_duration_ms: Option<u64>,
    pub has_video: bool,
    pub has_audio: bool,
    pub is_live: bool,
    pub is_hls: bool,
    pub is_dash_mpd: bool,
}

impl Format {
    /// Build a format from one entry of a player response's
    /// `streamingData.formats` / `adaptiveFormats` arrays.
    pub fn from_value(v: &Value) -> Option<Self> {
        let itag = v.get("itag").and_then(Value::as_u64)? as u32;

        let mut f = Format {
            itag,
            url: str_field(v, "url"),
            signature_cipher: str_field(v, "signatureCipher").or_else(|| str_field(v, "cipher")),
            mime_type: str_field(v, "mimeType"),
            bitrate: u64_field(v, "bitrate"),
            average_bitrate: u64_field(v, "averageBitrate"),
            audio_sample_rate: u64_field(v, "audioSampleRate"),
            audio_quality: str_field(v, "audioQuality"),
            quality: str_field(v, "quality"),
            quality_label: str_field(v, "qualityLabel"),
            width: u64_field(v, "width").map(|w| w as u32),
            height: u64_field(v, "height").map(|h| h as u32),
            fps: u64_field(v, "fps").map(|f| f as u32),
            content_length: u64_field(v, "contentLength"),
            approx_duration_ms: u64_field(v, "approxDurationMs"),
            ..Default::default()
        };
        f.add_meta();
        Some(f)
    }

    /// Enrich with derived metadata: static per-itag defaults merged under
    /// the live response fields, MIME-derived container/codecs, the
    /// has-video/has-audio booleans, delivery-kind heuristics, and the
    /// audio-bitrate backfill chain.
    pub fn add_meta(&mut self) {
        let profile = itags::lookup(self.itag);

        if let Some(p) = profile {
            if self.quality_label.is_none() {
                self.quality_label = p.quality_label.map(str::to_string);
            }
            if self.container.is_none() {
                self.container = Some(p.container.to_string());
            }
        }

        if let Some(mime) = &self.mime_type {
            let (container, codecs) = parse_mime(mime);
            // Live response fields win over table defaults.
            self.container = container.or(self.container.take());
            if codecs.is_some() {
                self.codecs = codecs;
            }
        }
        if let Some(codecs) = self.codecs.clone() {
            let (video, audio) = split_codecs(&codecs);
            self.video_codec = video;
            self.audio_codec = audio;
        }

        self.has_video = self.quality_label.is_some();

        // Audio bitrate backfill: per-itag table, then estimate from the
        // average bitrate, then a fixed default.
        let expects_audio = self.audio_quality.is_some()
            || self.audio_sample_rate.is_some()
            || self.audio_codec.is_some()
            || profile.map(|p| p.has_audio).unwrap_or(false);
        if self.audio_bitrate.is_none() && expects_audio {
            self.audio_bitrate = profile
                .and_then(|p| p.audio_bitrate)
                .or_else(|| {
                    let avg = self.average_bitrate.or(self.bitrate)?;
                    if self.has_video {
                        Some(avg / 10_000) // ~10% of a/v mux, in kbps
                    } else {
                        Some(avg / 1_000)
                    }
                })
                .or(Some(if self.has_video { 96 } else { 128 }));
        }
        self.has_audio = self.audio_bitrate.is_some();

        if let Some(url) = &self.url {
            self.is_live = url.contains("source/yt_live_broadcast")
                || url.contains("source=yt_live_broadcast");
            self.is_hls =
                url.contains("/manifest/hls_playlist/") || url.contains("/manifest/hls_variant/");
            self.is_dash_mpd = url.contains("/manifest/dash/");
        }
    }

    /// Numeric part of the quality label ("1080p60" -> 1080).
    pub fn quality_label_value(&self) -> Option<u64> {
        let label = self.quality_label.as_deref()?;
        let digits: String = label.chars().take_while(char::is_ascii_digit).collect();
        digits.parse().ok()
    }

    /// Adaptive streams carry exactly one of the two tracks; only those are
    /// eligible for chunked download.
    pub fn is_adaptive(&self) -> bool {
        self.has_video != self.has_audio
    }
}

fn str_field(v: &Value, key: &str) -> Option<String> {
    v.get(key).and_then(Value::as_str).map(str::to_string)
}

/// Numeric fields arrive as numbers or as decimal strings depending on the
/// client profile.
fn u64_field(v: &Value, key: &str) -> Option<u64> {
    let field = v.get(key)?;
    field
        .as_u64()
        .or_else(|| field.as_str().and_then(|s| s.parse().ok()))
}

/// `video/mp4; codecs="avc1.42001E, mp4a.40.2"` -> (mp4, codec list).
fn parse_mime(mime: &str) -> (Option<String>, Option<String>) {
    let mut parts = mime.splitn(2, ';');
    let essence = parts.next().unwrap_or("").trim();
    let container = essence.split('/').nth(1).map(|c| match c {
        "3gpp" => "3gp".to_string(),
        other => other.to_string(),
    });

    let codecs = parts.next().and_then(|params| {
        let params = params.trim();
        let raw = params.strip_prefix("codecs=")?;
        Some(raw.trim_matches('"').to_string())
    });

    (container, codecs)
}

const VIDEO_CODEC_FAMILIES: &[&str] = &["av01", "vp9", "vp09", "vp8", "avc1", "h264", "mp4v"];
const AUDIO_CODEC_FAMILIES: &[&str] = &["opus", "mp4a", "vorbis", "ec-3", "ac-3"];

fn split_codecs(codecs: &str) -> (Option<String>, Option<String>) {
    let mut video = None;
    let mut audio = None;
    for codec in codecs.split(',').map(str::trim) {
        if video.is_none() && VIDEO_CODEC_FAMILIES.iter().any(|f| codec.starts_with(f)) {
            video = Some(codec.to_string());
        } else if audio.is_none() && AUDIO_CODEC_FAMILIES.iter().any(|f| codec.starts_with(f)) {
            audio = Some(codec.to_string());
        }
    }
    (video, audio)
}

/// Preference rank of a codec within its family table; lower is better,
/// unknown codecs rank last.
pub(crate) fn video_codec_rank(codec: Option<&str>) -> usize {
    codec_rank(codec, VIDEO_CODEC_FAMILIES)
}

pub(crate) fn audio_codec_rank(codec: Option<&str>) -> usize {
    codec_rank(codec, AUDIO_CODEC_FAMILIES)
}

fn codec_rank(codec: Option<&str>, table: &[&str]) -> usize {
    match codec {
        Some(c) => table
            .iter()
            .position(|f| c.starts_with(f))
            .unwrap_or(table.len()),
        None => table.len(),
    }
}
