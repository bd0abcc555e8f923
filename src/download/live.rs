use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{Download, Progress, FETCH_TIMEOUT};
use crate::{
    error::{Error, Result},
    formats::Format,
    manifest::dash::{attr, tags},
    options::{RetryPolicy, DEFAULT_LIVE_BUFFER},
};

/// One entry of a media playlist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Segment {
    pub seq: u64,
    pub url: String,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct MediaPlaylist {
    pub target_duration: Duration,
    /// Initialization segment, delivered once before the first media segment.
    pub init: Option<String>,
    pub segments: Vec<Segment>,
    /// The stream is finished or post-live; no further refreshes.
    pub ended: bool,
}

/// Parse the media manifest for `format`, dispatching on its kind.
pub(crate) fn parse_playlist(text: &str, base_url: &str, dash: bool) -> MediaPlaylist {
    if dash {
        parse_dash_playlist(text, base_url)
    } else {
        parse_media_playlist(text, base_url)
    }
}

/// Parse an m3u8 media playlist into its segment list. Master playlists
/// never reach this path; variant selection happened during resolution.
pub(crate) fn parse_media_playlist(text: &str, base_url: &str) -> MediaPlaylist {
    let lines: Vec<&str> = text.lines().map(str::trim).collect();

    let mut target_duration = Duration::from_secs(5);
    let mut seq = 0u64;
    let mut segments = Vec::new();
    let mut ended = false;
    let mut pending_duration_ms: Option<u64> = None;

    for line in lines {
        if let Some(rest) = line.strip_prefix("#EXT-X-TARGETDURATION:") {
            if let Ok(secs) = rest.trim().parse::<u64>() {
                target_duration = Duration::from_secs(secs);
            }
        } else if let Some(rest) = line.strip_prefix("#EXT-X-MEDIA-SEQUENCE:") {
            if let Ok(n) = rest.trim().parse::<u64>() {
                seq = n;
            }
        } else if let Some(rest) = line.strip_prefix("#EXTINF:") {
            pending_duration_ms = rest
                .split(',')
                .next()
                .and_then(|d| d.trim().parse::<f64>().ok())
                .map(|d| (d * 1_000.0) as u64);
        } else if line == "#EXT-X-ENDLIST" {
            ended = true;
        } else if !line.is_empty() && !line.starts_with('#') {
            segments.push(Segment {
                seq,
                url: resolve_url(base_url, line),
                duration_ms: pending_duration_ms.take().unwrap_or(0),
            });
            seq += 1;
        }
    }

    MediaPlaylist {
        target_duration,
        init: None,
        segments,
        ended,
    }
}

/// Parse a DASH media manifest into the same segment list shape.
///
/// Understands the segment-list subset the platform serves for live and
/// post-live: `SegmentList` numbering/timescale, `SegmentTimeline` `S`
/// durations, `Initialization` and `SegmentURL` references. A `static`
/// presentation is final; `dynamic` keeps refreshing.
pub(crate) fn parse_dash_playlist(xml: &str, base_url: &str) -> MediaPlaylist {
    let mut seq = 0u64;
    let mut timescale = 1_000u64;
    let mut init = None;
    let mut durations: Vec<u64> = Vec::new();
    let mut segments = Vec::new();
    let mut ended = false;

    for tag in tags(xml) {
        if let Some(body) = tag.strip_prefix("MPD") {
            ended = attr(body, "type").as_deref() != Some("dynamic");
        } else if let Some(body) = tag.strip_prefix("SegmentList") {
            if let Some(n) = attr(body, "startNumber").and_then(|v| v.parse().ok()) {
                seq = n;
            }
            if let Some(t) = attr(body, "timescale").and_then(|v| v.parse().ok()) {
                timescale = t;
            }
        } else if let Some(body) = tag.strip_prefix("Initialization") {
            init = attr(body, "sourceURL").map(|u| resolve_url(base_url, &u));
        } else if let Some(body) = tag.strip_prefix("S ").or_else(|| tag.strip_prefix("S/")) {
            if let Some(d) = attr(body, "d").and_then(|v| v.parse::<u64>().ok()) {
                let repeats = attr(body, "r")
                    .and_then(|v| v.parse::<u64>().ok())
                    .unwrap_or(0);
                for _ in 0..=repeats {
                    durations.push(d.saturating_mul(1_000) / timescale.max(1));
                }
            }
        } else if let Some(body) = tag.strip_prefix("SegmentURL") {
            if let Some(media) = attr(body, "media") {
                let duration_ms = durations.get(segments.len()).copied().unwrap_or(0);
                segments.push(Segment {
                    seq,
                    url: resolve_url(base_url, &media),
                    duration_ms,
                });
                seq += 1;
            }
        }
    }

    let target_duration = segments
        .iter()
        .map(|s| s.duration_ms)
        .max()
        .filter(|ms| *ms > 0)
        .map(Duration::from_millis)
        .unwrap_or(Duration::from_secs(5));

    MediaPlaylist {
        target_duration,
        init,
        segments,
        ended,
    }
}

fn resolve_url(base: &str, reference: &str) -> String {
    if reference.starts_with("http") {
        return reference.to_string();
    }
    match base.rfind('/') {
        Some(pos) => format!("{}/{}", &base[..pos], reference),
        None => reference.to_string(),
    }
}

/// First sequence number to consume.
///
/// A caller-supplied begin offset counts from the start of the playlist
/// window; otherwise consumption starts `live_buffer` segments behind the
/// live edge so playback has read-ahead.
pub(crate) fn start_sequence(
    playlist: &MediaPlaylist,
    begin_ms: Option<u64>,
    live_buffer: usize,
) -> u64 {
    let Some(first) = playlist.segments.first() else {
        return 0;
    };
    let last = playlist.segments.last().unwrap_or(first);

    if let Some(begin_ms) = begin_ms {
        let mut elapsed = 0u64;
        for segment in &playlist.segments {
            if elapsed + segment.duration_ms > begin_ms {
                return segment.seq;
            }
            elapsed += segment.duration_ms;
        }
        return last.seq;
    }

    let behind = (live_buffer as u64).min(playlist.segments.len() as u64 - 1);
    last.seq - behind
}

/// Start consuming a live/post-live playlist format.
pub(crate) fn start_live_download(
    http: Arc<reqwest::Client>,
    format: Format,
    begin_ms: Option<u64>,
    live_buffer: Option<usize>,
    retry: RetryPolicy,
) -> Result<Download> {
    let url = format
        .url
        .clone()
        .ok_or_else(|| Error::FormatNotFound(format!("itag {} has no url", format.itag)))?;

    let (byte_tx, byte_rx) = flume::unbounded();
    let (progress_tx, progress_rx) = flume::unbounded();
    let (done_tx, done_rx) = flume::bounded(1);
    let cancel = CancellationToken::new();

    let worker = LiveWorker {
        http,
        playlist_url: url,
        dash: format.is_dash_mpd,
        retry,
        byte_tx,
        progress_tx,
        done_tx,
        cancel: cancel.clone(),
    };
    tokio::spawn(worker.run(begin_ms, live_buffer.unwrap_or(DEFAULT_LIVE_BUFFER)));

    Ok(Download {
        format,
        bytes: byte_rx,
        progress: progress_rx,
        done: done_rx,
        cancel,
    })
}

struct LiveWorker {
    http: Arc<reqwest::Client>,
    playlist_url: String,
    dash: bool,
    retry: RetryPolicy,
    byte_tx: flume::Sender<Bytes>,
    progress_tx: flume::Sender<Progress>,
    done_tx: flume::Sender<Result<()>>,
    cancel: CancellationToken,
}

impl LiveWorker {
    async fn run(self, begin_ms: Option<u64>, live_buffer: usize) {
        let res = self.consume(begin_ms, live_buffer).await;
        if !self.cancel.is_cancelled() {
            let _ = self.done_tx.send(res);
        }
    }

    async fn consume(&self, begin_ms: Option<u64>, live_buffer: usize) -> Result<()> {
        let mut next_seq: Option<u64> = None;
        let mut downloaded = 0u64;

        loop {
            if self.cancel.is_cancelled() {
                return Err(Error::Destroyed);
            }

            let body = self.fetch_with_retry(&self.playlist_url).await?;
            let text = String::from_utf8_lossy(&body);
            let playlist = parse_playlist(&text, &self.playlist_url, self.dash);

            if next_seq.is_none() {
                if let Some(init_url) = &playlist.init {
                    let bytes = self.fetch_with_retry(init_url).await?;
                    let chunk = bytes.len() as u64;
                    downloaded += chunk;
                    if self.byte_tx.send(bytes).is_err() {
                        return Ok(());
                    }
                    let _ = self.progress_tx.send(Progress {
                        chunk,
                        downloaded,
                        total: None,
                        segment: None,
                        segments_known: None,
                    });
                }
            }

            let start = *next_seq
                .get_or_insert_with(|| start_sequence(&playlist, begin_ms, live_buffer));
            let segments_known = playlist.segments.last().map(|s| s.seq + 1);

            let mut advanced = false;
            for segment in playlist.segments.iter().filter(|s| s.seq >= start) {
                if self.cancel.is_cancelled() {
                    return Err(Error::Destroyed);
                }
                let bytes = self.fetch_with_retry(&segment.url).await?;
                let chunk = bytes.len() as u64;
                downloaded += chunk;
                if self.byte_tx.send(bytes).is_err() {
                    return Ok(());
                }
                let _ = self.progress_tx.send(Progress {
                    chunk,
                    downloaded,
                    total: None,
                    segment: Some(segment.seq),
                    segments_known,
                });
                next_seq = Some(segment.seq + 1);
                advanced = true;
            }

            if playlist.ended {
                debug!(url = %self.playlist_url, "playlist ended");
                return Ok(());
            }

            // Half the target duration keeps refreshes ahead of segment
            // production without hammering the playlist endpoint.
            let wait = if advanced {
                playlist.target_duration / 2
            } else {
                playlist.target_duration
            };
            tokio::select! {
                _ = self.cancel.cancelled() => return Err(Error::Destroyed),
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }

    async fn fetch_with_retry(&self, url: &str) -> Result<Bytes> {
        let mut attempt = 0;
        loop {
            let sent = tokio::select! {
                _ = self.cancel.cancelled() => return Err(Error::Destroyed),
                sent = self.http.get(url).timeout(FETCH_TIMEOUT).send() => sent,
            };

            let failure = match sent {
                Ok(res) if res.status().is_success() => match res.bytes().await {
                    Ok(bytes) => return Ok(bytes),
                    Err(e) => {
                        debug!(error = %e, url, attempt, "segment body read failed");
                        Error::Http(e)
                    }
                },
                Ok(res) if res.status().is_server_error() => {
                    debug!(status = %res.status(), url, attempt, "segment fetch 5xx");
                    Error::RetriesExhausted {
                        status: res.status().as_u16(),
                        attempts: attempt + 1,
                    }
                }
                Ok(res) => {
                    warn!(status = %res.status(), url, "segment fetch rejected");
                    return match res.error_for_status() {
                        Ok(res) => Err(Error::BadResponse(format!(
                            "segment fetch returned status {}",
                            res.status()
                        ))),
                        Err(e) => Err(e.into()),
                    };
                }
                Err(e) => {
                    debug!(error = %e, url, attempt, "segment fetch transport error");
                    Error::Http(e)
                }
            };

            if attempt >= self.retry.max_retries {
                return Err(failure);
            }
            tokio::select! {
                _ = self.cancel.cancelled() => return Err(Error::Destroyed),
                _ = tokio::time::sleep(self.retry.delay(attempt)) => {}
            }
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PLAYLIST: &str = "#EXTM3U\n\
#EXT-X-TARGETDURATION:5\n\
#EXT-X-MEDIA-SEQUENCE:100\n\
#EXTINF:5.000,\n\
seg100.ts\n\
#EXTINF:5.000,\n\
seg101.ts\n\
#EXTINF:4.500,\n\
https://cdn.example/seg102.ts\n";

    const DASH: &str = r#"<?xml version="1.0"?>
<MPD type="dynamic" minimumUpdatePeriod="PT5S">
  <Period>
    <AdaptationSet mimeType="video/mp4">
      <Representation id="136" bandwidth="2000000">
        <SegmentList timescale="90000" startNumber="3200">
          <Initialization sourceURL="init.mp4"/>
          <SegmentTimeline>
            <S d="450000"/>
            <S d="450000" r="1"/>
          </SegmentTimeline>
          <SegmentURL media="sq/3200"/>
          <SegmentURL media="sq/3201"/>
          <SegmentURL media="sq/3202"/>
        </SegmentList>
      </Representation>
    </AdaptationSet>
  </Period>
</MPD>"#;

    #[test]
    fn parses_media_playlist() {
        let p = parse_media_playlist(PLAYLIST, "https://host/live/index.m3u8");
        assert_eq!(p.target_duration, Duration::from_secs(5));
        assert!(!p.ended);
        assert_eq!(p.segments.len(), 3);
        assert_eq!(p.segments[0].seq, 100);
        assert_eq!(p.segments[0].url, "https://host/live/seg100.ts");
        assert_eq!(p.segments[2].seq, 102);
        // Absolute segment URLs pass through.
        assert_eq!(p.segments[2].url, "https://cdn.example/seg102.ts");
        assert_eq!(p.segments[2].duration_ms, 4_500);
    }

    #[test]
    fn detects_endlist() {
        let text = format!("{}#EXT-X-ENDLIST\n", PLAYLIST);
        let p = parse_media_playlist(&text, "https://host/live/index.m3u8");
        assert!(p.ended);
    }

    #[test]
    fn parses_dash_media_manifest() {
        let p = parse_dash_playlist(DASH, "https://host/api/manifest/dash/x");
        assert!(!p.ended);
        assert_eq!(p.init.as_deref(), Some("https://host/api/manifest/dash/init.mp4"));
        assert_eq!(p.segments.len(), 3);
        assert_eq!(p.segments[0].seq, 3200);
        assert_eq!(p.segments[0].url, "https://host/api/manifest/dash/sq/3200");
        assert_eq!(p.segments[2].seq, 3202);
        // 450000 ticks at timescale 90000 is 5 s per segment.
        assert_eq!(p.segments[0].duration_ms, 5_000);
        assert_eq!(p.target_duration, Duration::from_secs(5));
    }

    #[test]
    fn static_dash_manifest_is_final() {
        let text = DASH.replace("type=\"dynamic\"", "type=\"static\"");
        assert!(parse_dash_playlist(&text, "https://host/m").ended);
    }

    #[test]
    fn dash_manifests_are_not_scanned_line_wise() {
        // Dispatch on the manifest kind: XML bodies must yield only the
        // referenced segment URLs, never raw manifest lines.
        let p = parse_playlist(DASH, "https://host/api/manifest/dash/x", true);
        assert_eq!(p.segments.len(), 3);
        for segment in &p.segments {
            assert!(!segment.url.contains('<'), "{}", segment.url);
        }

        let hls = parse_playlist(PLAYLIST, "https://host/live/index.m3u8", false);
        assert_eq!(hls.segments.len(), 3);
    }

    #[test]
    fn start_sequence_trails_live_edge() {
        let p = parse_media_playlist(PLAYLIST, "https://host/live/index.m3u8");
        assert_eq!(start_sequence(&p, None, 2), 100);
        assert_eq!(start_sequence(&p, None, 1), 101);
        // A buffer larger than the window clamps to the first segment.
        assert_eq!(start_sequence(&p, None, 50), 100);
    }

    #[test]
    fn start_sequence_resolves_begin_offset() {
        let p = parse_media_playlist(PLAYLIST, "https://host/live/index.m3u8");
        assert_eq!(start_sequence(&p, Some(0), 2), 100);
        assert_eq!(start_sequence(&p, Some(6_000), 2), 101);
        // Past the end of the window lands on the last segment.
        assert_eq!(start_sequence(&p, Some(60_000), 2), 102);
    }

    #[test]
    fn empty_playlist_starts_at_zero() {
        let p = parse_media_playlist("#EXTM3U\n", "https://host/live/index.m3u8");
        assert_eq!(start_sequence(&p, None, 4), 0);
    }
}
