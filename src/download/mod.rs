use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    error::{Error, Result},
    formats::Format,
    options::{ByteRange, RetryPolicy, DEFAULT_CHUNK_SIZE},
};

pub mod live;

/// Timeout on each individual range request to keep a stalled CDN edge from
/// hanging the whole download.
const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// One progress tick, emitted after each delivered chunk or segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    /// Bytes in the chunk just delivered.
    pub chunk: u64,
    /// Total bytes delivered so far.
    pub downloaded: u64,
    /// Total expected bytes, when the server disclosed them.
    pub total: Option<u64>,
    /// Playlist sequence number of the delivered segment (live only).
    pub segment: Option<u64>,
    /// Segments known to exist so far (live only; grows as the playlist
    /// refreshes).
    pub segments_known: Option<u64>,
}

/// Handle to an in-flight download.
///
/// Bytes and progress arrive on separate channels so a consumer that only
/// wants the payload never blocks on progress bookkeeping. Dropping the
/// handle cancels the transfer.
pub struct Download {
    format: Format,
    bytes: flume::Receiver<Bytes>,
    progress: flume::Receiver<Progress>,
    done: flume::Receiver<Result<()>>,
    cancel: CancellationToken,
}

impl Download {
    /// The format this download is streaming.
    pub fn format(&self) -> &Format {
        &self.format
    }

    /// Receive the next chunk of payload. `None` once the transfer finished,
    /// failed or was destroyed; [`Download::finished`] tells which.
    pub async fn recv(&self) -> Option<Bytes> {
        self.bytes.recv_async().await.ok()
    }

    pub fn progress(&self) -> &flume::Receiver<Progress> {
        &self.progress
    }

    /// Wait for the terminal status of the transfer: `Ok(())` when the byte
    /// stream ran to completion, the failure that truncated it otherwise,
    /// [`Error::Destroyed`] after [`Download::destroy`]. Resolves once.
    pub async fn finished(&self) -> Result<()> {
        match self.done.recv_async().await {
            Ok(res) => res,
            Err(_) if self.is_destroyed() => Err(Error::Destroyed),
            Err(_) => Ok(()),
        }
    }

    /// Stop the transfer. No further bytes or progress events are emitted.
    pub fn destroy(&self) {
        self.cancel.cancel();
    }

    pub fn is_destroyed(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Drop for Download {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Plan for how a format gets fetched.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum FetchPlan {
    /// One request, optionally with a caller-supplied byte range.
    Single(Option<ByteRange>),
    /// Sequential ranged chunks of the given size.
    Chunked(u64),
    /// Segmented playlist consumption (live streams).
    Playlist,
}

/// Chunking only applies to adaptive (single-track) formats with a finite
/// length; live and manifest-backed formats go through the playlist path,
/// everything else is one request.
pub(crate) fn fetch_plan(format: &Format, chunk_size: u64, range: Option<ByteRange>) -> FetchPlan {
    if format.is_live || format.is_hls {
        return FetchPlan::Playlist;
    }
    if format.is_adaptive() && chunk_size > 0 && range.is_none() {
        return FetchPlan::Chunked(chunk_size);
    }
    FetchPlan::Single(range)
}

/// Inclusive byte window for the chunk starting at `offset`, clamped to the
/// total length when known. `None` once the offset is past the end.
pub(crate) fn chunk_window(offset: u64, chunk_size: u64, total: Option<u64>) -> Option<(u64, u64)> {
    if let Some(total) = total {
        if offset >= total {
            return None;
        }
        Some((offset, (offset + chunk_size - 1).min(total - 1)))
    } else {
        Some((offset, offset + chunk_size - 1))
    }
}

/// Total length from a `Content-Range: bytes 0-9/12345` header.
pub(crate) fn content_range_total(header: &str) -> Option<u64> {
    header.rsplit('/').next()?.parse().ok()
}

fn range_header(range: &ByteRange) -> String {
    match (range.start, range.end) {
        (Some(s), Some(e)) => format!("bytes={}-{}", s, e),
        (Some(s), None) => format!("bytes={}-", s),
        (None, Some(e)) => format!("bytes=0-{}", e),
        (None, None) => "bytes=0-".to_string(),
    }
}

/// Start streaming `format` and return the handle.
///
/// `chunk_size` of 0 disables chunking. Live formats are rejected here;
/// they go through [`live::start_live_download`].
pub(crate) fn start_download(
    http: Arc<reqwest::Client>,
    format: Format,
    chunk_size: Option<u64>,
    range: Option<ByteRange>,
    retry: RetryPolicy,
) -> Result<Download> {
    let url = format
        .url
        .clone()
        .ok_or_else(|| Error::FormatNotFound(format!("itag {} has no url", format.itag)))?;

    let plan = fetch_plan(&format, chunk_size.unwrap_or(DEFAULT_CHUNK_SIZE), range);
    let (byte_tx, byte_rx) = flume::unbounded();
    let (progress_tx, progress_rx) = flume::unbounded();
    let (done_tx, done_rx) = flume::bounded(1);
    let cancel = CancellationToken::new();

    let worker = Worker {
        http,
        url,
        retry,
        byte_tx,
        progress_tx,
        done_tx,
        cancel: cancel.clone(),
    };
    match plan {
        FetchPlan::Single(range) => {
            tokio::spawn(worker.run_single(range));
        }
        FetchPlan::Chunked(size) => {
            tokio::spawn(worker.run_chunked(size, format.content_length));
        }
        FetchPlan::Playlist => {
            return Err(Error::FormatNotFound(format!(
                "itag {} is a live/playlist format",
                format.itag
            )));
        }
    }

    Ok(Download {
        format,
        bytes: byte_rx,
        progress: progress_rx,
        done: done_rx,
        cancel,
    })
}

struct Worker {
    http: Arc<reqwest::Client>,
    url: String,
    retry: RetryPolicy,
    byte_tx: flume::Sender<Bytes>,
    progress_tx: flume::Sender<Progress>,
    done_tx: flume::Sender<Result<()>>,
    cancel: CancellationToken,
}

impl Worker {
    async fn run_single(self, range: Option<ByteRange>) {
        let res = self.single(range).await;
        self.finish(res);
    }

    async fn run_chunked(self, chunk_size: u64, known_length: Option<u64>) {
        let res = self.chunked(chunk_size, known_length).await;
        self.finish(res);
    }

    /// Publish the terminal status, unless the caller destroyed the
    /// download (no events after destruction).
    fn finish(&self, res: Result<()>) {
        if let Err(e) = &res {
            warn!(error = %e, url = %self.url, "download failed");
        }
        if !self.cancel.is_cancelled() {
            let _ = self.done_tx.send(res);
        }
    }

    async fn single(&self, range: Option<ByteRange>) -> Result<()> {
        let mut downloaded = 0u64;

        let mut req = self.http.get(&self.url);
        if let Some(range) = &range {
            req = req.header("Range", range_header(range));
        }

        let res = tokio::select! {
            _ = self.cancel.cancelled() => return Err(Error::Destroyed),
            res = req.send() => res,
        };
        let mut res = res.and_then(|r| r.error_for_status())?;
        let total = res.content_length();

        loop {
            let chunk = tokio::select! {
                _ = self.cancel.cancelled() => return Err(Error::Destroyed),
                chunk = res.chunk() => chunk,
            };
            match chunk {
                Ok(Some(bytes)) => {
                    if !self.deliver(bytes, &mut downloaded, total) {
                        return Ok(());
                    }
                }
                Ok(None) => return Ok(()),
                Err(e) => {
                    debug!(error = %e, downloaded, "download stream broke");
                    return Err(e.into());
                }
            }
        }
    }

    /// Sequential ranged chunks. The first response's Content-Range settles
    /// the total length when the format metadata did not carry one.
    async fn chunked(&self, chunk_size: u64, known_length: Option<u64>) -> Result<()> {
        let mut offset = 0u64;
        let mut total = known_length.filter(|l| *l > 0);
        let mut downloaded = 0u64;

        while let Some((start, end)) = chunk_window(offset, chunk_size, total) {
            if self.cancel.is_cancelled() {
                return Err(Error::Destroyed);
            }

            let res = self.fetch_chunk(start, end).await?;

            if total.is_none() {
                total = res
                    .headers()
                    .get(reqwest::header::CONTENT_RANGE)
                    .and_then(|v| v.to_str().ok())
                    .and_then(content_range_total);
            }

            let body = tokio::select! {
                _ = self.cancel.cancelled() => return Err(Error::Destroyed),
                body = res.bytes() => body,
            };
            let bytes = match body {
                Ok(bytes) => bytes,
                Err(e) => {
                    debug!(error = %e, offset, "chunk body read failed");
                    return Err(e.into());
                }
            };

            // A short or empty chunk means the stream is exhausted even if
            // the server never disclosed a total.
            let len = bytes.len() as u64;
            if len == 0 {
                return Ok(());
            }
            let exhausted = total.is_none() && len < end - start + 1;

            if !self.deliver(bytes, &mut downloaded, total) {
                return Ok(());
            }
            if exhausted {
                return Ok(());
            }
            offset += len;
        }
        Ok(())
    }

    /// One ranged request with bounded retries on transport errors and 5xx.
    /// Exhausted retries surface the last failure with its status context.
    async fn fetch_chunk(&self, start: u64, end: u64) -> Result<reqwest::Response> {
        let range = format!("bytes={}-{}", start, end);
        let mut attempt = 0;
        loop {
            let sent = tokio::select! {
                _ = self.cancel.cancelled() => return Err(Error::Destroyed),
                sent = self
                    .http
                    .get(&self.url)
                    .header("Range", &range)
                    .header("Accept", "*/*")
                    .timeout(FETCH_TIMEOUT)
                    .send() => sent,
            };

            let failure = match sent {
                Ok(res) if res.status().is_success() => return Ok(res),
                Ok(res) if res.status().is_server_error() => {
                    debug!(status = %res.status(), start, attempt, "chunk fetch 5xx");
                    Error::RetriesExhausted {
                        status: res.status().as_u16(),
                        attempts: attempt + 1,
                    }
                }
                Ok(res) => {
                    warn!(status = %res.status(), start, "chunk fetch rejected");
                    return match res.error_for_status() {
                        Ok(res) => Err(Error::BadResponse(format!(
                            "chunk fetch returned status {}",
                            res.status()
                        ))),
                        Err(e) => Err(e.into()),
                    };
                }
                Err(e) => {
                    debug!(error = %e, start, attempt, "chunk fetch transport error");
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

    /// Push a chunk and its progress tick; false when the consumer is gone
    /// or the download was destroyed.
    fn deliver(&self, bytes: Bytes, downloaded: &mut u64, total: Option<u64>) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        let chunk = bytes.len() as u64;
        *downloaded += chunk;
        if self.byte_tx.send(bytes).is_err() {
            return false;
        }
        let _ = self.progress_tx.send(Progress {
            chunk,
            downloaded: *downloaded,
            total,
            segment: None,
            segments_known: None,
        });
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_windows_cover_range_without_gaps() {
        let total = 25u64;
        let chunk = 10u64;
        let mut offset = 0;
        let mut windows = Vec::new();
        while let Some((s, e)) = chunk_window(offset, chunk, Some(total)) {
            windows.push((s, e));
            offset = e + 1;
        }

        assert_eq!(windows, vec![(0, 9), (10, 19), (20, 24)]);
        // Contiguous, inside bounds, non-empty.
        for pair in windows.windows(2) {
            assert_eq!(pair[0].1 + 1, pair[1].0);
        }
        for (s, e) in &windows {
            assert!(e >= s);
            assert!(*e < total);
        }
        assert_eq!(windows.last().unwrap().1, total - 1);
    }

    #[test]
    fn chunk_window_exact_multiple() {
        assert_eq!(chunk_window(0, 10, Some(20)), Some((0, 9)));
        assert_eq!(chunk_window(10, 10, Some(20)), Some((10, 19)));
        assert_eq!(chunk_window(20, 10, Some(20)), None);
    }

    #[test]
    fn chunk_window_without_total_is_open_ended() {
        assert_eq!(chunk_window(30, 10, None), Some((30, 39)));
    }

    #[test]
    fn parses_content_range_total() {
        assert_eq!(content_range_total("bytes 0-9/12345"), Some(12_345));
        assert_eq!(content_range_total("bytes 0-9/*"), None);
    }

    #[test]
    fn plan_chunks_only_adaptive_formats() {
        let adaptive = Format {
            has_audio: true,
            ..Default::default()
        };
        let muxed = Format {
            has_audio: true,
            has_video: true,
            quality_label: Some("360p".into()),
            ..Default::default()
        };
        let live = Format {
            has_audio: true,
            is_live: true,
            ..Default::default()
        };

        assert_eq!(fetch_plan(&adaptive, 10, None), FetchPlan::Chunked(10));
        assert_eq!(fetch_plan(&adaptive, 0, None), FetchPlan::Single(None));
        assert_eq!(fetch_plan(&muxed, 10, None), FetchPlan::Single(None));
        assert_eq!(fetch_plan(&live, 10, None), FetchPlan::Playlist);
    }

    #[test]
    fn explicit_range_disables_chunking() {
        let adaptive = Format {
            has_audio: true,
            ..Default::default()
        };
        let range = ByteRange {
            start: Some(100),
            end: Some(200),
        };
        assert_eq!(fetch_plan(&adaptive, 10, Some(range)), FetchPlan::Single(Some(range)));
    }

    #[test]
    fn range_header_shapes() {
        let full = ByteRange {
            start: Some(5),
            end: Some(10),
        };
        let open = ByteRange {
            start: Some(5),
            end: None,
        };
        assert_eq!(range_header(&full), "bytes=5-10");
        assert_eq!(range_header(&open), "bytes=5-");
    }

    fn test_worker() -> (Worker, flume::Receiver<Bytes>, flume::Receiver<Progress>, flume::Receiver<Result<()>>) {
        let (byte_tx, byte_rx) = flume::unbounded();
        let (progress_tx, progress_rx) = flume::unbounded();
        let (done_tx, done_rx) = flume::bounded(1);
        let worker = Worker {
            http: Arc::new(reqwest::Client::new()),
            url: "https://host/v".to_string(),
            retry: RetryPolicy::default(),
            byte_tx,
            progress_tx,
            done_tx,
            cancel: CancellationToken::new(),
        };
        (worker, byte_rx, progress_rx, done_rx)
    }

    #[tokio::test]
    async fn destroyed_download_emits_nothing() {
        let (worker, byte_rx, progress_rx, done_rx) = test_worker();

        worker.cancel.cancel();
        let mut downloaded = 0;
        assert!(!worker.deliver(Bytes::from_static(b"abc"), &mut downloaded, None));
        worker.finish(Ok(()));
        assert!(byte_rx.is_empty());
        assert!(progress_rx.is_empty());
        assert!(done_rx.is_empty());
    }

    #[tokio::test]
    async fn terminal_failure_is_surfaced() {
        let (worker, byte_rx, progress_rx, done_rx) = test_worker();
        let download = Download {
            format: Format::default(),
            bytes: byte_rx,
            progress: progress_rx,
            done: done_rx,
            cancel: worker.cancel.clone(),
        };

        worker.finish(Err(Error::RetriesExhausted {
            status: 503,
            attempts: 4,
        }));
        drop(worker);

        assert!(matches!(
            download.finished().await,
            Err(Error::RetriesExhausted {
                status: 503,
                attempts: 4
            })
        ));
    }

    #[tokio::test]
    async fn destroyed_download_reports_destroyed() {
        let (worker, byte_rx, progress_rx, done_rx) = test_worker();
        let download = Download {
            format: Format::default(),
            bytes: byte_rx,
            progress: progress_rx,
            done: done_rx,
            cancel: worker.cancel.clone(),
        };

        download.destroy();
        worker.finish(Ok(()));
        drop(worker);

        assert!(matches!(download.finished().await, Err(Error::Destroyed)));
    }

    #[tokio::test]
    async fn completed_download_finishes_ok() {
        let (worker, byte_rx, progress_rx, done_rx) = test_worker();
        let download = Download {
            format: Format::default(),
            bytes: byte_rx,
            progress: progress_rx,
            done: done_rx,
            cancel: worker.cancel.clone(),
        };

        worker.finish(Ok(()));
        drop(worker);

        assert!(download.finished().await.is_ok());
    }
}
