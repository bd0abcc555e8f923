use std::{collections::HashSet, sync::Arc, time::Duration};

use futures::future::join_all;
use rand::{distributions::Alphanumeric, Rng};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::{
    cache::TtlCache,
    cipher::{self, CipherManager},
    clients::{self, ClientProfile, INNERTUBE_API},
    error::{Error, Result},
    formats::{pipeline, Format},
    manifest,
    options::Options,
    page::{self, PageFetcher},
};

/// Everything a resolution pass learned about one video.
#[derive(Debug, Clone)]
pub struct VideoInfo {
    pub video_id: String,
    pub title: Option<String>,
    pub author: Option<String>,
    pub channel_id: Option<String>,
    pub duration_ms: Option<u64>,
    pub is_live: bool,
    /// The raw base-profile player response, for callers that need fields
    /// this crate does not model.
    pub player_response: Value,
    pub formats: Vec<Format>,
    /// Head of the ranked format list after full resolution.
    pub best_format: Option<Format>,
    pub player_script_url: Option<String>,
    /// True when the full pipeline ran: device-profile calls, manifests and
    /// deciphering. Basic info leaves format URLs as the page reported them.
    pub full: bool,
}

/// Orchestrates a resolution pass across the watch page and the enabled
/// device profiles, reconciles their format lists and resolves every
/// playable URL.
pub struct MultiClientResolver {
    http: Arc<reqwest::Client>,
    options: Options,
    pages: PageFetcher,
    cipher: CipherManager,
    responses: TtlCache<(&'static str, String, String), Arc<VideoInfo>>,
}

impl MultiClientResolver {
    pub fn new(http: Arc<reqwest::Client>, options: Options) -> Self {
        let response_ttl = Duration::from_secs(options.response_cache_ttl_secs);
        let cipher_ttl = Duration::from_secs(options.cipher_cache_ttl_secs);
        Self {
            pages: PageFetcher::new(http.clone(), response_ttl),
            cipher: CipherManager::new(http.clone(), cipher_ttl),
            responses: TtlCache::new(response_ttl),
            http,
            options,
        }
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Metadata and the raw (possibly ciphered) format list from the watch
    /// page alone. No device-profile calls, no deciphering.
    pub async fn get_basic_info(&self, video_id: &str) -> Result<Arc<VideoInfo>> {
        let key = ("basic", video_id.to_string(), self.options.lang.clone());
        self.responses
            .get_or_compute(key, || self.basic_info(video_id))
            .await
    }

    /// The full pipeline: playability preflight, parallel device-profile
    /// calls, manifest expansion and URL resolution.
    pub async fn get_info(&self, video_id: &str) -> Result<Arc<VideoInfo>> {
        let key = ("full", video_id.to_string(), self.options.lang.clone());
        self.responses
            .get_or_compute(key, || self.full_info(video_id))
            .await
    }

    async fn basic_info(&self, video_id: &str) -> Result<Arc<VideoInfo>> {
        let body = self.pages.watch_page(video_id, &self.options.lang).await?;
        let response = page::embedded_player_response(&body)?;
        check_playability(&response, video_id)?;

        let mut info = base_info(video_id, &response, false);
        info.formats = collect_formats(&response);
        info.player_script_url = page::player_script_url(&body);
        Ok(Arc::new(info))
    }

    async fn full_info(&self, video_id: &str) -> Result<Arc<VideoInfo>> {
        let body = self.pages.watch_page(video_id, &self.options.lang).await?;
        let base_response = page::embedded_player_response(&body)?;

        // Unplayable is final; do not spend device calls on it.
        check_playability(&base_response, video_id)?;

        let script_url = match page::player_script_url(&body) {
            Some(url) => Some(url),
            // Some page variants strip the script reference; the embed page
            // still carries it.
            None => self
                .pages
                .embed_page(video_id)
                .await
                .ok()
                .and_then(|embed| page::player_script_url(&embed)),
        };

        let calls = self
            .options
            .clients
            .iter()
            .map(|kind| self.player_api(clients::profile(*kind), video_id));
        let mut device_responses = Vec::new();
        for (kind, result) in self.options.clients.iter().zip(join_all(calls).await) {
            match result {
                Ok(response) => {
                    if let Err(e) = usable_device_response(&response, video_id) {
                        warn!(client = ?kind, error = %e, "discarding device response");
                        continue;
                    }
                    device_responses.push(response);
                }
                Err(e) => warn!(client = ?kind, error = %e, "device profile call failed"),
            }
        }

        let mut info = base_info(video_id, &base_response, true);
        info.player_script_url = script_url.clone();

        let device_formats = device_responses.iter().map(collect_formats).collect();
        let mut formats = reconcile_formats(collect_formats(&base_response), device_formats);

        // Manifests fetch on their own tasks while deciphering runs here.
        let mut response_refs: Vec<&Value> = device_responses.iter().collect();
        response_refs.push(&base_response);
        let hls_task = manifest_url(&response_refs, "hlsManifestUrl")
            .map(|url| self.spawn_manifest_fetch(url, ManifestKind::Hls));
        let dash_task = manifest_url(&response_refs, "dashManifestUrl")
            .map(|url| self.spawn_manifest_fetch(url, ManifestKind::Dash));

        if let Some(url) = &script_url {
            match self.cipher.get_script(url).await {
                Ok(script) => {
                    for f in &mut formats {
                        cipher::resolve_format(&script, f);
                    }
                }
                Err(e) => warn!(error = %e, "player script unavailable, ciphered formats will be dropped"),
            }
        }

        if let Some(task) = hls_task {
            formats.extend(task.await.unwrap_or_default());
        }
        if let Some(task) = dash_task {
            formats.extend(task.await.unwrap_or_default());
        }

        formats.retain(|f| f.url.is_some());
        if formats.is_empty() {
            return Err(Error::NoUsableFormats(video_id.to_string()));
        }
        pipeline::sort_formats(&mut formats);
        pipeline::dedupe_by_url(&mut formats);

        info.is_live = info.is_live || formats.iter().any(|f| f.is_live);
        info.best_format = formats.first().cloned();
        info.formats = formats;
        Ok(Arc::new(info))
    }

    fn spawn_manifest_fetch(
        &self,
        url: String,
        kind: ManifestKind,
    ) -> tokio::task::JoinHandle<Vec<Format>> {
        let http = self.http.clone();
        tokio::spawn(async move {
            let body = match fetch_text(&http, &url).await {
                Ok(body) => body,
                Err(e) => {
                    warn!(url = %url, error = %e, "manifest fetch failed");
                    return Vec::new();
                }
            };
            match kind {
                ManifestKind::Hls => manifest::hls::parse_hls_master(&body),
                ManifestKind::Dash => manifest::dash::parse_dash_manifest(&body, &url),
            }
        })
    }

    /// One player API call for one device profile, with bounded retries on
    /// transport failures and 5xx responses. Anything else is final.
    async fn player_api(&self, profile: &'static ClientProfile, video_id: &str) -> Result<Value> {
        let url = format!(
            "{}/youtubei/v1/player?prettyPrint=false&t={}&id={}",
            INNERTUBE_API,
            nonce(12),
            video_id
        );
        let body = json!({
            "videoId": video_id,
            "cpn": nonce(16),
            "contentCheckOk": true,
            "racyCheckOk": true,
            "context": profile.build_context(&self.options.lang),
        });

        let retry = &self.options.retry;
        let mut attempt = 0;
        loop {
            let sent = self
                .http
                .post(&url)
                .header("Content-Type", "application/json")
                .header("User-Agent", profile.user_agent)
                .header("X-YouTube-Client-Name", profile.client_id)
                .header("X-YouTube-Client-Version", profile.client_version)
                .header("X-Goog-Api-Format-Version", "2")
                .json(&body)
                .send()
                .await;

            match sent {
                Ok(res) if res.status().is_server_error() => {
                    let status = res.status().as_u16();
                    if attempt >= retry.max_retries {
                        return Err(Error::RetriesExhausted {
                            status,
                            attempts: attempt + 1,
                        });
                    }
                    debug!(client = profile.name, status, attempt, "player API 5xx, backing off");
                    tokio::time::sleep(retry.delay(attempt)).await;
                    attempt += 1;
                }
                Ok(res) => {
                    let res = res.error_for_status()?;
                    return Ok(res.json::<Value>().await?);
                }
                Err(e) => {
                    if attempt >= retry.max_retries {
                        return Err(Error::Http(e));
                    }
                    debug!(client = profile.name, error = %e, attempt, "player API transport error, backing off");
                    tokio::time::sleep(retry.delay(attempt)).await;
                    attempt += 1;
                }
            }
        }
    }
}

enum ManifestKind {
    Hls,
    Dash,
}

async fn fetch_text(http: &reqwest::Client, url: &str) -> Result<String> {
    let res = http.get(url).send().await?.error_for_status()?;
    Ok(res.text().await?)
}

const BLOCKED_STATUSES: &[&str] = &["ERROR", "LOGIN_REQUIRED", "UNPLAYABLE", "LIVE_STREAM_OFFLINE"];

/// Reject responses whose playability status is final before any further
/// network work happens.
pub(crate) fn check_playability(response: &Value, video_id: &str) -> Result<()> {
    let ps = &response["playabilityStatus"];
    let status = ps["status"].as_str().unwrap_or("OK");
    if BLOCKED_STATUSES.contains(&status) {
        let reason = ps["reason"]
            .as_str()
            .or_else(|| ps["messages"][0].as_str())
            .unwrap_or("no reason given");
        return Err(Error::Unplayable {
            video_id: video_id.to_string(),
            status: status.to_string(),
            reason: reason.to_string(),
        });
    }
    Ok(())
}

/// A device response is usable when it is playable and actually describes
/// the requested video. Interstitials and consent redirects answer with a
/// different id; trusting them would resolve someone else's streams.
pub(crate) fn usable_device_response(response: &Value, requested: &str) -> Result<()> {
    check_playability(response, requested)?;
    match response["videoDetails"]["videoId"].as_str() {
        Some(got) if got == requested => Ok(()),
        Some(got) => Err(Error::IdMismatch {
            requested: requested.to_string(),
            got: got.to_string(),
        }),
        None => Err(Error::BadResponse("response carries no video id".to_string())),
    }
}

/// Pull every format out of a player response's streaming data.
pub(crate) fn collect_formats(response: &Value) -> Vec<Format> {
    let sd = &response["streamingData"];
    let mut out = Vec::new();
    for key in ["formats", "adaptiveFormats"] {
        if let Some(arr) = sd[key].as_array() {
            out.extend(arr.iter().filter_map(Format::from_value));
        }
    }
    out
}

/// Merge device-profile format lists, earlier profiles winning per itag.
/// Device formats supersede the page's own list entirely; the page list is
/// only a fallback when every device call failed or returned nothing.
pub(crate) fn reconcile_formats(base: Vec<Format>, device: Vec<Vec<Format>>) -> Vec<Format> {
    let mut seen = HashSet::new();
    let mut merged = Vec::new();
    for formats in device {
        for f in formats {
            if seen.insert(f.itag) {
                merged.push(f);
            }
        }
    }
    if merged.is_empty() {
        base
    } else {
        merged
    }
}

fn manifest_url(responses: &[&Value], key: &str) -> Option<String> {
    responses
        .iter()
        .find_map(|r| r["streamingData"][key].as_str())
        .map(str::to_string)
}

fn base_info(video_id: &str, response: &Value, full: bool) -> VideoInfo {
    let details = &response["videoDetails"];
    let duration_ms = details["lengthSeconds"]
        .as_str()
        .and_then(|s| s.parse::<u64>().ok())
        .or_else(|| details["lengthSeconds"].as_u64())
        .map(|s| s * 1_000);

    VideoInfo {
        video_id: video_id.to_string(),
        title: details["title"].as_str().map(str::to_string),
        author: details["author"].as_str().map(str::to_string),
        channel_id: details["channelId"].as_str().map(str::to_string),
        duration_ms,
        is_live: details["isLive"].as_bool().unwrap_or(false),
        player_response: response.clone(),
        formats: Vec::new(),
        best_format: None,
        player_script_url: None,
        full,
    }
}

// Keeps parallel requests for the same id distinguishable server-side.
fn nonce(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocked_playability_is_unplayable() {
        let response = json!({
            "playabilityStatus": {
                "status": "LOGIN_REQUIRED",
                "reason": "Sign in to confirm your age"
            }
        });
        match check_playability(&response, "vid12345678").unwrap_err() {
            Error::Unplayable { video_id, status, reason } => {
                assert_eq!(video_id, "vid12345678");
                assert_eq!(status, "LOGIN_REQUIRED");
                assert_eq!(reason, "Sign in to confirm your age");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn ok_playability_passes() {
        let response = json!({ "playabilityStatus": { "status": "OK" } });
        assert!(check_playability(&response, "x").is_ok());
    }

    #[test]
    fn missing_playability_passes() {
        assert!(check_playability(&json!({}), "x").is_ok());
    }

    #[test]
    fn mismatched_video_id_is_rejected() {
        let response = json!({
            "playabilityStatus": { "status": "OK" },
            "videoDetails": { "videoId": "other_id_123" }
        });
        match usable_device_response(&response, "wanted_id_12").unwrap_err() {
            Error::IdMismatch { requested, got } => {
                assert_eq!(requested, "wanted_id_12");
                assert_eq!(got, "other_id_123");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn matching_video_id_is_accepted() {
        let response = json!({
            "playabilityStatus": { "status": "OK" },
            "videoDetails": { "videoId": "wanted_id_12" }
        });
        assert!(usable_device_response(&response, "wanted_id_12").is_ok());
    }

    #[test]
    fn collects_muxed_and_adaptive_formats() {
        let response = json!({
            "streamingData": {
                "formats": [
                    { "itag": 18, "url": "https://h/v18", "mimeType": "video/mp4; codecs=\"avc1, mp4a\"", "qualityLabel": "360p" }
                ],
                "adaptiveFormats": [
                    { "itag": 140, "url": "https://h/v140", "mimeType": "audio/mp4; codecs=\"mp4a.40.2\"" },
                    { "notitag": true }
                ]
            }
        });
        let formats = collect_formats(&response);
        let itags: Vec<u32> = formats.iter().map(|f| f.itag).collect();
        assert_eq!(itags, vec![18, 140]);
    }

    #[test]
    fn device_formats_supersede_base() {
        let base = vec![Format { itag: 18, ..Default::default() }];
        let tv = vec![
            Format { itag: 140, content_length: Some(1), ..Default::default() },
        ];
        let ios = vec![
            // Duplicate itag from a later profile loses.
            Format { itag: 140, content_length: Some(2), ..Default::default() },
            Format { itag: 136, ..Default::default() },
        ];

        let merged = reconcile_formats(base, vec![tv, ios]);
        let itags: Vec<u32> = merged.iter().map(|f| f.itag).collect();
        assert_eq!(itags, vec![140, 136]);
        assert_eq!(merged[0].content_length, Some(1));
    }

    #[test]
    fn base_formats_survive_when_devices_return_nothing() {
        let base = vec![Format { itag: 18, ..Default::default() }];
        let merged = reconcile_formats(base, vec![Vec::new(), Vec::new()]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].itag, 18);
    }

    #[test]
    fn first_manifest_url_wins() {
        let a = json!({ "streamingData": {} });
        let b = json!({ "streamingData": { "hlsManifestUrl": "https://h/first.m3u8" } });
        let c = json!({ "streamingData": { "hlsManifestUrl": "https://h/second.m3u8" } });
        let refs = vec![&a, &b, &c];
        assert_eq!(
            manifest_url(&refs, "hlsManifestUrl").as_deref(),
            Some("https://h/first.m3u8")
        );
        assert_eq!(manifest_url(&refs, "dashManifestUrl"), None);
    }

    #[test]
    fn base_info_parses_details() {
        let response = json!({
            "videoDetails": {
                "videoId": "abc",
                "title": "A title",
                "author": "Someone",
                "channelId": "UC123",
                "lengthSeconds": "212",
                "isLive": false
            }
        });
        let info = base_info("abc", &response, true);
        assert_eq!(info.title.as_deref(), Some("A title"));
        assert_eq!(info.duration_ms, Some(212_000));
        assert!(!info.is_live);
        assert!(info.full);
    }
}
