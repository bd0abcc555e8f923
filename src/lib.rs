//! Resolves playable media streams from public video ids and delivers them
//! as bytes.
//!
//! The platform obfuscates its stream URLs behind ciphered signatures and a
//! rotating player script; different device profiles see different format
//! lists. [`get_info`] runs the full pipeline (watch page, device-profile
//! calls, manifest expansion, deciphering) and [`download`] streams the
//! chosen format.

use std::{
    sync::{Arc, Once, OnceLock},
    time::Duration,
};

use dashmap::DashMap;
use tracing::warn;

mod cache;
mod cipher;
mod clients;
mod download;
mod error;
mod formats;
mod manifest;
mod options;
mod page;
mod resolver;

pub use download::{Download, Progress};
pub use error::{Error, Result};
pub use formats::{choose_format, filter_formats, sort_formats, Format};
pub use options::{
    ByteRange, ClientKind, DownloadOptions, FormatFilter, Options, Quality, RetryPolicy,
};
pub use resolver::VideoInfo;

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/134.0.0.0 Safari/537.36";

/// Shared HTTP client: one cookie jar and connection pool per process.
fn shared_http() -> Result<Arc<reqwest::Client>> {
    static CLIENT: OnceLock<Arc<reqwest::Client>> = OnceLock::new();
    if let Some(client) = CLIENT.get() {
        return Ok(client.clone());
    }
    let client = reqwest::Client::builder()
        .user_agent(DEFAULT_USER_AGENT)
        .cookie_store(true)
        .connect_timeout(Duration::from_secs(10))
        .build()?;
    Ok(CLIENT.get_or_init(|| Arc::new(client)).clone())
}

/// Client honoring the options' egress binding; falls back to the shared
/// client when no local address is requested.
fn http_for(options: &Options) -> Result<Arc<reqwest::Client>> {
    let Some(addr) = options.local_address else {
        return shared_http();
    };
    let client = reqwest::Client::builder()
        .user_agent(DEFAULT_USER_AGENT)
        .cookie_store(true)
        .connect_timeout(Duration::from_secs(10))
        .local_address(addr)
        .build()?;
    Ok(Arc::new(client))
}

/// One resolver per distinct option set, so the response and cipher caches
/// survive across calls.
fn resolver_for(options: &Options) -> Result<Arc<resolver::MultiClientResolver>> {
    static RESOLVERS: OnceLock<DashMap<String, Arc<resolver::MultiClientResolver>>> =
        OnceLock::new();
    cached_resolver(RESOLVERS.get_or_init(DashMap::new), options)
}

/// Callers rotating option sets (egress addresses) must not grow the map
/// without bound; past the cap the cached resolvers are dropped wholesale
/// and rebuilt on demand.
const RESOLVER_CACHE_LIMIT: usize = 64;

fn cached_resolver(
    map: &DashMap<String, Arc<resolver::MultiClientResolver>>,
    options: &Options,
) -> Result<Arc<resolver::MultiClientResolver>> {
    let key = serde_json::to_string(options)
        .map_err(|e| Error::BadResponse(format!("unserializable options: {}", e)))?;
    if let Some(r) = map.get(&key) {
        return Ok(r.clone());
    }
    if map.len() >= RESOLVER_CACHE_LIMIT {
        map.clear();
    }
    let resolver = Arc::new(resolver::MultiClientResolver::new(
        http_for(options)?,
        options.clone(),
    ));
    Ok(map.entry(key).or_insert(resolver).clone())
}

/// Accept a bare 11-character video id or any of the public URL shapes
/// (watch, short-link, shorts, live, embed) and return the id.
pub fn get_video_id(input: &str) -> Result<String> {
    let input = input.trim();

    let candidate = if let Some(rest) = input.split("v=").nth(1) {
        strip_url_tail(rest)
    } else if let Some(rest) = input.split("youtu.be/").nth(1) {
        strip_url_tail(rest)
    } else if let Some(rest) = path_segment(input, "/shorts/")
        .or_else(|| path_segment(input, "/live/"))
        .or_else(|| path_segment(input, "/embed/"))
    {
        rest
    } else {
        input
    };

    if is_video_id(candidate) {
        Ok(candidate.to_string())
    } else {
        Err(Error::InvalidId(input.to_string()))
    }
}

fn path_segment<'a>(input: &'a str, marker: &str) -> Option<&'a str> {
    input.split(marker).nth(1).map(strip_url_tail)
}

fn strip_url_tail(rest: &str) -> &str {
    rest.split(['?', '&', '/', '#']).next().unwrap_or(rest)
}

fn is_video_id(s: &str) -> bool {
    s.len() == 11
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Metadata and the raw format list from the watch page alone: one request,
/// no device-profile calls, format URLs possibly still ciphered.
pub async fn get_basic_info(id_or_url: &str, options: Options) -> Result<VideoInfo> {
    let video_id = get_video_id(id_or_url)?;
    let resolver = resolver_for(&options)?;
    spawn_version_check();
    Ok((*resolver.get_basic_info(&video_id).await?).clone())
}

/// Full resolution: every enabled device profile is queried, manifests are
/// expanded and every format URL is deciphered and playable.
pub async fn get_info(id_or_url: &str, options: Options) -> Result<VideoInfo> {
    let video_id = get_video_id(id_or_url)?;
    let resolver = resolver_for(&options)?;
    spawn_version_check();
    Ok((*resolver.get_info(&video_id).await?).clone())
}

/// Resolve and start streaming in one step.
pub async fn download(id_or_url: &str, options: DownloadOptions) -> Result<Download> {
    let info = get_info(id_or_url, options.resolve.clone()).await?;
    download_from_info(&info, options)
}

/// Start streaming from an already-resolved [`VideoInfo`].
///
/// Picks a format per the options, then either consumes its playlist (live
/// and HLS formats) or fetches it directly, chunked for adaptive formats.
/// Must be called from within a Tokio runtime.
pub fn download_from_info(info: &VideoInfo, options: DownloadOptions) -> Result<Download> {
    let chosen = choose_format(
        &info.formats,
        &options.quality,
        &options.filter,
        options.format.as_ref(),
    )?;

    let http = http_for(&options.resolve)?;
    let retry = options.resolve.retry.clone();
    if chosen.is_live || chosen.is_hls {
        download::live::start_live_download(
            http,
            chosen,
            options.begin_ms,
            options.live_buffer,
            retry,
        )
    } else {
        download::start_download(http, chosen, options.chunk_size, options.range, retry)
    }
}

/// Once per process, compare the published version against this build and
/// log when a newer release exists. Failures stay silent; set
/// `VIDLINK_NO_UPDATE` to skip entirely.
fn spawn_version_check() {
    static CHECK: Once = Once::new();
    if std::env::var_os("VIDLINK_NO_UPDATE").is_some() {
        return;
    }
    CHECK.call_once(|| {
        let Ok(http) = shared_http() else { return };
        tokio::spawn(async move {
            let url = concat!("https://crates.io/api/v1/crates/", env!("CARGO_PKG_NAME"));
            let Ok(res) = http.get(url).send().await else {
                return;
            };
            let Ok(body) = res.json::<serde_json::Value>().await else {
                return;
            };
            if let Some(latest) = body["crate"]["max_version"].as_str() {
                if latest != env!("CARGO_PKG_VERSION") {
                    warn!(
                        current = env!("CARGO_PKG_VERSION"),
                        latest, "a newer release is available"
                    );
                }
            }
        });
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_bare_id() {
        assert_eq!(get_video_id("dQw4w9WgXcQ").unwrap(), "dQw4w9WgXcQ");
        assert_eq!(get_video_id("a-b_c123XYZ").unwrap(), "a-b_c123XYZ");
    }

    #[test]
    fn extracts_from_watch_url() {
        assert_eq!(
            get_video_id("https://www.youtube.com/watch?v=dQw4w9WgXcQ&t=10s").unwrap(),
            "dQw4w9WgXcQ"
        );
    }

    #[test]
    fn extracts_from_short_link() {
        assert_eq!(
            get_video_id("https://youtu.be/dQw4w9WgXcQ?si=xyz").unwrap(),
            "dQw4w9WgXcQ"
        );
    }

    #[test]
    fn extracts_from_path_shapes() {
        for url in [
            "https://www.youtube.com/shorts/dQw4w9WgXcQ",
            "https://www.youtube.com/live/dQw4w9WgXcQ?feature=share",
            "https://www.youtube.com/embed/dQw4w9WgXcQ",
        ] {
            assert_eq!(get_video_id(url).unwrap(), "dQw4w9WgXcQ", "{url}");
        }
    }

    #[test]
    fn rejects_garbage() {
        for bad in ["", "short", "https://example.com/nothing", "has spaces!!"] {
            assert!(matches!(get_video_id(bad), Err(Error::InvalidId(_))), "{bad}");
        }
    }

    #[test]
    fn resolver_cache_stays_bounded() {
        let map = DashMap::new();
        for i in 0..RESOLVER_CACHE_LIMIT * 2 {
            let options = Options {
                lang: format!("l{}", i),
                ..Default::default()
            };
            cached_resolver(&map, &options).unwrap();
            assert!(map.len() <= RESOLVER_CACHE_LIMIT);
        }

        // A repeated option set reuses its cached resolver.
        let options = Options::default();
        let a = cached_resolver(&map, &options).unwrap();
        let b = cached_resolver(&map, &options).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }
}
