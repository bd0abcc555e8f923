use std::{sync::Arc, time::Duration};

use regex::Regex;
use serde_json::Value;

use crate::{
    cache::TtlCache,
    cipher::extractor::balanced_slice,
    error::{Error, Result},
};

const WATCH_BASE: &str = "https://www.youtube.com/watch";
const EMBED_URL: &str = "https://www.youtube.com/embed/";

/// Fetches watch/embed pages with short-TTL memoization keyed by URL.
///
/// Page bodies are the source of both the embedded player response and the
/// player-script reference, so back-to-back resolutions of the same id reuse
/// one fetch.
pub struct PageFetcher {
    http: Arc<reqwest::Client>,
    pages: TtlCache<String, Arc<String>>,
}

impl PageFetcher {
    pub fn new(http: Arc<reqwest::Client>, ttl: Duration) -> Self {
        Self {
            http,
            pages: TtlCache::new(ttl),
        }
    }

    /// GET a URL as text, following redirects, memoized by URL.
    pub async fn text(&self, url: &str) -> Result<Arc<String>> {
        let http = self.http.clone();
        let url_owned = url.to_string();
        self.pages
            .get_or_compute(url.to_string(), || async move {
                let res = http.get(&url_owned).send().await?.error_for_status()?;
                Ok(Arc::new(res.text().await?))
            })
            .await
    }

    pub async fn watch_page(&self, video_id: &str, lang: &str) -> Result<Arc<String>> {
        // bpctr/has_verified bust the content-check interstitials.
        let url = format!(
            "{}?v={}&hl={}&bpctr=9999999999&has_verified=1",
            WATCH_BASE, video_id, lang
        );
        self.text(&url).await
    }

    pub async fn embed_page(&self, video_id: &str) -> Result<Arc<String>> {
        let url = format!("{}{}", EMBED_URL, video_id);
        self.text(&url).await
    }
}

/// Extract the player-script URL from a page body.
///
/// The marker moves around between page revisions but the `"jsUrl"` key has
/// been stable for years. The locale path segment is normalized so one
/// compiled script serves every locale.
pub fn player_script_url(body: &str) -> Option<String> {
    let re = Regex::new(r#""jsUrl":"([^"]+)""#).ok()?;
    let raw = re.captures(body)?.get(1)?.as_str().to_string();

    let locale_re = Regex::new(r"/([a-z]{2}_[A-Z]{2})/").ok()?;
    let normalized = locale_re.replace(&raw, "/en_US/").to_string();

    if normalized.starts_with("http") {
        Some(normalized)
    } else {
        Some(format!("https://www.youtube.com{}", normalized))
    }
}

/// Pull the embedded `ytInitialPlayerResponse` object out of a watch page.
///
/// The object is a huge JSON literal inlined into a script tag; a balanced
/// scan is required because regexes cannot pair the nested braces.
pub fn embedded_player_response(body: &str) -> Result<Value> {
    for marker in ["ytInitialPlayerResponse = ", "var ytInitialPlayerResponse="] {
        if let Some(pos) = body.find(marker) {
            let tail = &body[pos + marker.len()..];
            if let Some(obj) = balanced_slice(tail, '{', '}') {
                return serde_json::from_str(obj)
                    .map_err(|e| Error::BadResponse(format!("player response JSON: {}", e)));
            }
        }
    }
    Err(Error::BadResponse(
        "no embedded player response in page".to_string(),
    ))
}
