use std::{
    sync::{Arc, Once},
    time::Duration,
};

use tracing::{debug, warn};

use crate::{
    cache::TtlCache,
    error::{Error, Result},
    formats::Format,
};

pub mod extractor;
pub mod sandbox;

use sandbox::CompiledFn;

/// Compiled transform pair for one player-script revision. Either callable
/// may be absent when extraction failed for that fragment type.
pub struct CipherScript {
    pub decipher: Option<CompiledFn>,
    pub n_transform: Option<CompiledFn>,
}

static N_TRANSFORM_WARN: Once = Once::new();

/// Fetches, extracts and compiles player scripts, cached by script URL.
///
/// Scripts rotate frequently; the cache TTL is deliberately short (see
/// `Options::cipher_cache_ttl_secs`) so reuse is limited to back-to-back
/// resolutions of the same revision.
pub struct CipherManager {
    http: Arc<reqwest::Client>,
    scripts: TtlCache<String, Arc<CipherScript>>,
}

impl CipherManager {
    pub fn new(http: Arc<reqwest::Client>, ttl: Duration) -> Self {
        Self {
            http,
            scripts: TtlCache::new(ttl),
        }
    }

    /// Compiled transform pair for `script_url`, built lazily on first use.
    pub async fn get_script(&self, script_url: &str) -> Result<Arc<CipherScript>> {
        let http = self.http.clone();
        let url = script_url.to_string();
        self.scripts
            .get_or_compute(script_url.to_string(), || async move {
                let body = http
                    .get(&url)
                    .send()
                    .await?
                    .error_for_status()?
                    .text()
                    .await?;

                let fns = extractor::extract(&body);
                if fns.decipher.is_none() {
                    warn!(script = %url, "no decipher fragment extracted; ciphered formats will be dropped");
                }
                if fns.n_transform.is_none() {
                    // Degraded mode: formats stay usable with `n` untouched.
                    // Noisy per-call, so said once per process.
                    N_TRANSFORM_WARN.call_once(|| {
                        warn!(script = %url, "no n-transform fragment extracted; leaving n parameter unmodified");
                    });
                }

                Ok(Arc::new(CipherScript {
                    decipher: fns.decipher,
                    n_transform: fns.n_transform,
                }))
            })
            .await
    }
}

/// Decode a `signatureCipher` / `cipher` query blob into
/// (stream url, ciphered signature, signature param name).
pub fn decode_signature_cipher(cipher_str: &str) -> Option<(String, String, String)> {
    let mut url = None;
    let mut sig = None;
    let mut sp = None;

    for part in cipher_str.split('&') {
        if let Some((k, v)) = part.split_once('=') {
            let decoded = urlencoding::decode(v).ok()?.to_string();
            match k {
                "url" => url = Some(decoded),
                "s" => sig = Some(decoded),
                "sp" => sp = Some(decoded),
                _ => {}
            }
        }
    }

    match (url, sig) {
        // The signature param name itself is script-supplied.
        (Some(u), Some(s)) => Some((u, s, sp.unwrap_or_else(|| "sig".to_string()))),
        _ => None,
    }
}

/// Produce a playable URL from a raw or ciphered one.
///
/// `sig` carries the ciphered signature and the target param name when the
/// format arrived with a `signatureCipher` blob. The n-parameter transform is
/// best-effort: a missing callable or execution fault leaves `n` unmodified
/// instead of failing the format.
pub fn decipher_url(
    script: &CipherScript,
    url: &str,
    sig: Option<(&str, &str)>,
) -> Result<String> {
    let mut out = url.to_string();

    if let Some((ciphered, sp)) = sig {
        let decipher = script
            .decipher
            .as_ref()
            .ok_or_else(|| Error::Extraction("no decipher callable for ciphered format".into()))?;
        let plain = decipher.invoke(ciphered)?;
        out = set_query_param(&out, sp, &plain);
    }

    if let Some(n_fn) = &script.n_transform {
        if let Some(n) = query_param(&out, "n") {
            let decoded = urlencoding::decode(&n).map(|c| c.to_string()).unwrap_or(n);
            match n_fn.invoke(&decoded) {
                Ok(transformed) => out = set_query_param(&out, "n", &transformed),
                Err(e) => {
                    // Fault invalidates nothing; throttled playback beats none.
                    debug!(error = %e, "n-transform execution fault, leaving n unmodified");
                }
            }
        }
    }

    Ok(out)
}

/// Resolve one format's download URL in place. On success the cipher fields
/// are cleared; on a decipher fault only this format's URL is invalidated.
pub fn resolve_format(script: &CipherScript, format: &mut Format) {
    let resolved = if let Some(cipher_str) = format.signature_cipher.take() {
        match decode_signature_cipher(&cipher_str) {
            Some((url, s, sp)) => decipher_url(script, &url, Some((&s, &sp))),
            None => Err(Error::BadResponse("unparseable signatureCipher".into())),
        }
    } else if let Some(url) = format.url.take() {
        decipher_url(script, &url, None)
    } else {
        return;
    };

    match resolved {
        Ok(url) => format.url = Some(url),
        Err(e) => {
            debug!(itag = format.itag, error = %e, "dropping format url after cipher fault");
            format.url = None;
        }
    }
}

fn query_param(url: &str, key: &str) -> Option<String> {
    let query = url.split_once('?')?.1;
    for pair in query.split('&') {
        let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
        if k == key {
            return Some(v.split('#').next().unwrap_or(v).to_string());
        }
    }
    None
}

/// Replace or append `key` in the URL's query component, encoding the value.
fn set_query_param(url: &str, key: &str, value: &str) -> String {
    let encoded = urlencoding::encode(value);
    match url.split_once('?') {
        Some((base, query)) => {
            let mut replaced = false;
            let rebuilt: Vec<String> = query
                .split('&')
                .map(|pair| {
                    let (k, _) = pair.split_once('=').unwrap_or((pair, ""));
                    if k == key {
                        replaced = true;
                        format!("{}={}", key, encoded)
                    } else {
                        pair.to_string()
                    }
                })
                .collect();
            let mut query = rebuilt.join("&");
            if !replaced {
                query.push_str(&format!("&{}={}", key, encoded));
            }
            format!("{}?{}", base, query)
        }
        None => format!("{}?{}={}", url, key, encoded),
    }
}
