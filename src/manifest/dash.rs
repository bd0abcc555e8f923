use std::collections::HashMap;

use crate::formats::Format;

/// Minimal DASH manifest scanner. Understands only the elements the format
/// pipeline needs from the platform's live/post-live manifests.
///
/// Walks tags in document order, tracking the enclosing adaptation set's
/// container/codec attributes, and synthesizes one format per itag from
/// each representation element. Every synthesized format points at the
/// manifest URL itself; the segmented downloader expands it into segment
/// fetches.
pub fn parse_dash_manifest(xml: &str, manifest_url: &str) -> Vec<Format> {
    let mut by_itag: HashMap<u32, Format> = HashMap::new();

    let mut adaptation_mime: Option<String> = None;
    let mut adaptation_codecs: Option<String> = None;

    for tag in tags(xml) {
        if let Some(body) = tag.strip_prefix("AdaptationSet") {
            adaptation_mime = attr(body, "mimeType");
            adaptation_codecs = attr(body, "codecs");
        } else if let Some(body) = tag.strip_prefix("Representation") {
            let Some(itag) = attr(body, "id").and_then(|v| v.parse::<u32>().ok()) else {
                continue;
            };

            let codecs = attr(body, "codecs").or_else(|| adaptation_codecs.clone());
            let mime = adaptation_mime.clone().unwrap_or_default();
            let mime_type = match &codecs {
                Some(c) => format!("{}; codecs=\"{}\"", mime, c),
                None => mime.clone(),
            };

            let mut f = Format {
                itag,
                url: Some(manifest_url.to_string()),
                mime_type: Some(mime_type),
                bitrate: attr(body, "bandwidth").and_then(|v| v.parse().ok()),
                is_dash_mpd: true,
                is_live: true,
                ..Default::default()
            };

            if mime.starts_with("audio") {
                f.audio_sample_rate = attr(body, "audioSamplingRate").and_then(|v| v.parse().ok());
            } else {
                f.width = attr(body, "width").and_then(|v| v.parse().ok());
                f.height = attr(body, "height").and_then(|v| v.parse().ok());
                f.fps = attr(body, "frameRate").and_then(|v| v.parse().ok());
                if let Some(h) = f.height {
                    f.quality_label = Some(format!("{}p", h));
                }
            }

            f.add_meta();
            f.is_dash_mpd = true;
            f.is_live = true;
            // First representation wins per itag.
            by_itag.entry(itag).or_insert(f);
        }
    }

    let mut formats: Vec<Format> = by_itag.into_values().collect();
    formats.sort_by_key(|f| f.itag);
    formats
}

/// Iterate over tag bodies (`<` to `>`), skipping comments and directives.
pub(crate) fn tags(xml: &str) -> impl Iterator<Item = &str> {
    xml.split('<').skip(1).filter_map(|chunk| {
        let tag = chunk.split('>').next()?.trim();
        if tag.is_empty() || tag.starts_with('!') || tag.starts_with('?') || tag.starts_with('/') {
            None
        } else {
            Some(tag)
        }
    })
}

/// Attribute lookup over a tag body. Matches only at a name boundary so
/// `width` never matches the tail of `bandwidth`.
pub(crate) fn attr(tag: &str, name: &str) -> Option<String> {
    let marker = format!("{}=\"", name);
    let mut from = 0;
    while let Some(pos) = tag[from..].find(&marker) {
        let at = from + pos;
        let boundary = tag[..at]
            .chars()
            .next_back()
            .map_or(true, |c| c.is_whitespace());
        if boundary {
            let rest = &tag[at + marker.len()..];
            let end = rest.find('"')?;
            return Some(rest[..end].to_string());
        }
        from = at + marker.len();
    }
    None
}
