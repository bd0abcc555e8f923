use crate::formats::Format;

/// Scan a master HLS playlist for variant stream URLs.
///
/// The platform encodes the itag inside the variant URL path
/// (`.../itag/96/...`), so there is no need to interpret the
/// `#EXT-X-STREAM-INF` attributes; the itag table fills in the rest.
pub fn parse_hls_master(playlist: &str) -> Vec<Format> {
    let mut formats = Vec::new();

    for line in playlist.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if !line.starts_with("http") {
            continue;
        }
        let Some(itag) = itag_from_url(line) else {
            continue;
        };

        let mut f = Format {
            itag,
            url: Some(line.to_string()),
            is_hls: true,
            is_live: true,
            ..Default::default()
        };
        f.add_meta();
        f.is_hls = true;
        f.is_live = true;
        formats.push(f);
    }

    formats
}

fn itag_from_url(url: &str) -> Option<u32> {
    let rest = url.split("/itag/").nth(1)?;
    rest.split('/').next()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const PLAYLIST: &str = "#EXTM3U\n\
#EXT-X-STREAM-INF:BANDWIDTH=1500000,RESOLUTION=1280x720\n\
https://host.example/api/manifest/hls_playlist/id/1/itag/95/source/yt_live_broadcast/x.m3u8\n\
#EXT-X-STREAM-INF:BANDWIDTH=300000,RESOLUTION=426x240\n\
https://host.example/api/manifest/hls_playlist/id/1/itag/92/source/yt_live_broadcast/x.m3u8\n\
relative/path/ignored.m3u8\n";

    #[test]
    fn extracts_variants_by_itag() {
        let formats = parse_hls_master(PLAYLIST);
        let itags: Vec<u32> = formats.iter().map(|f| f.itag).collect();
        assert_eq!(itags, vec![95, 92]);

        let hd = &formats[0];
        assert!(hd.is_hls && hd.is_live);
        assert!(hd.has_video && hd.has_audio);
        assert_eq!(hd.quality_label.as_deref(), Some("720p"));
    }

    #[test]
    fn ignores_urls_without_itag() {
        let formats = parse_hls_master("#EXTM3U\nhttps://host.example/other/playlist.m3u8\n");
        assert!(formats.is_empty());
    }
}
