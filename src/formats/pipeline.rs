use std::cmp::Ordering;
use std::collections::HashSet;

use super::{audio_codec_rank, video_codec_rank, Format};
use crate::{
    error::{Error, Result},
    options::{FormatFilter, Quality},
};

/// Rank of the audio/video track combination; higher is preferred.
fn track_combo(f: &Format) -> u8 {
    match (f.has_video, f.has_audio) {
        (true, true) => 3,
        (true, false) => 2,
        (false, true) => 1,
        (false, false) => 0,
    }
}

/// Multi-key preference comparator, most preferred first.
///
/// Key order is fixed: direct progressive delivery beats manifest-backed
/// (non-HLS, then non-DASH), a known content length beats unknown, richer
/// track combinations beat poorer ones, then quality label, video bitrate,
/// audio bitrate and finally codec family preference.
pub fn cmp_formats(a: &Format, b: &Format) -> Ordering {
    a.is_hls
        .cmp(&b.is_hls)
        .then(a.is_dash_mpd.cmp(&b.is_dash_mpd))
        .then_with(|| {
            let a_known = a.content_length.unwrap_or(0) > 0;
            let b_known = b.content_length.unwrap_or(0) > 0;
            b_known.cmp(&a_known)
        })
        .then_with(|| track_combo(b).cmp(&track_combo(a)))
        .then_with(|| {
            b.quality_label_value()
                .unwrap_or(0)
                .cmp(&a.quality_label_value().unwrap_or(0))
        })
        .then_with(|| b.bitrate.unwrap_or(0).cmp(&a.bitrate.unwrap_or(0)))
        .then_with(|| b.audio_bitrate.unwrap_or(0).cmp(&a.audio_bitrate.unwrap_or(0)))
        .then_with(|| {
            video_codec_rank(a.video_codec.as_deref())
                .cmp(&video_codec_rank(b.video_codec.as_deref()))
        })
        .then_with(|| {
            audio_codec_rank(a.audio_codec.as_deref())
                .cmp(&audio_codec_rank(b.audio_codec.as_deref()))
        })
}

/// Sort a format list most-preferred-first. Stable and idempotent.
pub fn sort_formats(formats: &mut [Format]) {
    formats.sort_by(cmp_formats);
}

/// Keep formats matching `filter`; a playable URL is always required.
pub fn filter_formats(formats: &[Format], filter: &FormatFilter) -> Vec<Format> {
    formats
        .iter()
        .filter(|f| f.url.is_some())
        .filter(|f| match filter {
            FormatFilter::All => true,
            FormatFilter::AudioAndVideo => f.has_video && f.has_audio,
            FormatFilter::Video => f.has_video,
            FormatFilter::VideoOnly => f.has_video && !f.has_audio,
            FormatFilter::Audio => f.has_audio,
            FormatFilter::AudioOnly => f.has_audio && !f.has_video,
            FormatFilter::Custom(pred) => pred(f),
        })
        .cloned()
        .collect()
}

/// Drop duplicate descriptors that resolved to the same URL, keeping the
/// first occurrence (device-profile formats precede base-profile ones).
pub fn dedupe_by_url(formats: &mut Vec<Format>) {
    let mut seen = HashSet::new();
    formats.retain(|f| match &f.url {
        Some(url) => seen.insert(url.clone()),
        None => true,
    });
}

/// Select one format per the caller's constraints.
///
/// An explicit pre-chosen format passes through unchanged when it carries a
/// URL. Otherwise the filter narrows the candidates; if any candidate is
/// HLS, non-HLS live formats are dropped (they cannot be fetched directly);
/// then the quality mode picks from the ranked list. Never fabricates a
/// format: the result is always an element of the input.
pub fn choose_format(
    formats: &[Format],
    quality: &Quality,
    filter: &FormatFilter,
    explicit: Option<&Format>,
) -> Result<Format> {
    if let Some(f) = explicit {
        if f.url.is_some() {
            return Ok(f.clone());
        }
    }

    let mut candidates = filter_formats(formats, filter);
    if candidates.iter().any(|f| f.is_hls) {
        candidates.retain(|f| f.is_hls || !f.is_live);
    }

    let chosen = match quality {
        Quality::Highest => {
            sort_formats(&mut candidates);
            candidates.first().cloned()
        }
        Quality::Lowest => {
            sort_formats(&mut candidates);
            candidates.last().cloned()
        }
        Quality::HighestAudio => pick_by_audio(candidates, true),
        Quality::LowestAudio => pick_by_audio(candidates, false),
        Quality::HighestVideo => pick_by_video(candidates, true),
        Quality::LowestVideo => pick_by_video(candidates, false),
        Quality::Itag(itag) => candidates.iter().find(|f| f.itag == *itag).cloned(),
        Quality::ItagList(itags) => itags
            .iter()
            .find_map(|itag| candidates.iter().find(|f| f.itag == *itag))
            .cloned(),
    };

    chosen.ok_or_else(|| Error::FormatNotFound(format!("{:?}", quality)))
}

/// Rank by audio bitrate at the requested extreme, breaking ties by the
/// cheapest video track so the audio dimension costs as little as possible.
fn pick_by_audio(mut candidates: Vec<Format>, highest: bool) -> Option<Format> {
    candidates.retain(|f| f.has_audio);
    candidates.sort_by(|a, b| {
        let a_abr = a.audio_bitrate.unwrap_or(0);
        let b_abr = b.audio_bitrate.unwrap_or(0);
        let primary = if highest {
            b_abr.cmp(&a_abr)
        } else {
            a_abr.cmp(&b_abr)
        };
        primary.then_with(|| a.bitrate.unwrap_or(0).cmp(&b.bitrate.unwrap_or(0)))
    });
    candidates.into_iter().next()
}

/// Rank by video bitrate at the requested extreme, breaking ties by the
/// cheapest audio track.
fn pick_by_video(mut candidates: Vec<Format>, highest: bool) -> Option<Format> {
    candidates.retain(|f| f.has_video);
    candidates.sort_by(|a, b| {
        let a_vbr = a.bitrate.unwrap_or(0);
        let b_vbr = b.bitrate.unwrap_or(0);
        let primary = if highest {
            b_vbr.cmp(&a_vbr)
        } else {
            a_vbr.cmp(&b_vbr)
        };
        primary.then_with(|| {
            a.audio_bitrate
                .unwrap_or(0)
                .cmp(&b.audio_bitrate.unwrap_or(0))
        })
    });
    candidates.into_iter().next()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fmt(itag: u32, video: bool, audio: bool) -> Format {
        Format {
            itag,
            url: Some(format!("https://host/videoplayback?itag={}", itag)),
            quality_label: video.then(|| "360p".to_string()),
            audio_bitrate: audio.then_some(128),
            has_video: video,
            has_audio: audio,
            ..Default::default()
        }
    }

    #[test]
    fn highest_audio_prefers_audio_only_over_muxed() {
        let muxed = Format {
            bitrate: Some(500_000),
            audio_bitrate: Some(96),
            ..fmt(18, true, true)
        };
        let audio_only = Format {
            bitrate: Some(130_000),
            audio_bitrate: Some(128),
            ..fmt(140, false, true)
        };
        let list = vec![muxed, audio_only];

        let chosen = choose_format(&list, &Quality::HighestAudio, &FormatFilter::All, None).unwrap();
        assert_eq!(chosen.itag, 140);
    }

    #[test]
    fn audio_tie_breaks_to_cheapest_video() {
        let expensive = Format {
            bitrate: Some(900_000),
            ..fmt(22, true, true)
        };
        let cheap = Format {
            bitrate: Some(400_000),
            ..fmt(18, true, true)
        };
        let list = vec![expensive, cheap];
        let chosen = choose_format(&list, &Quality::HighestAudio, &FormatFilter::All, None).unwrap();
        assert_eq!(chosen.itag, 18);
    }

    #[test]
    fn chosen_format_always_comes_from_input() {
        let list = vec![fmt(18, true, true), fmt(140, false, true)];
        for quality in [
            Quality::Highest,
            Quality::Lowest,
            Quality::HighestAudio,
            Quality::HighestVideo,
        ] {
            let chosen = choose_format(&list, &quality, &FormatFilter::All, None).unwrap();
            assert!(list.iter().any(|f| *f == chosen));
        }
    }

    #[test]
    fn missing_quality_is_descriptive_error() {
        let list = vec![fmt(140, false, true)];
        let err = choose_format(&list, &Quality::Itag(22), &FormatFilter::All, None).unwrap_err();
        match err {
            Error::FormatNotFound(q) => assert!(q.contains("22")),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn explicit_format_passes_through() {
        let pre = fmt(37, true, true);
        let chosen =
            choose_format(&[], &Quality::Highest, &FormatFilter::All, Some(&pre)).unwrap();
        assert_eq!(chosen.itag, 37);
    }

    #[test]
    fn ranking_is_idempotent_and_order_insensitive() {
        let mut list = vec![
            Format {
                bitrate: Some(1_000_000),
                quality_label: Some("720p".into()),
                ..fmt(22, true, true)
            },
            fmt(140, false, true),
            Format {
                content_length: Some(1),
                ..fmt(18, true, true)
            },
        ];

        sort_formats(&mut list);
        let once: Vec<u32> = list.iter().map(|f| f.itag).collect();
        sort_formats(&mut list);
        let twice: Vec<u32> = list.iter().map(|f| f.itag).collect();
        assert_eq!(once, twice);

        let mut reversed: Vec<Format> = list.iter().rev().cloned().collect();
        sort_formats(&mut reversed);
        assert_eq!(reversed[0].itag, once[0]);
    }

    #[test]
    fn hls_candidates_drop_non_hls_live() {
        let hls = Format {
            is_hls: true,
            is_live: true,
            ..fmt(95, true, true)
        };
        let live_direct = Format {
            is_live: true,
            ..fmt(18, true, true)
        };
        let list = vec![live_direct, hls];
        let chosen = choose_format(&list, &Quality::Highest, &FormatFilter::All, None).unwrap();
        assert_eq!(chosen.itag, 95);
    }

    #[test]
    fn filters_require_url() {
        let mut f = fmt(18, true, true);
        f.url = None;
        assert!(filter_formats(&[f], &FormatFilter::All).is_empty());
    }

    #[test]
    fn dedupes_by_resolved_url() {
        let a = fmt(18, true, true);
        let mut b = fmt(19, true, true);
        b.url = a.url.clone();
        let mut list = vec![a, b, fmt(140, false, true)];
        dedupe_by_url(&mut list);
        let itags: Vec<u32> = list.iter().map(|f| f.itag).collect();
        assert_eq!(itags, vec![18, 140]);
    }
}
