//! Offline checks of the public surface: id parsing, option defaults and
//! format selection compose without touching the network.

use std::sync::Once;

use vidlink::{
    choose_format, filter_formats, get_video_id, sort_formats, DownloadOptions, Error, Format,
    FormatFilter, Options, Quality,
};

fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

fn format(itag: u32, video: bool, audio: bool) -> Format {
    Format {
        itag,
        url: Some(format!("https://host/videoplayback?itag={}", itag)),
        quality_label: video.then(|| "720p".to_string()),
        audio_bitrate: audio.then_some(128),
        has_video: video,
        has_audio: audio,
        ..Default::default()
    }
}

#[test]
fn video_id_round_trips_through_url_shapes() {
    init_tracing();
    let id = get_video_id("https://www.youtube.com/watch?v=jNQXAC9IVRw").unwrap();
    assert_eq!(id, "jNQXAC9IVRw");
    assert_eq!(get_video_id(&id).unwrap(), id);
}

#[test]
fn defaults_are_usable() {
    init_tracing();
    let options = Options::default();
    assert_eq!(options.lang, "en");
    assert_eq!(options.clients.len(), 3);

    let download = DownloadOptions::default();
    assert!(matches!(download.quality, Quality::Highest));
    assert!(download.format.is_none());
}

#[test]
fn options_deserialize_with_partial_fields() {
    init_tracing();
    let options: Options = serde_json::from_str(r#"{ "lang": "fr" }"#).unwrap();
    assert_eq!(options.lang, "fr");
    assert_eq!(options.retry.max_retries, 3);
}

#[test]
fn selection_pipeline_composes() {
    init_tracing();
    let mut formats = vec![format(140, false, true), format(22, true, true)];
    sort_formats(&mut formats);

    let audio_only = filter_formats(&formats, &FormatFilter::AudioOnly);
    assert_eq!(audio_only.len(), 1);
    assert_eq!(audio_only[0].itag, 140);

    let chosen = choose_format(&formats, &Quality::Highest, &FormatFilter::All, None).unwrap();
    assert_eq!(chosen.itag, 22);

    let err = choose_format(&formats, &Quality::Itag(999), &FormatFilter::All, None).unwrap_err();
    assert!(matches!(err, Error::FormatNotFound(_)));
}
