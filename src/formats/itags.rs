/// Expected capabilities per itag, merged under live response fields during
/// enrichment. The platform omits fields per client profile; this table
/// restores the stable defaults for the encodings that matter in practice.
pub struct ItagProfile {
    pub itag: u32,
    pub container: &'static str,
    pub quality_label: Option<&'static str>,
    /// kbps
    pub audio_bitrate: Option<u64>,
    pub has_video: bool,
    pub has_audio: bool,
}

const fn muxed(itag: u32, container: &'static str, label: &'static str, abr: u64) -> ItagProfile {
    ItagProfile {
        itag,
        container,
        quality_label: Some(label),
        audio_bitrate: Some(abr),
        has_video: true,
        has_audio: true,
    }
}

const fn video(itag: u32, container: &'static str, label: &'static str) -> ItagProfile {
    ItagProfile {
        itag,
        container,
        quality_label: Some(label),
        audio_bitrate: None,
        has_video: true,
        has_audio: false,
    }
}

const fn audio(itag: u32, container: &'static str, abr: u64) -> ItagProfile {
    ItagProfile {
        itag,
        container,
        quality_label: None,
        audio_bitrate: Some(abr),
        has_video: false,
        has_audio: true,
    }
}

pub static ITAG_TABLE: &[ItagProfile] = &[
    // Legacy muxed
    muxed(17, "3gp", "144p", 24),
    muxed(18, "mp4", "360p", 96),
    muxed(22, "mp4", "720p", 192),
    muxed(43, "webm", "360p", 128),
    // Live/HLS muxed
    muxed(91, "ts", "144p", 48),
    muxed(92, "ts", "240p", 48),
    muxed(93, "ts", "360p", 128),
    muxed(94, "ts", "480p", 128),
    muxed(95, "ts", "720p", 256),
    muxed(96, "ts", "1080p", 256),
    muxed(300, "ts", "720p60", 128),
    muxed(301, "ts", "1080p60", 128),
    // Adaptive video, mp4/avc1
    video(133, "mp4", "240p"),
    video(134, "mp4", "360p"),
    video(135, "mp4", "480p"),
    video(136, "mp4", "720p"),
    video(137, "mp4", "1080p"),
    video(160, "mp4", "144p"),
    video(264, "mp4", "1440p"),
    video(266, "mp4", "2160p"),
    video(298, "mp4", "720p60"),
    video(299, "mp4", "1080p60"),
    // Adaptive video, webm/vp9
    video(242, "webm", "240p"),
    video(243, "webm", "360p"),
    video(244, "webm", "480p"),
    video(247, "webm", "720p"),
    video(248, "webm", "1080p"),
    video(271, "webm", "1440p"),
    video(278, "webm", "144p"),
    video(302, "webm", "720p60"),
    video(303, "webm", "1080p60"),
    video(308, "webm", "1440p60"),
    video(313, "webm", "2160p"),
    video(315, "webm", "2160p60"),
    // Adaptive video, mp4/av01
    video(394, "mp4", "144p"),
    video(395, "mp4", "240p"),
    video(396, "mp4", "360p"),
    video(397, "mp4", "480p"),
    video(398, "mp4", "720p"),
    video(399, "mp4", "1080p"),
    video(400, "mp4", "1440p"),
    video(401, "mp4", "2160p"),
    // Adaptive audio
    audio(139, "mp4", 48),
    audio(140, "mp4", 128),
    audio(141, "mp4", 256),
    audio(171, "webm", 128),
    audio(249, "webm", 50),
    audio(250, "webm", 70),
    audio(251, "webm", 160),
];

pub fn lookup(itag: u32) -> Option<&'static ItagProfile> {
    ITAG_TABLE.iter().find(|p| p.itag == itag)
}
