use super::ClientProfile;

/// Embedded-player web profile. Sees fewer age/embed restrictions than the
/// plain web client.
pub static PROFILE: ClientProfile = ClientProfile {
    name: "WebEmbedded",
    client_name: "WEB_EMBEDDED_PLAYER",
    client_id: "56",
    client_version: "1.20250219.01.00",
    user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
         (KHTML, like Gecko) Chrome/134.0.0.0 Safari/537.36",
    device_make: None,
    device_model: None,
    os_name: None,
    os_version: None,
    android_sdk_version: None,
    platform: Some("DESKTOP"),
    client_screen: Some("EMBED"),
    third_party_embed_url: Some("https://www.youtube.com"),
};
