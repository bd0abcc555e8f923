use super::ClientProfile;

/// Base web profile. Backs the watch-page fetch; its formats are the
/// fallback when every device profile fails.
pub static PROFILE: ClientProfile = ClientProfile {
    name: "Web",
    client_name: "WEB",
    client_id: "1",
    client_version: "2.20260114.01.00",
    user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/143.0.0.0 Safari/537.36",
    device_make: None,
    device_model: None,
    os_name: None,
    os_version: None,
    android_sdk_version: None,
    platform: Some("DESKTOP"),
    client_screen: None,
    third_party_embed_url: None,
};
