use super::ClientProfile;

/// Android app profile.
pub static PROFILE: ClientProfile = ClientProfile {
    name: "Android",
    client_name: "ANDROID",
    client_id: "3",
    client_version: "20.01.35",
    user_agent: "com.google.android.youtube/20.01.35 (Linux; U; Android 14) identity",
    device_make: Some("Google"),
    device_model: Some("Pixel 6"),
    os_name: Some("Android"),
    os_version: Some("14"),
    android_sdk_version: Some("34"),
    platform: Some("MOBILE"),
    client_screen: None,
    third_party_embed_url: None,
};
