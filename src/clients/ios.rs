use super::ClientProfile;

/// iOS app profile. Returns URLs that play without signature deciphering.
pub static PROFILE: ClientProfile = ClientProfile {
    name: "Ios",
    client_name: "IOS",
    client_id: "5",
    client_version: "21.02.1",
    user_agent: "com.google.ios.youtube/21.02.1 (iPhone16,2; U; CPU iOS 18_2 like Mac OS X;)",
    device_make: Some("Apple"),
    device_model: Some("iPhone16,2"),
    os_name: Some("iPhone"),
    os_version: Some("18.2.22C152"),
    android_sdk_version: None,
    platform: Some("MOBILE"),
    client_screen: None,
    third_party_embed_url: None,
};
