use super::ClientProfile;

/// TV HTML5 profile. Often the only profile that returns ranged,
/// direct-URL adaptive formats for restricted videos.
pub static PROFILE: ClientProfile = ClientProfile {
    name: "Tv",
    client_name: "TVHTML5",
    client_id: "7",
    client_version: "7.20250219.19.00",
    user_agent: "Mozilla/5.0 (Fuchsia) AppleWebKit/537.36 (KHTML, like Gecko) \
         Chrome/140.0.0.0 Safari/537.36 CrKey/1.56.500000",
    device_make: None,
    device_model: None,
    os_name: None,
    os_version: None,
    android_sdk_version: None,
    platform: Some("TV"),
    client_screen: None,
    third_party_embed_url: None,
};
