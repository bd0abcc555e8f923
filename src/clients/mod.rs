use serde_json::{json, Value};

use crate::options::ClientKind;

pub mod android;
pub mod ios;
pub mod tv;
pub mod web;
pub mod web_embedded;

/// InnerTube API base endpoint (googleapis is more stable and avoids some
/// geo-restrictions that www.youtube.com may impose).
pub const INNERTUBE_API: &str = "https://youtubei.googleapis.com";

/// A device/client impersonation template: static configuration data, never
/// mutated at runtime. One profile per file, in the platform's own naming.
pub struct ClientProfile {
    pub name: &'static str,
    pub client_name: &'static str,
    /// Numeric id carried in the `X-YouTube-Client-Name` header.
    pub client_id: &'static str,
    pub client_version: &'static str,
    pub user_agent: &'static str,
    pub device_make: Option<&'static str>,
    pub device_model: Option<&'static str>,
    pub os_name: Option<&'static str>,
    pub os_version: Option<&'static str>,
    pub android_sdk_version: Option<&'static str>,
    pub platform: Option<&'static str>,
    pub client_screen: Option<&'static str>,
    /// Present on the embedded profile only.
    pub third_party_embed_url: Option<&'static str>,
}

impl ClientProfile {
    /// Build the `context` object of a player API request body.
    pub fn build_context(&self, lang: &str) -> Value {
        let mut client = json!({
            "clientName": self.client_name,
            "clientVersion": self.client_version,
            "hl": lang,
            "gl": "US",
            "utcOffsetMinutes": 0,
        });

        let obj = client.as_object_mut().expect("client context is an object");
        for (key, value) in [
            ("deviceMake", self.device_make),
            ("deviceModel", self.device_model),
            ("osName", self.os_name),
            ("osVersion", self.os_version),
            ("androidSdkVersion", self.android_sdk_version),
            ("platform", self.platform),
            ("clientScreen", self.client_screen),
        ] {
            if let Some(v) = value {
                obj.insert(key.to_string(), json!(v));
            }
        }

        let mut context = json!({ "client": client });
        if let Some(embed_url) = self.third_party_embed_url {
            context["thirdParty"] = json!({ "embedUrl": embed_url });
        }
        context
    }
}

/// Resolve an enabled-profile option to its static template.
pub fn profile(kind: ClientKind) -> &'static ClientProfile {
    match kind {
        ClientKind::Web => &web::PROFILE,
        ClientKind::WebEmbedded => &web_embedded::PROFILE,
        ClientKind::Tv => &tv::PROFILE,
        ClientKind::Ios => &ios::PROFILE,
        ClientKind::Android => &android::PROFILE,
    }
}
