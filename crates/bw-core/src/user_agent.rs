//! Device user-agent decoding.
//!
//! Participant devices identify themselves with headers of the form
//! `Phone Dashboard/34 Passive Data Kit/1.0 (Android 8.0.0 SDK 26; samsung SM-J737U)`.
//! Each field is derived from documented delimiter positions; any field whose
//! delimiters are missing decodes to `None`. Decoding is total and never fails.

use serde::{Deserialize, Serialize};

/// Client identification decoded from a telemetry user-agent header.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientInfo {
    /// Reporting app name (text before the first `/`).
    pub app: Option<String>,
    /// App version (between the first `/` and the following space).
    pub version: Option<String>,
    /// Platform string (between the opening `(` and the last `;`).
    pub platform: Option<String>,
    /// Device model (after the first `;`, trailing `)` removed).
    pub device_model: Option<String>,
}

impl ClientInfo {
    /// Decodes a header, yielding `None` for every underivable field.
    pub fn decode(header: &str) -> Self {
        Self {
            app: decode_app(header),
            version: decode_version(header),
            platform: decode_platform(header),
            device_model: decode_device_model(header),
        }
    }

    /// Decodes an optional header; absent headers decode to all-`None`.
    pub fn decode_opt(header: Option<&str>) -> Self {
        header.map(Self::decode).unwrap_or_default()
    }
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn decode_app(header: &str) -> Option<String> {
    let (app, _) = header.split_once('/')?;
    non_empty(app)
}

fn decode_version(header: &str) -> Option<String> {
    let (_, rest) = header.split_once('/')?;
    let version = rest.split(' ').next().unwrap_or(rest);
    non_empty(version)
}

fn decode_platform(header: &str) -> Option<String> {
    let (_, inner) = header.split_once('(')?;
    let (platform, _) = inner.rsplit_once(';')?;
    non_empty(platform)
}

fn decode_device_model(header: &str) -> Option<String> {
    let mut segments = header.split(';');
    let _ = segments.next()?;
    let model = segments.next()?;
    non_empty(model.trim_end().trim_end_matches(')'))
}

#[cfg(test)]
mod tests {
    use super::*;

    const ANDROID: &str = "Phone Dashboard/34 Passive Data Kit/1.0 (Android 8.0.0 SDK 26; samsung SM-J737U)";
    const IOS: &str = "Phone Dashboard/2.1 Passive Data Kit/1.0 (iOS 12.4; Apple iPhone8,1)";

    #[test]
    fn decodes_android_header_fully() {
        let info = ClientInfo::decode(ANDROID);
        assert_eq!(info.app.as_deref(), Some("Phone Dashboard"));
        assert_eq!(info.version.as_deref(), Some("34"));
        assert_eq!(info.platform.as_deref(), Some("Android 8.0.0 SDK 26"));
        assert_eq!(info.device_model.as_deref(), Some("samsung SM-J737U"));
    }

    #[test]
    fn decodes_ios_header_fully() {
        let info = ClientInfo::decode(IOS);
        assert_eq!(info.app.as_deref(), Some("Phone Dashboard"));
        assert_eq!(info.version.as_deref(), Some("2.1"));
        assert_eq!(info.platform.as_deref(), Some("iOS 12.4"));
        assert_eq!(info.device_model.as_deref(), Some("Apple iPhone8,1"));
    }

    #[test]
    fn missing_parenthetical_drops_platform_only() {
        let info = ClientInfo::decode("Phone Dashboard/34 Passive Data Kit/1.0");
        assert_eq!(info.app.as_deref(), Some("Phone Dashboard"));
        assert_eq!(info.version.as_deref(), Some("34"));
        assert_eq!(info.platform, None);
        assert_eq!(info.device_model, None);
    }

    #[test]
    fn missing_slash_drops_app_and_version() {
        let info = ClientInfo::decode("curl (Linux; x86_64)");
        assert_eq!(info.app, None);
        assert_eq!(info.version, None);
        assert_eq!(info.platform.as_deref(), Some("Linux"));
        assert_eq!(info.device_model.as_deref(), Some("x86_64"));
    }

    #[test]
    fn parenthetical_without_semicolon_drops_platform() {
        let info = ClientInfo::decode("Phone Dashboard/34 (Android)");
        assert_eq!(info.platform, None);
        assert_eq!(info.device_model, None);
    }

    #[test]
    fn version_without_trailing_space_is_kept() {
        let info = ClientInfo::decode("Phone Dashboard/34");
        assert_eq!(info.version.as_deref(), Some("34"));
    }

    #[test]
    fn empty_header_decodes_to_none_fields() {
        assert_eq!(ClientInfo::decode(""), ClientInfo::default());
    }

    #[test]
    fn junk_header_never_panics() {
        for junk in ["///", "(;)", "(", ";", ")(", "a/b(c;", "/ (;"] {
            let _ = ClientInfo::decode(junk);
        }
    }

    #[test]
    fn absent_header_decodes_to_default() {
        assert_eq!(ClientInfo::decode_opt(None), ClientInfo::default());
        assert_eq!(
            ClientInfo::decode_opt(Some(ANDROID)).platform.as_deref(),
            Some("Android 8.0.0 SDK 26")
        );
    }

    #[test]
    fn model_is_segment_between_first_and_second_semicolon() {
        let info = ClientInfo::decode("App/1 (Android 9; pixel 3; extra)");
        assert_eq!(info.device_model.as_deref(), Some("pixel 3"));
        // platform runs to the *last* semicolon
        assert_eq!(info.platform.as_deref(), Some("Android 9; pixel 3"));
    }
}
