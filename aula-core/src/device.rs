//! Device metadata derived from the `User-Agent` header.
//!
//! Sessions carry a short human-readable device label so administrators can tell
//! concurrent logins apart when enforcing or reviewing the session limit.

use serde::{Deserialize, Serialize};
use woothee::parser::Parser;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    Desktop,
    Mobile,
    Tablet,
    Bot,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub kind: DeviceKind,
    pub os: Option<String>,
    pub browser: Option<String>,
}

impl DeviceInfo {
    /// Label stored on the session row, e.g. `Chrome on Windows 10 (desktop)`.
    pub fn label(&self) -> String {
        let kind = serde_json::to_value(self.kind)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_else(|| "unknown".to_string());

        match (&self.browser, &self.os) {
            (Some(browser), Some(os)) => format!("{browser} on {os} ({kind})"),
            (Some(browser), None) => format!("{browser} ({kind})"),
            (None, Some(os)) => format!("{os} ({kind})"),
            (None, None) => kind,
        }
    }
}

/// Parse a User-Agent string and extract device information
pub fn parse_user_agent(user_agent: Option<&str>) -> DeviceInfo {
    let unknown = DeviceInfo {
        kind: DeviceKind::Unknown,
        os: None,
        browser: None,
    };

    let Some(user_agent) = user_agent.filter(|ua| !ua.trim().is_empty()) else {
        return unknown;
    };

    match Parser::new().parse(user_agent) {
        Some(result) => {
            let kind = match result.category {
                "pc" => DeviceKind::Desktop,
                "smartphone" | "mobilephone" => DeviceKind::Mobile,
                "tablet" => DeviceKind::Tablet,
                "crawler" => DeviceKind::Bot,
                _ => DeviceKind::Unknown,
            };

            DeviceInfo {
                kind,
                os: normalize_field(result.os),
                browser: normalize_field(result.name),
            }
        }
        None => unknown,
    }
}

/// Normalize a field value - return None if empty or "UNKNOWN"
fn normalize_field(value: &str) -> Option<String> {
    if value.is_empty() || value == "UNKNOWN" {
        None
    } else {
        Some(value.to_string())
    }
}
