//! Push payload parsing and notification click routing.
//!
//! Payloads arrive as opaque bytes from the push service. Parsing never
//! fails: anything missing or of the wrong type falls back to the
//! configured defaults, and a body that is not a JSON object yields an
//! empty data map.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

use crate::capabilities::NotificationRequest;
use crate::config::{NotificationConfig, RouteTable};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Booking,
    Payment,
    Message,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Booking => "booking",
            Self::Payment => "payment",
            Self::Message => "message",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "booking" => Some(Self::Booking),
            "payment" => Some(Self::Payment),
            "message" => Some(Self::Message),
            _ => None,
        }
    }

    pub fn route<'a>(&self, routes: &'a RouteTable) -> &'a str {
        match self {
            Self::Booking => &routes.class_table,
            Self::Payment => &routes.service_fee,
            Self::Message => &routes.dashboard,
        }
    }
}

/// Routing hints carried in a notification's payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotificationData {
    pub url: Option<String>,
    pub kind: Option<NotificationKind>,
}

impl NotificationData {
    pub fn from_payload(payload: &Map<String, Value>) -> Self {
        let url = payload
            .get("url")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .map(str::to_string);
        let kind = payload
            .get("type")
            .and_then(Value::as_str)
            .and_then(NotificationKind::parse);
        Self { url, kind }
    }

    /// Explicit url first, then the kind's view, then the dashboard.
    pub fn resolve_route(&self, routes: &RouteTable) -> String {
        if let Some(url) = &self.url {
            return url.clone();
        }
        self.kind
            .map_or(routes.dashboard.as_str(), |kind| kind.route(routes))
            .to_string()
    }
}

/// A push payload with defaults applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushMessage {
    pub title: String,
    pub body: String,
    pub icon: String,
    pub badge: String,
    pub tag: String,
    pub require_interaction: bool,
    pub data: Map<String, Value>,
}

impl PushMessage {
    pub fn parse(payload: &[u8], defaults: &NotificationConfig) -> Self {
        let fields = match serde_json::from_slice::<Value>(payload) {
            Ok(Value::Object(map)) => map,
            Ok(other) => {
                warn!(kind = json_kind(&other), "push payload is not an object, using defaults");
                Map::new()
            }
            Err(e) => {
                warn!(error = %e, len = payload.len(), "push payload is not JSON, using defaults");
                Map::new()
            }
        };

        let text = |key: &str, fallback: &str| -> String {
            match fields.get(key) {
                Some(Value::String(s)) => s.clone(),
                Some(Value::Null) | None => fallback.to_string(),
                Some(other) => {
                    warn!(field = key, kind = json_kind(other), "push field has wrong type");
                    fallback.to_string()
                }
            }
        };

        let data = match fields.get("data") {
            Some(Value::Object(map)) => map.clone(),
            _ => Map::new(),
        };

        Self {
            title: text("title", &defaults.default_title),
            body: text("body", ""),
            icon: text("icon", &defaults.default_icon),
            badge: text("badge", &defaults.default_badge),
            tag: text("tag", &defaults.default_tag),
            require_interaction: fields
                .get("requireInteraction")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            data,
        }
    }

    pub fn routing(&self) -> NotificationData {
        NotificationData::from_payload(&self.data)
    }

    pub fn into_request(self) -> NotificationRequest {
        NotificationRequest {
            title: self.title,
            body: self.body,
            tag: self.tag,
            require_interaction: self.require_interaction,
            icon: Some(self.icon),
            badge: Some(self.badge),
            payload: self.data,
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
