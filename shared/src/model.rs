use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

// --- Typed IDs ---

macro_rules! typed_id {
    ($name:ident) => {
        #[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            pub fn generate() -> Self {
                Self(Uuid::new_v4().to_string())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

typed_id!(NotificationId);
typed_id!(ClientId);

/// Explicit timestamp unit.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UnixTimeMs(pub u64);

impl UnixTimeMs {
    #[must_use]
    pub fn now() -> Self {
        let ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
            .unwrap_or(0);
        Self(ms)
    }

    #[must_use]
    pub const fn as_millis(self) -> u64 {
        self.0
    }
}

impl Default for UnixTimeMs {
    fn default() -> Self {
        Self::now()
    }
}

/// Response of the authentication endpoint. The endpoint itself lives
/// outside this crate; only its wire shape is shared with the shells.
#[derive(Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    pub success: bool,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub teacher_id: Option<String>,
    #[serde(default)]
    pub needs_password_change: bool,
}

// Redact the token from debug output.
impl fmt::Debug for AuthResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthResponse")
            .field("success", &self.success)
            .field("token_present", &self.token.is_some())
            .field("teacher_id", &self.teacher_id)
            .field("needs_password_change", &self.needs_password_change)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_unique() {
        let a = NotificationId::generate();
        let b = NotificationId::generate();
        assert_ne!(a, b);
        assert!(!a.as_str().is_empty());
    }

    #[test]
    fn auth_response_parses_camel_case() {
        let json = r#"{"success":true,"token":"jwt","teacherId":"t-42","needsPasswordChange":true}"#;
        let parsed: AuthResponse = serde_json::from_str(json).unwrap();
        assert!(parsed.success);
        assert_eq!(parsed.teacher_id.as_deref(), Some("t-42"));
        assert!(parsed.needs_password_change);
    }

    #[test]
    fn auth_response_debug_hides_token() {
        let response = AuthResponse {
            success: true,
            token: Some("secret-token".into()),
            teacher_id: None,
            needs_password_change: false,
        };
        let debug = format!("{response:?}");
        assert!(!debug.contains("secret-token"));
    }

    #[test]
    fn failed_login_defaults_missing_fields() {
        let parsed: AuthResponse = serde_json::from_str(r#"{"success":false}"#).unwrap();
        assert!(!parsed.success);
        assert!(parsed.token.is_none());
        assert!(!parsed.needs_password_change);
    }
}
