use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;
use url::Url;

use crate::capabilities::CacheName;

pub const DEFAULT_SWIPE_THRESHOLD_PX: f64 = 50.0;
pub const DEFAULT_SWIPE_TIMEOUT_MS: f64 = 300.0;
pub const DEFAULT_PULL_THRESHOLD_PX: f64 = 80.0;
pub const DEFAULT_PULL_MAX_OFFSET_PX: f64 = 80.0;
pub const DEFAULT_ORIGIN: &str = "https://localhost/";
pub const DEFAULT_CACHE_PREFIX: &str = "teacher-portal";
pub const DEFAULT_CACHE_VERSION: &str = "v1";

/// Resources cached at install. Changing this list requires bumping
/// [`WorkerConfig::version`], otherwise the old store is never purged.
pub const DEFAULT_MANIFEST: &[&str] = &[
    "/",
    "/dashboard.html",
    "/class-table.html",
    "/styles.css",
    "/sw.js",
];

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Validation(String),

    #[error("invalid url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("malformed configuration document: {0}")]
    Parse(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GestureConfig {
    pub threshold_px: f64,
    pub timeout_ms: f64,
}

impl Default for GestureConfig {
    fn default() -> Self {
        Self {
            threshold_px: DEFAULT_SWIPE_THRESHOLD_PX,
            timeout_ms: DEFAULT_SWIPE_TIMEOUT_MS,
        }
    }
}

impl GestureConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.threshold_px.is_finite() && self.threshold_px > 0.0) {
            return Err(ConfigError::Validation("threshold_px must be > 0".into()));
        }
        if !(self.timeout_ms.is_finite() && self.timeout_ms > 0.0) {
            return Err(ConfigError::Validation("timeout_ms must be > 0".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PullToRefreshConfig {
    pub threshold_px: f64,
    /// Indicator displacement once the pull saturates.
    pub max_offset_px: f64,
}

impl Default for PullToRefreshConfig {
    fn default() -> Self {
        Self {
            threshold_px: DEFAULT_PULL_THRESHOLD_PX,
            max_offset_px: DEFAULT_PULL_MAX_OFFSET_PX,
        }
    }
}

impl PullToRefreshConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.threshold_px.is_finite() && self.threshold_px > 0.0) {
            return Err(ConfigError::Validation("threshold_px must be > 0".into()));
        }
        if !(self.max_offset_px.is_finite() && self.max_offset_px > 0.0) {
            return Err(ConfigError::Validation("max_offset_px must be > 0".into()));
        }
        Ok(())
    }
}

/// Deep-link targets for notification clicks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouteTable {
    pub dashboard: String,
    pub class_table: String,
    pub service_fee: String,
}

impl Default for RouteTable {
    fn default() -> Self {
        Self {
            dashboard: "/dashboard.html".into(),
            class_table: "/class-table.html".into(),
            service_fee: "/service-fee.html".into(),
        }
    }
}

impl RouteTable {
    fn validate(&self) -> Result<(), ConfigError> {
        for (name, path) in [
            ("dashboard", &self.dashboard),
            ("class_table", &self.class_table),
            ("service_fee", &self.service_fee),
        ] {
            if path.trim().is_empty() {
                return Err(ConfigError::Validation(format!("route {name} is empty")));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub origin: String,
    pub cache_prefix: String,
    pub version: String,
    pub manifest: Vec<String>,
    /// Activate as soon as install completes instead of waiting.
    pub skip_waiting: bool,
    pub routes: RouteTable,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            origin: DEFAULT_ORIGIN.into(),
            cache_prefix: DEFAULT_CACHE_PREFIX.into(),
            version: DEFAULT_CACHE_VERSION.into(),
            manifest: DEFAULT_MANIFEST.iter().map(|s| (*s).to_string()).collect(),
            skip_waiting: true,
            routes: RouteTable::default(),
        }
    }
}

impl WorkerConfig {
    /// Name of the store owned by this version.
    #[must_use]
    pub fn cache_name(&self) -> CacheName {
        CacheName::new(format!("{}-{}", self.cache_prefix, self.version))
    }

    pub fn origin_url(&self) -> Result<Url, ConfigError> {
        let url = Url::parse(&self.origin).map_err(|e| ConfigError::InvalidUrl {
            url: self.origin.clone(),
            reason: e.to_string(),
        })?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(ConfigError::InvalidUrl {
                url: self.origin.clone(),
                reason: format!("unsupported scheme '{}'", url.scheme()),
            });
        }
        if url.host_str().is_none() {
            return Err(ConfigError::InvalidUrl {
                url: self.origin.clone(),
                reason: "missing host".into(),
            });
        }
        Ok(url)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let origin = self.origin_url()?;

        if self.cache_prefix.trim().is_empty() {
            return Err(ConfigError::Validation("cache_prefix must not be empty".into()));
        }
        if self.version.trim().is_empty() {
            return Err(ConfigError::Validation("version must not be empty".into()));
        }
        if self.manifest.is_empty() {
            return Err(ConfigError::Validation("manifest must not be empty".into()));
        }

        for entry in &self.manifest {
            if entry.trim().is_empty() {
                return Err(ConfigError::Validation("manifest entry is empty".into()));
            }
            let resolved = origin.join(entry).map_err(|e| ConfigError::InvalidUrl {
                url: entry.clone(),
                reason: e.to_string(),
            })?;
            if resolved.origin() != origin.origin() {
                return Err(ConfigError::InvalidUrl {
                    url: entry.clone(),
                    reason: "manifest entries must be same-origin".into(),
                });
            }
        }

        self.routes.validate()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    pub default_title: String,
    pub default_icon: String,
    pub default_badge: String,
    pub default_tag: String,
    /// Show a one-time confirmation after consent is granted.
    pub confirm_on_grant: bool,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            default_title: "Teacher Portal".into(),
            default_icon: "/icons/icon-192.png".into(),
            default_badge: "/icons/badge-72.png".into(),
            default_tag: "general".into(),
            confirm_on_grant: true,
        }
    }
}

impl NotificationConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_title.trim().is_empty() {
            return Err(ConfigError::Validation("default_title must not be empty".into()));
        }
        if self.default_tag.trim().is_empty() {
            return Err(ConfigError::Validation("default_tag must not be empty".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShellConfig {
    pub gesture: GestureConfig,
    pub pull_to_refresh: PullToRefreshConfig,
    pub worker: WorkerConfig,
    pub notifications: NotificationConfig,
}

impl ShellConfig {
    /// Parses a JSON document; absent sections and fields keep their defaults.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        info!(
            cache = %config.worker.cache_name(),
            manifest_len = config.worker.manifest.len(),
            "shell configuration loaded"
        );
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.gesture.validate()?;
        self.pull_to_refresh.validate()?;
        self.worker.validate()?;
        self.notifications.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        ShellConfig::default().validate().unwrap();
    }

    #[test]
    fn cache_name_embeds_version() {
        let config = WorkerConfig {
            version: "v7".into(),
            ..WorkerConfig::default()
        };
        assert_eq!(config.cache_name().as_str(), "teacher-portal-v7");
    }

    #[test]
    fn from_json_fills_missing_sections() {
        let config = ShellConfig::from_json(r#"{"gesture":{"threshold_px":30}}"#).unwrap();
        assert_eq!(config.gesture.threshold_px, 30.0);
        assert_eq!(config.gesture.timeout_ms, DEFAULT_SWIPE_TIMEOUT_MS);
        assert_eq!(config.pull_to_refresh.threshold_px, DEFAULT_PULL_THRESHOLD_PX);
        assert_eq!(config.worker.manifest.len(), DEFAULT_MANIFEST.len());
    }

    #[test]
    fn rejects_zero_threshold() {
        let result = ShellConfig::from_json(r#"{"gesture":{"threshold_px":0}}"#);
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }

    #[test]
    fn rejects_cross_origin_manifest() {
        let config = WorkerConfig {
            manifest: vec!["https://cdn.example.com/app.js".into()],
            ..WorkerConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::InvalidUrl { .. })));
    }

    #[test]
    fn rejects_non_http_origin() {
        let config = WorkerConfig {
            origin: "file:///tmp/app".into(),
            ..WorkerConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::InvalidUrl { .. })));
    }

    #[test]
    fn rejects_garbage_document() {
        assert!(matches!(
            ShellConfig::from_json("not json"),
            Err(ConfigError::Parse(_))
        ));
    }
}
