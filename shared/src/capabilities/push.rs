use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::model::NotificationId;

/// Profile-wide consent state, owned by the platform.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PermissionState {
    #[default]
    Default,
    Granted,
    Denied,
}

impl PermissionState {
    #[must_use]
    pub const fn is_granted(self) -> bool {
        matches!(self, Self::Granted)
    }

    #[must_use]
    pub const fn is_denied(self) -> bool {
        matches!(self, Self::Denied)
    }

    #[must_use]
    pub const fn needs_request(self) -> bool {
        matches!(self, Self::Default)
    }

    /// Applies the answer of a consent prompt. Only `Default` can move;
    /// a prompt that was dismissed without an answer stays `Default`.
    #[must_use]
    pub const fn after_prompt(self, answer: PermissionState) -> PermissionState {
        match self {
            Self::Default => answer,
            settled => settled,
        }
    }
}

#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
pub enum NotificationError {
    #[error("background channel registration failed: {reason}")]
    RegistrationFailed { reason: String },

    #[error("notification {0} not found")]
    NotFound(String),

    #[error("display failed: {message}")]
    Display { message: String },
}

impl NotificationError {
    #[must_use]
    pub fn registration_failed(reason: impl Into<String>) -> Self {
        Self::RegistrationFailed {
            reason: reason.into(),
        }
    }
}

/// What to show. `tag` coalesces: a new request with the tag of a visible
/// notification replaces it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationRequest {
    pub title: String,
    pub body: String,
    pub tag: String,
    #[serde(default)]
    pub require_interaction: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub badge: Option<String>,
    #[serde(default)]
    pub payload: Map<String, Value>,
}

impl NotificationRequest {
    pub fn new(title: impl Into<String>, body: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            tag: tag.into(),
            require_interaction: false,
            icon: None,
            badge: None,
            payload: Map::new(),
        }
    }

    #[must_use]
    pub fn require_interaction(mut self, require: bool) -> Self {
        self.require_interaction = require;
        self
    }

    #[must_use]
    pub fn with_payload(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisplayedNotification {
    pub id: NotificationId,
    pub request: NotificationRequest,
}

/// Queries and requests consent. Never asserts a state on its own.
#[async_trait]
pub trait PermissionProvider: Send + Sync {
    /// Whether the platform has a notification API at all.
    fn is_supported(&self) -> bool;

    async fn query(&self) -> PermissionState;

    /// Prompts the user and returns the resulting state.
    async fn request(&self) -> Result<PermissionState, NotificationError>;
}

/// A place notifications are displayed: the page (foreground) or the
/// worker's registration (background).
#[async_trait]
pub trait NotificationSurface: Send + Sync {
    async fn show(&self, request: NotificationRequest) -> Result<NotificationId, NotificationError>;

    async fn close(&self, id: &NotificationId) -> Result<(), NotificationError>;

    async fn visible(&self) -> Vec<DisplayedNotification>;
}

/// Registers the background delivery channel backed by the offline worker.
#[async_trait]
pub trait BackgroundChannel: Send + Sync {
    async fn register(&self) -> Result<Arc<dyn NotificationSurface>, NotificationError>;
}

/// In-process surface with the platform's tag coalescing.
#[derive(Debug, Default)]
pub struct MemoryNotificationSurface {
    visible: Mutex<Vec<DisplayedNotification>>,
}

impl MemoryNotificationSurface {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl NotificationSurface for MemoryNotificationSurface {
    async fn show(&self, request: NotificationRequest) -> Result<NotificationId, NotificationError> {
        let id = NotificationId::generate();
        let mut visible = self.visible.lock().await;
        visible.retain(|n| n.request.tag != request.tag);
        visible.push(DisplayedNotification {
            id: id.clone(),
            request,
        });
        Ok(id)
    }

    async fn close(&self, id: &NotificationId) -> Result<(), NotificationError> {
        let mut visible = self.visible.lock().await;
        let before = visible.len();
        visible.retain(|n| &n.id != id);
        if visible.len() == before {
            return Err(NotificationError::NotFound(id.to_string()));
        }
        Ok(())
    }

    async fn visible(&self) -> Vec<DisplayedNotification> {
        self.visible.lock().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permission_state_checks() {
        assert!(PermissionState::Granted.is_granted());
        assert!(!PermissionState::Default.is_granted());
        assert!(PermissionState::Denied.is_denied());
        assert!(PermissionState::Default.needs_request());
        assert!(!PermissionState::Denied.needs_request());
    }

    #[test]
    fn settled_states_do_not_move() {
        use PermissionState::*;
        assert_eq!(Default.after_prompt(Granted), Granted);
        assert_eq!(Default.after_prompt(Denied), Denied);
        assert_eq!(Default.after_prompt(Default), Default);
        assert_eq!(Denied.after_prompt(Granted), Denied);
        assert_eq!(Granted.after_prompt(Denied), Granted);
    }

    #[test]
    fn permission_wire_format() {
        assert_eq!(serde_json::to_string(&PermissionState::Granted).unwrap(), "\"granted\"");
        let parsed: PermissionState = serde_json::from_str("\"default\"").unwrap();
        assert_eq!(parsed, PermissionState::Default);
    }

    #[test]
    fn request_serializes_camel_case() {
        let request = NotificationRequest::new("t", "b", "payment").require_interaction(true);
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["requireInteraction"], true);
        assert!(json.get("icon").is_none());
    }

    #[tokio::test]
    async fn same_tag_replaces() {
        let surface = MemoryNotificationSurface::new();
        surface.show(NotificationRequest::new("a", "1", "payment")).await.unwrap();
        let second = surface.show(NotificationRequest::new("b", "2", "payment")).await.unwrap();
        surface.show(NotificationRequest::new("c", "3", "booking")).await.unwrap();

        let visible = surface.visible().await;
        assert_eq!(visible.len(), 2);
        let payment = visible.iter().find(|n| n.request.tag == "payment").unwrap();
        assert_eq!(payment.id, second);
        assert_eq!(payment.request.body, "2");
    }

    #[tokio::test]
    async fn close_unknown_is_not_found() {
        let surface = MemoryNotificationSurface::new();
        let id = surface.show(NotificationRequest::new("a", "1", "x")).await.unwrap();
        surface.close(&id).await.unwrap();
        assert!(matches!(surface.close(&id).await, Err(NotificationError::NotFound(_))));
        assert!(surface.visible().await.is_empty());
    }
}
