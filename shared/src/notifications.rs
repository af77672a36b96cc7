//! Consent-gated notification display for pages.
//!
//! Nothing is shown unless the platform reports `granted` at the moment of
//! display. Consent is requested at most once per pipeline (page load).
//! The worker-backed background channel is used when it could be
//! registered; otherwise notifications go to the page's own surface.

use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::capabilities::{
    BackgroundChannel, NotificationRequest, NotificationSurface, PermissionProvider,
    PermissionState,
};
use crate::config::NotificationConfig;
use crate::delivery::NotificationKind;
use crate::model::NotificationId;

pub const TAG_BOOKING: &str = "booking";
pub const TAG_CLASS_REMINDER: &str = "class-reminder";
pub const TAG_CANCELLATION: &str = "cancellation";
pub const TAG_PAYMENT: &str = "payment";
pub const TAG_PERMISSION_GRANTED: &str = "permission-granted";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Support {
    Unknown,
    Supported,
    Unsupported,
}

struct PipelineState {
    support: Support,
    consent_requested: bool,
    background: Option<Arc<dyn NotificationSurface>>,
    last_seen: PermissionState,
}

pub struct NotificationPipeline {
    config: NotificationConfig,
    permissions: Arc<dyn PermissionProvider>,
    foreground: Arc<dyn NotificationSurface>,
    channel: Option<Arc<dyn BackgroundChannel>>,
    state: Mutex<PipelineState>,
}

impl fmt::Debug for NotificationPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotificationPipeline")
            .field("config", &self.config)
            .field("has_channel", &self.channel.is_some())
            .finish_non_exhaustive()
    }
}

impl NotificationPipeline {
    pub fn new(
        config: NotificationConfig,
        permissions: Arc<dyn PermissionProvider>,
        foreground: Arc<dyn NotificationSurface>,
    ) -> Self {
        Self {
            config,
            permissions,
            foreground,
            channel: None,
            state: Mutex::new(PipelineState {
                support: Support::Unknown,
                consent_requested: false,
                background: None,
                last_seen: PermissionState::Default,
            }),
        }
    }

    #[must_use]
    pub fn with_background_channel(mut self, channel: Arc<dyn BackgroundChannel>) -> Self {
        self.channel = Some(channel);
        self
    }

    /// Last state observed from the platform. Informational only; display
    /// always re-queries.
    pub async fn last_seen_permission(&self) -> PermissionState {
        self.state.lock().await.last_seen
    }

    pub async fn has_background_channel(&self) -> bool {
        self.state.lock().await.background.is_some()
    }

    async fn is_supported(&self) -> bool {
        let mut state = self.state.lock().await;
        match state.support {
            Support::Supported => true,
            Support::Unsupported => false,
            Support::Unknown => {
                let supported = self.permissions.is_supported();
                if !supported {
                    warn!("notifications are not supported on this platform, pipeline disabled");
                }
                state.support = if supported {
                    Support::Supported
                } else {
                    Support::Unsupported
                };
                supported
            }
        }
    }

    /// First activation: registers the background channel (best effort)
    /// and asks for consent if the user has not decided yet.
    #[instrument(skip(self))]
    pub async fn initialize(&self) -> PermissionState {
        if !self.is_supported().await {
            return PermissionState::Default;
        }

        self.register_background().await;

        let current = self.permissions.query().await;
        let should_request = {
            let mut state = self.state.lock().await;
            state.last_seen = current;
            let first = current.needs_request() && !state.consent_requested;
            if first {
                state.consent_requested = true;
            }
            first
        };

        if !should_request {
            return current;
        }

        let answer = match self.permissions.request().await {
            Ok(answer) => answer,
            Err(e) => {
                warn!(error = %e, "consent request failed");
                return current;
            }
        };
        let next = current.after_prompt(answer);
        self.state.lock().await.last_seen = next;
        info!(permission = ?next, "consent request answered");

        if next.is_granted() && self.config.confirm_on_grant {
            let confirmation = NotificationRequest::new(
                self.config.default_title.clone(),
                "Notifications are enabled",
                TAG_PERMISSION_GRANTED,
            );
            self.show(confirmation).await;
        }

        next
    }

    async fn register_background(&self) {
        let Some(channel) = &self.channel else {
            return;
        };
        if self.state.lock().await.background.is_some() {
            return;
        }
        match channel.register().await {
            Ok(surface) => {
                self.state.lock().await.background = Some(surface);
                info!("background notification channel registered");
            }
            Err(e) => {
                warn!(error = %e, "background channel unavailable, using foreground delivery");
            }
        }
    }

    /// Shows `request` if consent is granted right now. Failures are logged
    /// and reported as `None`.
    #[instrument(skip(self, request), fields(tag = %request.tag))]
    pub async fn show(&self, request: NotificationRequest) -> Option<NotificationId> {
        if !self.is_supported().await {
            return None;
        }

        let permission = self.permissions.query().await;
        let background = {
            let mut state = self.state.lock().await;
            state.last_seen = permission;
            state.background.clone()
        };
        if !permission.is_granted() {
            debug!(permission = ?permission, denied = permission.is_denied(), "notification dropped, no consent");
            return None;
        }

        if let Some(surface) = background {
            match surface.show(request.clone()).await {
                Ok(id) => return Some(id),
                Err(e) => warn!(error = %e, "background display failed, falling back to foreground"),
            }
        }

        match self.foreground.show(request).await {
            Ok(id) => Some(id),
            Err(e) => {
                warn!(error = %e, "notification display failed");
                None
            }
        }
    }

    pub async fn notify_new_booking(&self, data: &Value) -> Option<NotificationId> {
        self.show(new_booking_request(data)).await
    }

    pub async fn notify_class_reminder(&self, data: &Value) -> Option<NotificationId> {
        self.show(class_reminder_request(data)).await
    }

    pub async fn notify_cancellation(&self, data: &Value) -> Option<NotificationId> {
        self.show(cancellation_request(data)).await
    }

    pub async fn notify_payment(&self, data: &Value) -> Option<NotificationId> {
        self.show(payment_request(data)).await
    }
}

fn text<'a>(data: &'a Value, key: &str) -> Option<&'a str> {
    data.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn number_or_text(data: &Value, key: &str) -> Option<String> {
    match data.get(key)? {
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        _ => None,
    }
}

fn event_fields(data: &Value) -> Map<String, Value> {
    data.as_object().cloned().unwrap_or_default()
}

pub fn new_booking_request(data: &Value) -> NotificationRequest {
    let student = text(data, "studentName");
    let class = text(data, "className");
    let mut body = match (student, class) {
        (Some(s), Some(c)) => format!("{s} booked {c}"),
        (Some(s), None) => format!("{s} booked a class"),
        (None, Some(c)) => format!("New booking for {c}"),
        (None, None) => "You have a new booking".to_string(),
    };
    if let Some(time) = text(data, "time") {
        body.push_str(&format!(" at {time}"));
    }

    NotificationRequest {
        payload: event_fields(data),
        ..NotificationRequest::new("New Booking", body, TAG_BOOKING)
    }
    .with_payload("type", NotificationKind::Booking.as_str())
}

pub fn class_reminder_request(data: &Value) -> NotificationRequest {
    let class = text(data, "className");
    let minutes = number_or_text(data, "minutesUntil");
    let body = match (class, minutes) {
        (Some(c), Some(m)) => format!("{c} starts in {m} minutes"),
        (Some(c), None) => format!("{c} starts soon"),
        (None, Some(m)) => format!("Your class starts in {m} minutes"),
        (None, None) => "You have a class starting soon".to_string(),
    };

    NotificationRequest {
        payload: event_fields(data),
        ..NotificationRequest::new("Class Reminder", body, TAG_CLASS_REMINDER)
    }
    .with_payload("type", NotificationKind::Booking.as_str())
    .require_interaction(true)
}

pub fn cancellation_request(data: &Value) -> NotificationRequest {
    let student = text(data, "studentName");
    let class = text(data, "className");
    let body = match (student, class) {
        (Some(s), Some(c)) => format!("{s} cancelled {c}"),
        (Some(s), None) => format!("{s} cancelled a booking"),
        (None, Some(c)) => format!("A booking for {c} was cancelled"),
        (None, None) => "A booking was cancelled".to_string(),
    };

    NotificationRequest {
        payload: event_fields(data),
        ..NotificationRequest::new("Booking Cancelled", body, TAG_CANCELLATION)
    }
    .with_payload("type", NotificationKind::Booking.as_str())
}

pub fn payment_request(data: &Value) -> NotificationRequest {
    let amount = number_or_text(data, "amount");
    let currency = text(data, "currency");
    let student = text(data, "studentName");
    let mut body = match (amount, currency) {
        (Some(a), Some(c)) => format!("Received {a} {c}"),
        (Some(a), None) => format!("Received {a}"),
        (None, _) => "You received a payment".to_string(),
    };
    if let Some(s) = student {
        body.push_str(&format!(" from {s}"));
    }

    NotificationRequest {
        payload: event_fields(data),
        ..NotificationRequest::new("Payment Received", body, TAG_PAYMENT)
    }
    .with_payload("type", NotificationKind::Payment.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::{MemoryNotificationSurface, NotificationError};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ScriptedPermissions {
        supported: bool,
        state: std::sync::Mutex<PermissionState>,
        answer: PermissionState,
        requests: AtomicUsize,
    }

    impl ScriptedPermissions {
        fn new(initial: PermissionState, answer: PermissionState) -> Self {
            Self {
                supported: true,
                state: std::sync::Mutex::new(initial),
                answer,
                requests: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl PermissionProvider for ScriptedPermissions {
        fn is_supported(&self) -> bool {
            self.supported
        }

        async fn query(&self) -> PermissionState {
            *self.state.lock().unwrap()
        }

        async fn request(&self) -> Result<PermissionState, NotificationError> {
            self.requests.fetch_add(1, Ordering::SeqCst);
            let mut state = self.state.lock().unwrap();
            *state = state.after_prompt(self.answer);
            Ok(*state)
        }
    }

    fn pipeline(perms: Arc<ScriptedPermissions>) -> (NotificationPipeline, Arc<MemoryNotificationSurface>) {
        let surface = Arc::new(MemoryNotificationSurface::new());
        let pipeline = NotificationPipeline::new(NotificationConfig::default(), perms, surface.clone());
        (pipeline, surface)
    }

    #[test]
    fn booking_body_with_and_without_fields() {
        let full = new_booking_request(&json!({"studentName": "Anna", "className": "Yoga", "time": "18:00"}));
        assert_eq!(full.body, "Anna booked Yoga at 18:00");
        assert_eq!(full.tag, TAG_BOOKING);
        assert_eq!(full.payload["type"], "booking");

        let bare = new_booking_request(&json!({}));
        assert_eq!(bare.body, "You have a new booking");

        let not_object = new_booking_request(&json!("junk"));
        assert_eq!(not_object.body, "You have a new booking");
        assert_eq!(not_object.payload.len(), 1);
    }

    #[test]
    fn reminder_requires_interaction() {
        let request = class_reminder_request(&json!({"className": "Pilates", "minutesUntil": 15}));
        assert_eq!(request.body, "Pilates starts in 15 minutes");
        assert!(request.require_interaction);
        assert_eq!(request.tag, TAG_CLASS_REMINDER);
    }

    #[test]
    fn cancellation_and_payment_bodies() {
        assert_eq!(
            cancellation_request(&json!({"className": "Spin"})).body,
            "A booking for Spin was cancelled"
        );
        let payment = payment_request(&json!({"amount": 25, "currency": "EUR", "studentName": "Ben"}));
        assert_eq!(payment.body, "Received 25 EUR from Ben");
        assert_eq!(payment.payload["type"], "payment");
        assert_eq!(payment_request(&json!({"amount": ""})).body, "You received a payment");
    }

    #[tokio::test]
    async fn requests_consent_once() {
        let perms = Arc::new(ScriptedPermissions::new(PermissionState::Default, PermissionState::Default));
        let (pipeline, _) = pipeline(perms.clone());

        assert_eq!(pipeline.initialize().await, PermissionState::Default);
        assert_eq!(pipeline.initialize().await, PermissionState::Default);
        assert!(pipeline.notify_payment(&json!({})).await.is_none());

        assert_eq!(perms.requests.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn grant_shows_confirmation_once() {
        let perms = Arc::new(ScriptedPermissions::new(PermissionState::Default, PermissionState::Granted));
        let (pipeline, surface) = pipeline(perms);

        assert_eq!(pipeline.initialize().await, PermissionState::Granted);
        pipeline.initialize().await;

        let visible = surface.visible().await;
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].request.tag, TAG_PERMISSION_GRANTED);
    }

    #[tokio::test]
    async fn denied_drops_silently() {
        let perms = Arc::new(ScriptedPermissions::new(PermissionState::Denied, PermissionState::Granted));
        let (pipeline, surface) = pipeline(perms.clone());

        assert_eq!(pipeline.initialize().await, PermissionState::Denied);
        assert!(pipeline.notify_new_booking(&json!({})).await.is_none());
        assert!(surface.visible().await.is_empty());
        assert_eq!(perms.requests.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unsupported_platform_is_a_no_op() {
        let mut perms = ScriptedPermissions::new(PermissionState::Granted, PermissionState::Granted);
        perms.supported = false;
        let (pipeline, surface) = pipeline(Arc::new(perms));

        pipeline.initialize().await;
        assert!(pipeline.notify_payment(&json!({"amount": 5})).await.is_none());
        assert!(surface.visible().await.is_empty());
    }

    #[tokio::test]
    async fn revoked_permission_is_respected() {
        let perms = Arc::new(ScriptedPermissions::new(PermissionState::Granted, PermissionState::Granted));
        let (pipeline, surface) = pipeline(perms.clone());
        pipeline.initialize().await;

        assert!(pipeline.notify_payment(&json!({})).await.is_some());
        *perms.state.lock().unwrap() = PermissionState::Denied;
        assert!(pipeline.notify_cancellation(&json!({})).await.is_none());
        assert_eq!(surface.visible().await.len(), 1);
        assert_eq!(pipeline.last_seen_permission().await, PermissionState::Denied);
    }

    #[tokio::test]
    async fn payments_coalesce() {
        let perms = Arc::new(ScriptedPermissions::new(PermissionState::Granted, PermissionState::Granted));
        let (pipeline, surface) = pipeline(perms);

        pipeline.notify_payment(&json!({"amount": 10})).await.unwrap();
        pipeline.notify_payment(&json!({"amount": 20})).await.unwrap();

        let visible = surface.visible().await;
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].request.tag, TAG_PAYMENT);
        assert_eq!(visible[0].request.body, "Received 20");
    }
}
