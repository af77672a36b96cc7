use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::PullToRefreshConfig;
use crate::event::{Contact, ContactEvent};

/// Visual state of the pull indicator.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PullVisual {
    pub offset_px: f64,
    /// `min(pull / threshold, 1)`.
    pub progress: f64,
    /// Releasing now would trigger a refresh.
    pub ready: bool,
}

impl PullVisual {
    pub const NEUTRAL: PullVisual = PullVisual {
        offset_px: 0.0,
        progress: 0.0,
        ready: false,
    };
}

#[derive(Copy, Clone, Debug, PartialEq)]
enum PullState {
    Idle,
    /// Gesture began away from the top; treated as a normal scroll.
    Scrolling { pointer_id: u32 },
    Pulling { start: Contact, distance: f64 },
}

type RefreshCallback = Box<dyn FnMut() + Send>;

/// Drives a refresh callback from a downward drag that starts at the top
/// of a scroll container.
pub struct PullToRefreshController {
    config: PullToRefreshConfig,
    state: PullState,
    visual: PullVisual,
    on_refresh: Option<RefreshCallback>,
}

impl std::fmt::Debug for PullToRefreshController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PullToRefreshController")
            .field("config", &self.config)
            .field("state", &self.state)
            .field("visual", &self.visual)
            .field("has_callback", &self.on_refresh.is_some())
            .finish()
    }
}

impl Default for PullToRefreshController {
    fn default() -> Self {
        Self::new(PullToRefreshConfig::default())
    }
}

impl PullToRefreshController {
    #[must_use]
    pub fn new(config: PullToRefreshConfig) -> Self {
        Self {
            config,
            state: PullState::Idle,
            visual: PullVisual::NEUTRAL,
            on_refresh: None,
        }
    }

    pub fn on_refresh<F>(&mut self, callback: F) -> &mut Self
    where
        F: FnMut() + Send + 'static,
    {
        self.on_refresh = Some(Box::new(callback));
        self
    }

    pub fn visual(&self) -> PullVisual {
        self.visual
    }

    pub fn is_pulling(&self) -> bool {
        matches!(self.state, PullState::Pulling { .. })
    }

    /// Feeds one contact event together with the container's scroll offset
    /// at that moment. Only the offset seen at `Start` matters.
    /// Returns `true` when this event triggered a refresh.
    pub fn handle(&mut self, event: ContactEvent, scroll_top: f64) -> bool {
        match (event, self.state) {
            (ContactEvent::Start(contact), PullState::Idle) => {
                self.state = if scroll_top == 0.0 {
                    PullState::Pulling { start: contact, distance: 0.0 }
                } else {
                    PullState::Scrolling { pointer_id: contact.pointer_id }
                };
                false
            }
            (ContactEvent::Move(contact), PullState::Pulling { start, .. })
                if contact.pointer_id == start.pointer_id =>
            {
                let distance = (contact.sample.y - start.sample.y).max(0.0);
                self.state = PullState::Pulling { start, distance };
                self.visual = self.visual_for(distance);
                false
            }
            (ContactEvent::End(contact), PullState::Pulling { start, distance })
                if contact.pointer_id == start.pointer_id =>
            {
                let distance = distance.max((contact.sample.y - start.sample.y).max(0.0));
                self.reset();
                if distance >= self.config.threshold_px {
                    info!(distance, "pull to refresh triggered");
                    if let Some(callback) = self.on_refresh.as_mut() {
                        callback();
                    }
                    true
                } else {
                    debug!(distance, "pull released below threshold");
                    false
                }
            }
            (ContactEvent::End(contact), PullState::Scrolling { pointer_id })
                if contact.pointer_id == pointer_id =>
            {
                self.reset();
                false
            }
            (ContactEvent::Cancel, _) => {
                self.reset();
                false
            }
            _ => false,
        }
    }

    fn visual_for(&self, distance: f64) -> PullVisual {
        let progress = (distance / self.config.threshold_px).min(1.0);
        PullVisual {
            offset_px: progress * self.config.max_offset_px,
            progress,
            ready: distance >= self.config.threshold_px,
        }
    }

    fn reset(&mut self) {
        self.state = PullState::Idle;
        self.visual = PullVisual::NEUTRAL;
    }
}
