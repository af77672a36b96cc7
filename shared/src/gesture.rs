//! Swipe recognition over a single contact sequence.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::GestureConfig;
use crate::event::{Contact, ContactEvent, ContactSample};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
}

impl Direction {
    pub const ALL: [Direction; 4] = [Self::Up, Self::Down, Self::Left, Self::Right];

    const fn index(self) -> usize {
        match self {
            Self::Up => 0,
            Self::Down => 1,
            Self::Left => 2,
            Self::Right => 3,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SwipeEvent {
    pub direction: Direction,
    /// Absolute displacement along the dominant axis.
    pub distance: f64,
}

/// Pure classification of a start/end pair.
#[must_use]
pub fn classify(start: &ContactSample, end: &ContactSample, config: &GestureConfig) -> Option<SwipeEvent> {
    let delta_x = end.x - start.x;
    let delta_y = end.y - start.y;
    let delta_t = end.timestamp_ms - start.timestamp_ms;

    if delta_t.is_nan() || delta_t >= config.timeout_ms {
        return None;
    }

    let (abs_x, abs_y) = (delta_x.abs(), delta_y.abs());
    let (direction, distance) = if abs_x > abs_y {
        let dir = if delta_x > 0.0 { Direction::Right } else { Direction::Left };
        (dir, abs_x)
    } else if abs_y > abs_x {
        let dir = if delta_y > 0.0 { Direction::Down } else { Direction::Up };
        (dir, abs_y)
    } else {
        return None;
    };

    (distance > config.threshold_px).then_some(SwipeEvent { direction, distance })
}

type SwipeCallback = Box<dyn FnMut(SwipeEvent) + Send>;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Tracking {
    Idle,
    Started(Contact),
}

/// Emits at most one [`SwipeEvent`] per contact sequence. Holds no state
/// across gestures.
pub struct GestureRecognizer {
    config: GestureConfig,
    state: Tracking,
    callbacks: [Option<SwipeCallback>; 4],
}

impl std::fmt::Debug for GestureRecognizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let registered: Vec<Direction> = Direction::ALL
            .into_iter()
            .filter(|d| self.callbacks[d.index()].is_some())
            .collect();
        f.debug_struct("GestureRecognizer")
            .field("config", &self.config)
            .field("state", &self.state)
            .field("registered", &registered)
            .finish()
    }
}

impl Default for GestureRecognizer {
    fn default() -> Self {
        Self::new(GestureConfig::default())
    }
}

impl GestureRecognizer {
    #[must_use]
    pub fn new(config: GestureConfig) -> Self {
        Self {
            config,
            state: Tracking::Idle,
            callbacks: [None, None, None, None],
        }
    }

    pub fn config(&self) -> &GestureConfig {
        &self.config
    }

    pub fn is_tracking(&self) -> bool {
        matches!(self.state, Tracking::Started(_))
    }

    /// Replaces any callback registered for `direction`.
    pub fn on_swipe<F>(&mut self, direction: Direction, callback: F) -> &mut Self
    where
        F: FnMut(SwipeEvent) + Send + 'static,
    {
        self.callbacks[direction.index()] = Some(Box::new(callback));
        self
    }

    pub fn on_swipe_up<F>(&mut self, callback: F) -> &mut Self
    where
        F: FnMut(SwipeEvent) + Send + 'static,
    {
        self.on_swipe(Direction::Up, callback)
    }

    pub fn on_swipe_down<F>(&mut self, callback: F) -> &mut Self
    where
        F: FnMut(SwipeEvent) + Send + 'static,
    {
        self.on_swipe(Direction::Down, callback)
    }

    pub fn on_swipe_left<F>(&mut self, callback: F) -> &mut Self
    where
        F: FnMut(SwipeEvent) + Send + 'static,
    {
        self.on_swipe(Direction::Left, callback)
    }

    pub fn on_swipe_right<F>(&mut self, callback: F) -> &mut Self
    where
        F: FnMut(SwipeEvent) + Send + 'static,
    {
        self.on_swipe(Direction::Right, callback)
    }

    pub fn clear(&mut self, direction: Direction) -> &mut Self {
        self.callbacks[direction.index()] = None;
        self
    }

    /// Feeds one contact event. Returns the swipe recognized at contact end,
    /// after it has been handed to the registered callback (if any).
    pub fn handle(&mut self, event: ContactEvent) -> Option<SwipeEvent> {
        match (event, self.state) {
            (ContactEvent::Start(contact), Tracking::Idle) => {
                self.state = Tracking::Started(contact);
                None
            }
            // Secondary contacts never replace the tracked one.
            (ContactEvent::Start(_), Tracking::Started(_)) | (ContactEvent::Move(_), _) => None,
            (ContactEvent::End(end), Tracking::Started(start)) => {
                if end.pointer_id != start.pointer_id {
                    return None;
                }
                self.state = Tracking::Idle;
                let swipe = classify(&start.sample, &end.sample, &self.config)?;
                self.dispatch(swipe);
                Some(swipe)
            }
            (ContactEvent::End(_), Tracking::Idle) => {
                debug!("contact end without a start, ignored");
                None
            }
            (ContactEvent::Cancel, _) => {
                self.state = Tracking::Idle;
                None
            }
        }
    }

    fn dispatch(&mut self, swipe: SwipeEvent) {
        debug!(direction = ?swipe.direction, distance = swipe.distance, "swipe recognized");
        if let Some(callback) = self.callbacks[swipe.direction.index()].as_mut() {
            callback(swipe);
        }
    }
}
