//! Raw pointer input as delivered by the shell.
//!
//! Shells translate their native touch/pointer events into [`ContactEvent`]s
//! and feed them to the recognizers one at a time.

use serde::{Deserialize, Serialize};

/// Position of a contact at a moment in time. Coordinates are logical
/// pixels, with y growing downwards.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ContactSample {
    pub x: f64,
    pub y: f64,
    pub timestamp_ms: f64,
}

impl ContactSample {
    #[must_use]
    pub const fn new(x: f64, y: f64, timestamp_ms: f64) -> Self {
        Self { x, y, timestamp_ms }
    }

    /// Returns `None` if any component is NaN or infinite.
    #[must_use]
    pub fn checked(x: f64, y: f64, timestamp_ms: f64) -> Option<Self> {
        if !x.is_finite() || !y.is_finite() || !timestamp_ms.is_finite() {
            return None;
        }
        Some(Self::new(x, y, timestamp_ms))
    }
}

/// A sample tagged with the pointer that produced it.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    pub pointer_id: u32,
    pub sample: ContactSample,
}

impl Contact {
    #[must_use]
    pub const fn new(pointer_id: u32, sample: ContactSample) -> Self {
        Self { pointer_id, sample }
    }

    /// Shorthand for a contact from the first pointer.
    #[must_use]
    pub const fn primary(x: f64, y: f64, timestamp_ms: f64) -> Self {
        Self::new(0, ContactSample::new(x, y, timestamp_ms))
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "phase", content = "contact", rename_all = "snake_case")]
pub enum ContactEvent {
    Start(Contact),
    Move(Contact),
    End(Contact),
    /// The platform aborted the contact or the page is going away.
    Cancel,
}

impl ContactEvent {
    #[must_use]
    pub const fn contact(&self) -> Option<&Contact> {
        match self {
            Self::Start(c) | Self::Move(c) | Self::End(c) => Some(c),
            Self::Cancel => None,
        }
    }
}
