// lib.rs - offline shell core for the teacher portal

#![forbid(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::missing_errors_doc)]

pub mod capabilities;
pub mod config;
pub mod delivery;
pub mod error;
pub mod event;
pub mod gesture;
pub mod model;
pub mod notifications;
pub mod offline_store;
pub mod pull_to_refresh;
pub mod worker;

pub use config::{
    ConfigError, GestureConfig, NotificationConfig, PullToRefreshConfig, RouteTable, ShellConfig,
    WorkerConfig,
};
pub use delivery::{NotificationData, NotificationKind, PushMessage};
pub use error::{ErrorKind, ShellError};
pub use event::{Contact, ContactEvent, ContactSample};
pub use gesture::{Direction, GestureRecognizer, SwipeEvent};
pub use model::{AuthResponse, ClientId, NotificationId, UnixTimeMs};
pub use notifications::NotificationPipeline;
pub use offline_store::{CacheSnapshot, StoreError};
pub use pull_to_refresh::{PullToRefreshController, PullVisual};
pub use worker::{
    ClickOutcome, FetchOutcome, NotificationClick, OfflineCacheWorker, WorkerError, WorkerEvent,
    WorkerOutcome, WorkerPlatform, WorkerRegistration, WorkerState,
};
