//! Platform seams. The shell implements these traits; the core only talks
//! to the platform through them.

mod cache;
mod clients;
mod network;
mod push;

pub use self::cache::{
    CacheEntry, CacheError, CacheKey, CacheName, CacheReader, CacheStorage, CachedResponse,
    MemoryCacheStorage, MAX_ENTRIES_PER_STORE,
};
pub use self::clients::{ClientError, ClientWindow, ClientWindows};
pub use self::network::{Headers, Method, Network, NetworkError, Request, Response};
pub use self::push::{
    BackgroundChannel, DisplayedNotification, MemoryNotificationSurface, NotificationError,
    NotificationRequest, NotificationSurface, PermissionProvider, PermissionState,
};
