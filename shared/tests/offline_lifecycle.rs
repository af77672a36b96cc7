use async_trait::async_trait;
use offline_shell::capabilities::{
    CacheName, CacheStorage, ClientError, ClientWindow, ClientWindows, MemoryCacheStorage,
    MemoryNotificationSurface, Network, NetworkError, NotificationError, PermissionProvider,
    PermissionState, Request, Response,
};
use offline_shell::{
    CacheSnapshot, ClientId, ErrorKind, NotificationConfig, OfflineCacheWorker, WorkerConfig,
    WorkerError, WorkerPlatform, WorkerRegistration, WorkerState,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use url::Url;

const ORIGIN: &str = "https://portal.test/";
const MANIFEST: &[&str] = &["/", "/dashboard.html", "/class-table.html", "/styles.css"];

#[derive(Default)]
struct FakeNetwork {
    routes: Mutex<HashMap<String, Response>>,
    calls: AtomicUsize,
}

impl FakeNetwork {
    fn serve(&self, path: &str, body: &str) {
        self.serve_response(path, Response::ok(body.to_string()));
    }

    fn serve_response(&self, path: &str, response: Response) {
        let url = Url::parse(ORIGIN).unwrap().join(path).unwrap().to_string();
        self.routes.lock().unwrap().insert(url, response);
    }

    fn unplug(&self) {
        self.routes.lock().unwrap().clear();
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Network for FakeNetwork {
    async fn fetch(&self, request: &Request) -> Result<Response, NetworkError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.routes
            .lock()
            .unwrap()
            .get(request.url.as_str())
            .cloned()
            .ok_or(NetworkError::Offline)
    }
}

#[derive(Default)]
struct NoWindows;

#[async_trait]
impl ClientWindows for NoWindows {
    async fn list(&self) -> Vec<ClientWindow> {
        Vec::new()
    }

    async fn focus(&self, id: &ClientId) -> Result<(), ClientError> {
        Err(ClientError::Gone(id.to_string()))
    }

    async fn open(&self, _url: &str) -> Result<ClientId, ClientError> {
        Ok(ClientId::generate())
    }
}

struct Consented;

#[async_trait]
impl PermissionProvider for Consented {
    fn is_supported(&self) -> bool {
        true
    }

    async fn query(&self) -> PermissionState {
        PermissionState::Granted
    }

    async fn request(&self) -> Result<PermissionState, NotificationError> {
        Ok(PermissionState::Granted)
    }
}

struct Shell {
    cache: Arc<MemoryCacheStorage>,
    network: Arc<FakeNetwork>,
    registration: WorkerRegistration,
}

impl Shell {
    fn new() -> Self {
        let network = Arc::new(FakeNetwork::default());
        for path in MANIFEST {
            network.serve(path, &format!("v1 {path}"));
        }
        Self {
            cache: Arc::new(MemoryCacheStorage::new()),
            registration: WorkerRegistration::new(network.clone()),
            network,
        }
    }

    fn worker(&self, version: &str, skip_waiting: bool) -> OfflineCacheWorker {
        let config = WorkerConfig {
            origin: ORIGIN.into(),
            version: version.into(),
            manifest: MANIFEST.iter().map(|s| (*s).to_string()).collect(),
            skip_waiting,
            ..WorkerConfig::default()
        };
        let platform = WorkerPlatform {
            cache: self.cache.clone(),
            network: self.network.clone(),
            notifications: Arc::new(MemoryNotificationSurface::new()),
            permissions: Arc::new(Consented),
            clients: Arc::new(NoWindows),
        };
        OfflineCacheWorker::new(config, NotificationConfig::default(), platform).unwrap()
    }
}

fn url(path: &str) -> String {
    format!("https://portal.test{path}")
}

#[tokio::test]
async fn manifest_is_served_offline_after_install() {
    let shell = Shell::new();
    let state = shell.registration.register(shell.worker("v1", true)).await.unwrap();
    assert_eq!(state, WorkerState::Active);

    shell.network.unplug();
    for path in MANIFEST {
        let outcome = shell
            .registration
            .fetch(&Request::get(&url(path)).unwrap())
            .await
            .unwrap();
        assert!(outcome.from_cache(), "{path} should come from cache");
        assert_eq!(outcome.into_response().body, format!("v1 {path}").into_bytes());
    }

    let miss = shell
        .registration
        .fetch(&Request::get(&url("/not-cached.html")).unwrap())
        .await;
    assert!(matches!(miss, Err(WorkerError::Network(NetworkError::Offline))));
}

#[tokio::test]
async fn cache_hits_never_touch_the_network() {
    let shell = Shell::new();
    shell.registration.register(shell.worker("v1", true)).await.unwrap();

    let before = shell.network.calls();
    shell
        .registration
        .fetch(&Request::get(&url("/dashboard.html")).unwrap())
        .await
        .unwrap();
    assert_eq!(shell.network.calls(), before);
}

#[tokio::test]
async fn version_bump_purges_previous_store() {
    let shell = Shell::new();
    shell.registration.register(shell.worker("v1", true)).await.unwrap();
    let old = shell.registration.active().await.unwrap();

    for path in MANIFEST {
        shell.network.serve(path, &format!("v2 {path}"));
    }
    shell.registration.register(shell.worker("v2", true)).await.unwrap();

    assert_eq!(
        shell.cache.names().await.unwrap(),
        vec![CacheName::new("teacher-portal-v2")]
    );
    assert_eq!(old.state().await, WorkerState::Redundant);

    let reader = shell.registration.cache_reader().await.unwrap();
    let stale = reader
        .lookup_in(&CacheName::new("teacher-portal-v1"), &Url::parse(&url("/")).unwrap())
        .await
        .unwrap();
    assert!(stale.is_none());

    let fresh = reader.lookup(&Url::parse(&url("/")).unwrap()).await.unwrap().unwrap();
    assert_eq!(fresh.body().as_ref(), b"v2 /");
}

#[tokio::test]
async fn waiting_worker_keeps_old_version_serving() {
    let shell = Shell::new();
    shell.registration.register(shell.worker("v1", true)).await.unwrap();

    shell.network.serve("/", "v2 /");
    let state = shell.registration.register(shell.worker("v2", false)).await.unwrap();
    assert_eq!(state, WorkerState::Waiting);

    let names = shell.cache.names().await.unwrap();
    assert_eq!(names.len(), 2);

    let outcome = shell
        .registration
        .fetch(&Request::get(&url("/")).unwrap())
        .await
        .unwrap();
    assert_eq!(outcome.response().body.as_ref(), b"v1 /");

    assert!(shell.registration.activate_waiting().await.unwrap());
    assert!(!shell.registration.activate_waiting().await.unwrap());
    assert_eq!(
        shell.cache.names().await.unwrap(),
        vec![CacheName::new("teacher-portal-v2")]
    );
}

#[tokio::test]
async fn failed_install_keeps_previous_version() {
    let shell = Shell::new();
    shell.registration.register(shell.worker("v1", true)).await.unwrap();

    shell
        .network
        .serve_response("/styles.css", Response::new(404, "missing"));
    let err = shell
        .registration
        .register(shell.worker("v2", true))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InstallFailure);
    assert!(err.kind().is_fatal());

    assert_eq!(
        shell.cache.names().await.unwrap(),
        vec![CacheName::new("teacher-portal-v1")]
    );
    let active = shell.registration.active().await.unwrap();
    assert_eq!(active.version(), "v1");
    assert_eq!(active.state().await, WorkerState::Active);
}

#[tokio::test]
async fn reinstalling_same_manifest_is_idempotent() {
    let shell = Shell::new();
    let first = shell.worker("v1", false);
    first.install().await.unwrap();
    let name = first.cache_name().clone();
    let before = shell.cache.export().await;

    let second = shell.worker("v1", false);
    second.install().await.unwrap();
    let after = shell.cache.export().await;

    assert_eq!(before, after);
    let keys = shell.cache.keys(&name).await.unwrap();
    assert_eq!(keys.len(), MANIFEST.len());
}

#[tokio::test]
async fn snapshot_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("offline-cache.snap");

    let shell = Shell::new();
    shell.registration.register(shell.worker("v1", true)).await.unwrap();
    CacheSnapshot::capture(&shell.cache)
        .await
        .save_to_path(&path)
        .unwrap();

    let restored = MemoryCacheStorage::new();
    CacheSnapshot::load_from_path(&path)
        .unwrap()
        .unwrap()
        .restore_into(&restored)
        .await
        .unwrap();

    assert_eq!(restored.export().await, shell.cache.export().await);
}
