use super::backend::{BrowserBackend, BrowserPage};
use super::normalize::PageHygiene;
use crate::config::SessionsConfig;
use crate::error::{EntityKind, SurferError, SurferResult};
use crate::models::{Run, SessionInfo};
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavigationEvent {
    DomReady,
    DidNavigate,
    DidNavigateInPage,
}

impl fmt::Display for NavigationEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NavigationEvent::DomReady => write!(f, "dom-ready"),
            NavigationEvent::DidNavigate => write!(f, "did-navigate"),
            NavigationEvent::DidNavigateInPage => write!(f, "did-navigate-in-page"),
        }
    }
}

/// Shared access to one session's page. Page operations take an exclusive
/// lock, so the Task currently driving the session owns it for the call.
#[derive(Clone)]
pub struct SessionHandle {
    info: Arc<RwLock<SessionInfo>>,
    page: Arc<Mutex<Box<dyn BrowserPage>>>,
    hygiene: Arc<PageHygiene>,
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandle")
            .field("info", &*self.info.read())
            .finish_non_exhaustive()
    }
}

impl SessionHandle {
    fn new(info: SessionInfo, page: Box<dyn BrowserPage>, hygiene: Arc<PageHygiene>) -> Self {
        Self {
            info: Arc::new(RwLock::new(info)),
            page: Arc::new(Mutex::new(page)),
            hygiene,
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.info.read().id
    }

    pub fn run_id(&self) -> String {
        self.info.read().run_id.clone()
    }

    pub fn info(&self) -> SessionInfo {
        self.info.read().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.info.read().is_connected
    }

    /// Navigates and re-applies user-agent and zoom normalization.
    pub async fn navigate(&self, url: &str) -> SurferResult<()> {
        let mut page = self.page.lock().await;
        page.navigate(url).await?;
        self.hygiene.apply(&mut **page).await?;
        self.refresh(&**page);
        Ok(())
    }

    pub async fn content(&self) -> SurferResult<String> {
        self.page.lock().await.content().await
    }

    pub async fn url(&self) -> String {
        self.page.lock().await.url()
    }

    /// Exclusive access to the underlying page for drivers that need more
    /// than navigate/content.
    pub async fn lock(&self) -> MutexGuard<'_, Box<dyn BrowserPage>> {
        self.page.lock().await
    }

    async fn normalize(&self) -> SurferResult<()> {
        let mut page = self.page.lock().await;
        self.hygiene.apply(&mut **page).await?;
        self.refresh(&**page);
        Ok(())
    }

    async fn close_page(&self) -> SurferResult<()> {
        self.page.lock().await.close().await
    }

    fn refresh(&self, page: &dyn BrowserPage) {
        let mut info = self.info.write();
        info.url = page.url();
        info.user_agent = page.user_agent();
        info.zoom_factor = page.zoom_factor();
    }

    fn set_connected(&self, connected: bool) {
        self.info.write().is_connected = connected;
    }
}

#[derive(Default)]
struct MuxState {
    sessions: Vec<SessionHandle>,
    active_index: usize,
    overlay_visible: bool,
}

impl MuxState {
    fn position(&self, run_id: &str) -> Option<usize> {
        self.sessions
            .iter()
            .position(|s| s.info.read().run_id == run_id)
    }

    fn clamp_active(&mut self, index: usize) -> usize {
        self.active_index = if self.sessions.is_empty() {
            0
        } else {
            index.min(self.sessions.len() - 1)
        };
        self.active_index
    }
}

/// Owns the lifecycle of every browser session. At most one session is
/// visible: the one at the active index while the overlay is shown.
pub struct SessionMultiplexer {
    backend: Arc<dyn BrowserBackend>,
    hygiene: Arc<PageHygiene>,
    max_sessions: Option<usize>,
    state: RwLock<MuxState>,
}

impl SessionMultiplexer {
    pub fn new(backend: Arc<dyn BrowserBackend>, config: &SessionsConfig) -> Self {
        Self {
            backend,
            hygiene: Arc::new(PageHygiene {
                chrome_version: config.pinned_chrome_version.clone(),
                zoom_factor: config.zoom_factor,
            }),
            max_sessions: config.max_sessions,
            state: RwLock::new(MuxState::default()),
        }
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    /// Returns the session bound to `run.id`, opening one at `run.url` if needed.
    pub async fn attach(&self, run: &Run) -> SurferResult<SessionHandle> {
        if let Some(existing) = self.handle(&run.id) {
            return Ok(existing);
        }
        self.check_capacity()?;

        let mut page = self
            .backend
            .open(&run.id, &run.url)
            .await
            .map_err(|e| SurferError::session_attach(&run.id, e.to_string()))?;

        self.hygiene
            .apply(page.as_mut())
            .await
            .map_err(|e| SurferError::session_attach(&run.id, e.to_string()))?;

        let mut info = SessionInfo::new(&run.id, page.url());
        info.user_agent = page.user_agent();
        info.zoom_factor = page.zoom_factor();
        let handle = SessionHandle::new(info, page, self.hygiene.clone());

        let raced = {
            let mut state = self.state.write();
            if let Some(index) = state.position(&run.id) {
                Some(Ok(state.sessions[index].clone()))
            } else if let Some(max) = self.max_sessions.filter(|max| state.sessions.len() >= *max) {
                Some(Err(SurferError::SessionLimit(max)))
            } else {
                state.sessions.push(handle.clone());
                let last = state.sessions.len() - 1;
                state.clamp_active(last);
                state.overlay_visible = true;
                None
            }
        };

        if let Some(result) = raced {
            if let Err(e) = handle.close_page().await {
                warn!(run_id = %run.id, error = %e, "Failed to close surplus page");
            }
            return result;
        }

        info!(
            run_id = %run.id,
            session_id = %handle.session_id(),
            backend = self.backend.name(),
            "Session attached"
        );
        Ok(handle)
    }

    fn check_capacity(&self) -> SurferResult<()> {
        match self.max_sessions {
            Some(max) if self.state.read().sessions.len() >= max => {
                Err(SurferError::SessionLimit(max))
            }
            _ => Ok(()),
        }
    }

    pub fn handle(&self, run_id: &str) -> Option<SessionHandle> {
        let state = self.state.read();
        state.position(run_id).map(|i| state.sessions[i].clone())
    }

    /// Selects the visible session. Out-of-range indexes are clamped.
    pub fn set_active(&self, index: usize) -> usize {
        self.state.write().clamp_active(index)
    }

    pub fn active_index(&self) -> usize {
        self.state.read().active_index
    }

    /// Tears down the session bound to `run_id`. Returns false if none existed.
    pub async fn close(&self, run_id: &str) -> bool {
        let removed = {
            let mut state = self.state.write();
            let Some(index) = state.position(run_id) else {
                return false;
            };
            let handle = state.sessions.remove(index);

            let active = if index < state.active_index {
                state.active_index - 1
            } else {
                state.active_index
            };
            state.clamp_active(active);
            if state.sessions.is_empty() {
                state.overlay_visible = false;
            }
            handle
        };

        if let Err(e) = removed.close_page().await {
            warn!(run_id = %run_id, error = %e, "Failed to close page cleanly");
        }
        info!(run_id = %run_id, "Session closed");
        true
    }

    pub async fn close_all(&self) {
        for run_id in self.run_ids() {
            self.close(&run_id).await;
        }
    }

    /// Pins the Chrome version in the user agent and applies the zoom factor.
    pub async fn normalize(&self, run_id: &str) -> SurferResult<()> {
        let handle = self
            .handle(run_id)
            .ok_or_else(|| SurferError::not_found(EntityKind::Session, run_id))?;
        handle.normalize().await
    }

    pub async fn on_navigation(&self, run_id: &str, event: NavigationEvent) -> SurferResult<()> {
        debug!(run_id = %run_id, event = %event, "Navigation event");
        self.normalize(run_id).await
    }

    pub fn set_connected(&self, run_id: &str, connected: bool) -> bool {
        match self.handle(run_id) {
            Some(handle) => {
                handle.set_connected(connected);
                true
            }
            None => false,
        }
    }

    pub fn sessions(&self) -> Vec<SessionInfo> {
        let state = self.state.read();
        state
            .sessions
            .iter()
            .enumerate()
            .map(|(i, s)| {
                let mut info = s.info();
                info.visible = state.overlay_visible && i == state.active_index;
                info
            })
            .collect()
    }

    pub fn run_ids(&self) -> Vec<String> {
        self.state
            .read()
            .sessions
            .iter()
            .map(|s| s.run_id())
            .collect()
    }

    pub fn visible_run_id(&self) -> Option<String> {
        let state = self.state.read();
        if !state.overlay_visible {
            return None;
        }
        state.sessions.get(state.active_index).map(|s| s.run_id())
    }

    /// Shows or hides the overlay. It stays hidden while no session exists.
    pub fn toggle_overlay(&self) -> bool {
        let mut state = self.state.write();
        state.overlay_visible = !state.overlay_visible && !state.sessions.is_empty();
        state.overlay_visible
    }

    pub fn is_overlay_visible(&self) -> bool {
        self.state.read().overlay_visible
    }

    pub fn len(&self) -> usize {
        self.state.read().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Task;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct FakePage {
        url: String,
        user_agent: String,
        zoom: f64,
        closed: Arc<AtomicBool>,
    }

    #[async_trait]
    impl BrowserPage for FakePage {
        fn url(&self) -> String {
            self.url.clone()
        }

        fn user_agent(&self) -> String {
            self.user_agent.clone()
        }

        async fn set_user_agent(&mut self, user_agent: &str) -> SurferResult<()> {
            self.user_agent = user_agent.to_string();
            Ok(())
        }

        fn zoom_factor(&self) -> f64 {
            self.zoom
        }

        async fn set_zoom_factor(&mut self, factor: f64) -> SurferResult<()> {
            self.zoom = factor;
            Ok(())
        }

        async fn navigate(&mut self, url: &str) -> SurferResult<()> {
            self.url = url.to_string();
            self.user_agent = "Mozilla/5.0 Chrome/131.0.6778.85 Safari/537.36".to_string();
            self.zoom = 1.0;
            Ok(())
        }

        async fn content(&mut self) -> SurferResult<String> {
            Ok(format!("<html>{}</html>", self.url))
        }

        async fn close(&mut self) -> SurferResult<()> {
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeBackend {
        fail: bool,
        closed: Arc<AtomicBool>,
    }

    #[async_trait]
    impl BrowserBackend for FakeBackend {
        fn name(&self) -> &str {
            "fake"
        }

        async fn open(&self, _run_id: &str, url: &str) -> SurferResult<Box<dyn BrowserPage>> {
            if self.fail {
                return Err(SurferError::Io("connection refused".to_string()));
            }
            Ok(Box::new(FakePage {
                url: url.to_string(),
                user_agent: "Mozilla/5.0 Chrome/131.0.6778.85 Safari/537.36".to_string(),
                zoom: 1.0,
                closed: self.closed.clone(),
            }))
        }
    }

    fn run(platform_id: &str) -> Run {
        Run::new(
            platform_id,
            format!("{}-all", platform_id),
            format!("https://{}.example.com", platform_id),
            Vec::<Task>::new(),
            Utc::now(),
        )
    }

    fn mux_with(backend: FakeBackend, max_sessions: Option<usize>) -> SessionMultiplexer {
        let config = SessionsConfig {
            max_sessions,
            ..SessionsConfig::default()
        };
        SessionMultiplexer::new(Arc::new(backend), &config)
    }

    #[tokio::test]
    async fn test_attach_normalizes_and_activates() {
        let mux = mux_with(FakeBackend::default(), None);
        let run = run("github-001");

        let handle = mux.attach(&run).await.unwrap();
        let info = handle.info();

        assert!(info.user_agent.contains("Chrome/127.0.0.0"));
        assert_eq!(info.zoom_factor, 0.8);
        assert!(mux.is_overlay_visible());
        assert_eq!(mux.visible_run_id(), Some(run.id.clone()));
        assert!(mux.sessions()[0].visible);
    }

    #[tokio::test]
    async fn test_attach_reuses_existing_session() {
        let mux = mux_with(FakeBackend::default(), None);
        let run = run("github-001");

        let first = mux.attach(&run).await.unwrap();
        let second = mux.attach(&run).await.unwrap();

        assert_eq!(first.session_id(), second.session_id());
        assert_eq!(mux.len(), 1);
    }

    #[tokio::test]
    async fn test_session_limit() {
        let mux = mux_with(FakeBackend::default(), Some(1));
        mux.attach(&run("github-001")).await.unwrap();

        let err = mux.attach(&run("gmail-001")).await.unwrap_err();
        assert!(matches!(err, SurferError::SessionLimit(1)));
    }

    #[tokio::test]
    async fn test_backend_failure_is_attach_error() {
        let mux = mux_with(
            FakeBackend {
                fail: true,
                ..FakeBackend::default()
            },
            None,
        );
        let err = mux.attach(&run("github-001")).await.unwrap_err();
        assert!(matches!(err, SurferError::SessionAttach { .. }));
        assert!(mux.is_empty());
    }

    #[tokio::test]
    async fn test_active_index_is_clamped() {
        let mux = mux_with(FakeBackend::default(), None);
        assert_eq!(mux.set_active(5), 0);

        let a = run("github-001");
        let b = run("gmail-001");
        let c = run("notion-001");
        mux.attach(&a).await.unwrap();
        mux.attach(&b).await.unwrap();
        mux.attach(&c).await.unwrap();
        assert_eq!(mux.active_index(), 2);

        assert_eq!(mux.set_active(10), 2);
        assert_eq!(mux.set_active(1), 1);
        assert_eq!(mux.visible_run_id(), Some(b.id.clone()));

        assert!(mux.close(&a.id).await);
        assert_eq!(mux.active_index(), 0);
        assert_eq!(mux.visible_run_id(), Some(b.id.clone()));

        assert!(mux.close(&c.id).await);
        assert_eq!(mux.active_index(), 0);

        assert!(mux.close(&b.id).await);
        assert_eq!(mux.active_index(), 0);
        assert!(!mux.is_overlay_visible());
        assert_eq!(mux.visible_run_id(), None);
    }

    #[tokio::test]
    async fn test_close_unknown_is_noop() {
        let mux = mux_with(FakeBackend::default(), None);
        assert!(!mux.close("missing").await);
    }

    #[tokio::test]
    async fn test_close_tears_down_page() {
        let backend = FakeBackend::default();
        let closed = backend.closed.clone();
        let mux = mux_with(backend, None);
        let run = run("github-001");
        mux.attach(&run).await.unwrap();

        mux.close(&run.id).await;
        assert!(closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_navigation_reapplies_normalization() {
        let mux = mux_with(FakeBackend::default(), None);
        let run = run("github-001");
        let handle = mux.attach(&run).await.unwrap();

        {
            let mut page = handle.lock().await;
            page.navigate("https://github.com/settings").await.unwrap();
            assert_eq!(page.zoom_factor(), 1.0);
        }

        mux.on_navigation(&run.id, NavigationEvent::DidNavigate)
            .await
            .unwrap();
        let info = handle.info();
        assert_eq!(info.url, "https://github.com/settings");
        assert_eq!(info.zoom_factor, 0.8);
        assert!(info.user_agent.contains("Chrome/127.0.0.0"));

        handle.navigate("https://github.com/repos").await.unwrap();
        assert_eq!(handle.info().zoom_factor, 0.8);
    }

    #[tokio::test]
    async fn test_toggle_overlay() {
        let mux = mux_with(FakeBackend::default(), None);
        assert!(!mux.toggle_overlay());

        let run = run("github-001");
        mux.attach(&run).await.unwrap();
        assert!(!mux.toggle_overlay());
        assert_eq!(mux.visible_run_id(), None);
        assert!(mux.toggle_overlay());
        assert_eq!(mux.visible_run_id(), Some(run.id));
    }

    #[tokio::test]
    async fn test_set_connected() {
        let mux = mux_with(FakeBackend::default(), None);
        let run = run("gmail-001");
        mux.attach(&run).await.unwrap();

        assert!(mux.set_connected(&run.id, false));
        assert!(!mux.sessions()[0].is_connected);
        assert!(!mux.set_connected("missing", false));
    }
}
