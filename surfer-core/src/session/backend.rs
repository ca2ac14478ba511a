use crate::error::SurferResult;
use async_trait::async_trait;

/// One browser page. Implementations own their own cookies and profile.
#[async_trait]
pub trait BrowserPage: Send + Sync {
    fn url(&self) -> String;

    fn user_agent(&self) -> String;

    async fn set_user_agent(&mut self, user_agent: &str) -> SurferResult<()>;

    fn zoom_factor(&self) -> f64;

    async fn set_zoom_factor(&mut self, factor: f64) -> SurferResult<()>;

    async fn navigate(&mut self, url: &str) -> SurferResult<()>;

    /// The document body of the current page.
    async fn content(&mut self) -> SurferResult<String>;

    async fn close(&mut self) -> SurferResult<()>;
}

#[async_trait]
pub trait BrowserBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Opens a page bound to `run_id` and loads `url` in it.
    async fn open(&self, run_id: &str, url: &str) -> SurferResult<Box<dyn BrowserPage>>;
}
