use super::backend::{BrowserBackend, BrowserPage};
use crate::error::{SurferError, SurferResult};
use async_trait::async_trait;
use reqwest::header::USER_AGENT;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.6778.85 Safari/537.36";

/// Headless backend that fetches pages over HTTP. Each page keeps its own
/// user agent, zoom factor and last response body.
pub struct HttpBackend {
    client: Client,
}

impl HttpBackend {
    pub fn new(timeout: Duration) -> SurferResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SurferError::Internal(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl BrowserBackend for HttpBackend {
    fn name(&self) -> &str {
        "http"
    }

    async fn open(&self, run_id: &str, url: &str) -> SurferResult<Box<dyn BrowserPage>> {
        let mut page = HttpPage {
            client: self.client.clone(),
            url: url.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            zoom_factor: 1.0,
            body: None,
            closed: false,
        };
        page.navigate(url).await?;
        debug!(run_id = %run_id, url = %page.url, "HTTP page opened");
        Ok(Box::new(page))
    }
}

pub struct HttpPage {
    client: Client,
    url: String,
    user_agent: String,
    zoom_factor: f64,
    body: Option<String>,
    closed: bool,
}

impl HttpPage {
    fn ensure_open(&self) -> SurferResult<()> {
        if self.closed {
            return Err(SurferError::Internal(format!(
                "page for {} is closed",
                self.url
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl BrowserPage for HttpPage {
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
        self.zoom_factor
    }

    async fn set_zoom_factor(&mut self, factor: f64) -> SurferResult<()> {
        self.zoom_factor = factor;
        Ok(())
    }

    async fn navigate(&mut self, url: &str) -> SurferResult<()> {
        self.ensure_open()?;

        let response = self
            .client
            .get(url)
            .header(USER_AGENT, &self.user_agent)
            .send()
            .await
            .map_err(|e| SurferError::Io(format!("GET {} failed: {}", url, e)))?;

        let status = response.status();
        self.url = response.url().to_string();
        let body = response
            .text()
            .await
            .map_err(|e| SurferError::Io(format!("reading {} failed: {}", url, e)))?;

        debug!(url = %self.url, status = %status, bytes = body.len(), "Page loaded");
        self.body = Some(body);
        Ok(())
    }

    async fn content(&mut self) -> SurferResult<String> {
        self.ensure_open()?;
        Ok(self.body.clone().unwrap_or_default())
    }

    async fn close(&mut self) -> SurferResult<()> {
        self.closed = true;
        self.body = None;
        Ok(())
    }
}
