//! The contract between the orchestrator and per-platform page walkers.

use crate::artifact::Artifact;
use crate::error::{SurferError, SurferResult};
use crate::orchestrator::{Pacer, StopProbe};
use crate::session::SessionHandle;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DriverError {
    /// The session is not signed in. The orchestrator waits for the user
    /// and then invokes the same step again.
    #[error("not connected")]
    AuthRequired,

    #[error("cancelled")]
    Cancelled,

    #[error("{0}")]
    Failed(String),
}

impl DriverError {
    pub fn failed(message: impl Into<String>) -> Self {
        DriverError::Failed(message.into())
    }
}

impl From<SurferError> for DriverError {
    fn from(err: SurferError) -> Self {
        DriverError::Failed(err.to_string())
    }
}

/// Which step of which Run a driver call is for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepTarget {
    pub run_id: String,
    pub platform_id: String,
    pub sub_run_id: String,
    pub task_id: String,
    pub step_id: String,
    pub step_name: String,
    pub url: String,
}

pub struct StepContext {
    pub session: SessionHandle,
    pub target: StepTarget,
    pub pacer: Arc<Pacer>,
    pub stop: StopProbe,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepReport {
    pub logs: Option<String>,
    pub artifacts: Vec<Artifact>,
}

impl StepReport {
    pub fn with_logs(logs: impl Into<String>) -> Self {
        Self {
            logs: Some(logs.into()),
            artifacts: Vec::new(),
        }
    }

    pub fn artifact(mut self, artifact: Artifact) -> Self {
        self.artifacts.push(artifact);
        self
    }
}

#[async_trait]
pub trait ExtractionDriver: Send + Sync {
    fn name(&self) -> &str;

    async fn run_step(&self, ctx: &StepContext) -> Result<StepReport, DriverError>;
}

/// Maps `(platform_id, sub_run_id)` to the driver that walks it.
#[derive(Default, Clone)]
pub struct DriverRegistry {
    drivers: HashMap<(String, String), Arc<dyn ExtractionDriver>>,
    fallback: Option<Arc<dyn ExtractionDriver>>,
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        platform_id: impl Into<String>,
        sub_run_id: impl Into<String>,
        driver: Arc<dyn ExtractionDriver>,
    ) {
        self.drivers
            .insert((platform_id.into(), sub_run_id.into()), driver);
    }

    pub fn with_fallback(mut self, driver: Arc<dyn ExtractionDriver>) -> Self {
        self.fallback = Some(driver);
        self
    }

    pub fn resolve(
        &self,
        platform_id: &str,
        sub_run_id: &str,
    ) -> SurferResult<Arc<dyn ExtractionDriver>> {
        self.drivers
            .get(&(platform_id.to_string(), sub_run_id.to_string()))
            .or(self.fallback.as_ref())
            .cloned()
            .ok_or_else(|| SurferError::DriverNotFound {
                platform: platform_id.to_string(),
                sub_run: sub_run_id.to_string(),
            })
    }

    pub fn len(&self) -> usize {
        self.drivers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.drivers.is_empty() && self.fallback.is_none()
    }
}

/// Generic driver: loads the Run URL and keeps the page body as an artifact.
pub struct PageSnapshotDriver {
    logged_out_markers: Vec<String>,
}

impl PageSnapshotDriver {
    pub fn new(logged_out_markers: Vec<String>) -> Self {
        Self { logged_out_markers }
    }
}

#[async_trait]
impl ExtractionDriver for PageSnapshotDriver {
    fn name(&self) -> &str {
        "page-snapshot"
    }

    async fn run_step(&self, ctx: &StepContext) -> Result<StepReport, DriverError> {
        let target = &ctx.target;
        ctx.pacer.pace().await?;
        ctx.session.navigate(&target.url).await?;
        let body = ctx.session.content().await?;

        if let Some(marker) = self
            .logged_out_markers
            .iter()
            .find(|m| body.contains(m.as_str()))
        {
            debug!(run_id = %target.run_id, marker = %marker, "Logged-out marker found");
            return Err(DriverError::AuthRequired);
        }

        let name = format!("{}-{}.html", target.task_id, target.step_id);
        let logs = format!("Saved {} bytes from {} as {}", body.len(), target.url, name);
        Ok(StepReport::with_logs(logs).artifact(Artifact::new(name, body)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NamedDriver(&'static str);

    #[async_trait]
    impl ExtractionDriver for NamedDriver {
        fn name(&self) -> &str {
            self.0
        }

        async fn run_step(&self, _ctx: &StepContext) -> Result<StepReport, DriverError> {
            Ok(StepReport::default())
        }
    }

    #[test]
    fn test_registry_resolves_exact_match() {
        let mut registry = DriverRegistry::new();
        registry.register("github-001", "github-001-repos", Arc::new(NamedDriver("repos")));

        let driver = registry.resolve("github-001", "github-001-repos").unwrap();
        assert_eq!(driver.name(), "repos");

        let err = registry
            .resolve("github-001", "github-001-commits")
            .err()
            .unwrap();
        assert_eq!(err.error_code(), "E3002");
    }

    #[test]
    fn test_registry_fallback() {
        let mut registry = DriverRegistry::new().with_fallback(Arc::new(NamedDriver("snapshot")));
        registry.register("github-001", "github-001-repos", Arc::new(NamedDriver("repos")));

        assert_eq!(
            registry.resolve("github-001", "github-001-repos").unwrap().name(),
            "repos"
        );
        assert_eq!(
            registry.resolve("gmail-001", "gmail-001-all").unwrap().name(),
            "snapshot"
        );
    }

    #[test]
    fn test_driver_error_from_surfer_error() {
        let err: DriverError = SurferError::Io("socket closed".into()).into();
        assert!(matches!(err, DriverError::Failed(msg) if msg.contains("socket closed")));
    }
}
