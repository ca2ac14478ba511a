use crate::config::CatalogConfig;
use crate::error::{EntityKind, SurferError, SurferResult};
use crate::models::{Step, Task};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use tracing::info;

const BUILTIN_CATALOG: &str = include_str!("../platforms.toml");

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepTemplate {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskTemplate {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub steps: Vec<StepTemplate>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubRunSpec {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Start URL for this sub-resource; defaults to the platform home URL.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub tasks: Vec<TaskTemplate>,
}

impl SubRunSpec {
    /// Fresh pending Tasks and Steps for a new Run.
    pub fn instantiate(&self) -> Vec<Task> {
        self.tasks
            .iter()
            .map(|t| {
                Task::new(
                    &t.id,
                    &t.name,
                    t.steps.iter().map(|s| Step::new(&s.id, &s.name)).collect(),
                )
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlatformSpec {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub company: String,
    pub home_url: String,
    #[serde(default)]
    pub sub_runs: Vec<SubRunSpec>,
}

impl PlatformSpec {
    pub fn sub_run(&self, sub_run_id: &str) -> Option<&SubRunSpec> {
        self.sub_runs.iter().find(|s| s.id == sub_run_id)
    }

    pub fn start_url(&self, sub_run: &SubRunSpec) -> String {
        sub_run.url.clone().unwrap_or_else(|| self.home_url.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct PlatformCatalog {
    #[serde(default)]
    pub platforms: Vec<PlatformSpec>,
}

impl PlatformCatalog {
    pub fn builtin() -> SurferResult<Self> {
        Self::from_toml_str(BUILTIN_CATALOG)
    }

    pub fn from_toml_str(content: &str) -> SurferResult<Self> {
        let catalog: PlatformCatalog = toml::from_str(content)?;
        catalog.validate()?;
        Ok(catalog)
    }

    pub fn load(path: &Path) -> SurferResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let catalog = Self::from_toml_str(&content)?;
        info!(
            path = %path.display(),
            platforms = catalog.platforms.len(),
            "Loaded platform catalog"
        );
        Ok(catalog)
    }

    /// The configured catalog file, or the built-in catalog when none is set.
    pub fn from_config(config: &CatalogConfig) -> SurferResult<Self> {
        match &config.path {
            Some(path) => Self::load(path),
            None => Self::builtin(),
        }
    }

    pub fn validate(&self) -> SurferResult<()> {
        let mut platform_ids = HashSet::new();
        for platform in &self.platforms {
            if platform.id.is_empty() {
                return Err(invalid("platform with empty id"));
            }
            if !platform_ids.insert(platform.id.as_str()) {
                return Err(invalid(format!("duplicate platform '{}'", platform.id)));
            }

            let mut sub_run_ids = HashSet::new();
            for sub_run in &platform.sub_runs {
                if !sub_run_ids.insert(sub_run.id.as_str()) {
                    return Err(invalid(format!(
                        "duplicate sub-run '{}' in platform '{}'",
                        sub_run.id, platform.id
                    )));
                }
                if sub_run.tasks.is_empty() {
                    return Err(invalid(format!("sub-run '{}' defines no tasks", sub_run.id)));
                }

                let mut task_ids = HashSet::new();
                for task in &sub_run.tasks {
                    if !task_ids.insert(task.id.as_str()) {
                        return Err(invalid(format!(
                            "duplicate task '{}' in sub-run '{}'",
                            task.id, sub_run.id
                        )));
                    }
                    let mut step_ids = HashSet::new();
                    for step in &task.steps {
                        if !step_ids.insert(step.id.as_str()) {
                            return Err(invalid(format!(
                                "duplicate step '{}' in task '{}'",
                                step.id, task.id
                            )));
                        }
                    }
                }
            }
        }
        Ok(())
    }

    pub fn platform(&self, platform_id: &str) -> SurferResult<&PlatformSpec> {
        self.platforms
            .iter()
            .find(|p| p.id == platform_id)
            .ok_or_else(|| SurferError::not_found(EntityKind::Platform, platform_id))
    }

    pub fn sub_run(
        &self,
        platform_id: &str,
        sub_run_id: &str,
    ) -> SurferResult<(&PlatformSpec, &SubRunSpec)> {
        let platform = self.platform(platform_id)?;
        let sub_run = platform
            .sub_run(sub_run_id)
            .ok_or_else(|| SurferError::not_found(EntityKind::SubRun, sub_run_id))?;
        Ok((platform, sub_run))
    }
}

fn invalid(message: impl Into<String>) -> SurferError {
    SurferError::Config(format!("invalid platform catalog: {}", message.into()))
}
