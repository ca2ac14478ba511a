use crate::error::{SurferError, SurferResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// An opaque named file produced by a driver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub name: String,
    pub content: String,
}

impl Artifact {
    pub fn new(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
        }
    }
}

/// Writes Run artifacts under `{export_dir}/{platform_id}/{run_id}/`.
#[derive(Debug, Clone)]
pub struct ArtifactWriter {
    export_dir: PathBuf,
}

impl ArtifactWriter {
    pub fn new(export_dir: impl Into<PathBuf>) -> Self {
        Self {
            export_dir: export_dir.into(),
        }
    }

    pub fn export_dir(&self) -> &Path {
        &self.export_dir
    }

    pub fn run_dir(&self, platform_id: &str, run_id: &str) -> PathBuf {
        self.export_dir
            .join(sanitize_file_name(platform_id))
            .join(sanitize_file_name(run_id))
    }

    /// Returns the Run folder and the total bytes written.
    pub async fn write(
        &self,
        platform_id: &str,
        run_id: &str,
        artifacts: &[Artifact],
    ) -> SurferResult<(PathBuf, u64)> {
        let dir = self.run_dir(platform_id, run_id);
        tokio::fs::create_dir_all(&dir).await?;

        let mut total = 0u64;
        for artifact in artifacts {
            let path = dir.join(sanitize_file_name(&artifact.name));
            tokio::fs::write(&path, artifact.content.as_bytes()).await?;
            total += artifact.content.len() as u64;
            debug!(run_id = %run_id, path = %path.display(), "Artifact written");
        }

        info!(
            run_id = %run_id,
            files = artifacts.len(),
            bytes = total,
            path = %dir.display(),
            "Artifacts exported"
        );
        Ok((dir, total))
    }

    /// File names directly inside `path`, sorted.
    pub async fn list_files(&self, path: &Path) -> SurferResult<Vec<String>> {
        let mut entries = tokio::fs::read_dir(path).await?;
        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                files.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        files.sort();
        Ok(files)
    }

    /// Opens `path` in the platform file manager.
    pub fn open_folder(&self, path: &Path) -> SurferResult<()> {
        if !path.is_dir() {
            return Err(SurferError::Io(format!(
                "{} is not a directory",
                path.display()
            )));
        }

        let opener = if cfg!(target_os = "macos") {
            "open"
        } else if cfg!(target_os = "windows") {
            "explorer"
        } else {
            "xdg-open"
        };

        spawn_reaped(opener, path)?;
        Ok(())
    }
}

/// Launches `program` and waits for it in the background so the child is
/// reaped once it exits.
fn spawn_reaped(program: &str, arg: &Path) -> SurferResult<JoinHandle<Option<ExitStatus>>> {
    let mut child = tokio::process::Command::new(program)
        .arg(arg)
        .spawn()
        .map_err(|e| SurferError::Io(format!("failed to launch {}: {}", program, e)))?;

    let program = program.to_string();
    Ok(tokio::spawn(async move {
        match child.wait().await {
            Ok(status) => {
                debug!(program = %program, %status, "Opener exited");
                Some(status)
            }
            Err(e) => {
                warn!(program = %program, error = %e, "Failed to wait for opener");
                None
            }
        }
    }))
}

fn sanitize_file_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '\0' => '_',
            c => c,
        })
        .collect();
    match cleaned.as_str() {
        "" | "." | ".." => "_".to_string(),
        _ => cleaned,
    }
}
