use std::env;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

fn get_surfer_binary() -> PathBuf {
    let manifest_dir = env::var("CARGO_MANIFEST_DIR").unwrap_or_else(|_| ".".to_string());
    let workspace_root = PathBuf::from(&manifest_dir).join("..");
    let binary_path = workspace_root.join("target").join("debug").join("surfer");

    if binary_path.exists() {
        return binary_path;
    }

    let direct = PathBuf::from(&manifest_dir)
        .join("target")
        .join("debug")
        .join("surfer");
    if direct.exists() {
        return direct;
    }

    PathBuf::from("target/debug/surfer")
}

/// Environment that keeps the database and exports inside `dir`.
fn isolated_env(dir: &Path) -> Vec<(String, String)> {
    vec![
        (
            "SURFER_DATABASE_URL".to_string(),
            format!("sqlite://{}/runs.db?mode=rwc", dir.display()),
        ),
        (
            "SURFER_ORCHESTRATOR__EXPORT_DIR".to_string(),
            dir.join("exports").display().to_string(),
        ),
    ]
}

fn run_surfer(args: &[&str]) -> Output {
    Command::new(get_surfer_binary())
        .args(args)
        .output()
        .expect("Failed to execute surfer command")
}

fn run_surfer_with_env(args: &[&str], env_vars: Vec<(String, String)>) -> Output {
    let mut cmd = Command::new(get_surfer_binary());
    cmd.args(args);
    for (key, value) in env_vars {
        cmd.env(key, value);
    }
    cmd.output().expect("Failed to execute surfer command")
}

fn output_to_string(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

fn stderr_to_string(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).to_string()
}

mod version_command_tests {
    use super::*;

    #[test]
    fn test_version_command_basic() {
        let output = run_surfer(&["version"]);
        let stdout = output_to_string(&output);

        assert!(output.status.success(), "version command should succeed");
        assert!(stdout.contains("surfer"), "output should contain 'surfer'");
        assert!(
            stdout.contains("0.1.0"),
            "output should contain version number"
        );
    }

    #[test]
    fn test_version_command_detailed() {
        let output = run_surfer(&["version", "--detailed"]);
        let stdout = output_to_string(&output);

        assert!(output.status.success(), "version --detailed should succeed");
        assert!(stdout.contains("Version"), "output should contain 'Version'");
        assert!(
            stdout.contains("Apache-2.0"),
            "output should contain license type"
        );
        assert!(
            stdout.contains("Built-in Platforms"),
            "output should list built-in platforms"
        );
        assert!(stdout.contains("github-001"), "output should mention GitHub");
        assert!(stdout.contains("gmail-001"), "output should mention Gmail");
    }

    #[test]
    fn test_version_flag() {
        let output = run_surfer(&["--version"]);
        assert!(output.status.success(), "--version should succeed");
        assert!(output_to_string(&output).contains("0.1.0"));
    }
}

mod help_command_tests {
    use super::*;

    #[test]
    fn test_help_command() {
        let output = run_surfer(&["--help"]);
        let stdout = output_to_string(&output);

        assert!(output.status.success(), "--help should succeed");
        assert!(stdout.contains("Surfer"), "help should mention Surfer");
        for command in ["export", "runs", "platforms", "config", "version"] {
            assert!(stdout.contains(command), "help should mention {}", command);
        }
    }

    #[test]
    fn test_runs_help() {
        let output = run_surfer(&["runs", "--help"]);
        let stdout = output_to_string(&output);

        assert!(output.status.success());
        for action in ["list", "show", "delete", "files"] {
            assert!(stdout.contains(action), "runs help should mention {}", action);
        }
    }

    #[test]
    fn test_export_requires_arguments() {
        let output = run_surfer(&["export"]);
        assert!(!output.status.success(), "export without ids should fail");
        assert!(stderr_to_string(&output).contains("PLATFORM"));
    }

    #[test]
    fn test_unknown_command_fails() {
        let output = run_surfer(&["teleport"]);
        assert!(!output.status.success());
    }
}

mod platforms_command_tests {
    use super::*;

    #[test]
    fn test_platforms_lists_builtin_catalog() {
        let dir = tempfile::tempdir().unwrap();
        let output = run_surfer_with_env(&["platforms"], isolated_env(dir.path()));
        let stdout = output_to_string(&output);

        assert!(output.status.success(), "stderr: {}", stderr_to_string(&output));
        assert!(stdout.contains("github-001-repos"));
        assert!(stdout.contains("github-001-commits"));
        assert!(stdout.contains("gmail-001-all"));
        assert!(stdout.contains("https://mail.google.com"));
    }

    #[test]
    fn test_platforms_json() {
        let dir = tempfile::tempdir().unwrap();
        let output = run_surfer_with_env(
            &["platforms", "--format", "json"],
            isolated_env(dir.path()),
        );
        assert!(output.status.success());

        let platforms: serde_json::Value =
            serde_json::from_str(&output_to_string(&output)).unwrap();
        let platforms = platforms.as_array().unwrap();
        assert_eq!(platforms.len(), 2);
        assert_eq!(platforms[1]["company"], "Google");
        assert_eq!(
            platforms[1]["sub_runs"][0]["tasks"][1]["name"],
            "Convert MBOX to JSON"
        );
    }

    #[test]
    fn test_platforms_from_catalog_file() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = dir.path().join("catalog.toml");
        std::fs::write(
            &catalog,
            r#"
[[platforms]]
id = "notion-001"
name = "Notion"
company = "Notion Labs"
home_url = "https://www.notion.so"

[[platforms.sub_runs]]
id = "notion-001-pages"
name = "Pages"

[[platforms.sub_runs.tasks]]
id = "notion-001-pages-task-1"
name = "Export workspace"
steps = [{ id = "step-1", name = "Request export" }]
"#,
        )
        .unwrap();

        let mut env_vars = isolated_env(dir.path());
        env_vars.push((
            "SURFER_CATALOG__PATH".to_string(),
            catalog.display().to_string(),
        ));
        let output = run_surfer_with_env(&["platforms"], env_vars);
        let stdout = output_to_string(&output);

        assert!(output.status.success(), "stderr: {}", stderr_to_string(&output));
        assert!(stdout.contains("notion-001-pages"));
        assert!(!stdout.contains("github-001"));
    }

    #[test]
    fn test_invalid_catalog_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = dir.path().join("catalog.toml");
        std::fs::write(
            &catalog,
            r#"
[[platforms]]
id = "empty-001"
name = "Empty"
home_url = "https://example.com"

[[platforms.sub_runs]]
id = "empty-001-all"
name = "Nothing"
"#,
        )
        .unwrap();

        let mut env_vars = isolated_env(dir.path());
        env_vars.push((
            "SURFER_CATALOG__PATH".to_string(),
            catalog.display().to_string(),
        ));
        let output = run_surfer_with_env(&["platforms"], env_vars);

        assert!(!output.status.success());
        assert!(stderr_to_string(&output).contains("defines no tasks"));
    }
}

mod config_command_tests {
    use super::*;

    #[test]
    fn test_config_show_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let output = run_surfer_with_env(&["config", "show"], isolated_env(dir.path()));
        let stdout = output_to_string(&output);

        assert!(output.status.success(), "stderr: {}", stderr_to_string(&output));
        assert!(stdout.contains("[orchestrator]"));
        assert!(stdout.contains("min_pacing_ms = 250"));
        assert!(stdout.contains("attach_settle_ms = 2000"));
        assert!(stdout.contains("pinned_chrome_version = \"127.0.0.0\""));
    }

    #[test]
    fn test_env_overrides_config() {
        let dir = tempfile::tempdir().unwrap();
        let mut env_vars = isolated_env(dir.path());
        env_vars.push((
            "SURFER_ORCHESTRATOR__MIN_PACING_MS".to_string(),
            "500".to_string(),
        ));
        let output = run_surfer_with_env(&["config", "show", "--format", "json"], env_vars);
        assert!(output.status.success(), "stderr: {}", stderr_to_string(&output));

        let config: serde_json::Value = serde_json::from_str(&output_to_string(&output)).unwrap();
        assert_eq!(config["orchestrator"]["min_pacing_ms"], 500);
        assert!(config["database"]["url"]
            .as_str()
            .unwrap()
            .contains(&dir.path().display().to_string()));
    }

    #[test]
    fn test_invalid_config_fails_fast() {
        let dir = tempfile::tempdir().unwrap();
        let mut env_vars = isolated_env(dir.path());
        env_vars.push((
            "SURFER_SESSIONS__ZOOM_FACTOR".to_string(),
            "0".to_string(),
        ));
        let output = run_surfer_with_env(&["runs", "list"], env_vars);

        assert!(!output.status.success());
        assert!(stderr_to_string(&output).contains("zoom_factor"));
    }

    #[test]
    fn test_config_paths() {
        let dir = tempfile::tempdir().unwrap();
        let output = run_surfer_with_env(&["config", "paths"], isolated_env(dir.path()));
        let stdout = output_to_string(&output);

        assert!(output.status.success());
        assert!(stdout.contains("surfer.toml"));
        assert!(stdout.contains("SURFER_*"));
    }
}

mod runs_command_tests {
    use super::*;

    #[test]
    fn test_runs_list_empty() {
        let dir = tempfile::tempdir().unwrap();
        let output = run_surfer_with_env(&["runs", "list"], isolated_env(dir.path()));

        assert!(output.status.success(), "stderr: {}", stderr_to_string(&output));
        assert!(output_to_string(&output).contains("No runs found"));
    }

    #[test]
    fn test_runs_list_json_empty() {
        let dir = tempfile::tempdir().unwrap();
        let output = run_surfer_with_env(
            &["runs", "list", "--format", "json"],
            isolated_env(dir.path()),
        );

        assert!(output.status.success());
        let runs: serde_json::Value = serde_json::from_str(&output_to_string(&output)).unwrap();
        assert_eq!(runs, serde_json::json!([]));
    }

    #[test]
    fn test_runs_show_unknown() {
        let dir = tempfile::tempdir().unwrap();
        let output = run_surfer_with_env(
            &["runs", "show", "github-001-42"],
            isolated_env(dir.path()),
        );

        assert!(!output.status.success());
        assert!(stderr_to_string(&output).contains("not found"));
    }

    #[test]
    fn test_runs_delete_unknown() {
        let dir = tempfile::tempdir().unwrap();
        let output = run_surfer_with_env(
            &["runs", "delete", "github-001-42"],
            isolated_env(dir.path()),
        );

        assert!(!output.status.success());
        assert!(stderr_to_string(&output).contains("not found"));
    }
}

mod export_command_tests {
    use super::*;

    #[test]
    fn test_export_unknown_platform() {
        let dir = tempfile::tempdir().unwrap();
        let output = run_surfer_with_env(
            &["export", "myspace-001", "myspace-001-photos"],
            isolated_env(dir.path()),
        );

        assert!(!output.status.success());
        let stderr = stderr_to_string(&output);
        assert!(stderr.contains("E1002"), "stderr: {}", stderr);
        assert!(stderr.contains("myspace-001"));
    }

    #[test]
    fn test_export_unknown_sub_run() {
        let dir = tempfile::tempdir().unwrap();
        let output = run_surfer_with_env(
            &["export", "github-001", "github-001-gists"],
            isolated_env(dir.path()),
        );

        assert!(!output.status.success());
        assert!(stderr_to_string(&output).contains("github-001-gists"));
    }
}
