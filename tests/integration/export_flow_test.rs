#![allow(dead_code, unused_imports, unused_variables, unused_mut)]

use std::env;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn get_surfer_binary() -> PathBuf {
    let manifest_dir = env::var("CARGO_MANIFEST_DIR").unwrap_or_else(|_| ".".to_string());
    let workspace_root = PathBuf::from(&manifest_dir).join("..");
    let binary_path = workspace_root.join("target").join("debug").join("surfer");

    if binary_path.exists() {
        return binary_path;
    }

    PathBuf::from("target/debug/surfer")
}

/// A scratch workspace with its own catalog, database and export folder.
struct Workspace {
    dir: tempfile::TempDir,
}

impl Workspace {
    fn new(home_url: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("catalog.toml"),
            format!(
                r#"
[[platforms]]
id = "testsite-001"
name = "Test Site"
company = "Example Corp"
home_url = "{home_url}"

[[platforms.sub_runs]]
id = "testsite-001-all"
name = "Everything"

[[platforms.sub_runs.tasks]]
id = "testsite-001-all-task-1"
name = "Fetch Profile"
steps = [
    {{ id = "step-1", name = "Load profile" }},
    {{ id = "step-2", name = "Save profile" }},
]
"#
            ),
        )
        .unwrap();
        Self { dir }
    }

    fn path(&self) -> &Path {
        self.dir.path()
    }

    fn write_config(&self, content: &str) {
        std::fs::write(self.path().join("surfer.toml"), content).unwrap();
    }

    fn command(&self, args: &[&str]) -> Command {
        let root = self.path();
        let mut cmd = Command::new(get_surfer_binary());
        cmd.args(args)
            .current_dir(root)
            .env(
                "SURFER_DATABASE_URL",
                format!("sqlite://{}/runs.db?mode=rwc", root.display()),
            )
            .env("SURFER_ORCHESTRATOR__EXPORT_DIR", root.join("exports"))
            .env("SURFER_ORCHESTRATOR__ATTACH_SETTLE_MS", "0")
            .env("SURFER_ORCHESTRATOR__MIN_PACING_MS", "0")
            .env("SURFER_CATALOG__PATH", root.join("catalog.toml"));
        cmd
    }

    fn run(&self, args: &[&str]) -> Output {
        self.command(args)
            .output()
            .expect("Failed to execute surfer command")
    }
}

/// Runs `cmd` with `input` already written to its stdin.
fn run_with_input(mut cmd: Command, input: &str) -> Output {
    let mut child = cmd
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("Failed to spawn surfer command");
    {
        let mut stdin = child.stdin.take().unwrap();
        stdin.write_all(input.as_bytes()).unwrap();
    }
    child.wait_with_output().unwrap()
}

fn output_to_string(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

fn stderr_to_string(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).to_string()
}

fn output_json(output: &Output) -> serde_json::Value {
    serde_json::from_str(&output_to_string(output)).unwrap_or_else(|e| {
        panic!(
            "stdout is not JSON ({}): {}\nstderr: {}",
            e,
            output_to_string(output),
            stderr_to_string(output)
        )
    })
}

async fn page_server(body: &str) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(&server)
        .await;
    server
}

mod export_flow_tests {
    use super::*;

    #[tokio::test(flavor = "multi_thread")]
    async fn test_export_then_inspect_and_delete() {
        let server = page_server("<html><h1>profile of octocat</h1></html>").await;
        let workspace = Workspace::new(&server.uri());

        let export = {
            let args = ["export", "testsite-001", "testsite-001-all", "--json"];
            let mut cmd = workspace.command(&args);
            tokio::task::spawn_blocking(move || cmd.output().unwrap())
                .await
                .unwrap()
        };
        assert!(export.status.success(), "stderr: {}", stderr_to_string(&export));

        let run = output_json(&export);
        assert_eq!(run["status"], "success");
        assert_eq!(run["platform_id"], "testsite-001");
        assert_eq!(run["tasks"][0]["status"], "success");
        assert_eq!(run["tasks"][0]["steps"][1]["status"], "success");
        assert!(run["end_date"].is_string());

        let run_id = run["id"].as_str().unwrap().to_string();
        let export_path = PathBuf::from(run["export_path"].as_str().unwrap());
        assert!(export_path.starts_with(workspace.path().join("exports")));
        let saved =
            std::fs::read_to_string(export_path.join("testsite-001-all-task-1-step-1.html"))
                .unwrap();
        assert!(saved.contains("octocat"));

        let listed = workspace.run(&["runs", "list", "--format", "json"]);
        let runs = output_json(&listed);
        assert_eq!(runs.as_array().unwrap().len(), 1);
        assert_eq!(runs[0]["id"], run_id.as_str());

        let shown = workspace.run(&["runs", "show", &run_id]);
        let stdout = output_to_string(&shown);
        assert!(shown.status.success());
        assert!(stdout.contains("Fetch Profile"));
        assert!(stdout.contains("Load profile"));
        assert!(stdout.contains("success"));

        let files = workspace.run(&["runs", "files", &run_id]);
        let stdout = output_to_string(&files);
        assert!(files.status.success());
        assert!(stdout.contains("testsite-001-all-task-1-step-2.html"));
        assert!(stdout.contains("2 file(s)"));

        let deleted = workspace.run(&["runs", "delete", &run_id]);
        assert!(deleted.status.success(), "stderr: {}", stderr_to_string(&deleted));

        let listed = workspace.run(&["runs", "list", "--format", "json"]);
        assert_eq!(output_json(&listed), serde_json::json!([]));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_text_export_renders_progress() {
        let server = page_server("<html>inbox</html>").await;
        let workspace = Workspace::new(&server.uri());

        let mut cmd = workspace.command(&["export", "testsite-001", "testsite-001-all"]);
        let output = tokio::task::spawn_blocking(move || cmd.output().unwrap())
            .await
            .unwrap();
        let stdout = output_to_string(&output);

        assert!(output.status.success(), "stderr: {}", stderr_to_string(&output));
        assert!(stdout.contains("Exporting"));
        assert!(stdout.contains("Fetch Profile › Load profile"));
        assert!(stdout.contains("Exported"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_ephemeral_export_leaves_no_history() {
        let server = page_server("<html>feed</html>").await;
        let workspace = Workspace::new(&server.uri());

        let args = [
            "export",
            "testsite-001",
            "testsite-001-all",
            "--json",
            "--ephemeral",
        ];
        let mut cmd = workspace.command(&args);
        let output = tokio::task::spawn_blocking(move || cmd.output().unwrap())
            .await
            .unwrap();

        assert!(output.status.success(), "stderr: {}", stderr_to_string(&output));
        assert_eq!(output_json(&output)["status"], "success");
        assert!(!workspace.path().join("runs.db").exists());

        let listed = workspace.run(&["runs", "list", "--format", "json"]);
        assert_eq!(output_json(&listed), serde_json::json!([]));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_sign_in_prompt_resumes_on_enter() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200).set_body_string("Please sign in to continue"))
            .up_to_n_times(2)
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>dashboard</html>"))
            .with_priority(2)
            .mount(&server)
            .await;

        let workspace = Workspace::new(&server.uri());
        workspace.write_config(
            r#"
[orchestrator]
logged_out_markers = ["Please sign in"]
"#,
        );

        let output = {
            let args = ["export", "testsite-001", "testsite-001-all", "--json"];
            let cmd = workspace.command(&args);
            tokio::task::spawn_blocking(move || run_with_input(cmd, "\n"))
                .await
                .unwrap()
        };

        let stderr = stderr_to_string(&output);
        assert!(output.status.success(), "stderr: {}", stderr);
        assert!(stderr.contains("Not connected to Test Site"));

        let run = output_json(&output);
        assert_eq!(run["status"], "success");
        let saved = PathBuf::from(run["export_path"].as_str().unwrap())
            .join("testsite-001-all-task-1-step-1.html");
        assert!(std::fs::read_to_string(saved).unwrap().contains("dashboard"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_unreachable_site_errors_run() {
        let workspace = Workspace::new("http://127.0.0.1:9");

        let mut cmd = workspace.command(&["export", "testsite-001", "testsite-001-all", "--json"]);
        let output = tokio::task::spawn_blocking(move || cmd.output().unwrap())
            .await
            .unwrap();

        assert!(!output.status.success());
        let run = output_json(&output);
        assert_eq!(run["status"], "error");
        assert_eq!(run["tasks"][0]["status"], "pending");
        assert!(run["export_path"].is_null());

        let listed = workspace.run(&["runs", "list", "--format", "json"]);
        assert_eq!(output_json(&listed)[0]["status"], "error");
    }
}
