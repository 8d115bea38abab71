//! CLI contract tests
//!
//! Runs the real binary against temp directories. Config and workspace
//! locations are redirected so nothing outside the temp dirs is touched.

use serde_json::Value;
use std::path::Path;
use std::process::{Command, Output};

fn bugsweep_bin() -> String {
    env!("CARGO_BIN_EXE_bugsweep").to_string()
}

fn run(args: &[&str], sandbox: &Path) -> Output {
    Command::new(bugsweep_bin())
        .args(args)
        .current_dir(sandbox)
        .env("XDG_CONFIG_HOME", sandbox.join("config"))
        .env("BUGSWEEP_WORKDIR", sandbox.join("workspaces"))
        .env_remove("RUST_LOG")
        .env_remove("BUGSWEEP_BACKEND")
        .output()
        .expect("Failed to run bugsweep")
}

fn setup_repo(root: &Path) {
    std::fs::create_dir_all(root.join("lib")).unwrap();
    std::fs::write(
        root.join("app.py"),
        "import os\n\ndef handler(request):\n    name = request.args.get(\"name\")\n    os.system(f\"echo {name}\")\n",
    )
    .unwrap();
    std::fs::write(root.join("lib").join("math.js"), "export const add = (a, b) => a + b;\n").unwrap();
    std::fs::create_dir_all(root.join("node_modules").join("left-pad")).unwrap();
    std::fs::write(
        root.join("node_modules").join("left-pad").join("index.js"),
        "eval(input)\n",
    )
    .unwrap();
}

#[test]
fn test_analyze_local_json() {
    let sandbox = tempfile::tempdir().unwrap();
    let repo = sandbox.path().join("repo");
    setup_repo(&repo);

    let output = run(
        &[
            "analyze",
            "me/app",
            "--local",
            repo.to_str().unwrap(),
            "--backend",
            "local",
            "--batch-size",
            "1",
            "--format",
            "json",
        ],
        sandbox.path(),
    );
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let json: Value = serde_json::from_slice(&output.stdout).expect("stdout is JSON");
    assert_eq!(json["repository"], "me/app");
    // node_modules is never selected
    assert_eq!(json["totalFiles"], 2);
    assert!(json["summary"]["critical"].as_u64().unwrap() >= 1);
    let files: Vec<&str> = json["results"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["file"].as_str().unwrap())
        .collect();
    assert!(files.contains(&"app.py"));
    assert!(files.iter().all(|f| !f.contains("node_modules")));
}

#[test]
fn test_analyze_rejects_bad_target() {
    let sandbox = tempfile::tempdir().unwrap();
    let output = run(&["analyze", "not-a-target", "--backend", "local"], sandbox.path());
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("OWNER/REPO"));
}

#[test]
fn test_clean_all_removes_workspaces() {
    let sandbox = tempfile::tempdir().unwrap();
    let workspaces = sandbox.path().join("workspaces");
    std::fs::create_dir_all(workspaces.join("octo__hello").join("src")).unwrap();
    std::fs::write(workspaces.join("octo__hello").join("src").join("a.rs"), "fn a() {}\n").unwrap();

    let output = run(&["clean", "--all"], sandbox.path());
    assert!(output.status.success());
    assert!(!workspaces.join("octo__hello").exists());
    assert!(String::from_utf8_lossy(&output.stdout).contains("Removed 1 workspace"));
}

#[test]
fn test_init_writes_config_once() {
    let sandbox = tempfile::tempdir().unwrap();
    let config = sandbox.path().join("config").join("bugsweep").join("config.toml");

    let output = run(&["init"], sandbox.path());
    assert!(output.status.success());
    assert!(config.exists());
    let written = std::fs::read_to_string(&config).unwrap();

    std::fs::write(&config, format!("{written}\n# edited\n")).unwrap();
    let output = run(&["init"], sandbox.path());
    assert!(output.status.success());
    assert!(std::fs::read_to_string(&config).unwrap().ends_with("# edited\n"));
}
