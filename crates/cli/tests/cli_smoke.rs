//! CLI smoke tests for mbs.
//!
//! These tests run the binary against a temporary configuration, module
//! catalog and build store, and check exit codes and output.

use std::path::{Path, PathBuf};

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use serde_json::Value;
use tempfile::TempDir;

const OVERRIDES: [&str; 5] = [
  "MODBUILD_CONFIG",
  "MODBUILD_NUM_CONCURRENT_BUILDS",
  "MODBUILD_BUILDER_BACKEND",
  "MODBUILD_RESOLVER_BACKEND",
  "MODBUILD_STORE_PATH",
];

const CATALOG: &str = r#"[
  { "name": "platform", "stream": "f28", "version": 1, "context": "00000000", "koji_tag": "platform-f28" },
  { "name": "platform", "stream": "f29", "version": 1, "context": "00000000", "koji_tag": "platform-f29" }
]"#;

/// Two components in one batch against a single platform stream.
const DEFINITION: &str = r#"{
  "name": "testmodule",
  "stream": "master",
  "version": 1,
  "scm_ref": "https://src.example.com/modules/testmodule#abc123",
  "buildrequires": { "platform": ["f29"] },
  "requires": { "platform": ["f29"] },
  "components": [
    { "name": "perl-Tangerine", "ref": "aaa111" },
    { "name": "perl-List-Compare", "ref": "bbb222" }
  ]
}"#;

const MULTI_STREAM_DEFINITION: &str = r#"{
  "name": "testmodule",
  "stream": "multi",
  "buildrequires": { "platform": ["f28", "f29"] },
  "components": [{ "name": "perl-Tangerine", "ref": "aaa111" }]
}"#;

/// Temp workspace with a config pointing at a catalog and a store file.
struct Workspace {
  temp: TempDir,
}

impl Workspace {
  fn new() -> Self {
    let temp = TempDir::new().unwrap();
    std::fs::write(temp.path().join("catalog.json"), CATALOG).unwrap();
    std::fs::write(temp.path().join("testmodule.json"), DEFINITION).unwrap();
    std::fs::write(temp.path().join("multi.json"), MULTI_STREAM_DEFINITION).unwrap();

    let config = format!(
      r#"
[resolver]
backend = "catalog"
catalog_path = '{}'

[store]
path = '{}'

[builder]
retry_timeout_secs = 0
retry_interval_secs = 0

[poller]
stuck_timeout_secs = 0
"#,
      temp.path().join("catalog.json").display(),
      temp.path().join("store.json").display()
    );
    std::fs::write(temp.path().join("modbuild.toml"), config).unwrap();
    Self { temp }
  }

  fn path(&self, name: &str) -> PathBuf {
    self.temp.path().join(name)
  }

  fn mbs(&self) -> Command {
    let mut cmd = mbs_cmd();
    cmd.arg("--config").arg(self.path("modbuild.toml"));
    cmd
  }

  fn json(&self, args: &[&str]) -> Value {
    let output = self.mbs().args(args).args(["-o", "json"]).output().unwrap();
    assert!(output.status.success(), "mbs {:?} failed: {}", args, String::from_utf8_lossy(&output.stderr));
    serde_json::from_slice(&output.stdout).unwrap()
  }

  fn submit(&self, definition: &Path) -> Value {
    let output = self
      .mbs()
      .arg("submit")
      .arg(definition)
      .args(["-o", "json"])
      .output()
      .unwrap();
    assert!(output.status.success(), "submit failed: {}", String::from_utf8_lossy(&output.stderr));
    serde_json::from_slice(&output.stdout).unwrap()
  }
}

/// Get a Command for the mbs binary, isolated from the caller's environment.
fn mbs_cmd() -> Command {
  let mut cmd = cargo_bin_cmd!("mbs");
  for var in OVERRIDES {
    cmd.env_remove(var);
  }
  cmd
}

// =============================================================================
// Help & Version
// =============================================================================

#[test]
fn help_flag_works() {
  mbs_cmd()
    .arg("--help")
    .assert()
    .success()
    .stdout(predicate::str::contains("Usage"));
}

#[test]
fn version_flag_works() {
  mbs_cmd()
    .arg("--version")
    .assert()
    .success()
    .stdout(predicate::str::contains("mbs"));
}

#[test]
fn subcommand_help_works() {
  for cmd in &["resolve", "submit", "status", "cancel", "retire", "poll", "serve"] {
    mbs_cmd()
      .arg(cmd)
      .arg("--help")
      .assert()
      .success()
      .stdout(predicate::str::contains("Usage"));
  }
}

#[test]
fn unparsable_config_fails() {
  let ws = Workspace::new();
  std::fs::write(ws.path("modbuild.toml"), "[scheduler\n").unwrap();

  ws.mbs()
    .arg("status")
    .assert()
    .failure()
    .stderr(predicate::str::contains("Failed to load configuration"));
}

// =============================================================================
// resolve
// =============================================================================

#[test]
fn resolve_expands_every_stream() {
  let ws = Workspace::new();

  ws.mbs()
    .arg("resolve")
    .arg(ws.path("multi.json"))
    .assert()
    .success()
    .stdout(predicate::str::contains("expands to 2 build(s)"));
}

#[test]
fn resolve_json_lists_pinned_streams() {
  let ws = Workspace::new();

  let report = ws.json(&["resolve", ws.path("multi.json").to_str().unwrap()]);
  let streams: Vec<&str> = report["expansions"]
    .as_array()
    .unwrap()
    .iter()
    .map(|e| e["streams"]["platform"].as_str().unwrap())
    .collect();
  assert_eq!(streams, vec!["f28", "f29"]);
}

#[test]
fn resolve_unknown_dependency_fails() {
  let ws = Workspace::new();
  std::fs::write(
    ws.path("orphan.json"),
    r#"{ "name": "orphan", "stream": "master", "buildrequires": { "nonexistent": [] },
         "components": [{ "name": "a", "ref": "abc" }] }"#,
  )
  .unwrap();

  ws.mbs()
    .arg("resolve")
    .arg(ws.path("orphan.json"))
    .assert()
    .failure()
    .stderr(predicate::str::contains("Failed to resolve orphan:master"));
}

#[test]
fn resolve_missing_definition_fails() {
  let ws = Workspace::new();

  ws.mbs()
    .arg("resolve")
    .arg("/nonexistent/module.json")
    .assert()
    .failure()
    .stderr(predicate::str::contains("Failed to read module definition"));
}

// =============================================================================
// submit & status
// =============================================================================

#[test]
fn submit_builds_module_to_ready() {
  let ws = Workspace::new();

  let modules = ws.submit(&ws.path("testmodule.json"));
  let modules = modules.as_array().unwrap();
  assert_eq!(modules.len(), 1);
  assert_eq!(modules[0]["state"], "ready");
  assert_eq!(modules[0]["buildrequires"]["platform"], "f29");
}

#[test]
fn status_reads_persisted_builds() {
  let ws = Workspace::new();
  let id = ws.submit(&ws.path("testmodule.json"))[0]["id"].as_u64().unwrap();

  let listed = ws.json(&["status", "--state", "ready"]);
  assert_eq!(listed.as_array().unwrap().len(), 1);

  let shown = ws.json(&["status", &id.to_string()]);
  assert_eq!(shown["module"]["name"], "testmodule");
  let components = shown["components"].as_array().unwrap();
  assert_eq!(components.len(), 3);
  assert!(components.iter().all(|c| c["state"] == "complete"));
}

#[test]
fn status_text_shows_components() {
  let ws = Workspace::new();
  let id = ws.submit(&ws.path("testmodule.json"))[0]["id"].as_u64().unwrap();

  ws.mbs()
    .arg("status")
    .arg(id.to_string())
    .assert()
    .success()
    .stdout(predicate::str::contains("perl-List-Compare"))
    .stdout(predicate::str::contains("module-build-macros"));
}

#[test]
fn status_older_than_filters_recent_builds() {
  let ws = Workspace::new();
  ws.submit(&ws.path("testmodule.json"));

  let listed = ws.json(&["status", "--older-than", "1h"]);
  assert!(listed.as_array().unwrap().is_empty());
}

#[test]
fn status_unknown_module_fails() {
  let ws = Workspace::new();

  ws.mbs()
    .args(["status", "42"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("Failed to load module build 42"));
}

#[test]
fn duplicate_submission_fails() {
  let ws = Workspace::new();
  ws.submit(&ws.path("testmodule.json"));

  ws.mbs()
    .arg("submit")
    .arg(ws.path("testmodule.json"))
    .assert()
    .failure()
    .stderr(predicate::str::contains("already exists"));
}

// =============================================================================
// poll, cancel & retire
// =============================================================================

#[test]
fn poll_drives_recorded_builds() {
  let ws = Workspace::new();
  let recorded = ws.json(&["submit", ws.path("testmodule.json").to_str().unwrap(), "--no-wait"]);
  assert_eq!(recorded[0]["state"], "init");

  let listed = ws.json(&["status", "--state", "init"]);
  assert_eq!(listed.as_array().unwrap().len(), 1);

  let report = ws.json(&["poll"]);
  assert_eq!(report["redriven"], 1);

  let listed = ws.json(&["status", "--state", "ready"]);
  assert_eq!(listed.as_array().unwrap().len(), 1);

  let report = ws.json(&["poll"]);
  assert_eq!(report["redriven"], 0);
}

#[test]
fn cancel_recorded_build() {
  let ws = Workspace::new();
  ws.mbs()
    .arg("submit")
    .arg(ws.path("testmodule.json"))
    .arg("--no-wait")
    .assert()
    .success();
  let id = ws.json(&["status"])[0]["id"].as_u64().unwrap();

  let module = ws.json(&["cancel", &id.to_string(), "--actor", "alice"]);
  assert_eq!(module["state"], "failed");
  assert!(module["state_reason"].as_str().unwrap().contains("alice"));
}

#[test]
fn cancel_finished_build_fails() {
  let ws = Workspace::new();
  let id = ws.submit(&ws.path("testmodule.json"))[0]["id"].as_u64().unwrap();

  ws.mbs()
    .args(["cancel", &id.to_string()])
    .assert()
    .failure()
    .stderr(predicate::str::contains("Failed to cancel module build"));
}

#[test]
fn retire_requires_confirmation() {
  let ws = Workspace::new();
  let id = ws.submit(&ws.path("testmodule.json"))[0]["id"].as_u64().unwrap();

  ws.mbs()
    .args(["retire", &id.to_string()])
    .assert()
    .failure()
    .stderr(predicate::str::contains("--force"));
}

#[test]
fn retire_with_force() {
  let ws = Workspace::new();
  let id = ws.submit(&ws.path("testmodule.json"))[0]["id"].as_u64().unwrap();

  let module = ws.json(&["retire", &id.to_string(), "--force"]);
  assert_eq!(module["state"], "garbage");
}

// =============================================================================
// serve
// =============================================================================

#[test]
fn serve_reads_messages_until_end_of_input() {
  let ws = Workspace::new();
  let input = concat!(
    r#"{"topic": "org.example.prod.unrelated.topic", "body": {}}"#,
    "\n",
    "not json\n",
  );

  let output = ws
    .mbs()
    .args(["serve", "-o", "json"])
    .write_stdin(input)
    .output()
    .unwrap();
  assert!(output.status.success(), "serve failed: {}", String::from_utf8_lossy(&output.stderr));

  let summary: Value = serde_json::from_slice(&output.stdout).unwrap();
  assert_eq!(summary["messages"], 2);
  assert_eq!(summary["malformed"], 1);
  assert_eq!(summary["routed"], 0);
}
