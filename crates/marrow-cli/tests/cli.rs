//! End-to-end CLI tests. Each test runs `mw` as a subprocess inside an
//! isolated temp directory.

use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;
use tempfile::TempDir;

// ---------------------------------------------------------------------------
// Test Harness
// ---------------------------------------------------------------------------

fn mw(dir: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("mw"));
    cmd.current_dir(dir);
    cmd.env("MARROW_LOG", "error");
    cmd.env_remove("MARROW_FORMAT");
    cmd
}

fn json(dir: &Path, args: &[&str]) -> Value {
    let output = mw(dir)
        .args(args)
        .arg("--json")
        .output()
        .expect("mw should not crash");
    assert!(
        output.status.success(),
        "mw {args:?} failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).expect("--json should produce valid JSON")
}

/// Initialized repository with an adopted identity.
fn init_project(dir: &Path, login: &str) {
    mw(dir).arg("init").assert().success();
    mw(dir).args(["user", "create", login]).assert().success();
}

fn create(dir: &Path, title: &str) -> String {
    let out = json(dir, &["create", "--title", title, "--message", "first words"]);
    out["id"].as_str().expect("id field").to_string()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[test]
fn init_twice_needs_force() {
    let tmp = TempDir::new().expect("tempdir");
    mw(tmp.path()).arg("init").assert().success();
    assert!(tmp.path().join(".marrow/entities").is_dir());
    assert!(tmp.path().join(".marrow/config.toml").is_file());

    mw(tmp.path())
        .arg("init")
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));
    mw(tmp.path()).args(["init", "--force"]).assert().success();
}

#[test]
fn commands_outside_a_repository_fail_with_code() {
    let tmp = TempDir::new().expect("tempdir");
    mw(tmp.path())
        .arg("list")
        .assert()
        .failure()
        .stderr(predicate::str::contains("E1001"))
        .stderr(predicate::str::contains("mw init"));
}

#[test]
fn writes_need_an_identity() {
    let tmp = TempDir::new().expect("tempdir");
    mw(tmp.path()).arg("init").assert().success();
    mw(tmp.path())
        .args(["create", "--title", "orphan"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("mw user create"));
}

#[test]
fn user_create_adopts_the_identity() {
    let tmp = TempDir::new().expect("tempdir");
    mw(tmp.path()).arg("init").assert().success();
    let alice = json(tmp.path(), &["user", "create", "alice", "--name", "Alice"]);
    assert_eq!(alice["login"], "alice");
    assert_eq!(alice["current"], true);

    let bob = json(tmp.path(), &["user", "create", "bob", "--no-adopt"]);
    assert_eq!(bob["current"], false);

    let users = json(tmp.path(), &["user", "ls"]);
    let users = users.as_array().expect("array");
    assert_eq!(users.len(), 2);
    let current: Vec<&str> = users
        .iter()
        .filter(|u| u["current"] == true)
        .filter_map(|u| u["login"].as_str())
        .collect();
    assert_eq!(current, vec!["alice"]);

    json(tmp.path(), &["user", "adopt", "bob"]);
    let config = std::fs::read_to_string(tmp.path().join(".marrow/config.toml")).expect("config");
    let bob_id = bob["id"].as_str().expect("id");
    assert!(config.contains(bob_id));
}

#[test]
fn entity_lifecycle() {
    let tmp = TempDir::new().expect("tempdir");
    let dir = tmp.path();
    init_project(dir, "alice");

    let id = create(dir, "Crash on start");
    let short = &id[..7];

    let comment = json(dir, &["comment", short, "Reproduced on main"]);
    let comment_id = comment["comment"].as_str().expect("comment id").to_string();
    json(dir, &["comment-edit", short, &comment_id[..10], "Reproduced on main and 0.3"]);
    json(dir, &["title", short, "Crash on startup"]);
    json(dir, &["label", short, "--add", "bug", "--add", "p1"]);
    json(dir, &["label", short, "--rm", "p1"]);
    let closed = json(dir, &["close", short]);
    assert_eq!(closed["changed"], true);
    let again = json(dir, &["close", short]);
    assert_eq!(again["changed"], false);

    let show = json(dir, &["show", short]);
    assert_eq!(show["id"], id.as_str());
    assert_eq!(show["title"], "Crash on startup");
    assert_eq!(show["status"], "closed");
    assert_eq!(show["labels"], serde_json::json!(["bug"]));
    assert_eq!(show["author"], "alice");

    let timeline = show["timeline"].as_array().expect("timeline");
    let kinds: Vec<&str> = timeline.iter().filter_map(|t| t["type"].as_str()).collect();
    assert_eq!(
        kinds,
        vec!["create", "add_comment", "set_title", "label_change", "label_change", "set_status"]
    );
    assert_eq!(timeline[1]["message"], "Reproduced on main and 0.3");
    assert_eq!(timeline[1]["history"].as_array().map(Vec::len), Some(2));
}

#[test]
fn list_filters_by_status_and_label() {
    let tmp = TempDir::new().expect("tempdir");
    let dir = tmp.path();
    init_project(dir, "alice");

    let a = create(dir, "First");
    create(dir, "Second");
    json(dir, &["label", &a[..7], "--add", "bug"]);
    json(dir, &["close", &a[..7]]);

    let all = json(dir, &["list"]);
    assert_eq!(all.as_array().map(Vec::len), Some(2));

    let open = json(dir, &["list", "--status", "open"]);
    let titles: Vec<&str> = open
        .as_array()
        .expect("array")
        .iter()
        .filter_map(|r| r["title"].as_str())
        .collect();
    assert_eq!(titles, vec!["Second"]);

    let bugs = json(dir, &["list", "--label", "bug"]);
    assert_eq!(bugs[0]["id"], a.as_str());

    mw(dir)
        .args(["list", "--status", "closed"])
        .assert()
        .success()
        .stdout(predicate::str::contains("First"))
        .stdout(predicate::str::contains("Second").not());
}

#[test]
fn unknown_entity_reports_not_found() {
    let tmp = TempDir::new().expect("tempdir");
    init_project(tmp.path(), "alice");
    mw(tmp.path())
        .args(["show", "0000000"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("E2001"));
}

#[test]
fn jsonl_bridge_round_trip_between_clones() {
    let tmp = TempDir::new().expect("tempdir");
    let a = tmp.path().join("a");
    let b = tmp.path().join("b");
    std::fs::create_dir_all(&a).expect("mkdir");
    std::fs::create_dir_all(&b).expect("mkdir");
    let dump = tmp.path().join("shared.jsonl");
    let dump = dump.to_str().expect("utf8 path");

    init_project(&a, "alice");
    let id = create(&a, "Shared bug");
    json(&a, &["comment", &id[..7], "seen on staging"]);
    json(&a, &["bridge", "add", "dump", "--target", "jsonl", "--path", dump]);

    let push = json(&a, &["bridge", "push"]);
    assert_eq!(push[0]["direction"], "push");
    assert_eq!(push[0]["stats"]["entities"], 1);
    assert_eq!(push[0]["stats"]["comments"], 1);
    assert!(Path::new(dump).is_file());

    // A second push finds everything already exported.
    let again = json(&a, &["bridge", "push"]);
    assert_eq!(again[0]["stats"]["entities"], 0);
    assert_eq!(again[0]["stats"]["comments"], 0);

    init_project(&b, "bob");
    json(&b, &["bridge", "add", "dump", "--target", "jsonl", "--path", dump]);
    let pull = json(&b, &["bridge", "pull", "dump"]);
    assert_eq!(pull[0]["stats"]["entities"], 1);
    assert_eq!(pull[0]["stats"]["errors"], 0);

    let listed = json(&b, &["list"]);
    assert_eq!(listed[0]["title"], "Shared bug");
    let show = json(&b, &["show", listed[0]["human_id"].as_str().expect("id")]);
    assert_eq!(show["origin"], "jsonl");
    assert_eq!(show["timeline"].as_array().map(Vec::len), Some(2));

    let bridges = json(&b, &["bridge", "ls"]);
    assert_eq!(bridges[0]["name"], "dump");
    assert!(bridges[0]["last_import"].is_string());

    // Pulling again imports nothing new.
    let repull = json(&b, &["bridge", "pull", "--all"]);
    assert_eq!(repull[0]["stats"]["entities"], 0);
    assert_eq!(json(&b, &["list"]).as_array().map(Vec::len), Some(1));
}

#[test]
fn bridge_add_validates_config() {
    let tmp = TempDir::new().expect("tempdir");
    init_project(tmp.path(), "alice");
    mw(tmp.path())
        .args(["bridge", "add", "gh", "--target", "github"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("owner"));
    mw(tmp.path())
        .args(["bridge", "add", "x", "--target", "gitlab"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown bridge target"));
    mw(tmp.path())
        .args(["bridge", "pull"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no bridges configured"));
}

#[test]
fn merge_pulls_entities_from_another_clone() {
    let tmp = TempDir::new().expect("tempdir");
    let a = tmp.path().join("a");
    let b = tmp.path().join("b");
    std::fs::create_dir_all(&a).expect("mkdir");
    std::fs::create_dir_all(&b).expect("mkdir");

    init_project(&a, "alice");
    let id = create(&a, "From a");
    init_project(&b, "bob");
    create(&b, "From b");

    let a_path = a.to_str().expect("utf8");
    let report = json(&b, &["merge", a_path]);
    assert_eq!(report["entities_added"], 1);
    assert_eq!(report["identities_added"], 1);

    let again = json(&b, &["merge", a_path]);
    assert_eq!(again["operations_added"], 0);

    // Both clones edit the merged entity; merging both ways converges.
    json(&b, &["comment", &id[..7], "bob was here"]);
    json(&a, &["close", &id[..7]]);
    json(&a, &["merge", b.to_str().expect("utf8")]);
    json(&b, &["merge", a_path]);

    let hashes = |show: &Value| {
        let mut hashes: Vec<String> = show["timeline"]
            .as_array()
            .expect("timeline")
            .iter()
            .filter_map(|t| t["hash"].as_str().map(str::to_string))
            .collect();
        hashes.sort();
        hashes
    };
    let left = json(&a, &["show", &id[..7]]);
    let right = json(&b, &["show", &id[..7]]);
    assert_eq!(hashes(&left), hashes(&right));
    assert_eq!(hashes(&left).len(), 3);
    assert_eq!(left["status"], "closed");
    assert_eq!(right["status"], "closed");
    assert_eq!(json(&a, &["list"]).as_array().map(Vec::len), Some(2));
}
