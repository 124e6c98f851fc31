use assert_cmd::cargo::cargo_bin_cmd;
use pdf_engine::fixtures;
use predicates::prelude::*;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

struct Workspace {
    dir: TempDir,
}

impl Workspace {
    fn new() -> Self {
        Self { dir: tempfile::tempdir().expect("temp dir should be created") }
    }

    fn pdf(&self, name: &str, pages: usize) -> PathBuf {
        fixtures::write_pdf(self.dir.path(), name, pages).expect("fixture should be written")
    }

    fn bytes(&self, name: &str, bytes: &[u8]) -> PathBuf {
        fixtures::write_bytes(self.dir.path(), name, bytes).expect("fixture should be written")
    }

    fn data_dir(&self) -> PathBuf {
        self.dir.path().join("data")
    }

    fn path(&self) -> &Path {
        self.dir.path()
    }
}

fn cli(workspace: &Workspace) -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("twinpage-cli");
    cmd.env("TWINPAGE_DATA_DIR", workspace.data_dir()).env_remove("RUST_LOG");
    cmd
}

fn json_lines(stdout: &[u8]) -> Vec<Value> {
    String::from_utf8_lossy(stdout)
        .lines()
        .map(|line| serde_json::from_str(line).expect("each line should be json"))
        .collect()
}

fn rendered_pages(events: &[Value], side: &str) -> Vec<u64> {
    events
        .iter()
        .filter(|event| event["side"] == side && event["event"] == "page_rendered")
        .filter_map(|event| event["page"].as_u64())
        .collect()
}

#[test]
fn info_emits_stable_json_contract() {
    let workspace = Workspace::new();
    let file = workspace.pdf("small.pdf", 3);

    let output =
        cli(&workspace).arg("info").arg(&file).assert().success().get_output().stdout.clone();

    let mut value: Value =
        serde_json::from_slice(&output).expect("stdout should contain valid json");
    value["path"] = Value::String("<FIXTURE>".to_owned());

    insta::assert_json_snapshot!("cli_info_small_pdf", value);
}

#[test]
fn info_fails_for_missing_file() {
    let workspace = Workspace::new();

    cli(&workspace)
        .arg("info")
        .arg(workspace.path().join("missing.pdf"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("file does not exist"));
}

#[test]
fn info_reports_media_box_inherited_from_page_tree() {
    let workspace = Workspace::new();
    let bytes = fixtures::pdf_with_inherited_media_box(2, (200, 300));
    let file = workspace.bytes("inherited.pdf", &bytes);

    let output =
        cli(&workspace).arg("info").arg(&file).assert().success().get_output().stdout.clone();
    let value: Value = serde_json::from_slice(&output).expect("stdout should contain valid json");

    assert_eq!(value["page_count"], 2);
    assert_eq!(value["first_page_size_pt"]["width"], 200.0);
    assert_eq!(value["first_page_size_pt"]["height"], 300.0);
}

#[test]
fn info_opens_pdf_that_only_mentions_encrypt_in_content() {
    let workspace = Workspace::new();
    let bytes = fixtures::pdf_with_page_text("see /Encrypt dictionary");
    let file = workspace.bytes("notes.pdf", &bytes);

    cli(&workspace).arg("info").arg(file).assert().success();
}

#[test]
fn info_fails_for_encrypted_pdf() {
    let workspace = Workspace::new();
    let file = workspace.bytes("locked.pdf", &fixtures::encrypted_pdf());

    cli(&workspace)
        .arg("info")
        .arg(file)
        .assert()
        .failure()
        .stderr(predicate::str::contains("encrypted PDFs are not supported"));
}

#[test]
fn compare_prints_ordered_events_and_writes_pages() {
    let workspace = Workspace::new();
    let left = workspace.pdf("original.pdf", 3);
    let right = workspace.pdf("translated.pdf", 3);
    let out = workspace.path().join("out");

    let output = cli(&workspace)
        .arg("compare")
        .arg(&left)
        .arg(&right)
        .arg("--scale")
        .arg("0.25")
        .arg("--out")
        .arg(&out)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let events = json_lines(&output);
    assert_eq!(rendered_pages(&events, "left"), vec![1, 2, 3]);
    assert_eq!(rendered_pages(&events, "right"), vec![1, 2, 3]);
    assert!(events.iter().any(|event| event["event"] == "loaded" && event["page_count"] == 3));

    let page = image::open(out.join("right-page-3.png")).expect("page should be a readable png");
    assert_eq!((page.width(), page.height()), (153, 198));
}

#[test]
fn compare_reports_failing_side_and_succeeds() {
    let workspace = Workspace::new();
    let left = workspace.pdf("original.pdf", 2);
    let right = workspace.bytes("broken.pdf", &fixtures::truncated_pdf());

    let output = cli(&workspace)
        .arg("compare")
        .arg(&left)
        .arg(&right)
        .arg("--scale")
        .arg("0.25")
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let events = json_lines(&output);
    assert_eq!(rendered_pages(&events, "left"), vec![1, 2]);
    assert!(events.iter().any(|event| {
        event["side"] == "right" && event["event"] == "error" && event["kind"] == "load"
    }));
}

#[test]
fn compare_fails_when_both_sides_fail() {
    let workspace = Workspace::new();
    let left = workspace.bytes("notes.txt", b"plain text");
    let right = workspace.bytes("broken.pdf", &fixtures::truncated_pdf());

    cli(&workspace)
        .arg("compare")
        .arg(&left)
        .arg(&right)
        .assert()
        .failure()
        .stderr(predicate::str::contains("neither document could be loaded"));
}

#[test]
fn sets_lifecycle_round_trips_through_registry() {
    let workspace = Workspace::new();
    let original = workspace.pdf("original.pdf", 2);
    let translated = workspace.pdf("translated.pdf", 2);

    let output = cli(&workspace)
        .args(["sets", "create", "Chapter 1"])
        .arg(&original)
        .arg(&translated)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let created: Value = serde_json::from_slice(&output).expect("created set json");
    let id = created["id"].as_str().expect("id").to_owned();
    assert_eq!(created["name"], "Chapter 1");

    let output =
        cli(&workspace).args(["sets", "list"]).assert().success().get_output().stdout.clone();
    let listed: Value = serde_json::from_slice(&output).expect("list json");
    assert_eq!(listed.as_array().map(Vec::len), Some(1));
    assert_eq!(listed[0]["id"], id.as_str());

    cli(&workspace)
        .args(["sets", "delete", &id])
        .assert()
        .success()
        .stdout(predicate::str::contains(format!("deleted:{id}")));

    cli(&workspace)
        .args(["sets", "delete", &id])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not found"));
}

#[test]
fn sets_create_rejects_blank_name() {
    let workspace = Workspace::new();
    let original = workspace.pdf("original.pdf", 1);

    cli(&workspace)
        .args(["sets", "create", "   "])
        .arg(&original)
        .arg(&original)
        .assert()
        .failure()
        .stderr(predicate::str::contains("name must not be empty"));
}

#[test]
fn open_renders_set_and_stores_bookmark() {
    let workspace = Workspace::new();
    let original = workspace.pdf("original.pdf", 3);
    let translated = workspace.pdf("translated.pdf", 3);

    let output = cli(&workspace)
        .args(["sets", "create", "Report"])
        .arg(&original)
        .arg(&translated)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let created: Value = serde_json::from_slice(&output).expect("created set json");
    let id = created["id"].as_str().expect("id").to_owned();

    let output = cli(&workspace)
        .args(["open", &id, "--page", "2", "--scale", "0.25"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let events = json_lines(&output);
    assert_eq!(rendered_pages(&events, "right"), vec![1, 2, 3]);
    let scrolled: Vec<_> = events
        .iter()
        .filter(|event| event["event"] == "scroll_offset_changed")
        .collect();
    assert_eq!(scrolled.len(), 1);
    assert_eq!(scrolled[0]["side"], "right");

    let output =
        cli(&workspace).args(["sets", "list"]).assert().success().get_output().stdout.clone();
    let listed: Value = serde_json::from_slice(&output).expect("list json");
    assert_eq!(listed[0]["bookmark"]["page"], 2);
    assert!(listed[0]["lastOpenedAt"].is_string());
}

#[test]
fn prefs_set_persists_values() {
    let workspace = Workspace::new();

    cli(&workspace).args(["prefs", "set", "--scale", "2", "--facing", "false"]).assert().success();

    let output =
        cli(&workspace).args(["prefs", "show"]).assert().success().get_output().stdout.clone();
    let prefs: Value = serde_json::from_slice(&output).expect("prefs json");
    assert_eq!(prefs["renderScale"], 2.0);
    assert_eq!(prefs["facing"], false);
}

#[test]
fn version_prints_package_version() {
    let workspace = Workspace::new();

    cli(&workspace)
        .arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}
