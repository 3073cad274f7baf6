#![allow(missing_docs)]

use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::Command;
use tempfile::TempDir;

const PATTERN: &str = r#"{
  "nodes": [
    {"name": "a", "labels": ["Person"]},
    {"name": "b", "labels": ["Person"]},
    {"name": "c", "labels": ["City"]}
  ],
  "rels": [
    {"name": "r1", "src": "a", "dst": "b", "labels": ["KNOWS"]},
    {"name": "r2", "src": "b", "dst": "c", "labels": ["LIVES_IN"]}
  ],
  "predicates": [
    {"expr": "a.age > 30", "variables": ["a"], "selectivity": 0.5}
  ],
  "statistics": {
    "nodes": {"Person": 1000.0, "City": 20.0},
    "rels": {"KNOWS": 4000.0, "LIVES_IN": 1000.0}
  }
}"#;

const SALES: &str = "city,price,qty\n\
Paris,10,1\n\
Rome,7,2\n\
Paris,5,3\n\
Oslo,,4\n\
Rome,7,5\n";

struct Workspace {
    dir: TempDir,
    config: PathBuf,
}

impl Workspace {
    fn new(config: &str) -> Self {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("config.toml");
        fs::write(&path, config).expect("write config");
        Self { dir, config: path }
    }

    fn file(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        fs::write(&path, contents).expect("write input");
        path
    }

    fn cmd(&self) -> Command {
        let mut cmd = Command::cargo_bin("umbral").expect("binary");
        cmd.arg("--config").arg(&self.config);
        cmd.env("RUST_LOG", "off");
        cmd
    }
}

fn stdout_of(cmd: &mut Command) -> String {
    let output = cmd.assert().success().get_output().stdout.clone();
    String::from_utf8(output).expect("utf8 stdout")
}

fn path_str(path: &Path) -> &str {
    path.to_str().expect("utf8 path")
}

#[test]
fn plan_prints_explain_tree() {
    let ws = Workspace::new("");
    let pattern = ws.file("pattern.json", PATTERN);
    let stdout = stdout_of(ws.cmd().args(["plan", path_str(&pattern)]));
    assert!(stdout.contains("Filter"), "{stdout}");
    assert!(stdout.contains("r1") && stdout.contains("r2"), "{stdout}");
    assert!(stdout.contains("plan_hash="), "{stdout}");
    assert!(stdout.contains("candidates="), "{stdout}");
}

#[test]
fn plan_json_is_machine_readable() {
    let ws = Workspace::new("[planner]\nmax_plans_per_subgraph = 2\n");
    let pattern = ws.file("pattern.json", PATTERN);
    let stdout = stdout_of(ws.cmd().args(["--format", "json", "plan", path_str(&pattern)]));
    let json: serde_json::Value = serde_json::from_str(&stdout).expect("json output");
    let candidates = json["candidates"].as_u64().expect("candidates");
    assert!((1..=2).contains(&candidates), "{json}");
    assert!(json["plan"]["root"]["op"].is_string(), "{json}");
    assert!(json["plan"]["plan_hash"].is_u64(), "{json}");
}

#[test]
fn plan_reports_disconnected_pattern() {
    let ws = Workspace::new("");
    let pattern = ws.file(
        "pattern.json",
        r#"{
            "nodes": [{"name": "a"}, {"name": "b"}, {"name": "c"}],
            "rels": [{"name": "r1", "src": "a", "dst": "b"}]
        }"#,
    );
    let output = ws
        .cmd()
        .args(["plan", path_str(&pattern)])
        .assert()
        .failure()
        .get_output()
        .stderr
        .clone();
    let stderr = String::from_utf8(output).expect("utf8 stderr");
    assert!(stderr.contains("no plan reaches"), "{stderr}");
}

#[test]
fn aggregate_groups_csv_rows() {
    let ws = Workspace::new("[aggregate]\nnum_partitions = 2\nlocal_flush_threshold = 1\n");
    let sales = ws.file("sales.csv", SALES);
    let stdout = stdout_of(ws.cmd().args([
        "aggregate",
        path_str(&sales),
        "--group-by",
        "city",
        "--agg",
        "count:*",
        "--agg",
        "sum:price",
        "--agg",
        "max:qty",
        "--threads",
        "3",
    ]));
    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(
        lines,
        vec![
            "city,count:*,sum:price,max:qty",
            "Oslo,1,NULL,4",
            "Paris,2,15,3",
            "Rome,2,14,5",
        ]
    );
}

#[test]
fn aggregate_json_without_group_by() {
    let ws = Workspace::new("");
    let sales = ws.file("sales.csv", SALES);
    let stdout = stdout_of(ws.cmd().args([
        "--format",
        "json",
        "aggregate",
        path_str(&sales),
        "--agg",
        "count_distinct:city",
        "--agg",
        "avg:qty",
    ]));
    let json: serde_json::Value = serde_json::from_str(&stdout).expect("json output");
    assert_eq!(json["columns"][0], "count_distinct:city");
    assert_eq!(json["rows"][0][0], 3);
    assert_eq!(json["rows"][0][1], 3.0);
}

#[test]
fn aggregate_rejects_unknown_column() {
    let ws = Workspace::new("");
    let sales = ws.file("sales.csv", SALES);
    ws.cmd()
        .args(["aggregate", path_str(&sales), "--agg", "sum:missing"])
        .assert()
        .failure();
}

#[test]
fn invalid_config_is_reported() {
    let ws = Workspace::new("[aggregate]\nnum_partitions = 3\n");
    let pattern = ws.file("pattern.json", PATTERN);
    let output = ws
        .cmd()
        .args(["plan", path_str(&pattern)])
        .assert()
        .failure()
        .get_output()
        .stderr
        .clone();
    let stderr = String::from_utf8(output).expect("utf8 stderr");
    assert!(stderr.contains("invalid config"), "{stderr}");
}
