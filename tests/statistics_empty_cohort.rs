use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_resultd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn resultd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    serde_json::from_str(line.trim()).expect("parse response json")
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        id,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

#[test]
fn empty_cohort_statistics_are_all_zero() {
    let workspace = temp_dir("resultd-stats-empty");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    // A class with no students at all.
    let class = request_ok(
        &mut stdin,
        &mut reader,
        "c1",
        "classes.create",
        json!({ "name": "JSS 3C" }),
    );
    let subject = request_ok(
        &mut stdin,
        &mut reader,
        "sub1",
        "subjects.create",
        json!({
            "name": "Basic Science",
            "code": "BSC",
            "maxScores": { "test1": 20, "test2": 20, "exam": 60 }
        }),
    );
    let cohort = request_ok(
        &mut stdin,
        &mut reader,
        "co1",
        "cohort.open",
        json!({
            "subjectId": subject["subjectId"],
            "classId": class["classId"],
            "term": 2,
            "session": "2025/2026"
        }),
    );
    assert_eq!(cohort["rosterSize"].as_i64(), Some(0));

    let stats = request_ok(
        &mut stdin,
        &mut reader,
        "st1",
        "cohort.statistics",
        json!({ "cohortId": cohort["cohortId"] }),
    );
    assert_eq!(stats["statistics"]["average"].as_f64(), Some(0.0));
    assert_eq!(stats["statistics"]["highest"].as_f64(), Some(0.0));
    assert_eq!(stats["statistics"]["lowest"].as_f64(), Some(0.0));
    assert_eq!(stats["statistics"]["passRate"].as_f64(), Some(0.0));

    let hist = stats["gradeHistogram"].as_array().expect("histogram");
    assert_eq!(hist.len(), 5);
    assert!(hist.iter().all(|b| b["count"].as_i64() == Some(0)));

    let _ = child.kill();
}

#[test]
fn rostered_but_unscored_cohort_is_also_zero() {
    let workspace = temp_dir("resultd-stats-unscored");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let class = request_ok(
        &mut stdin,
        &mut reader,
        "c1",
        "classes.create",
        json!({ "name": "JSS 3C" }),
    );
    for (i, name) in ["Alice Johnson", "Bob Smith"].iter().enumerate() {
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            &format!("s{}", i),
            "students.create",
            json!({ "classId": class["classId"], "name": name }),
        );
    }
    let subject = request_ok(
        &mut stdin,
        &mut reader,
        "sub1",
        "subjects.create",
        json!({
            "name": "Basic Science",
            "code": "BSC",
            "maxScores": { "test1": 20, "test2": 20, "exam": 60 }
        }),
    );
    let cohort = request_ok(
        &mut stdin,
        &mut reader,
        "co1",
        "cohort.open",
        json!({
            "subjectId": subject["subjectId"],
            "classId": class["classId"],
            "term": 2,
            "session": "2025/2026"
        }),
    );
    assert_eq!(cohort["rosterSize"].as_i64(), Some(2));
    assert_eq!(cohort["seededEntries"].as_i64(), Some(2));

    let stats = request_ok(
        &mut stdin,
        &mut reader,
        "st1",
        "cohort.statistics",
        json!({ "cohortId": cohort["cohortId"] }),
    );
    assert_eq!(stats["statistics"]["average"].as_f64(), Some(0.0));
    assert_eq!(stats["statistics"]["passRate"].as_f64(), Some(0.0));

    let _ = child.kill();
}

#[test]
fn unknown_method_and_missing_workspace_errors() {
    let workspace = temp_dir("resultd-stats-errors");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    // Cohort operations refuse to run before a workspace is selected.
    let resp = request(
        &mut stdin,
        &mut reader,
        "e1",
        "cohort.statistics",
        json!({ "cohortId": "whatever" }),
    );
    assert_eq!(resp["ok"].as_bool(), Some(false));
    assert_eq!(resp["error"]["code"].as_str(), Some("no_workspace"));

    let resp = request(&mut stdin, &mut reader, "e2", "cohort.explode", json!({}));
    assert_eq!(resp["ok"].as_bool(), Some(false));
    assert_eq!(resp["error"]["code"].as_str(), Some("not_implemented"));

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let resp = request(
        &mut stdin,
        &mut reader,
        "e3",
        "cohort.statistics",
        json!({ "cohortId": "no-such-cohort" }),
    );
    assert_eq!(resp["error"]["code"].as_str(), Some("not_found"));

    let _ = child.kill();
}
