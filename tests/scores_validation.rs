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

fn setup(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    workspace: &PathBuf,
) -> (String, String) {
    let _ = request_ok(
        stdin,
        reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let class = request_ok(stdin, reader, "c1", "classes.create", json!({ "name": "JSS 2A" }));
    let class_id = class["classId"].as_str().expect("classId").to_string();
    let student = request_ok(
        stdin,
        reader,
        "s1",
        "students.create",
        json!({ "classId": class_id, "name": "Alice Johnson" }),
    );
    let student_id = student["studentId"].as_str().expect("studentId").to_string();
    let subject = request_ok(
        stdin,
        reader,
        "sub1",
        "subjects.create",
        json!({
            "name": "Mathematics",
            "code": "MTH",
            "maxScores": { "test1": 20, "test2": 20, "exam": 60 }
        }),
    );
    let cohort = request_ok(
        stdin,
        reader,
        "co1",
        "cohort.open",
        json!({
            "subjectId": subject["subjectId"],
            "classId": class_id,
            "term": 1,
            "session": "2025/2026"
        }),
    );
    (
        cohort["cohortId"].as_str().expect("cohortId").to_string(),
        student_id,
    )
}

#[test]
fn boundary_values_accepted_and_rejected() {
    let workspace = temp_dir("resultd-score-bounds");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let (cohort_id, student_id) = setup(&mut stdin, &mut reader, &workspace);

    for (i, value) in [0.0, 20.0].iter().enumerate() {
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            &format!("ok{}", i),
            "scores.update",
            json!({
                "cohortId": cohort_id,
                "studentId": student_id,
                "field": "test1",
                "value": value
            }),
        );
    }

    for (i, value) in [20.01, -0.01].iter().enumerate() {
        let resp = request(
            &mut stdin,
            &mut reader,
            &format!("bad{}", i),
            "scores.update",
            json!({
                "cohortId": cohort_id,
                "studentId": student_id,
                "field": "test1",
                "value": value
            }),
        );
        assert_eq!(resp["ok"].as_bool(), Some(false), "value {} accepted", value);
        assert_eq!(resp["error"]["code"].as_str(), Some("validation_failed"));
        assert_eq!(
            resp["error"]["message"].as_str(),
            Some("test1 must be between 0 and 20")
        );
    }

    // Rejected values must not have been persisted.
    let compiled = request_ok(
        &mut stdin,
        &mut reader,
        "comp1",
        "cohort.compile",
        json!({ "cohortId": cohort_id }),
    );
    assert_eq!(compiled["perStudent"][0]["test1"].as_f64(), Some(20.0));

    let _ = child.kill();
}

#[test]
fn numeric_strings_accepted_garbage_rejected() {
    let workspace = temp_dir("resultd-score-strings");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let (cohort_id, student_id) = setup(&mut stdin, &mut reader, &workspace);

    let res = request_ok(
        &mut stdin,
        &mut reader,
        "str1",
        "scores.update",
        json!({
            "cohortId": cohort_id,
            "studentId": student_id,
            "field": "exam",
            "value": "54.5"
        }),
    );
    assert_eq!(res["derived"]["total"].as_f64(), Some(54.5));

    let resp = request(
        &mut stdin,
        &mut reader,
        "str2",
        "scores.update",
        json!({
            "cohortId": cohort_id,
            "studentId": student_id,
            "field": "exam",
            "value": "abc"
        }),
    );
    assert_eq!(resp["ok"].as_bool(), Some(false));
    assert_eq!(resp["error"]["code"].as_str(), Some("validation_failed"));

    let _ = child.kill();
}

#[test]
fn sub_pass_component_earns_warning_not_rejection() {
    let workspace = temp_dir("resultd-score-warning");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let (cohort_id, student_id) = setup(&mut stdin, &mut reader, &workspace);

    // 7/20 is below 40% of the ceiling.
    let res = request_ok(
        &mut stdin,
        &mut reader,
        "w1",
        "scores.update",
        json!({
            "cohortId": cohort_id,
            "studentId": student_id,
            "field": "test1",
            "value": 7
        }),
    );
    assert!(res["warning"].as_str().expect("warning").contains("test1"));

    // 8/20 is exactly 40%: no warning.
    let res = request_ok(
        &mut stdin,
        &mut reader,
        "w2",
        "scores.update",
        json!({
            "cohortId": cohort_id,
            "studentId": student_id,
            "field": "test1",
            "value": 8
        }),
    );
    assert!(res["warning"].is_null());

    let _ = child.kill();
}

#[test]
fn null_clears_a_mark_back_to_unentered() {
    let workspace = temp_dir("resultd-score-clear");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let (cohort_id, student_id) = setup(&mut stdin, &mut reader, &workspace);

    let res = request_ok(
        &mut stdin,
        &mut reader,
        "u1",
        "scores.update",
        json!({
            "cohortId": cohort_id,
            "studentId": student_id,
            "field": "test1",
            "value": 15
        }),
    );
    assert_eq!(res["derived"]["total"].as_f64(), Some(15.0));

    let res = request_ok(
        &mut stdin,
        &mut reader,
        "u2",
        "scores.update",
        json!({
            "cohortId": cohort_id,
            "studentId": student_id,
            "field": "test1",
            "value": null
        }),
    );
    // The entry is blank again: no derived marks at all.
    assert!(res["derived"].is_null());

    let _ = child.kill();
}

#[test]
fn unknown_field_is_bad_params() {
    let workspace = temp_dir("resultd-score-badfield");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let (cohort_id, student_id) = setup(&mut stdin, &mut reader, &workspace);

    let resp = request(
        &mut stdin,
        &mut reader,
        "f1",
        "scores.update",
        json!({
            "cohortId": cohort_id,
            "studentId": student_id,
            "field": "midterm",
            "value": 10
        }),
    );
    assert_eq!(resp["ok"].as_bool(), Some(false));
    assert_eq!(resp["error"]["code"].as_str(), Some("bad_params"));

    let _ = child.kill();
}
