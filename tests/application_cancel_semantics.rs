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
    let exe = env!("CARGO_BIN_EXE_successd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn successd");
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
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

#[test]
fn cancel_deletes_the_pending_row_and_reapply_succeeds() {
    let workspace = temp_dir("successd-cancel");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let student = request_ok(
        &mut stdin,
        &mut reader,
        "s1",
        "students.save",
        json!({
            "studentId": "202411001",
            "password": "pw1234",
            "name": "이영희",
            "department": "전자공학전공",
            "field": "반도체 분야"
        }),
    );
    let student_id = student["id"].as_str().expect("student id").to_string();
    let program = request_ok(
        &mut stdin,
        &mut reader,
        "p1",
        "programs.save",
        json!({
            "title": "반도체 설계 캠프",
            "category": "교과",
            "field": "반도체 분야",
            "status": "모집중",
            "score": 10
        }),
    );
    let program_id = program["id"].as_str().expect("program id").to_string();

    let applied = request_ok(
        &mut stdin,
        &mut reader,
        "a1",
        "applications.apply",
        json!({ "programId": program_id, "studentId": student_id }),
    );
    let app_id = applied["id"].as_str().expect("application id").to_string();

    request_ok(
        &mut stdin,
        &mut reader,
        "x1",
        "applications.cancel",
        json!({ "applicationId": app_id, "studentId": student_id }),
    );
    let list = request_ok(
        &mut stdin,
        &mut reader,
        "l1",
        "applications.list",
        json!({ "studentId": student_id }),
    );
    assert!(list["applications"].as_array().expect("list").is_empty());

    // the row is gone, so applying again works
    request_ok(
        &mut stdin,
        &mut reader,
        "a2",
        "applications.apply",
        json!({ "programId": program_id, "studentId": student_id }),
    );

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn cancel_is_refused_once_reviewed() {
    let workspace = temp_dir("successd-cancel-approved");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let student = request_ok(
        &mut stdin,
        &mut reader,
        "s1",
        "students.save",
        json!({
            "studentId": "202411002",
            "password": "pw1234",
            "name": "정수진",
            "department": "전자공학전공",
            "field": "반도체 분야"
        }),
    );
    let student_id = student["id"].as_str().expect("student id").to_string();
    let program = request_ok(
        &mut stdin,
        &mut reader,
        "p1",
        "programs.save",
        json!({
            "title": "현장 견학",
            "category": "산학협력",
            "field": "반도체 분야",
            "status": "모집중",
            "score": 5
        }),
    );
    let program_id = program["id"].as_str().expect("program id").to_string();

    let applied = request_ok(
        &mut stdin,
        &mut reader,
        "a1",
        "applications.apply",
        json!({ "programId": program_id, "studentId": student_id }),
    );
    let app_id = applied["id"].as_str().expect("application id").to_string();
    request_ok(
        &mut stdin,
        &mut reader,
        "ap1",
        "applications.approve",
        json!({ "applicationId": app_id }),
    );

    let resp = request(
        &mut stdin,
        &mut reader,
        "x1",
        "applications.cancel",
        json!({ "applicationId": app_id, "studentId": student_id }),
    );
    assert_eq!(resp["ok"], false);
    assert_eq!(resp["error"]["code"], "invalid_status");

    let _ = std::fs::remove_dir_all(workspace);
}
