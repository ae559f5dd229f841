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
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
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

fn request_err_code(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> String {
    let value = request(stdin, reader, id, method, params);
    assert!(
        !value.get("ok").and_then(|v| v.as_bool()).unwrap_or(true),
        "{} unexpectedly succeeded: {}",
        method,
        value
    );
    value["error"]["code"].as_str().expect("error code").to_string()
}

fn setup(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    workspace: &std::path::Path,
) -> (String, String) {
    request_ok(
        stdin,
        reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let student = request_ok(
        stdin,
        reader,
        "s1",
        "students.save",
        json!({
            "studentId": "202411001",
            "password": "pw1234",
            "name": "김철수",
            "department": "생명과학전공",
            "field": "바이오 분야"
        }),
    );
    let program = request_ok(
        stdin,
        reader,
        "p1",
        "programs.save",
        json!({
            "title": "창업 아이디어 경진대회",
            "category": "비교과",
            "field": "공통",
            "status": "모집중",
            "maxParticipants": 30,
            "score": 10
        }),
    );
    (
        student["id"].as_str().expect("student id").to_string(),
        program["id"].as_str().expect("program id").to_string(),
    )
}

#[test]
fn duplicate_apply_is_rejected_and_leaves_one_row() {
    let workspace = temp_dir("successd-apply-dup");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let (student_id, program_id) = setup(&mut stdin, &mut reader, &workspace);

    request_ok(
        &mut stdin,
        &mut reader,
        "a1",
        "applications.apply",
        json!({ "programId": program_id, "studentId": student_id }),
    );
    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "a2",
        "applications.apply",
        json!({ "programId": program_id, "studentId": student_id }),
    );
    assert_eq!(code, "duplicate_application");

    let list = request_ok(
        &mut stdin,
        &mut reader,
        "l1",
        "applications.list",
        json!({ "studentId": student_id }),
    );
    assert_eq!(list["applications"].as_array().expect("list").len(), 1);

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn apply_requires_a_recruiting_program() {
    let workspace = temp_dir("successd-apply-closed");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let (student_id, program_id) = setup(&mut stdin, &mut reader, &workspace);

    request_ok(
        &mut stdin,
        &mut reader,
        "p2",
        "programs.save",
        json!({
            "id": program_id,
            "title": "창업 아이디어 경진대회",
            "category": "비교과",
            "field": "공통",
            "status": "종료",
            "score": 10
        }),
    );
    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "a1",
        "applications.apply",
        json!({ "programId": program_id, "studentId": student_id }),
    );
    assert_eq!(code, "not_recruiting");

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn state_machine_rejects_illegal_transitions() {
    let workspace = temp_dir("successd-app-states");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let (student_id, program_id) = setup(&mut stdin, &mut reader, &workspace);

    let applied = request_ok(
        &mut stdin,
        &mut reader,
        "a1",
        "applications.apply",
        json!({ "programId": program_id, "studentId": student_id }),
    );
    let app_id = applied["id"].as_str().expect("application id").to_string();

    // complete straight from pending is illegal
    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "c1",
        "applications.complete",
        json!({ "applicationId": app_id }),
    );
    assert_eq!(code, "invalid_status");

    request_ok(
        &mut stdin,
        &mut reader,
        "ap1",
        "applications.approve",
        json!({ "applicationId": app_id }),
    );

    // approve and reject both require pending
    for (id, method) in [("ap2", "applications.approve"), ("rj1", "applications.reject")] {
        let code = request_err_code(
            &mut stdin,
            &mut reader,
            id,
            method,
            json!({ "applicationId": app_id }),
        );
        assert_eq!(code, "invalid_status", "{}", method);
    }

    let completed = request_ok(
        &mut stdin,
        &mut reader,
        "c2",
        "applications.complete",
        json!({ "applicationId": app_id }),
    );
    assert_eq!(completed["status"], "completed");

    // completed is terminal
    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "c3",
        "applications.complete",
        json!({ "applicationId": app_id }),
    );
    assert_eq!(code, "invalid_status");

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn completed_applications_leave_the_active_list() {
    let workspace = temp_dir("successd-app-active");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let (student_id, program_id) = setup(&mut stdin, &mut reader, &workspace);

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
    request_ok(
        &mut stdin,
        &mut reader,
        "c1",
        "applications.complete",
        json!({ "applicationId": app_id }),
    );

    let active = request_ok(
        &mut stdin,
        &mut reader,
        "l1",
        "applications.list",
        json!({ "studentId": student_id, "activeOnly": true }),
    );
    assert!(active["applications"].as_array().expect("list").is_empty());

    // the row itself survives with its completion date
    let all = request_ok(
        &mut stdin,
        &mut reader,
        "l2",
        "applications.list",
        json!({ "studentId": student_id }),
    );
    let rows = all["applications"].as_array().expect("list");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["status"], "completed");
    assert_eq!(rows[0]["statusLabel"], "이수완료");
    assert!(rows[0]["completedDate"].as_str().is_some());

    let _ = std::fs::remove_dir_all(workspace);
}
