use serde_json::json;
use std::io::{BufRead, BufReader, Read, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

const TRANSCRIPT: &str = "data:application/pdf;base64,aGVsbG8gd29ybGQ=";

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
fn course_submission_workbook_has_data_and_summary_sheets() {
    let workspace = temp_dir("successd-xlsx");
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
            "name": "김철수",
            "department": "생명과학전공",
            "field": "바이오"
        }),
    );
    let student_id = student["id"].as_str().expect("student id").to_string();
    request_ok(
        &mut stdin,
        &mut reader,
        "s2",
        "students.save",
        json!({
            "studentId": "202411002",
            "password": "pw1234",
            "name": "무제출",
            "department": "생명과학전공",
            "field": "바이오"
        }),
    );

    let courses: Vec<serde_json::Value> = (1..=8)
        .map(|i| {
            json!({
                "courseId": format!("course-{i}"),
                "courseCode": format!("BIO{:03}", i),
                "courseName": format!("생명과학 {i}"),
                "courseType": "전공심화",
                "isCompleted": true
            })
        })
        .collect();
    request_ok(
        &mut stdin,
        &mut reader,
        "sb1",
        "submissions.submit",
        json!({
            "studentId": student_id,
            "completedCourses": courses,
            "transcriptFile": TRANSCRIPT,
            "transcriptFileName": "이수표.pdf"
        }),
    );

    let out = workspace.join("submissions.xlsx");
    let result = request_ok(
        &mut stdin,
        &mut reader,
        "ex1",
        "exports.courseSubmissionsXlsx",
        json!({
            "field": "바이오",
            "department": "생명과학전공",
            "outPath": out.to_string_lossy()
        }),
    );
    assert_eq!(result["rowCount"], 2);
    let file_name = result["fileName"].as_str().expect("file name");
    assert!(file_name.starts_with("핵심교과목_생명과학전공_"));
    assert!(file_name.ends_with(".xlsx"));

    let f = std::fs::File::open(&out).expect("open workbook");
    let mut archive = zip::ZipArchive::new(f).expect("open zip");
    for name in [
        "[Content_Types].xml",
        "_rels/.rels",
        "xl/workbook.xml",
        "xl/_rels/workbook.xml.rels",
        "xl/styles.xml",
        "xl/worksheets/sheet1.xml",
        "xl/worksheets/sheet2.xml",
    ] {
        archive.by_name(name).expect(name);
    }

    let mut workbook = String::new();
    archive
        .by_name("xl/workbook.xml")
        .expect("workbook")
        .read_to_string(&mut workbook)
        .expect("read workbook");
    assert!(workbook.contains("핵심 교과목 현황"));
    assert!(workbook.contains("요약"));

    let mut sheet1 = String::new();
    archive
        .by_name("xl/worksheets/sheet1.xml")
        .expect("sheet1")
        .read_to_string(&mut sheet1)
        .expect("read sheet1");
    assert!(sheet1.contains("학번"));
    assert!(sheet1.contains("202411001"));
    assert!(sheet1.contains("검토중"));
    assert!(sheet1.contains("미제출"));
    assert!(sheet1.contains("<v>40</v>"));

    let mut sheet2 = String::new();
    archive
        .by_name("xl/worksheets/sheet2.xml")
        .expect("sheet2")
        .read_to_string(&mut sheet2)
        .expect("read sheet2");
    assert!(sheet2.contains("전체 학생"));
    assert!(sheet2.contains("2명"));
    assert!(sheet2.contains("1건"));
    assert!(sheet2.contains("평균 점수"));
    assert!(sheet2.contains("40점"));
    assert!(sheet2.contains("80%"));

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn workbook_export_refuses_an_empty_roster() {
    let workspace = temp_dir("successd-xlsx-empty");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let out = workspace.join("empty.xlsx");
    let resp = request(
        &mut stdin,
        &mut reader,
        "ex1",
        "exports.courseSubmissionsXlsx",
        json!({
            "field": "바이오",
            "department": "생명과학전공",
            "outPath": out.to_string_lossy()
        }),
    );
    assert_eq!(resp["ok"], false);
    assert_eq!(resp["error"]["code"], "no_rows");
    assert!(!out.exists());

    let _ = std::fs::remove_dir_all(workspace);
}
