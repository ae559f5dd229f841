use super::{db_conn, db_err, optional_str, required_str, HandlerErr};
use crate::export::{self, Cell, Worksheet};
use crate::ipc::error::ok;
use crate::ipc::types::{AppState, Request};
use crate::scoring;
use rusqlite::Connection;
use serde_json::json;
use std::path::PathBuf;

const STUDENTS_HEADER: [&str; 11] = [
    "학번",
    "이름",
    "학과",
    "분야",
    "이메일",
    "전화번호",
    "비교과",
    "핵심교과",
    "산학협력",
    "총점",
    "비고",
];

const APPLICANTS_HEADER: [&str; 9] = [
    "학번",
    "이름",
    "학과",
    "분야",
    "이메일",
    "전화번호",
    "신청일",
    "상태",
    "완료일",
];

const PROGRAMS_HEADER: [&str; 8] = [
    "프로그램명",
    "분류",
    "분야",
    "시작일",
    "종료일",
    "상태",
    "모집인원",
    "점수",
];

const SUBMISSIONS_HEADER: [&str; 11] = [
    "번호",
    "학번",
    "이름",
    "전공",
    "이수 과목 수",
    "점수",
    "증빙 파일",
    "제출 상태",
    "제출일",
    "승인일",
    "반려 사유",
];

fn out_path(req: &Request) -> Result<PathBuf, HandlerErr> {
    required_str(&req.params, "outPath").map(PathBuf::from)
}

fn date_part(stamp: &Option<String>) -> String {
    stamp
        .as_deref()
        .map(|s| s.split('T').next().unwrap_or(s).to_string())
        .unwrap_or_else(|| "-".to_string())
}

fn students_csv(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let path = out_path(req)?;
    let field = optional_str(&req.params, "field");
    let sql = format!(
        "SELECT student_id, name, department, field, email, phone,
                non_curricular_score, core_subject_score, industry_score, memo
         FROM users
         WHERE account_type = 'student' AND status = 'approved'{}
         ORDER BY student_id",
        if field.is_some() { " AND field = ?" } else { "" }
    );
    let mut stmt = conn.prepare(&sql).map_err(db_err("db_query_failed"))?;
    let map_row = |r: &rusqlite::Row<'_>| -> rusqlite::Result<Vec<String>> {
        let non_curricular: i64 = r.get(6)?;
        let core_subject: i64 = r.get(7)?;
        let industry: i64 = r.get(8)?;
        Ok(vec![
            r.get::<_, Option<String>>(0)?.unwrap_or_default(),
            r.get::<_, String>(1)?,
            r.get::<_, Option<String>>(2)?.unwrap_or_default(),
            r.get::<_, Option<String>>(3)?.unwrap_or_default(),
            r.get::<_, Option<String>>(4)?.unwrap_or_default(),
            r.get::<_, Option<String>>(5)?.unwrap_or_default(),
            non_curricular.to_string(),
            core_subject.to_string(),
            industry.to_string(),
            scoring::total_score(non_curricular, core_subject, industry).to_string(),
            r.get::<_, Option<String>>(9)?.unwrap_or_default(),
        ])
    };
    let rows = match &field {
        Some(f) => stmt
            .query_map([f], map_row)
            .and_then(|it| it.collect::<Result<Vec<_>, _>>()),
        None => stmt
            .query_map([], map_row)
            .and_then(|it| it.collect::<Result<Vec<_>, _>>()),
    }
    .map_err(db_err("db_query_failed"))?;

    export::write_csv(&path, &STUDENTS_HEADER, &rows)
        .map_err(|e| HandlerErr::new("export_failed", e.to_string()))?;
    let filter_name = field.unwrap_or_else(|| "전체".to_string());
    Ok(json!({
        "path": path.to_string_lossy(),
        "fileName": format!("학생목록_{}_{}.csv", filter_name, scoring::today()),
        "rowCount": rows.len(),
    }))
}

fn student_template_csv(req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let path = out_path(req)?;
    let header = ["학번", "이름", "학과", "이메일", "전화번호", "비고"];
    let example = vec![vec![
        "202411001".to_string(),
        "홍길동".to_string(),
        "컴퓨터공학과".to_string(),
        "hong@example.com".to_string(),
        "010-1234-5678".to_string(),
        String::new(),
    ]];
    export::write_csv(&path, &header, &example)
        .map_err(|e| HandlerErr::new("export_failed", e.to_string()))?;
    Ok(json!({
        "path": path.to_string_lossy(),
        "fileName": "학생등록양식.csv",
        "rowCount": 1,
    }))
}

fn programs_csv(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let path = out_path(req)?;
    let field = optional_str(&req.params, "field");
    let sql = format!(
        "SELECT title, category, field, start_date, end_date, status, max_participants, score
         FROM programs{}
         ORDER BY created_at DESC",
        if field.is_some() { " WHERE field = ?" } else { "" }
    );
    let mut stmt = conn.prepare(&sql).map_err(db_err("db_query_failed"))?;
    let map_row = |r: &rusqlite::Row<'_>| -> rusqlite::Result<Vec<String>> {
        Ok(vec![
            r.get::<_, String>(0)?,
            r.get::<_, String>(1)?,
            r.get::<_, String>(2)?,
            r.get::<_, Option<String>>(3)?.unwrap_or_default(),
            r.get::<_, Option<String>>(4)?.unwrap_or_default(),
            r.get::<_, String>(5)?,
            r.get::<_, Option<i64>>(6)?
                .map(|n| n.to_string())
                .unwrap_or_default(),
            r.get::<_, i64>(7)?.to_string(),
        ])
    };
    let rows = match &field {
        Some(f) => stmt
            .query_map([f], map_row)
            .and_then(|it| it.collect::<Result<Vec<_>, _>>()),
        None => stmt
            .query_map([], map_row)
            .and_then(|it| it.collect::<Result<Vec<_>, _>>()),
    }
    .map_err(db_err("db_query_failed"))?;

    export::write_csv(&path, &PROGRAMS_HEADER, &rows)
        .map_err(|e| HandlerErr::new("export_failed", e.to_string()))?;
    let filter_name = field.unwrap_or_else(|| "전체".to_string());
    Ok(json!({
        "path": path.to_string_lossy(),
        "fileName": format!("프로그램목록_{}_{}.csv", filter_name, scoring::today()),
        "rowCount": rows.len(),
    }))
}

fn program_applicants_csv(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let path = out_path(req)?;
    let program_id = required_str(&req.params, "programId")?;

    let title: String = conn
        .query_row(
            "SELECT title FROM programs WHERE id = ?",
            [program_id.as_str()],
            |r| r.get(0),
        )
        .map_err(|_| HandlerErr::new("not_found", "프로그램을 찾을 수 없습니다."))?;

    let mut stmt = conn
        .prepare(
            "SELECT u.student_id, u.name, u.department, u.field, u.email, u.phone,
                    a.applied_date, a.status, a.completed_date
             FROM program_applications a
             JOIN users u ON u.id = a.student_id
             WHERE a.program_id = ?
             ORDER BY a.applied_date, u.student_id",
        )
        .map_err(db_err("db_query_failed"))?;
    let rows = stmt
        .query_map([program_id.as_str()], |r| {
            let status: String = r.get(7)?;
            Ok(vec![
                r.get::<_, Option<String>>(0)?.unwrap_or_default(),
                r.get::<_, String>(1)?,
                r.get::<_, Option<String>>(2)?.unwrap_or_default(),
                r.get::<_, Option<String>>(3)?.unwrap_or_default(),
                r.get::<_, Option<String>>(4)?.unwrap_or_default(),
                r.get::<_, Option<String>>(5)?.unwrap_or_default(),
                r.get::<_, String>(6)?,
                scoring::application_status_label(&status).to_string(),
                r.get::<_, Option<String>>(8)?.unwrap_or_default(),
            ])
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err("db_query_failed"))?;

    export::write_csv(&path, &APPLICANTS_HEADER, &rows)
        .map_err(|e| HandlerErr::new("export_failed", e.to_string()))?;
    Ok(json!({
        "path": path.to_string_lossy(),
        "fileName": format!("{}_신청자목록_{}.csv", title, scoring::today()),
        "rowCount": rows.len(),
    }))
}

struct RosterRow {
    student_no: String,
    name: String,
    department: String,
    submission: Option<RosterSubmission>,
}

struct RosterSubmission {
    total_completed_count: i64,
    total_score: i64,
    transcript_file_name: Option<String>,
    status: String,
    submitted_at: Option<String>,
    approved_at: Option<String>,
    rejection_reason: Option<String>,
}

fn course_submissions_xlsx(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let path = out_path(req)?;
    let field = required_str(&req.params, "field")?;
    let department = required_str(&req.params, "department")?;
    let status_filter = req
        .params
        .get("status")
        .and_then(|v| v.as_str())
        .filter(|s| *s != "all")
        .map(|s| s.to_string());

    let mut sql = String::from(
        "SELECT u.student_id, u.name, u.department,
                s.total_completed_count, s.total_score, s.transcript_file_name,
                s.status, s.submitted_at, s.approved_at, s.rejection_reason
         FROM users u
         LEFT JOIN core_courses_submissions s ON s.student_id = u.id
         WHERE u.account_type = 'student' AND u.status = 'approved'
           AND u.field = ? AND u.department = ?",
    );
    if status_filter.is_some() {
        sql.push_str(" AND s.status = ?");
    }
    sql.push_str(" ORDER BY u.student_id");

    let mut stmt = conn.prepare(&sql).map_err(db_err("db_query_failed"))?;
    let map_row = |r: &rusqlite::Row<'_>| -> rusqlite::Result<RosterRow> {
        let status: Option<String> = r.get(6)?;
        let submission = status.map(|status| RosterSubmission {
            total_completed_count: r.get(3).unwrap_or(0),
            total_score: r.get(4).unwrap_or(0),
            transcript_file_name: r.get(5).unwrap_or(None),
            status,
            submitted_at: r.get(7).unwrap_or(None),
            approved_at: r.get(8).unwrap_or(None),
            rejection_reason: r.get(9).unwrap_or(None),
        });
        Ok(RosterRow {
            student_no: r.get::<_, Option<String>>(0)?.unwrap_or_default(),
            name: r.get(1)?,
            department: r.get::<_, Option<String>>(2)?.unwrap_or_default(),
            submission,
        })
    };
    let rows = match &status_filter {
        Some(s) => stmt
            .query_map([field.as_str(), department.as_str(), s.as_str()], map_row)
            .and_then(|it| it.collect::<Result<Vec<_>, _>>()),
        None => stmt
            .query_map([field.as_str(), department.as_str()], map_row)
            .and_then(|it| it.collect::<Result<Vec<_>, _>>()),
    }
    .map_err(db_err("db_query_failed"))?;

    if rows.is_empty() {
        return Err(HandlerErr::new("no_rows", "다운로드할 데이터가 없습니다."));
    }

    let mut data_rows: Vec<Vec<Cell>> = Vec::with_capacity(rows.len() + 1);
    data_rows.push(SUBMISSIONS_HEADER.iter().map(|h| Cell::text(*h)).collect());
    for (i, row) in rows.iter().enumerate() {
        let (count, score, file, status_label, submitted, approved, reason) = match &row.submission {
            Some(s) => (
                Cell::Number(s.total_completed_count as f64),
                Cell::Number(s.total_score as f64),
                Cell::text(s.transcript_file_name.clone().unwrap_or_else(|| "미제출".to_string())),
                Cell::text(scoring::submission_status_label(&s.status)),
                Cell::text(date_part(&s.submitted_at)),
                Cell::text(date_part(&s.approved_at)),
                Cell::text(s.rejection_reason.clone().unwrap_or_else(|| "-".to_string())),
            ),
            None => (
                Cell::Number(0.0),
                Cell::Number(0.0),
                Cell::text("미제출"),
                Cell::text("미제출"),
                Cell::text("-"),
                Cell::text("-"),
                Cell::text("-"),
            ),
        };
        data_rows.push(vec![
            Cell::Number((i + 1) as f64),
            Cell::text(row.student_no.clone()),
            Cell::text(row.name.clone()),
            Cell::text(row.department.clone()),
            count,
            score,
            file,
            status_label,
            submitted,
            approved,
            reason,
        ]);
    }

    let submitted: Vec<&RosterSubmission> =
        rows.iter().filter_map(|r| r.submission.as_ref()).collect();
    let pending_count = submitted.iter().filter(|s| s.status == "pending").count();
    let avg_score = if submitted.is_empty() {
        0
    } else {
        (submitted.iter().map(|s| s.total_score).sum::<i64>() as f64 / submitted.len() as f64)
            .round() as i64
    };
    let avg_completion = if submitted.is_empty() {
        0
    } else {
        (submitted
            .iter()
            .map(|s| s.total_score as f64 / scoring::MAX_SCORE as f64 * 100.0)
            .sum::<f64>()
            / submitted.len() as f64)
            .round() as i64
    };

    let kv = |k: &str, v: String| vec![Cell::text(k), Cell::text(v)];
    let summary_rows = vec![
        vec![Cell::text("통계 요약"), Cell::Empty],
        kv("전체 학생", format!("{}명", rows.len())),
        kv("제출 완료", format!("{}명", submitted.len())),
        kv("검토 대기", format!("{}건", pending_count)),
        kv("평균 점수", format!("{}점", avg_score)),
        kv("평균 이수율", format!("{}%", avg_completion)),
        vec![Cell::Empty, Cell::Empty],
        vec![Cell::text("다운로드 정보"), Cell::Empty],
        kv("다운로드 일시", scoring::now_iso()),
        kv("분야", field.clone()),
        kv("전공", department.clone()),
        kv(
            "필터 상태",
            status_filter
                .as_deref()
                .map(|s| scoring::submission_status_label(s).to_string())
                .unwrap_or_else(|| "전체".to_string()),
        ),
        kv("다운로드 건수", format!("{}건", rows.len())),
    ];

    let sheets = [
        Worksheet {
            name: "핵심 교과목 현황".to_string(),
            col_widths: vec![6.0, 12.0, 10.0, 20.0, 14.0, 8.0, 35.0, 12.0, 12.0, 12.0, 35.0],
            rows: data_rows,
        },
        Worksheet {
            name: "요약".to_string(),
            col_widths: vec![20.0, 30.0],
            rows: summary_rows,
        },
    ];
    export::write_workbook(&path, &sheets)
        .map_err(|e| HandlerErr::new("export_failed", e.to_string()))?;

    Ok(json!({
        "path": path.to_string_lossy(),
        "fileName": format!("핵심교과목_{}_{}.xlsx", department, scoring::today()),
        "rowCount": rows.len(),
    }))
}

fn handle(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let result = match req.method.as_str() {
        "exports.studentsCsv" => students_csv(conn, req),
        "exports.studentTemplateCsv" => student_template_csv(req),
        "exports.programsCsv" => programs_csv(conn, req),
        "exports.programApplicantsCsv" => program_applicants_csv(conn, req),
        _ => course_submissions_xlsx(conn, req),
    };
    match result {
        Ok(result) => ok(&req.id, result),
        Err(e) => e.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "exports.studentsCsv"
        | "exports.studentTemplateCsv"
        | "exports.programsCsv"
        | "exports.programApplicantsCsv"
        | "exports.courseSubmissionsXlsx" => Some(handle(state, req)),
        _ => None,
    }
}
