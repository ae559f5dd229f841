use super::{db_conn, db_err, optional_str, required_str, HandlerErr};
use crate::ipc::error::ok;
use crate::ipc::types::{AppState, Request};
use crate::scoring;
use rusqlite::Connection;
use serde_json::json;
use uuid::Uuid;

pub const COURSE_TYPES: [&str; 4] = ["전공기초", "전공심화", "전공핵심", "전공선택"];

fn course_row_json(r: &rusqlite::Row<'_>) -> rusqlite::Result<serde_json::Value> {
    Ok(json!({
        "id": r.get::<_, String>(0)?,
        "field": r.get::<_, String>(1)?,
        "department": r.get::<_, String>(2)?,
        "courseCode": r.get::<_, String>(3)?,
        "courseName": r.get::<_, String>(4)?,
        "courseType": r.get::<_, String>(5)?,
        "credits": r.get::<_, i64>(6)?,
        "orderIndex": r.get::<_, i64>(7)?,
    }))
}

fn list_courses(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let field = required_str(&req.params, "field")?;
    let department = required_str(&req.params, "department")?;
    let mut stmt = conn
        .prepare(
            "SELECT id, field, department, course_code, course_name, course_type,
                    credits, order_index
             FROM core_courses
             WHERE field = ? AND department = ?
             ORDER BY order_index, course_name",
        )
        .map_err(db_err("db_query_failed"))?;
    let courses = stmt
        .query_map([field.as_str(), department.as_str()], course_row_json)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err("db_query_failed"))?;
    Ok(json!({ "courses": courses }))
}

fn save_course(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let field = required_str(&req.params, "field")?;
    let department = required_str(&req.params, "department")?;
    let course_code = required_str(&req.params, "courseCode")?;
    let course_name = required_str(&req.params, "courseName")?;
    let course_type = required_str(&req.params, "courseType")?;
    if course_code.trim().is_empty() {
        return Err(HandlerErr::new("bad_params", "학수번호를 입력해주세요."));
    }
    if course_name.trim().is_empty() {
        return Err(HandlerErr::new("bad_params", "과목명을 입력해주세요."));
    }
    if !COURSE_TYPES.contains(&course_type.as_str()) {
        return Err(HandlerErr::with_details(
            "bad_params",
            "과목 구분이 올바르지 않습니다.",
            json!({ "courseType": course_type }),
        ));
    }
    let credits = req
        .params
        .get("credits")
        .and_then(|v| v.as_i64())
        .unwrap_or(3);
    let order_index = req
        .params
        .get("orderIndex")
        .and_then(|v| v.as_i64())
        .unwrap_or(0);

    if let Some(existing_id) = optional_str(&req.params, "id") {
        let changed = conn
            .execute(
                "UPDATE core_courses
                 SET field = ?, department = ?, course_code = ?, course_name = ?,
                     course_type = ?, credits = ?, order_index = ?
                 WHERE id = ?",
                rusqlite::params![
                    field,
                    department,
                    course_code.trim(),
                    course_name.trim(),
                    course_type,
                    credits,
                    order_index,
                    existing_id,
                ],
            )
            .map_err(db_err("db_update_failed"))?;
        if changed == 0 {
            return Err(HandlerErr::new("not_found", "교과목을 찾을 수 없습니다."));
        }
        return Ok(json!({ "id": existing_id }));
    }

    let course_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO core_courses(
            id, field, department, course_code, course_name, course_type,
            credits, order_index, created_at
         ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
        rusqlite::params![
            course_id,
            field,
            department,
            course_code.trim(),
            course_name.trim(),
            course_type,
            credits,
            order_index,
            scoring::now_iso(),
        ],
    )
    .map_err(db_err("db_insert_failed"))?;
    Ok(json!({ "id": course_id }))
}

fn delete_course(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let course_id = required_str(&req.params, "courseId")?;
    let changed = conn
        .execute("DELETE FROM core_courses WHERE id = ?", [course_id.as_str()])
        .map_err(db_err("db_delete_failed"))?;
    if changed == 0 {
        return Err(HandlerErr::new("not_found", "교과목을 찾을 수 없습니다."));
    }
    Ok(json!({ "deleted": true }))
}

fn handle(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let result = match req.method.as_str() {
        "courses.list" => list_courses(conn, req),
        "courses.save" => save_course(conn, req),
        _ => delete_course(conn, req),
    };
    match result {
        Ok(result) => ok(&req.id, result),
        Err(e) => e.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "courses.list" | "courses.save" | "courses.delete" => Some(handle(state, req)),
        _ => None,
    }
}
