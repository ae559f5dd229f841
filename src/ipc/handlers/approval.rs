use super::{db_conn, db_err, required_str, HandlerErr};
use crate::ipc::error::ok;
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;

fn list_pending(conn: &Connection) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT id, username, name, account_type, student_id, department, field,
                    email, phone, created_at
             FROM users
             WHERE status = 'pending'
             ORDER BY created_at DESC, username",
        )
        .map_err(db_err("db_query_failed"))?;
    let users = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "username": r.get::<_, String>(1)?,
                "name": r.get::<_, String>(2)?,
                "accountType": r.get::<_, String>(3)?,
                "studentId": r.get::<_, Option<String>>(4)?,
                "department": r.get::<_, Option<String>>(5)?,
                "field": r.get::<_, Option<String>>(6)?,
                "email": r.get::<_, Option<String>>(7)?,
                "phone": r.get::<_, Option<String>>(8)?,
                "createdAt": r.get::<_, String>(9)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err("db_query_failed"))?;
    Ok(json!({ "users": users }))
}

fn set_status(conn: &Connection, req: &Request, status: &str) -> Result<serde_json::Value, HandlerErr> {
    let user_id = required_str(&req.params, "userId")?;
    let changed = conn
        .execute(
            "UPDATE users SET status = ? WHERE id = ? AND status = 'pending'",
            [status, user_id.as_str()],
        )
        .map_err(db_err("db_update_failed"))?;
    if changed == 0 {
        return Err(HandlerErr::new(
            "not_found",
            "승인 대기 중인 사용자를 찾을 수 없습니다.",
        ));
    }
    Ok(json!({ "userId": user_id, "status": status }))
}

fn handle(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let result = match req.method.as_str() {
        "users.pending" => list_pending(conn),
        "users.approve" => set_status(conn, req, "approved"),
        _ => set_status(conn, req, "rejected"),
    };
    match result {
        Ok(result) => ok(&req.id, result),
        Err(e) => e.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "users.pending" | "users.approve" | "users.reject" => Some(handle(state, req)),
        _ => None,
    }
}
