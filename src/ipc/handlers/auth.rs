use super::{db_conn, db_err, optional_str, required_str, HandlerErr};
use crate::ipc::error::ok;
use crate::ipc::types::{AppState, Request};
use crate::scoring;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn username_taken(conn: &Connection, username: &str) -> Result<bool, HandlerErr> {
    conn.query_row(
        "SELECT 1 FROM users WHERE username = ?",
        [username],
        |r| r.get::<_, i64>(0),
    )
    .optional()
    .map(|v| v.is_some())
    .map_err(db_err("db_query_failed"))
}

fn do_signup(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let username = required_str(&req.params, "username")?;
    let password = required_str(&req.params, "password")?;
    let name = required_str(&req.params, "name")?;
    let account_type = required_str(&req.params, "accountType")?;

    let username = username.trim().to_string();
    if username.is_empty() {
        return Err(HandlerErr::new("bad_params", "아이디를 입력해주세요."));
    }
    if password.is_empty() {
        return Err(HandlerErr::new("bad_params", "비밀번호를 입력해주세요."));
    }
    if name.trim().is_empty() {
        return Err(HandlerErr::new("bad_params", "이름을 입력해주세요."));
    }

    // Student and staff tabs both land here; everything non-student carries
    // admin privileges in the portal.
    let role = if account_type == "student" {
        "student"
    } else {
        "admin"
    };

    let (student_id, department, field) = if account_type == "student" {
        let student_id = required_str(&req.params, "studentId")?;
        let department = required_str(&req.params, "department")?;
        if student_id.trim().is_empty() {
            return Err(HandlerErr::new("bad_params", "학번을 입력해주세요."));
        }
        if department.trim().is_empty() {
            return Err(HandlerErr::new("bad_params", "학과를 입력해주세요."));
        }
        (
            Some(student_id.trim().to_string()),
            Some(department.trim().to_string()),
            optional_str(&req.params, "field"),
        )
    } else {
        (None, None, None)
    };

    if username_taken(conn, &username)? {
        return Err(HandlerErr::new(
            "duplicate_username",
            "이미 사용 중인 아이디입니다.",
        ));
    }

    let user_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO users(
            id, username, password, name, account_type, role, status,
            student_id, department, field, email, phone, created_at
         ) VALUES(?, ?, ?, ?, ?, ?, 'pending', ?, ?, ?, ?, ?, ?)",
        rusqlite::params![
            user_id,
            username,
            password,
            name.trim(),
            account_type,
            role,
            student_id,
            department,
            field,
            optional_str(&req.params, "email"),
            optional_str(&req.params, "phone"),
            scoring::today(),
        ],
    )
    .map_err(db_err("db_insert_failed"))?;

    Ok(json!({ "userId": user_id, "status": "pending" }))
}

fn do_login(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let username = required_str(&req.params, "username")?;
    let password = required_str(&req.params, "password")?;

    let row = conn
        .query_row(
            "SELECT id, username, name, role, account_type, status,
                    student_id, department, field, email, phone
             FROM users WHERE username = ? AND password = ?",
            [&username, &password],
            |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, String>(2)?,
                    r.get::<_, String>(3)?,
                    r.get::<_, String>(4)?,
                    r.get::<_, String>(5)?,
                    r.get::<_, Option<String>>(6)?,
                    r.get::<_, Option<String>>(7)?,
                    r.get::<_, Option<String>>(8)?,
                    r.get::<_, Option<String>>(9)?,
                    r.get::<_, Option<String>>(10)?,
                ))
            },
        )
        .optional()
        .map_err(db_err("db_query_failed"))?;

    let Some((id, username, name, role, account_type, status, student_id, department, field, email, phone)) =
        row
    else {
        return Err(HandlerErr::new(
            "invalid_credentials",
            "아이디 또는 비밀번호가 일치하지 않습니다.",
        ));
    };

    match status.as_str() {
        "pending" => {
            return Err(HandlerErr::new(
                "account_pending",
                "회원가입 승인 대기 중입니다. 관리자의 승인을 기다려주세요.",
            ))
        }
        "rejected" => {
            return Err(HandlerErr::new(
                "account_rejected",
                "회원가입이 거부되었습니다.",
            ))
        }
        _ => {}
    }

    Ok(json!({
        "user": {
            "id": id,
            "username": username,
            "name": name,
            "role": role,
            "accountType": account_type,
            "studentId": student_id,
            "department": department,
            "field": field,
            "email": email,
            "phone": phone
        }
    }))
}

fn handle_signup(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    match do_signup(conn, req) {
        Ok(result) => ok(&req.id, result),
        Err(e) => e.response(&req.id),
    }
}

fn handle_login(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    match do_login(conn, req) {
        Ok(result) => ok(&req.id, result),
        Err(e) => e.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "auth.signup" => Some(handle_signup(state, req)),
        "auth.login" => Some(handle_login(state, req)),
        _ => None,
    }
}
