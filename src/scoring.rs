use serde::{Deserialize, Serialize};

/// Points awarded per approved core course.
pub const POINTS_PER_COURSE: i64 = 5;
/// At most this many courses count toward the core-subject bucket.
pub const MAX_COURSES: usize = 10;
/// Ceiling of the core-course score: 10 courses x 5 points.
pub const MAX_SCORE: i64 = MAX_COURSES as i64 * POINTS_PER_COURSE;

/// Which of the three score buckets a program completion credits.
///
/// The mapping is total over category strings: the two named categories route
/// to their buckets and every other label (산학협력 included) falls through to
/// the industry bucket, matching the portal's routing rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreCategory {
    NonCurricular,
    CoreSubject,
    Industry,
}

impl ScoreCategory {
    pub fn from_label(label: &str) -> Self {
        match label {
            "비교과" => ScoreCategory::NonCurricular,
            "교과" => ScoreCategory::CoreSubject,
            _ => ScoreCategory::Industry,
        }
    }

    pub fn score_column(self) -> &'static str {
        match self {
            ScoreCategory::NonCurricular => "non_curricular_score",
            ScoreCategory::CoreSubject => "core_subject_score",
            ScoreCategory::Industry => "industry_score",
        }
    }

    pub fn history_column(self) -> &'static str {
        match self {
            ScoreCategory::NonCurricular => "non_curricular_history",
            ScoreCategory::CoreSubject => "core_subject_history",
            ScoreCategory::Industry => "industry_history",
        }
    }
}

/// One credited activity in a student's per-bucket history list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub program_id: String,
    pub program_title: String,
    pub score: i64,
    pub date: String,
}

/// One catalog course as checked off in a student's self-report.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletedCourse {
    pub course_id: String,
    pub course_code: String,
    pub course_name: String,
    pub course_type: String,
    #[serde(default)]
    pub is_completed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoreCoursesScore {
    pub completed_count: usize,
    pub valid_count: usize,
    pub score: i64,
    pub percentage: i64,
}

/// Score of a self-report: `min(checked, 10) * 5`, with the percentage the
/// progress bar shows. Unchecked entries never count.
pub fn core_courses_score(courses: &[CompletedCourse]) -> CoreCoursesScore {
    let completed_count = courses.iter().filter(|c| c.is_completed).count();
    let valid_count = completed_count.min(MAX_COURSES);
    let score = valid_count as i64 * POINTS_PER_COURSE;
    let percentage = (score as f64 / MAX_SCORE as f64 * 100.0).round() as i64;
    CoreCoursesScore {
        completed_count,
        valid_count,
        score,
        percentage,
    }
}

/// Two checked entries may not share a course code. Comparison is by code,
/// not catalog id: two catalog rows with the same code collide.
pub fn find_duplicate_code(courses: &[CompletedCourse]) -> Option<&str> {
    let checked: Vec<&CompletedCourse> = courses.iter().filter(|c| c.is_completed).collect();
    for (i, a) in checked.iter().enumerate() {
        for b in checked.iter().skip(i + 1) {
            if a.course_code == b.course_code {
                return Some(&a.course_code);
            }
        }
    }
    None
}

/// Keeps the first `MAX_COURSES` checked entries in list order; the list
/// preserves the student's check order, so the accepted set is stable.
pub fn clamp_completed(courses: Vec<CompletedCourse>) -> Vec<CompletedCourse> {
    courses
        .into_iter()
        .filter(|c| c.is_completed)
        .take(MAX_COURSES)
        .collect()
}

pub fn application_status_label(status: &str) -> &'static str {
    match status {
        "pending" => "대기중",
        "approved" => "승인됨",
        "rejected" => "거부됨",
        "completed" => "이수완료",
        _ => "알 수 없음",
    }
}

pub fn submission_status_label(status: &str) -> &'static str {
    match status {
        "pending" => "검토중",
        "approved" => "승인",
        "rejected" => "반려",
        _ => "미제출",
    }
}

/// Success index: the sum of the three buckets, always recomputed at read
/// time. No stored total column exists.
pub fn total_score(non_curricular: i64, core_subject: i64, industry: i64) -> i64 {
    non_curricular + core_subject + industry
}

pub fn today() -> String {
    chrono::Local::now().format("%Y-%m-%d").to_string()
}

pub fn now_iso() -> String {
    chrono::Local::now().format("%Y-%m-%dT%H:%M:%S").to_string()
}
