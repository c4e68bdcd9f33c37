use std::sync::LazyLock;

use regex::Regex;

use super::table::Row;
use crate::models::{Student, StudentStatus, Teacher, CARRERA_FALLBACK, ESCUELA};

// "MAESTRO: 72256 RAMIREZ AVILA, ARMANDO MTRO." → (RAMIREZ AVILA, ARMANDO)
static TEACHER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"MAESTRO:\s*[0-9]+\s+([^,]+?)\s*,\s*(\S+)").unwrap());
static GROUP_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"GRUPO:\s*(\S+)").unwrap());
static TITLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(?:MTRO|MTRA|DRA|DR)\b\.?").unwrap());
static COURSE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^([A-Z]{2,}[0-9]{3})").unwrap());
static STUDENT_ID_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[0-9]{6}$").unwrap());

const GROUP_MARKER: &str = "GRUPO:";
const TEACHER_MARKER: &str = "MAESTRO:";
const COLUMN_HEADER_MARKER: &str = "MATRICULA";

/// What a table row encodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowKind {
    /// Both fields are optional: a header whose teacher or group part does not
    /// match leaves the corresponding context untouched.
    GroupTeacherHeader {
        teacher: Option<Teacher>,
        group: Option<String>,
    },
    CourseHeader { code: String },
    StudentRow(Student),
    Unclassified,
}

/// Classify one row. Rules are checked in order; the first that matches wins.
pub fn classify(row: &Row) -> RowKind {
    group_teacher_header(row)
        .or_else(|| course_header(row))
        .or_else(|| student_row(row))
        .unwrap_or(RowKind::Unclassified)
}

pub fn group_teacher_header(row: &Row) -> Option<RowKind> {
    if !(row.text.contains(GROUP_MARKER) && row.text.contains(TEACHER_MARKER)) {
        return None;
    }
    let group = GROUP_RE.captures(&row.text).map(|c| c[1].to_string());
    Some(RowKind::GroupTeacherHeader {
        teacher: parse_teacher(&row.text),
        group,
    })
}

fn parse_teacher(text: &str) -> Option<Teacher> {
    let caps = TEACHER_RE.captures(text)?;
    let last_names = caps[1].trim().to_string();
    let first_name = strip_titles(&caps[2]);
    if first_name.is_empty() || last_names.is_empty() {
        return None;
    }
    Some(Teacher {
        first_name,
        last_names,
        email: String::new(),
        school: ESCUELA.to_string(),
    })
}

fn strip_titles(name: &str) -> String {
    TITLE_RE.replace_all(name, "").trim().to_string()
}

pub fn course_header(row: &Row) -> Option<RowKind> {
    if row.text.contains(COLUMN_HEADER_MARKER) {
        return None;
    }
    let caps = COURSE_RE.captures(&row.text)?;
    Some(RowKind::CourseHeader {
        code: caps[1].to_string(),
    })
}

pub fn student_row(row: &Row) -> Option<RowKind> {
    let cells = &row.cells;
    if cells.len() < 6 {
        return None;
    }
    let seq = &cells[0];
    if seq.is_empty() || !seq.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    if !STUDENT_ID_RE.is_match(&cells[4]) {
        return None;
    }
    let (last_names, first_name) = cells[5].split_once(',')?;

    let program = if cells[1].is_empty() {
        CARRERA_FALLBACK.to_string()
    } else {
        cells[1].clone()
    };

    Some(RowKind::StudentRow(Student {
        student_id: cells[4].clone(),
        first_name: first_name.trim().to_string(),
        last_names: last_names.trim().to_string(),
        program,
        school: ESCUELA.to_string(),
        status: StudentStatus::Activo,
    }))
}
