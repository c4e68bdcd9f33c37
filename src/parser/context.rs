use super::classify::RowKind;
use crate::models::Schedule;

/// Header state seen so far in the current table.
///
/// A fresh `ParseContext::default()` starts every table, so nothing a header
/// establishes can leak into the next table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParseContext {
    pub teacher_key: Option<String>,
    pub group_id: Option<String>,
    pub course_code: Option<String>,
}

impl ParseContext {
    /// Context in effect after `kind` has been seen.
    pub fn advance(self, kind: &RowKind) -> ParseContext {
        match kind {
            RowKind::GroupTeacherHeader { teacher, group } => ParseContext {
                teacher_key: teacher.as_ref().map(|t| t.key()).or(self.teacher_key),
                group_id: group.clone().or(self.group_id),
                course_code: self.course_code,
            },
            RowKind::CourseHeader { code } => ParseContext {
                course_code: Some(code.clone()),
                ..self
            },
            RowKind::StudentRow(_) | RowKind::Unclassified => self,
        }
    }

    /// Schedule record for a student under this context, if a teacher and a
    /// course have both been established.
    pub fn schedule_for(&self, student_id: &str) -> Option<Schedule> {
        let teacher_key = self.teacher_key.as_ref()?;
        let course_code = self.course_code.as_ref()?;
        Some(Schedule {
            student_id: student_id.to_string(),
            teacher_key: teacher_key.clone(),
            course_code: course_code.clone(),
            group_id: self.group_id.clone().unwrap_or_default(),
        })
    }
}
