use std::collections::HashSet;

use crate::models::{Roster, Schedule, Student, Teacher};

/// Collects entities for a single scan. Students and teachers are keyed and
/// keep their first occurrence; schedules are kept as observed.
#[derive(Debug, Default)]
pub struct Accumulator {
    students: Vec<Student>,
    student_ids: HashSet<String>,
    teachers: Vec<Teacher>,
    teacher_keys: HashSet<String>,
    schedules: Vec<Schedule>,
}

impl Accumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` when a student with the same id was already recorded.
    pub fn upsert_student(&mut self, student: Student) -> bool {
        if !self.student_ids.insert(student.student_id.clone()) {
            return false;
        }
        self.students.push(student);
        true
    }

    pub fn upsert_teacher(&mut self, teacher: Teacher) -> bool {
        if !self.teacher_keys.insert(teacher.key()) {
            return false;
        }
        self.teachers.push(teacher);
        true
    }

    pub fn append_schedule(&mut self, schedule: Schedule) {
        self.schedules.push(schedule);
    }

    pub fn finish(self) -> Roster {
        Roster {
            students: self.students,
            teachers: self.teachers,
            schedules: self.schedules,
        }
    }
}
