use serde::Serialize;

/// Every record from a schedule export belongs to the same school; the
/// export format has no column that says otherwise.
pub const ESCUELA: &str = "Ingeniería";

/// Used when the program (carrera) cell of a student row is empty.
pub const CARRERA_FALLBACK: &str = "Sin especificar";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StudentStatus {
    Activo,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Student {
    #[serde(rename = "matricula")]
    pub student_id: String,
    #[serde(rename = "nombre")]
    pub first_name: String,
    #[serde(rename = "apellidos")]
    pub last_names: String,
    #[serde(rename = "carrera")]
    pub program: String,
    #[serde(rename = "escuela")]
    pub school: String,
    pub status: StudentStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Teacher {
    #[serde(rename = "nombre")]
    pub first_name: String,
    #[serde(rename = "apellidos")]
    pub last_names: String,
    #[serde(rename = "correo")]
    pub email: String,
    #[serde(rename = "escuela")]
    pub school: String,
}

impl Teacher {
    /// Identity key shared with schedule records: `NOMBRE_APELLIDOS`.
    pub fn key(&self) -> String {
        format!("{}_{}", self.first_name, self.last_names)
    }
}

/// One (student, teacher, course, group) observation from a table scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Schedule {
    #[serde(rename = "matricula")]
    pub student_id: String,
    #[serde(rename = "teacherKey")]
    pub teacher_key: String,
    #[serde(rename = "materia")]
    pub course_code: String,
    #[serde(rename = "grupo")]
    pub group_id: String,
}

/// Everything extracted from one export, in discovery order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Roster {
    pub students: Vec<Student>,
    pub teachers: Vec<Teacher>,
    pub schedules: Vec<Schedule>,
}

impl Roster {
    pub fn is_empty(&self) -> bool {
        self.students.is_empty() && self.teachers.is_empty() && self.schedules.is_empty()
    }
}
