use rusqlite::Connection;
use std::path::Path;

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("examdesk.sqlite3");
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS teachers(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS teacher_assignments(
            id TEXT PRIMARY KEY,
            teacher_id TEXT NOT NULL,
            grade INTEGER NOT NULL,
            class TEXT NOT NULL,
            FOREIGN KEY(teacher_id) REFERENCES teachers(id) ON DELETE CASCADE,
            UNIQUE(grade, class)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_teacher_assignments_teacher
         ON teacher_assignments(teacher_id)",
        [],
    )?;

    // Student ids are operator-assigned 5-digit numbers, not generated.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            grade INTEGER NOT NULL,
            class TEXT NOT NULL,
            phone_number TEXT NOT NULL DEFAULT '',
            school_name TEXT NOT NULL DEFAULT '',
            teacher_id TEXT,
            FOREIGN KEY(teacher_id) REFERENCES teachers(id) ON DELETE SET NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_grade ON students(grade)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_teacher ON students(teacher_id)",
        [],
    )?;

    // subject_info holds the serialized question set, grade_cutoffs the
    // serialized tier table. Both are validated when authored and parsed
    // leniently on every read.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS exams(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            grade INTEGER NOT NULL,
            class TEXT NOT NULL DEFAULT '전체',
            date TEXT NOT NULL,
            subject_info TEXT NOT NULL,
            is_admission INTEGER NOT NULL DEFAULT 0,
            grade_cutoffs TEXT NOT NULL DEFAULT '{}'
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_exams_date ON exams(date)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS exam_records(
            id TEXT PRIMARY KEY,
            exam_id TEXT NOT NULL,
            student_id INTEGER NOT NULL,
            student_answers TEXT NOT NULL,
            total_score INTEGER NOT NULL,
            vocab_score INTEGER NOT NULL DEFAULT 0,
            category_scores TEXT NOT NULL DEFAULT '{}',
            remarks TEXT NOT NULL DEFAULT '',
            updated_at TEXT,
            FOREIGN KEY(exam_id) REFERENCES exams(id) ON DELETE CASCADE,
            FOREIGN KEY(student_id) REFERENCES students(id) ON DELETE CASCADE,
            UNIQUE(exam_id, student_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_exam_records_exam ON exam_records(exam_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_exam_records_student ON exam_records(student_id)",
        [],
    )?;

    Ok(conn)
}
