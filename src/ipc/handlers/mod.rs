pub mod core;
pub mod exams;
pub mod records;
pub mod reports;
pub mod students;
pub mod teachers;
