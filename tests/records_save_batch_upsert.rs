
use serde_json::json;
use test_support::{create_exam, create_student, request_ok, spawn_sidecar, temp_dir};

#[test]
fn saving_a_batch_twice_keeps_one_record_per_student() {
    let workspace = temp_dir("examdesk-save-batch-upsert");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    create_student(&mut stdin, &mut reader, 10001, "김민준", 4);
    create_student(&mut stdin, &mut reader, 10002, "이서연", 4);
    let exam_id = create_exam(&mut stdin, &mut reader, "march-mock", "2024-03-01", json!({}));

    let submissions = json!([
        { "studentId": 10001, "answers": { "1": "1", "2": "2", "3": "3" }, "vocabScore": 5 },
        { "studentId": 10002, "answers": { "1": "1" } },
    ]);
    let first = request_ok(
        &mut stdin,
        &mut reader,
        "save-1",
        "records.saveBatch",
        json!({ "examId": exam_id, "submissions": submissions }),
    );
    assert_eq!(first.get("saved").and_then(|v| v.as_u64()), Some(2));
    assert!(first.get("errors").is_none());

    let second = request_ok(
        &mut stdin,
        &mut reader,
        "save-2",
        "records.saveBatch",
        json!({ "examId": exam_id, "submissions": submissions }),
    );
    assert_eq!(second.get("saved").and_then(|v| v.as_u64()), Some(2));

    let exam = request_ok(
        &mut stdin,
        &mut reader,
        "get",
        "exams.get",
        json!({ "examId": exam_id }),
    );
    let records = exam
        .get("records")
        .and_then(|v| v.as_array())
        .cloned()
        .expect("records");
    assert_eq!(records.len(), 2, "re-save must overwrite, not duplicate");

    // Scores derived from the current question set plus the vocab bonus.
    let by_student = |id: i64| {
        records
            .iter()
            .find(|r| r.get("studentId").and_then(|v| v.as_i64()) == Some(id))
            .cloned()
            .expect("record for student")
    };
    assert_eq!(
        by_student(10001).get("totalScore").and_then(|v| v.as_i64()),
        Some(15)
    );
    assert_eq!(
        by_student(10001).get("vocabScore").and_then(|v| v.as_i64()),
        Some(5)
    );
    assert_eq!(
        by_student(10002).get("totalScore").and_then(|v| v.as_i64()),
        Some(2)
    );
}

#[test]
fn resave_overwrites_stored_answers_and_score() {
    let workspace = temp_dir("examdesk-save-batch-overwrite");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    create_student(&mut stdin, &mut reader, 10001, "김민준", 4);
    let exam_id = create_exam(&mut stdin, &mut reader, "april-mock", "2024-04-01", json!({}));

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "save-1",
        "records.saveBatch",
        json!({
            "examId": exam_id,
            "submissions": [{ "studentId": 10001, "answers": { "1": "1" } }]
        }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "save-2",
        "records.saveBatch",
        json!({
            "examId": exam_id,
            "submissions": [{ "studentId": 10001, "answers": { "1": "x", "3": "3" } }]
        }),
    );

    let exam = request_ok(
        &mut stdin,
        &mut reader,
        "get",
        "exams.get",
        json!({ "examId": exam_id }),
    );
    let records = exam
        .get("records")
        .and_then(|v| v.as_array())
        .cloned()
        .expect("records");
    assert_eq!(records.len(), 1);
    assert_eq!(
        records[0].get("totalScore").and_then(|v| v.as_i64()),
        Some(5),
        "second save wins"
    );
}

#[test]
fn one_failing_record_does_not_abort_the_batch() {
    let workspace = temp_dir("examdesk-save-batch-partial");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    create_student(&mut stdin, &mut reader, 10001, "김민준", 4);
    create_student(&mut stdin, &mut reader, 10002, "이서연", 4);
    let exam_id = create_exam(&mut stdin, &mut reader, "may-mock", "2024-05-01", json!({}));

    // 55555 was never enrolled; its upsert fails on the student foreign key.
    let result = request_ok(
        &mut stdin,
        &mut reader,
        "save",
        "records.saveBatch",
        json!({
            "examId": exam_id,
            "submissions": [
                { "studentId": 10001, "answers": { "1": "1" } },
                { "studentId": 55555, "answers": { "1": "1" } },
                { "studentId": 10002, "answers": { "2": "2" } },
            ]
        }),
    );
    assert_eq!(result.get("saved").and_then(|v| v.as_u64()), Some(2));
    let errors = result
        .get("errors")
        .and_then(|v| v.as_array())
        .cloned()
        .expect("errors");
    assert_eq!(errors.len(), 1);
    assert_eq!(
        errors[0].get("studentId").and_then(|v| v.as_i64()),
        Some(55555)
    );

    let exam = request_ok(
        &mut stdin,
        &mut reader,
        "get",
        "exams.get",
        json!({ "examId": exam_id }),
    );
    let records = exam
        .get("records")
        .and_then(|v| v.as_array())
        .cloned()
        .expect("records");
    assert_eq!(records.len(), 2, "records after the failure still saved");
}
