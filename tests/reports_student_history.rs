
use serde_json::json;
use test_support::{create_exam, create_student, request_ok, spawn_sidecar, temp_dir};

#[test]
fn history_is_ascending_by_exam_date_regardless_of_save_order() {
    let workspace = temp_dir("examdesk-student-history");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    create_student(&mut stdin, &mut reader, 10001, "김민준", 4);

    // Saved newest-first on purpose; the history series must still come back
    // oldest-first.
    let march = create_exam(&mut stdin, &mut reader, "march-mock", "2024-03-01", json!({}));
    let january = create_exam(&mut stdin, &mut reader, "january-mock", "2024-01-01", json!({}));

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "save-march",
        "records.saveBatch",
        json!({
            "examId": march,
            "submissions": [{ "studentId": 10001, "answers": { "1": "1", "2": "2", "3": "3" } }]
        }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "save-january",
        "records.saveBatch",
        json!({
            "examId": january,
            "submissions": [{ "studentId": 10001, "answers": { "1": "1" } }]
        }),
    );

    let result = request_ok(
        &mut stdin,
        &mut reader,
        "history",
        "reports.student",
        json!({ "studentId": 10001 }),
    );
    let history = result
        .get("history")
        .and_then(|v| v.as_array())
        .cloned()
        .expect("history");
    assert_eq!(history.len(), 2);
    assert_eq!(
        history[0].get("examName").and_then(|v| v.as_str()),
        Some("january-mock")
    );
    assert_eq!(history[0].get("score").and_then(|v| v.as_i64()), Some(2));
    assert_eq!(
        history[1].get("examName").and_then(|v| v.as_str()),
        Some("march-mock")
    );
    assert_eq!(history[1].get("score").and_then(|v| v.as_i64()), Some(10));

    // The per-exam report carries the same series as chart data.
    let detail = request_ok(
        &mut stdin,
        &mut reader,
        "detail",
        "reports.detail",
        json!({ "examId": march, "studentId": 10001 }),
    );
    let chart = detail
        .get("report")
        .and_then(|r| r.get("historyChartData"))
        .expect("historyChartData");
    assert_eq!(
        chart.get("labels").cloned(),
        Some(json!(["january-mock", "march-mock"]))
    );
    assert_eq!(chart.get("scores").cloned(), Some(json!([2, 10])));
}
