use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Tier scheme runs 1 (best) .. 9 (worst). Tables may configure fewer
/// explicit thresholds; the worst tier is the implicit catch-all.
pub const WORST_TIER: i64 = 9;

/// Cutoff table applied when a non-admission exam stores no table of its own.
pub fn default_cutoffs() -> BTreeMap<i64, i64> {
    BTreeMap::from([
        (1, 90),
        (2, 82),
        (3, 73),
        (4, 61),
        (5, 47),
        (6, 33),
        (7, 24),
        (8, 16),
        (9, 0),
    ])
}

/// One question of an exam's question set. Field names mirror the stored
/// `subject_info` blob: `[{id, type, score, answer}]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    pub id: i64,
    #[serde(rename = "type")]
    pub category: String,
    pub score: i64,
    pub answer: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoredQuestion {
    pub id: i64,
    #[serde(rename = "type")]
    pub category: String,
    pub score: i64,
    pub answer: String,
    pub student_answer: String,
    pub is_correct: bool,
    /// Percentage of the cohort that answered this question correctly.
    /// Zero until merged by the report composer.
    pub correct_rate: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoredSubmission {
    pub total_score: i64,
    pub vocab_score: i64,
    pub category_scores: BTreeMap<String, i64>,
    pub results: Vec<ScoredQuestion>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryBreakdown {
    #[serde(rename = "type")]
    pub category: String,
    pub earned: i64,
    pub possible: i64,
    pub rate: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChartData {
    pub labels: Vec<String>,
    pub scores: Vec<i64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryPoint {
    pub exam_name: String,
    pub date: String,
    pub score: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentInfo {
    pub id: i64,
    pub name: String,
    pub grade: i64,
    pub class: String,
    pub school_name: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamInfo {
    pub exam_id: String,
    pub exam_name: String,
    pub exam_date: String,
    pub is_admission: bool,
}

/// Render-ready report card for one student on one exam. Computed fresh per
/// request, never persisted.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub student: StudentInfo,
    #[serde(flatten)]
    pub exam: ExamInfo,
    pub total_score: i64,
    pub vocab_score: i64,
    pub max_total_score: i64,
    pub total_question_count: usize,
    pub correct_count: usize,
    pub grading_data: Vec<ScoredQuestion>,
    pub category_breakdown: Vec<CategoryBreakdown>,
    pub type_chart_data: ChartData,
    pub history_chart_data: ChartData,
    pub remarks: String,
    pub student_grade: Option<i64>,
    pub grade_cutoffs: BTreeMap<i64, i64>,
}

/// Parse a stored question-set blob. Malformed input degrades to an empty
/// set so one corrupt exam cannot block reporting for the rest.
pub fn parse_question_set(raw: &str) -> Vec<Question> {
    match serde_json::from_str::<Vec<Question>>(raw) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(error = %e, "malformed question set blob, treating as empty");
            Vec::new()
        }
    }
}

/// Parse a stored answers blob (`{questionIdString: answer}`).
pub fn parse_answer_map(raw: &str) -> HashMap<String, String> {
    match serde_json::from_str::<HashMap<String, String>>(raw) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(error = %e, "malformed answers blob, treating as empty");
            HashMap::new()
        }
    }
}

/// Parse a stored cutoff blob (`{"1": 90, ...}`). Non-numeric tier keys and
/// non-integer thresholds are dropped; malformed input degrades to empty.
pub fn parse_cutoff_table(raw: &str) -> BTreeMap<i64, i64> {
    let parsed: HashMap<String, serde_json::Value> = match serde_json::from_str(raw) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(error = %e, "malformed cutoff table blob, treating as empty");
            return BTreeMap::new();
        }
    };
    let mut cutoffs = BTreeMap::new();
    for (tier, threshold) in parsed {
        let Ok(tier) = tier.parse::<i64>() else {
            continue;
        };
        let Some(threshold) = threshold.as_i64() else {
            continue;
        };
        cutoffs.insert(tier, threshold);
    }
    cutoffs
}

/// Strict token equality: trim both sides, no case folding, missing answer
/// counts as empty.
pub fn answers_match(correct: &str, submitted: Option<&str>) -> bool {
    correct.trim() == submitted.unwrap_or("").trim()
}

/// Score one student's raw answers against a question set.
///
/// Produces one result per question in set order. Categories present in the
/// set always appear in `category_scores`, at 0 if nothing was earned. An
/// optional vocabulary bonus is added to the total unconditionally and kept
/// as a separate field, outside any category.
pub fn score_submission(
    questions: &[Question],
    answers: &HashMap<String, String>,
    vocab_score: Option<i64>,
) -> ScoredSubmission {
    let mut category_scores: BTreeMap<String, i64> = BTreeMap::new();
    for q in questions {
        category_scores.entry(q.category.clone()).or_insert(0);
    }

    let mut total_score = 0_i64;
    let mut results = Vec::with_capacity(questions.len());
    for q in questions {
        let student_answer = answers
            .get(&q.id.to_string())
            .cloned()
            .unwrap_or_default();
        let is_correct = answers_match(&q.answer, Some(&student_answer));
        if is_correct {
            total_score += q.score;
            *category_scores.entry(q.category.clone()).or_insert(0) += q.score;
        }
        results.push(ScoredQuestion {
            id: q.id,
            category: q.category.clone(),
            score: q.score,
            answer: q.answer.clone(),
            student_answer,
            is_correct,
            correct_rate: 0,
        });
    }

    let vocab_score = vocab_score.unwrap_or(0);
    ScoredSubmission {
        total_score: total_score + vocab_score,
        vocab_score,
        category_scores,
        results,
    }
}

/// Assign the performance tier for a total score.
///
/// Tiers are checked best-first; the first tier whose threshold is cleared
/// wins, so thresholds must be authored non-increasing. A score that clears
/// no explicit threshold falls into the worst tier. An empty table means
/// grading was not requested and yields `None`.
pub fn classify_grade(total_score: i64, cutoffs: &BTreeMap<i64, i64>) -> Option<i64> {
    if cutoffs.is_empty() {
        return None;
    }
    let worst = WORST_TIER.max(cutoffs.keys().max().copied().unwrap_or(WORST_TIER));
    for tier in 1..=worst {
        if let Some(threshold) = cutoffs.get(&tier) {
            if total_score >= *threshold {
                return Some(tier);
            }
        }
    }
    Some(worst)
}

/// Per-question correct rate across all submissions for one exam.
///
/// Every submission carries one result per question, so the denominator for
/// each question is the submission count. A question with no submissions
/// rates 0, not NaN.
pub fn cohort_correct_rates(
    questions: &[Question],
    submissions: &[ScoredSubmission],
) -> HashMap<i64, i64> {
    let mut rates = HashMap::with_capacity(questions.len());
    for q in questions {
        let mut correct = 0_usize;
        let mut total = 0_usize;
        for sub in submissions {
            let Some(r) = sub.results.iter().find(|r| r.id == q.id) else {
                continue;
            };
            total += 1;
            if r.is_correct {
                correct += 1;
            }
        }
        let rate = if total > 0 {
            ((correct as f64) / (total as f64) * 100.0).round() as i64
        } else {
            0
        };
        rates.insert(q.id, rate);
    }
    rates
}

/// Stable ascending sort by date. Points with unparseable dates sort first;
/// ties keep input order. No deduplication.
pub fn build_history(mut points: Vec<HistoryPoint>) -> Vec<HistoryPoint> {
    points.sort_by_key(|p| NaiveDate::parse_from_str(&p.date, "%Y-%m-%d").ok());
    points
}

fn category_breakdown(questions: &[Question], results: &[ScoredQuestion]) -> Vec<CategoryBreakdown> {
    // First-appearance order over the question set drives display order.
    let mut order: Vec<String> = Vec::new();
    let mut possible: HashMap<String, i64> = HashMap::new();
    for q in questions {
        if !possible.contains_key(&q.category) {
            order.push(q.category.clone());
        }
        *possible.entry(q.category.clone()).or_insert(0) += q.score;
    }

    let mut earned: HashMap<String, i64> = HashMap::new();
    for r in results.iter().filter(|r| r.is_correct) {
        *earned.entry(r.category.clone()).or_insert(0) += r.score;
    }

    order
        .into_iter()
        .map(|category| {
            let possible = possible.get(&category).copied().unwrap_or(0);
            let earned = earned.get(&category).copied().unwrap_or(0);
            let rate = if possible > 0 {
                ((earned as f64) / (possible as f64) * 100.0).round() as i64
            } else {
                0
            };
            CategoryBreakdown {
                category,
                earned,
                possible,
                rate,
            }
        })
        .collect()
}

/// Combine one scored submission with cohort rates, history and the cutoff
/// table into a render-ready report.
#[allow(clippy::too_many_arguments)]
pub fn compose_report(
    student: StudentInfo,
    exam: ExamInfo,
    questions: &[Question],
    mut submission: ScoredSubmission,
    cohort_rates: &HashMap<i64, i64>,
    history: Vec<HistoryPoint>,
    cutoffs: &BTreeMap<i64, i64>,
    remarks: String,
) -> Report {
    for r in &mut submission.results {
        r.correct_rate = cohort_rates.get(&r.id).copied().unwrap_or(0);
    }

    let max_total_score: i64 = questions.iter().map(|q| q.score).sum();
    let correct_count = submission.results.iter().filter(|r| r.is_correct).count();
    let breakdown = category_breakdown(questions, &submission.results);

    let type_chart_data = ChartData {
        labels: breakdown.iter().map(|b| b.category.clone()).collect(),
        scores: breakdown.iter().map(|b| b.rate).collect(),
    };
    let history_chart_data = ChartData {
        labels: history.iter().map(|h| h.exam_name.clone()).collect(),
        scores: history.iter().map(|h| h.score).collect(),
    };

    Report {
        student,
        exam,
        total_score: submission.total_score,
        vocab_score: submission.vocab_score,
        max_total_score,
        total_question_count: submission.results.len(),
        correct_count,
        student_grade: classify_grade(submission.total_score, cutoffs),
        grade_cutoffs: cutoffs.clone(),
        grading_data: submission.results,
        category_breakdown: breakdown,
        type_chart_data,
        history_chart_data,
        remarks,
    }
}

/// One student's raw inputs for the batch report path.
pub struct ReportRow {
    pub student: StudentInfo,
    pub answers: HashMap<String, String>,
    pub vocab_score: i64,
    pub history: Vec<HistoryPoint>,
    pub remarks: String,
}

/// Batch variant: score everyone first, aggregate cohort rates once over the
/// full batch, then compose per student. Rates therefore reflect the whole
/// cohort rather than each student in isolation.
pub fn compose_exam_reports(
    exam: &ExamInfo,
    questions: &[Question],
    cutoffs: &BTreeMap<i64, i64>,
    rows: Vec<ReportRow>,
) -> Vec<Report> {
    let submissions: Vec<ScoredSubmission> = rows
        .iter()
        .map(|row| score_submission(questions, &row.answers, Some(row.vocab_score)))
        .collect();
    let rates = cohort_correct_rates(questions, &submissions);

    rows.into_iter()
        .zip(submissions)
        .map(|(row, submission)| {
            compose_report(
                row.student,
                exam.clone(),
                questions,
                submission,
                &rates,
                build_history(row.history),
                cutoffs,
                row.remarks,
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn question(id: i64, category: &str, score: i64, answer: &str) -> Question {
        Question {
            id,
            category: category.to_string(),
            score,
            answer: answer.to_string(),
        }
    }

    fn sample_set() -> Vec<Question> {
        vec![
            question(1, "grammar", 2, "1"),
            question(2, "grammar", 3, "2"),
            question(3, "reading", 5, "3"),
        ]
    }

    fn answers(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn matcher_trims_but_keeps_case() {
        assert!(answers_match("가", Some(" 가 ")));
        assert!(answers_match("abc", Some("abc")));
        assert!(!answers_match("abc", Some("ABC")));
        assert!(!answers_match("1", Some("2")));
        assert!(!answers_match("1", None));
        // Degenerate but defined: empty matches empty.
        assert!(answers_match("", None));
        assert!(answers_match("  ", Some("")));
    }

    #[test]
    fn scorer_end_to_end_scenario() {
        let qs = sample_set();
        let sub = score_submission(&qs, &answers(&[("1", "1"), ("2", "x")]), None);

        assert_eq!(sub.total_score, 2);
        assert_eq!(sub.category_scores.get("grammar"), Some(&2));
        assert_eq!(sub.category_scores.get("reading"), Some(&0));
        assert_eq!(sub.results.len(), 3);
        assert!(sub.results[0].is_correct);
        assert!(!sub.results[1].is_correct);
        assert!(!sub.results[2].is_correct);
        assert_eq!(sub.results[2].student_answer, "");
    }

    #[test]
    fn scorer_total_equals_sum_of_correct_points() {
        let qs = sample_set();
        for ans in [
            answers(&[]),
            answers(&[("1", "1")]),
            answers(&[("1", "1"), ("2", "2"), ("3", "3")]),
            answers(&[("1", "x"), ("2", " 2 "), ("3", "9"), ("99", "3")]),
        ] {
            let sub = score_submission(&qs, &ans, None);
            let correct_points: i64 = sub
                .results
                .iter()
                .filter(|r| r.is_correct)
                .map(|r| r.score)
                .sum();
            assert_eq!(sub.total_score, correct_points);
            assert_eq!(sub.results.len(), qs.len());
        }
    }

    #[test]
    fn scorer_zero_fills_every_category() {
        let qs = sample_set();
        let sub = score_submission(&qs, &answers(&[]), None);
        assert_eq!(sub.total_score, 0);
        assert_eq!(sub.category_scores.len(), 2);
        assert_eq!(sub.category_scores.get("grammar"), Some(&0));
        assert_eq!(sub.category_scores.get("reading"), Some(&0));
    }

    #[test]
    fn scorer_vocab_bonus_is_unconditional_and_separate() {
        let qs = sample_set();
        let sub = score_submission(&qs, &answers(&[("1", "1")]), Some(7));
        assert_eq!(sub.total_score, 9);
        assert_eq!(sub.vocab_score, 7);
        // Bonus is not folded into any category.
        let category_total: i64 = sub.category_scores.values().sum();
        assert_eq!(category_total, 2);
    }

    #[test]
    fn scorer_empty_set_is_not_an_error() {
        let sub = score_submission(&[], &answers(&[("1", "1")]), Some(4));
        assert_eq!(sub.total_score, 4);
        assert!(sub.results.is_empty());
        assert!(sub.category_scores.is_empty());
    }

    #[test]
    fn classifier_first_match_wins() {
        let cutoffs = BTreeMap::from([(1, 90), (2, 80), (3, 70)]);
        assert_eq!(classify_grade(95, &cutoffs), Some(1));
        assert_eq!(classify_grade(90, &cutoffs), Some(1));
        assert_eq!(classify_grade(85, &cutoffs), Some(2));
        assert_eq!(classify_grade(70, &cutoffs), Some(3));
        // Below every explicit bar: implicit worst tier.
        assert_eq!(classify_grade(10, &cutoffs), Some(9));
        assert_eq!(classify_grade(0, &BTreeMap::new()), None);
    }

    #[test]
    fn classifier_default_table_covers_all_scores() {
        let cutoffs = default_cutoffs();
        assert_eq!(classify_grade(100, &cutoffs), Some(1));
        assert_eq!(classify_grade(82, &cutoffs), Some(2));
        assert_eq!(classify_grade(81, &cutoffs), Some(3));
        assert_eq!(classify_grade(0, &cutoffs), Some(9));
    }

    #[test]
    fn cohort_rates_are_bounded_integers() {
        let qs = sample_set();
        let subs = vec![
            score_submission(&qs, &answers(&[("1", "1"), ("2", "2"), ("3", "3")]), None),
            score_submission(&qs, &answers(&[("1", "1")]), None),
            score_submission(&qs, &answers(&[]), None),
        ];
        let rates = cohort_correct_rates(&qs, &subs);
        assert_eq!(rates.get(&1), Some(&67));
        assert_eq!(rates.get(&2), Some(&33));
        assert_eq!(rates.get(&3), Some(&33));
        for rate in rates.values() {
            assert!((0..=100).contains(rate));
        }
    }

    #[test]
    fn cohort_rate_with_no_submissions_is_zero() {
        let qs = sample_set();
        let rates = cohort_correct_rates(&qs, &[]);
        assert_eq!(rates.get(&1), Some(&0));
        assert_eq!(rates.get(&2), Some(&0));
        assert_eq!(rates.get(&3), Some(&0));
    }

    #[test]
    fn history_sorts_ascending_by_date_and_is_stable() {
        let out = build_history(vec![
            HistoryPoint {
                exam_name: "B".into(),
                date: "2024-03-01".into(),
                score: 80,
            },
            HistoryPoint {
                exam_name: "A".into(),
                date: "2024-01-01".into(),
                score: 70,
            },
            HistoryPoint {
                exam_name: "C".into(),
                date: "2024-03-01".into(),
                score: 60,
            },
        ]);
        let names: Vec<&str> = out.iter().map(|h| h.exam_name.as_str()).collect();
        assert_eq!(names, ["A", "B", "C"]);
        assert_eq!(out[0].score, 70);
    }

    #[test]
    fn malformed_blobs_degrade_to_empty() {
        assert!(parse_question_set("not json").is_empty());
        assert!(parse_question_set(r#"{"id":1}"#).is_empty());
        assert!(parse_answer_map("[1,2]").is_empty());
        assert!(parse_cutoff_table("]").is_empty());
        // Junk keys are dropped, numeric ones kept.
        let cutoffs = parse_cutoff_table(r#"{"1": 90, "best": 80, "2": "x"}"#);
        assert_eq!(cutoffs, BTreeMap::from([(1, 90)]));
    }

    fn sample_exam() -> ExamInfo {
        ExamInfo {
            exam_id: "e1".into(),
            exam_name: "March mock".into(),
            exam_date: "2024-03-01".into(),
            is_admission: false,
        }
    }

    fn sample_student(id: i64, name: &str) -> StudentInfo {
        StudentInfo {
            id,
            name: name.into(),
            grade: 4,
            class: "A".into(),
            school_name: "".into(),
        }
    }

    #[test]
    fn report_merges_cohort_rates_and_counts() {
        let qs = sample_set();
        let sub = score_submission(&qs, &answers(&[("1", "1"), ("3", "3")]), None);
        let rates = HashMap::from([(1, 50), (3, 100)]);
        let report = compose_report(
            sample_student(10001, "Kim"),
            sample_exam(),
            &qs,
            sub,
            &rates,
            Vec::new(),
            &default_cutoffs(),
            String::new(),
        );

        assert_eq!(report.total_score, 7);
        assert_eq!(report.max_total_score, 10);
        assert_eq!(report.total_question_count, 3);
        assert_eq!(report.correct_count, 2);
        assert_eq!(report.grading_data[0].correct_rate, 50);
        // Absent from the rate map: defaults to 0.
        assert_eq!(report.grading_data[1].correct_rate, 0);
        assert_eq!(report.grading_data[2].correct_rate, 100);
        assert_eq!(report.student_grade, Some(9));

        // Breakdown in first-appearance order, possible summed over the set.
        assert_eq!(report.category_breakdown[0].category, "grammar");
        assert_eq!(report.category_breakdown[0].earned, 2);
        assert_eq!(report.category_breakdown[0].possible, 5);
        assert_eq!(report.category_breakdown[0].rate, 40);
        assert_eq!(report.category_breakdown[1].category, "reading");
        assert_eq!(report.category_breakdown[1].rate, 100);
        assert_eq!(report.type_chart_data.labels, vec!["grammar", "reading"]);
        assert_eq!(report.type_chart_data.scores, vec![40, 100]);
    }

    #[test]
    fn batch_reports_share_cohort_rates() {
        let qs = sample_set();
        let rows = vec![
            ReportRow {
                student: sample_student(10001, "Kim"),
                answers: answers(&[("1", "1"), ("2", "2"), ("3", "3")]),
                vocab_score: 0,
                history: Vec::new(),
                remarks: String::new(),
            },
            ReportRow {
                student: sample_student(10002, "Lee"),
                answers: answers(&[("1", "1")]),
                vocab_score: 0,
                history: Vec::new(),
                remarks: String::new(),
            },
        ];
        let cutoffs = BTreeMap::from([(1, 10), (2, 5)]);
        let reports = compose_exam_reports(&sample_exam(), &qs, &cutoffs, rows);

        assert_eq!(reports.len(), 2);
        // Both students see the same cohort-wide rate for question 1.
        assert_eq!(reports[0].grading_data[0].correct_rate, 100);
        assert_eq!(reports[1].grading_data[0].correct_rate, 100);
        assert_eq!(reports[0].grading_data[1].correct_rate, 50);
        assert_eq!(reports[1].grading_data[1].correct_rate, 50);
        assert_eq!(reports[0].student_grade, Some(1));
        assert_eq!(reports[1].student_grade, Some(9));
    }
}
