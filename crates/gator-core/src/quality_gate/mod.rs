//! Deterministic quality-gate decisions and the noisy-output parsers that
//! feed them.

use crate::mission::types::{ReviewFeedback, TestResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DenyReason {
    Tests,
    Review,
}

impl DenyReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tests => "tests",
            Self::Review => "review",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QualityGateDecision {
    pub granted: bool,
    pub deny_reason: Option<DenyReason>,
    pub message: String,
}

impl QualityGateDecision {
    fn granted() -> Self {
        Self {
            granted: true,
            deny_reason: None,
            message: "quality gate granted".to_string(),
        }
    }

    fn denied(reason: DenyReason, message: impl Into<String>) -> Self {
        Self {
            granted: false,
            deny_reason: Some(reason),
            message: message.into(),
        }
    }
}

/// First-match-wins decision rules, per the quality-gate contract: tests
/// failing outranks review rejection, which outranks a clean grant.
pub fn evaluate(test_result: &TestResult, review: &ReviewFeedback) -> QualityGateDecision {
    if test_result.failed_tests > 0 || !test_result.passed {
        return QualityGateDecision::denied(
            DenyReason::Tests,
            format!(
                "{} of {} tests failed: {}",
                test_result.failed_tests, test_result.total_tests, test_result.summary
            ),
        );
    }

    if !review.approved || review.score < 6 {
        return QualityGateDecision::denied(
            DenyReason::Review,
            format!("review score {}/10: {}", review.score, review.summary),
        );
    }

    QualityGateDecision::granted()
}

/// Parse a noisy tester transcript for `Tests run: X, Failures: Y, Errors: Z`.
/// Missing numbers are treated as zero; `passed` is true iff failures and
/// errors are both zero and the line was found at all.
pub fn parse_test_result(task_id: &str, output: &str, duration_ms: u64) -> TestResult {
    let mut total = 0u32;
    let mut failures = 0u32;
    let mut errors = 0u32;
    let mut found = false;

    for line in output.lines() {
        if let Some(rest) = find_after(line, "Tests run:") {
            found = true;
            total = extract_number(rest).unwrap_or(0);
            if let Some(f) = find_after(line, "Failures:") {
                failures = extract_number(f).unwrap_or(0);
            }
            if let Some(e) = find_after(line, "Errors:") {
                errors = extract_number(e).unwrap_or(0);
            }
            break;
        }
    }

    let failed = failures + errors;
    TestResult {
        task_id: task_id.to_string(),
        passed: found && failed == 0,
        total_tests: total,
        failed_tests: failed,
        summary: output.lines().next().unwrap_or("").trim().to_string(),
        duration_ms,
    }
}

/// Parse a noisy reviewer transcript for `Score: N/10`, `Approved: yes|no`,
/// and bulleted `Issues:`/`Suggestions:` blocks.
pub fn parse_review_feedback(task_id: &str, output: &str) -> ReviewFeedback {
    let mut score = 0u8;
    let mut approved = false;
    let mut issues = Vec::new();
    let mut suggestions = Vec::new();

    for line in output.lines() {
        let trimmed = line.trim();
        if let Some(rest) = find_after(trimmed, "Score:") {
            if let Some(slash) = rest.find('/') {
                score = rest[..slash].trim().parse().unwrap_or(0);
            }
        } else if let Some(rest) = find_after(trimmed, "Approved:") {
            approved = rest.trim().to_lowercase().starts_with("yes");
        }
    }

    let mut section: Option<&str> = None;
    for line in output.lines() {
        let trimmed = line.trim();
        if trimmed.eq_ignore_ascii_case("issues:") {
            section = Some("issues");
            continue;
        }
        if trimmed.eq_ignore_ascii_case("suggestions:") {
            section = Some("suggestions");
            continue;
        }
        if let Some(item) = trimmed.strip_prefix("- ").or_else(|| trimmed.strip_prefix("* ")) {
            match section {
                Some("issues") => issues.push(item.trim().to_string()),
                Some("suggestions") => suggestions.push(item.trim().to_string()),
                _ => {}
            }
        } else if trimmed.is_empty() {
            section = None;
        }
    }

    ReviewFeedback {
        task_id: task_id.to_string(),
        approved,
        summary: output.lines().next().unwrap_or("").trim().to_string(),
        issues,
        suggestions,
        score,
    }
}

fn find_after<'a>(line: &'a str, marker: &str) -> Option<&'a str> {
    line.find(marker).map(|idx| &line[idx + marker.len()..])
}

fn extract_number(text: &str) -> Option<u32> {
    let digits: String = text
        .trim_start()
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}
