use std::collections::HashSet;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QaStatus {
    Approved,
    Rejected,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QaIssue {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub location: String,
    #[serde(default)]
    pub issue_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fix_required: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QaIterationRecord {
    pub iteration: u32,
    pub status: QaStatus,
    pub issues: Vec<QaIssue>,
    pub timestamp: DateTime<Utc>,
    pub duration_ms: u64,
}

#[derive(Debug, Clone)]
pub struct QaReport {
    pub approved: bool,
    pub issues: Vec<QaIssue>,
}

/// Parse a reviewer report. The machine-relevant marker is a line starting
/// with `Status: PASSED` or `Status: FAILED`; issues are bullets of the
/// form `- [type] title (location)` with indented continuation lines as
/// the description.
pub fn parse_report(content: &str) -> Result<QaReport> {
    let mut approved: Option<bool> = None;
    let mut issues = Vec::new();

    for line in content.lines() {
        let trimmed = line.trim_start();
        if trimmed.starts_with("Status: PASSED") {
            approved = Some(true);
        } else if trimmed.starts_with("Status: FAILED") {
            approved = Some(false);
        } else if let Some(rest) = trimmed.strip_prefix("- ") {
            if let Some(issue) = parse_issue_line(rest) {
                issues.push(issue);
            }
        } else if line.starts_with("  ") && !trimmed.is_empty() {
            if let Some(last) = issues.last_mut() {
                let description = last.description.get_or_insert_with(String::new);
                if !description.is_empty() {
                    description.push(' ');
                }
                description.push_str(trimmed);
            }
        }
    }

    let approved = approved.ok_or_else(|| anyhow::anyhow!("Report has no Status marker"))?;
    Ok(QaReport { approved, issues })
}

fn parse_issue_line(rest: &str) -> Option<QaIssue> {
    let rest = rest.trim();
    if rest.is_empty() {
        return None;
    }

    let (issue_type, rest) = match rest.strip_prefix('[') {
        Some(tail) => match tail.split_once(']') {
            Some((t, r)) => (t.trim().to_string(), r.trim()),
            None => (String::new(), rest),
        },
        None => (String::new(), rest),
    };

    let (title, location) = match rest.rfind('(') {
        Some(open) if rest.ends_with(')') => {
            let title = rest[..open].trim().to_string();
            let location = rest[open + 1..rest.len() - 1].trim().to_string();
            (title, location)
        }
        _ => (rest.to_string(), String::new()),
    };

    if title.is_empty() {
        return None;
    }

    Some(QaIssue {
        title,
        description: None,
        location,
        issue_type,
        fix_required: None,
    })
}

const TITLE_PREFIXES: &[&str] = &["error:", "issue:", "bug:", "fix:"];

pub fn normalize_title(title: &str) -> String {
    let mut t = title.trim().to_lowercase();
    loop {
        let mut stripped = false;
        for prefix in TITLE_PREFIXES {
            if let Some(rest) = t.strip_prefix(prefix) {
                t = rest.trim_start().to_string();
                stripped = true;
            }
        }
        if !stripped {
            break;
        }
    }
    t
}

fn token_set(issue: &QaIssue) -> HashSet<String> {
    let combined = format!(
        "{} {} {}",
        normalize_title(&issue.title),
        issue.location,
        issue.description.as_deref().unwrap_or("")
    );
    combined
        .to_lowercase()
        .split_whitespace()
        .map(|s| s.to_string())
        .collect()
}

/// Jaccard overlap of the word-token sets of the issues' combined text.
pub fn issue_similarity(a: &QaIssue, b: &QaIssue) -> f64 {
    let sa = token_set(a);
    let sb = token_set(b);
    if sa.is_empty() && sb.is_empty() {
        return 1.0;
    }
    let intersection = sa.intersection(&sb).count();
    let union = sa.union(&sb).count();
    intersection as f64 / union as f64
}

pub fn is_similar(a: &QaIssue, b: &QaIssue, threshold: f64) -> bool {
    issue_similarity(a, b) >= threshold
}

/// Issues whose similarity class has occurred in at least `min_count`
/// iterations. A class is counted at most once per iteration.
pub fn find_recurring(
    history: &[QaIterationRecord],
    threshold: f64,
    min_count: u32,
) -> Vec<QaIssue> {
    let mut classes: Vec<(QaIssue, u32)> = Vec::new();

    for record in history {
        let mut counted: HashSet<usize> = HashSet::new();
        for issue in &record.issues {
            let class = classes
                .iter()
                .position(|(representative, _)| is_similar(representative, issue, threshold));
            match class {
                Some(i) => {
                    if counted.insert(i) {
                        classes[i].1 += 1;
                    }
                }
                None => {
                    let i = classes.len();
                    classes.push((issue.clone(), 1));
                    counted.insert(i);
                }
            }
        }
    }

    classes
        .into_iter()
        .filter(|(_, count)| *count >= min_count)
        .map(|(issue, _)| issue)
        .collect()
}
