use std::sync::LazyLock;

use regex::Regex;

use crate::models::MetricStatus;
use crate::pipeline::extraction::{collapse_whitespace, ellipsize};

/// Numbers larger than this are treated as identifiers, not results.
const MAX_PLAUSIBLE_VALUE: f64 = 100_000.0;

/// Matched lines are kept up to this many characters.
pub const METRIC_LINE_MAX_CHARS: usize = 280;

static NUMBER_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[-+]?\d+(?:\.\d+)?").unwrap());

/// Lab-report lines flagged by the lab as out of range.
static ABNORMAL_LINE_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"\((?:H|L|HH|LL)\)").unwrap(),
        Regex::new(r"(?i)\b(?:critical|abnormal|elevated|raised|deranged|high|low|markedly)\b").unwrap(),
        Regex::new(r"(?i)\b(?:h|l|hh|ll)\b").unwrap(),
    ]
});

/// A tracked lab parameter with its reference interval.
#[derive(Debug)]
pub struct LabMetric {
    pub key: &'static str,
    pub label: &'static str,
    pub unit: &'static str,
    pub normal_min: f64,
    pub normal_max: f64,
    patterns: Vec<Regex>,
}

/// First reading of one metric in a document.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricReading {
    pub value: f64,
    pub status: MetricStatus,
    /// The whitespace-collapsed source line, capped at [`METRIC_LINE_MAX_CHARS`].
    pub line: String,
}

fn metric(
    key: &'static str,
    label: &'static str,
    unit: &'static str,
    pattern: &str,
    normal_min: f64,
    normal_max: f64,
) -> LabMetric {
    LabMetric {
        key,
        label,
        unit,
        normal_min,
        normal_max,
        patterns: vec![Regex::new(&format!("(?i){pattern}")).unwrap()],
    }
}

/// The fixed metric catalogue, in reporting order.
pub static LAB_METRICS: LazyLock<Vec<LabMetric>> = LazyLock::new(|| {
    vec![
        metric("hb", "Hemoglobin", "g/dL", r"\b(?:hb|hgb|ha?emoglobin)\b", 10.0, 16.5),
        metric(
            "wbc",
            "WBC / TLC",
            "10^3/uL",
            r"\b(?:wbc|tlc|total\s+leucocyte|total\s+leukocyte)\b",
            4.0,
            11.0,
        ),
        metric("platelets", "Platelets", "10^3/uL", r"\b(?:platelet(?:s)?|plt)\b", 150.0, 450.0),
        metric("crp", "CRP", "mg/L", r"\b(?:crp|c[\s-]?reactive\s+protein)\b", 0.0, 6.0),
        metric(
            "bilirubin_total",
            "Bilirubin Total",
            "mg/dL",
            r"\b(?:total\s+bilirubin|bilirubin\s+total)\b",
            0.2,
            1.2,
        ),
        metric("ast", "AST / SGOT", "U/L", r"\b(?:ast|sgot)\b", 0.0, 40.0),
        metric("alt", "ALT / SGPT", "U/L", r"\b(?:alt|sgpt)\b", 0.0, 40.0),
        metric("alp", "ALP", "U/L", r"\b(?:alp|alkaline\s+phosphatase)\b", 44.0, 147.0),
    ]
});

impl LabMetric {
    pub fn classify(&self, value: f64) -> MetricStatus {
        if value < self.normal_min {
            MetricStatus::Low
        } else if value > self.normal_max {
            MetricStatus::High
        } else {
            MetricStatus::Normal
        }
    }

    /// Scan lines in order and return the first one that names this metric
    /// and carries a plausible number.
    pub fn first_reading(&self, text: &str) -> Option<MetricReading> {
        for raw in text.lines() {
            let line = collapse_whitespace(raw);
            if line.is_empty() {
                continue;
            }
            let cleaned = line.replace(',', "");
            for pattern in &self.patterns {
                let Some(found) = pattern.find(&cleaned) else {
                    continue;
                };
                let Some(value) = parse_number_after(&cleaned, found.end()) else {
                    continue;
                };
                return Some(MetricReading {
                    value,
                    status: self.classify(value),
                    line: line.chars().take(METRIC_LINE_MAX_CHARS).collect(),
                });
            }
        }
        None
    }
}

pub fn metric_by_key(key: &str) -> Option<&'static LabMetric> {
    LAB_METRICS.iter().find(|m| m.key == key)
}

/// Every catalogue metric found in `text`, in catalogue order.
pub fn extract_lab_readings(text: &str) -> Vec<(&'static LabMetric, MetricReading)> {
    LAB_METRICS
        .iter()
        .filter_map(|m| m.first_reading(text).map(|r| (m, r)))
        .collect()
}

/// First plausible number in `line`, preferring those starting at or after `start`.
/// Thousands separators must already be stripped. Rounded to 2 decimals.
pub fn parse_number_after(line: &str, start: usize) -> Option<f64> {
    let candidates: Vec<_> = NUMBER_PATTERN.find_iter(line).collect();
    let after: Vec<_> = candidates.iter().filter(|m| m.start() >= start).collect();
    let ordered: Vec<_> = if after.is_empty() {
        candidates.iter().collect()
    } else {
        after
    };

    ordered
        .into_iter()
        .filter_map(|m| m.as_str().parse::<f64>().ok())
        .find(|v| v.abs() <= MAX_PLAUSIBLE_VALUE)
        .map(round2)
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

pub fn is_abnormal_line(line: &str) -> bool {
    ABNORMAL_LINE_PATTERNS.iter().any(|p| p.is_match(line))
}

/// Up to `limit` distinct lines carrying an abnormal marker, each capped at 260 chars.
pub fn abnormal_lines(text: &str, limit: usize) -> Vec<String> {
    let mut rows = Vec::new();
    let mut seen = std::collections::HashSet::new();
    for raw in text.lines() {
        let line = collapse_whitespace(raw);
        if line.is_empty() {
            continue;
        }
        let line = ellipsize(&line, 260);
        if !is_abnormal_line(&line) {
            continue;
        }
        if !seen.insert(line.to_lowercase()) {
            continue;
        }
        rows.push(line);
        if rows.len() >= limit {
            break;
        }
    }
    rows
}

/// First non-blank line, whitespace-collapsed and cut to `max_chars`.
pub fn first_text_line(text: &str, max_chars: usize) -> Option<String> {
    text.lines()
        .map(collapse_whitespace)
        .find(|l| !l.is_empty())
        .map(|l| l.chars().take(max_chars).collect())
}
