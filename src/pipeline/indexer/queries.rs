//! Read-only projections over the in-memory document index.

use std::cmp::Reverse;
use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use super::{DocumentIndexer, IndexerError};
use crate::models::{
    document_key, truncate_chars, DocumentRecord, DocumentStatus, Extractor, MetricStatus,
    TrendDirection,
};
use crate::pipeline::extraction::collapse_whitespace;
use crate::pipeline::heuristics::{
    abnormal_lines, date_from_file_name, date_of_timestamp, first_text_line, round2, LAB_METRICS,
};

const SEARCH_DEFAULT_LIMIT: usize = 50;
const SEARCH_MAX_LIMIT: usize = 200;
/// Added per query token found in the file name.
const FILE_NAME_BONUS: usize = 5;
const SNIPPET_RADIUS: usize = 160;

const TIMELINE_DEFAULT_LIMIT: usize = 80;
const TIMELINE_MAX_LIMIT: usize = 200;
const SUMMARY_MAX_CHARS: usize = 220;
const HIGHLIGHT_LINES: usize = 4;

const TRENDS_DEFAULT_REPORTS: usize = 120;
const TRENDS_MAX_REPORTS: usize = 300;
const TREND_POINTS_SHOWN: usize = 24;
const FLAT_DELTA: f64 = 0.01;

pub const DEFAULT_CONTENT_MAX_CHARS: usize = 120_000;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub patient_key: String,
    pub patient_display_name: Option<String>,
    pub study_id: Option<String>,
    pub case_bucket: Option<String>,
    pub svt_status: Option<String>,
    pub file_id: String,
    pub file_name: String,
    pub relative_path: String,
    pub category: Option<String>,
    pub score: usize,
    pub snippet: String,
    pub updated_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PatientDocumentRow {
    pub patient_key: String,
    pub file_id: String,
    pub file_name: String,
    pub relative_path: String,
    pub category: Option<String>,
    pub status: DocumentStatus,
    pub error: Option<String>,
    pub extractor: Extractor,
    pub indexed_at: DateTime<Utc>,
    pub updated_at: Option<String>,
    pub text_chars: usize,
    pub truncated: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LabTimelineRow {
    pub patient_key: String,
    pub file_id: String,
    pub file_name: String,
    pub relative_path: String,
    pub status: DocumentStatus,
    pub error: Option<String>,
    pub extractor: Extractor,
    pub updated_at: Option<String>,
    pub indexed_at: DateTime<Utc>,
    /// Date written in the file name, if any.
    pub lab_date: Option<NaiveDate>,
    /// Sort date: `lab_date`, else `updated_at`, else `indexed_at`.
    pub source_date: String,
    pub summary: Option<String>,
    pub abnormal_markers: usize,
    pub highlight_lines: Vec<String>,
    pub text_chars: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendPoint {
    pub source_date: Option<NaiveDate>,
    pub file_id: String,
    pub file_name: String,
    pub relative_path: String,
    pub value: f64,
    pub status: MetricStatus,
    pub line: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricTrend {
    pub metric_key: &'static str,
    pub label: &'static str,
    pub unit: &'static str,
    /// The most recent points, oldest first.
    pub points: Vec<TrendPoint>,
    pub points_count: usize,
    pub abnormal_points: usize,
    pub latest_value: f64,
    pub latest_status: MetricStatus,
    pub latest_date: Option<NaiveDate>,
    pub delta: Option<f64>,
    pub trend_direction: TrendDirection,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LabTrends {
    pub reports_considered: usize,
    pub points_total: usize,
    pub metrics: Vec<MetricTrend>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtractedDocument {
    pub patient_key: String,
    pub file_id: String,
    pub file_name: String,
    pub relative_path: String,
    pub category: Option<String>,
    pub status: DocumentStatus,
    pub error: Option<String>,
    pub extractor: Extractor,
    pub indexed_at: DateTime<Utc>,
    pub content: String,
    pub content_truncated: bool,
    pub text_chars: usize,
    pub mime_type: Option<String>,
    pub extension: String,
}

fn clamp_limit(limit: Option<usize>, default: usize, max: usize) -> usize {
    limit.unwrap_or(default).clamp(1, max)
}

fn normalized_key(raw: &str) -> String {
    raw.trim().to_lowercase()
}

fn belongs_to(doc: &DocumentRecord, patient_key: &str) -> bool {
    doc.patient_key.trim().to_lowercase() == patient_key
}

fn status_rank(status: DocumentStatus) -> u8 {
    match status {
        DocumentStatus::Indexed => 2,
        DocumentStatus::Pending => 1,
        DocumentStatus::Failed => 0,
    }
}

/// Best-known date of a report: file name, then catalog timestamp, then index time.
fn resolve_document_date(doc: &DocumentRecord) -> Option<NaiveDate> {
    date_from_file_name(&doc.file_name)
        .or_else(|| doc.updated_at.as_deref().and_then(date_of_timestamp))
        .or_else(|| Some(doc.indexed_at.date_naive()))
}

/// Window of `text` around the earliest token hit, whitespace-collapsed.
fn build_snippet(text: &str, tokens: &[String]) -> String {
    let lowered = text.to_lowercase();
    let chars: Vec<char> = text.chars().collect();
    let first_hit = tokens.iter().filter_map(|t| lowered.find(t.as_str())).min();

    let (start, end) = match first_hit {
        Some(byte_idx) => {
            let center = lowered[..byte_idx].chars().count().min(chars.len());
            (
                center.saturating_sub(SNIPPET_RADIUS),
                (center + SNIPPET_RADIUS).min(chars.len()),
            )
        }
        None => (0, (SNIPPET_RADIUS * 2).min(chars.len())),
    };
    let window: String = chars[start..end].iter().collect();
    collapse_whitespace(&window)
}

fn trend_direction(delta: Option<f64>) -> TrendDirection {
    match delta {
        None => TrendDirection::Single,
        Some(d) if d.abs() < FLAT_DELTA => TrendDirection::Flat,
        Some(d) if d > 0.0 => TrendDirection::Up,
        Some(_) => TrendDirection::Down,
    }
}

impl DocumentIndexer {
    /// Case-insensitive AND search over indexed documents.
    pub fn search(
        &self,
        query: &str,
        patient_key: Option<&str>,
        limit: Option<usize>,
    ) -> Result<Vec<SearchHit>, IndexerError> {
        let tokens: Vec<String> = query
            .to_lowercase()
            .split_whitespace()
            .map(str::to_string)
            .collect();
        if tokens.is_empty() {
            return Ok(Vec::new());
        }
        let target = patient_key.map(normalized_key).filter(|p| !p.is_empty());

        let state = self.read_state()?;
        let mut hits = Vec::new();
        for doc in state.documents.values() {
            if doc.status != DocumentStatus::Indexed || doc.text.is_empty() {
                continue;
            }
            if target.as_deref().is_some_and(|t| !belongs_to(doc, t)) {
                continue;
            }

            let blob = format!("{}\n{}", doc.file_name, doc.text).to_lowercase();
            if !tokens.iter().all(|t| blob.contains(t.as_str())) {
                continue;
            }
            let name = doc.file_name.to_lowercase();
            let score = tokens
                .iter()
                .map(|t| {
                    let bonus = if name.contains(t.as_str()) { FILE_NAME_BONUS } else { 0 };
                    blob.matches(t.as_str()).count() + bonus
                })
                .sum();

            hits.push(SearchHit {
                patient_key: doc.patient_key.clone(),
                patient_display_name: doc.patient_display_name.clone(),
                study_id: doc.study_id.clone(),
                case_bucket: doc.case_bucket.clone(),
                svt_status: doc.svt_status.clone(),
                file_id: doc.file_id.clone(),
                file_name: doc.file_name.clone(),
                relative_path: doc.relative_path.clone(),
                category: doc.category.clone(),
                score,
                snippet: build_snippet(&doc.text, &tokens),
                updated_at: doc.updated_at.clone(),
            });
        }
        drop(state);

        hits.sort_by_cached_key(|h| Reverse((h.score, h.updated_at.clone())));
        hits.truncate(clamp_limit(limit, SEARCH_DEFAULT_LIMIT, SEARCH_MAX_LIMIT));
        Ok(hits)
    }

    /// Every indexed, pending or failed document of one patient.
    pub fn list_patient_documents(&self, patient_key: &str) -> Result<Vec<PatientDocumentRow>, IndexerError> {
        let target = normalized_key(patient_key);
        if target.is_empty() {
            return Ok(Vec::new());
        }

        let state = self.read_state()?;
        let mut rows: Vec<PatientDocumentRow> = state
            .documents
            .values()
            .filter(|d| belongs_to(d, &target))
            .map(|d| PatientDocumentRow {
                patient_key: d.patient_key.clone(),
                file_id: d.file_id.clone(),
                file_name: d.file_name.clone(),
                relative_path: d.relative_path.clone(),
                category: d.category.clone(),
                status: d.status,
                error: d.error.clone(),
                extractor: d.extractor,
                indexed_at: d.indexed_at,
                updated_at: d.updated_at.clone(),
                text_chars: d.text_chars,
                truncated: d.truncated,
            })
            .collect();
        drop(state);

        rows.sort_by_cached_key(|r| {
            Reverse((status_rank(r.status), r.updated_at.clone(), r.file_name.to_lowercase()))
        });
        Ok(rows)
    }

    /// Lab reports of one patient, newest first, with abnormal lines highlighted.
    pub fn list_patient_lab_timeline(
        &self,
        patient_key: &str,
        limit: Option<usize>,
    ) -> Result<Vec<LabTimelineRow>, IndexerError> {
        let target = normalized_key(patient_key);
        if target.is_empty() {
            return Ok(Vec::new());
        }

        let state = self.read_state()?;
        let mut rows: Vec<LabTimelineRow> = state
            .documents
            .values()
            .filter(|d| belongs_to(d, &target) && d.is_lab_report())
            .map(|d| {
                let text = if d.status == DocumentStatus::Indexed { d.text.as_str() } else { "" };
                let highlight_lines = abnormal_lines(text, HIGHLIGHT_LINES);
                let lab_date = date_from_file_name(&d.file_name);
                let source_date = lab_date
                    .map(|date| date.to_string())
                    .or_else(|| d.updated_at.clone().filter(|u| !u.is_empty()))
                    .unwrap_or_else(|| d.indexed_at.to_rfc3339());
                LabTimelineRow {
                    patient_key: d.patient_key.clone(),
                    file_id: d.file_id.clone(),
                    file_name: d.file_name.clone(),
                    relative_path: d.relative_path.clone(),
                    status: d.status,
                    error: d.error.clone(),
                    extractor: d.extractor,
                    updated_at: d.updated_at.clone(),
                    indexed_at: d.indexed_at,
                    lab_date,
                    source_date,
                    summary: first_text_line(text, SUMMARY_MAX_CHARS),
                    abnormal_markers: highlight_lines.len(),
                    highlight_lines,
                    text_chars: d.text_chars,
                }
            })
            .collect();
        drop(state);

        rows.sort_by_cached_key(|r| {
            Reverse((r.source_date.clone(), r.updated_at.clone(), r.file_name.to_lowercase()))
        });
        rows.truncate(clamp_limit(limit, TIMELINE_DEFAULT_LIMIT, TIMELINE_MAX_LIMIT));
        Ok(rows)
    }

    /// Per-metric value series across the patient's most recent lab reports.
    pub fn list_patient_lab_trends(
        &self,
        patient_key: &str,
        limit_reports: Option<usize>,
    ) -> Result<LabTrends, IndexerError> {
        let target = normalized_key(patient_key);
        if target.is_empty() {
            return Ok(LabTrends::default());
        }

        let mut reports: Vec<DocumentRecord> = {
            let state = self.read_state()?;
            state
                .documents
                .values()
                .filter(|d| {
                    belongs_to(d, &target)
                        && d.is_lab_report()
                        && d.status == DocumentStatus::Indexed
                        && !d.text.trim().is_empty()
                })
                .cloned()
                .collect()
        };
        reports.sort_by_cached_key(|d| {
            Reverse((resolve_document_date(d), d.updated_at.clone(), d.file_name.to_lowercase()))
        });
        reports.truncate(clamp_limit(limit_reports, TRENDS_DEFAULT_REPORTS, TRENDS_MAX_REPORTS));

        let mut series: BTreeMap<&'static str, Vec<TrendPoint>> = BTreeMap::new();
        for doc in &reports {
            let source_date = resolve_document_date(doc);
            for metric in LAB_METRICS.iter() {
                let Some(reading) = metric.first_reading(&doc.text) else {
                    continue;
                };
                series.entry(metric.key).or_default().push(TrendPoint {
                    source_date,
                    file_id: doc.file_id.clone(),
                    file_name: doc.file_name.clone(),
                    relative_path: doc.relative_path.clone(),
                    value: reading.value,
                    status: reading.status,
                    line: reading.line,
                });
            }
        }

        let mut trends = LabTrends {
            reports_considered: reports.len(),
            ..Default::default()
        };
        for metric in LAB_METRICS.iter() {
            let Some(mut points) = series.remove(metric.key) else {
                continue;
            };
            points.sort_by_cached_key(|p| (p.source_date, p.file_name.to_lowercase()));
            let Some(latest) = points.last().cloned() else {
                continue;
            };

            let delta = points
                .len()
                .checked_sub(2)
                .map(|i| round2(latest.value - points[i].value));
            let points_count = points.len();
            let abnormal_points = points.iter().filter(|p| p.status != MetricStatus::Normal).count();
            trends.points_total += points_count;

            let shown = points.split_off(points_count.saturating_sub(TREND_POINTS_SHOWN));
            trends.metrics.push(MetricTrend {
                metric_key: metric.key,
                label: metric.label,
                unit: metric.unit,
                points: shown,
                points_count,
                abnormal_points,
                latest_value: latest.value,
                latest_status: latest.status,
                latest_date: latest.source_date,
                delta,
                trend_direction: trend_direction(delta),
            });
        }

        trends
            .metrics
            .sort_by_key(|m| Reverse((m.abnormal_points, m.points_count, m.label)));
        Ok(trends)
    }

    /// Full extracted text of one document, cut to `max_chars` characters.
    pub fn get_extracted_document(
        &self,
        patient_key: &str,
        file_id: &str,
        max_chars: Option<usize>,
    ) -> Result<ExtractedDocument, IndexerError> {
        let key = document_key(patient_key.trim(), file_id.trim());
        let doc = {
            let state = self.read_state()?;
            state
                .documents
                .get(&key)
                .cloned()
                .ok_or_else(|| IndexerError::NotFound(key.clone()))?
        };

        let (content, content_truncated) =
            truncate_chars(doc.text, max_chars.unwrap_or(DEFAULT_CONTENT_MAX_CHARS));
        Ok(ExtractedDocument {
            patient_key: doc.patient_key,
            file_id: doc.file_id,
            file_name: doc.file_name,
            relative_path: doc.relative_path,
            category: doc.category,
            status: doc.status,
            error: doc.error,
            extractor: doc.extractor,
            indexed_at: doc.indexed_at,
            content,
            content_truncated,
            text_chars: doc.text_chars,
            mime_type: doc.mime_type,
            extension: doc.extension,
        })
    }
}
