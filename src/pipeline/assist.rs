//! Single-shot analysis of an uploaded attachment.
//!
//! Runs the shared extraction pipeline on one file, then the heuristics
//! for the requested proforma section, and returns suggestions for a
//! human to confirm. Attachment jobs store exactly this payload.

use std::collections::HashSet;
use std::path::Path;

use crate::models::{
    prefix_chars, truncate_chars, AttachmentAnalysis, ExtractionStatus, Extractor, ImagingEntry,
    LabEntry, Section, Suggestions,
};
use crate::pipeline::extraction::{FileDescriptor, TextExtractor};
use crate::pipeline::heuristics::{
    collect_findings, detect_modality, extract_lab_readings, report_date, suggest_extra_fields,
};

pub const PREVIEW_MAX_CHARS: usize = 2500;
pub const MAX_LAB_ENTRIES: usize = 18;
const FINDINGS_PER_ROW: usize = 3;

const NOTE_UNSUPPORTED: &str = "Upload a PDF, image, markdown, or text report for auto-fill.";
const NOTE_EXTRACTION_FAILED: &str =
    "OCR extraction failed. You can still attach this file and enter values manually.";
const NOTE_CONFIRM: &str = "Review and confirm every auto-filled value before final submission.";

pub fn analyze_attachment(
    extractor: &dyn TextExtractor,
    stored_path: &Path,
    original_file_name: &str,
    section: Section,
    max_chars: usize,
) -> AttachmentAnalysis {
    let descriptor = FileDescriptor::from_path(stored_path);
    if !descriptor.is_searchable() {
        return failed(
            section,
            Extractor::Unsupported,
            format!("Unsupported file extension: .{}", descriptor.extension),
            NOTE_UNSUPPORTED,
        );
    }

    let outcome = extractor.extract(stored_path, &descriptor);
    let text = match outcome.text {
        Some(text) if !text.is_empty() => truncate_chars(text, max_chars).0,
        _ => {
            let error = outcome
                .error
                .unwrap_or_else(|| "Unable to extract text from uploaded report".to_string());
            return failed(section, outcome.extractor, error, NOTE_EXTRACTION_FAILED);
        }
    };

    let mut suggestions = match section {
        Section::Lab => lab_suggestions(&text, original_file_name),
        Section::Imaging => imaging_suggestions(&text, original_file_name),
    };
    suggestions.review_notes.push(NOTE_CONFIRM.to_string());

    AttachmentAnalysis {
        section,
        extraction_status: ExtractionStatus::Ok,
        extractor: outcome.extractor,
        extraction_error: None,
        extracted_text_preview: prefix_chars(&text, PREVIEW_MAX_CHARS).to_string(),
        suggestions,
    }
}

fn failed(section: Section, extractor: Extractor, error: String, note: &str) -> AttachmentAnalysis {
    AttachmentAnalysis {
        section,
        extraction_status: ExtractionStatus::Failed,
        extractor,
        extraction_error: Some(error),
        extracted_text_preview: String::new(),
        suggestions: Suggestions {
            review_notes: vec![note.to_string()],
            ..Default::default()
        },
    }
}

fn date_string(file_name: &str, text: &str) -> String {
    report_date(file_name, text)
        .map(|d| d.to_string())
        .unwrap_or_default()
}

fn lab_suggestions(text: &str, file_name: &str) -> Suggestions {
    let date = date_string(file_name, text);
    let mut seen = HashSet::new();
    let mut rows = Vec::new();

    for (metric, reading) in extract_lab_readings(text) {
        if !seen.insert(format!("{}:{}", metric.key, reading.value)) {
            continue;
        }
        rows.push(LabEntry {
            date: date.clone(),
            parameter: metric.label.to_string(),
            value: format!("{} {}", reading.value, metric.unit),
        });
    }

    let note = if rows.is_empty() {
        "No structured laboratory values detected from this attachment.".to_string()
    } else {
        format!("Auto-filled {} laboratory values from OCR.", rows.len())
    };
    rows.truncate(MAX_LAB_ENTRIES);

    Suggestions {
        lab_entries: rows,
        review_notes: vec![note],
        ..Default::default()
    }
}

fn imaging_suggestions(text: &str, file_name: &str) -> Suggestions {
    let findings = collect_findings(text, 4);
    let row = ImagingEntry {
        date: date_string(file_name, text),
        modality: detect_modality(file_name, text).to_string(),
        findings: findings
            .iter()
            .take(FINDINGS_PER_ROW)
            .cloned()
            .collect::<Vec<_>>()
            .join("; ")
            .trim()
            .to_string(),
    };
    let extra_fields = suggest_extra_fields(text);

    let mut notes = Vec::new();
    if row.findings.is_empty() {
        notes.push("No structured imaging findings were detected from this attachment.".to_string());
    } else {
        notes.push("Imaging findings were drafted from OCR text.".to_string());
    }
    if !extra_fields.is_empty() {
        notes.push(format!("Suggested {} vascular/imaging field updates.", extra_fields.len()));
    }

    Suggestions {
        imaging_entries: vec![row],
        extra_fields,
        review_notes: notes,
        ..Default::default()
    }
}
