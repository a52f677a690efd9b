use std::collections::{BTreeMap, HashSet};
use std::sync::LazyLock;

use regex::Regex;

use crate::models::prefix_chars;
use crate::pipeline::extraction::{collapse_whitespace, ellipsize};

use super::labs::first_text_line;

/// Characters of body text consulted for modality keywords.
const MODALITY_SCAN_CHARS: usize = 2500;

const THROMBOSIS_NOTE: &str = "Thrombosis/occlusion suggested on imaging report";
const PRESENT_NOTE: &str = "present on imaging report";

/// Ordered: the first matching rule names the modality.
static MODALITY_RULES: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    vec![
        (Regex::new(r"(?i)\b(?:mri|mrcp)\b").unwrap(), "MRI/MRCP"),
        (Regex::new(r"(?i)\b(?:cect|ncct|ct)\b").unwrap(), "CT"),
        (Regex::new(r"(?i)\b(?:usg|ultrasound|sonography)\b").unwrap(), "USG"),
        (Regex::new(r"(?i)\b(?:doppler|duplex)\b").unwrap(), "Doppler"),
        (Regex::new(r"(?i)\b(?:endoscopy|egd)\b").unwrap(), "Endoscopy"),
    ]
});

static FINDING_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"(?i)\b(?:thromb|occlu|non[-\s]?opaci|filling defect)\b").unwrap(),
        Regex::new(r"(?i)\b(?:portal vein|splenic vein|smv|superior mesenteric vein|sv)\b").unwrap(),
        Regex::new(r"(?i)\b(?:ascites|splenomegaly|varices|collateral|portal hypertension)\b").unwrap(),
        Regex::new(r"(?i)\b(?:necrosis|pseudocyst|won|fluid collection|pseudoaneurysm|infarction)\b")
            .unwrap(),
    ]
});

static CTSI_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:modified\s*(?:ctsi|ct\s*severity\s*index)|ctsi)\s*[:=-]?\s*(?P<value>\d{1,2}(?:\.\d+)?)")
        .unwrap()
});

static SPLENIC_VEIN_ABBREV: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\bsv\b").unwrap());
static WON_ABBREV: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\bwon\b").unwrap());

/// Modality label from the file name and the start of the report.
pub fn detect_modality(file_name: &str, text: &str) -> &'static str {
    let blob = format!("{file_name}\n{}", prefix_chars(text, MODALITY_SCAN_CHARS));
    MODALITY_RULES
        .iter()
        .find(|(pattern, _)| pattern.is_match(&blob))
        .map(|(_, label)| *label)
        .unwrap_or("Imaging")
}

/// Up to `limit` distinct finding lines; the first non-blank line if none match.
pub fn collect_findings(text: &str, limit: usize) -> Vec<String> {
    let mut findings = Vec::new();
    let mut seen = HashSet::new();

    for raw in text.lines() {
        let line = collapse_whitespace(raw);
        if line.is_empty() {
            continue;
        }
        let line = ellipsize(&line, 260);
        if !FINDING_PATTERNS.iter().any(|p| p.is_match(&line)) {
            continue;
        }
        if !seen.insert(line.to_lowercase()) {
            continue;
        }
        findings.push(line);
        if findings.len() >= limit {
            break;
        }
    }

    if findings.is_empty() {
        findings.extend(first_text_line(text, 220));
    }
    findings
}

/// Structured proforma fields implied by keyword co-occurrence in the report.
pub fn suggest_extra_fields(text: &str) -> BTreeMap<String, String> {
    let lowered = text.to_lowercase();
    let has = |token: &str| lowered.contains(token);
    let occlusive = has("thromb") || has("occlu");
    let mut extra = BTreeMap::new();

    if occlusive && has("portal vein") {
        extra.insert("splanchnic_venous_assessment__portal_vein_pv".to_string(), THROMBOSIS_NOTE.to_string());
    }
    if occlusive && (has("smv") || has("superior mesenteric vein")) {
        extra.insert("splanchnic_venous_assessment__smv".to_string(), THROMBOSIS_NOTE.to_string());
    }
    if occlusive && (has("splenic vein") || SPLENIC_VEIN_ABBREV.is_match(&lowered)) {
        extra.insert("splanchnic_venous_assessment__splenic_vein_sv".to_string(), THROMBOSIS_NOTE.to_string());
    }
    for finding in ["ascites", "splenomegaly", "varices"] {
        if has(finding) {
            extra.insert(format!("portal_hypertensive_changes__{finding}"), PRESENT_NOTE.to_string());
        }
    }
    if let Some(caps) = CTSI_PATTERN.captures(text) {
        extra.insert("overall_findings__modified_ctsi".to_string(), caps["value"].to_string());
    }
    if has("pseudocyst") || WON_ABBREV.is_match(&lowered) {
        extra.insert("overall_findings__pseudocyst_won".to_string(), PRESENT_NOTE.to_string());
    }

    extra
}
