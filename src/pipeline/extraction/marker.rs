//! Primary document-to-markdown/OCR tool (`marker_single` by default).
//!
//! Installed versions disagree on how the output directory is passed:
//! newer ones take `--output_dir DIR`, older ones a trailing positional
//! `DIR`. The first usage-style failure switches styles once and the
//! working style is remembered for every later call.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use serde_json::Value;

use super::command::{resolve_command, CommandRunner};
use super::sanitize::normalize_extracted_text;
use super::ExtractionError;
use crate::config::DEFAULT_MARKER_COMMAND;

const TOOL: &str = "marker";

/// Keys whose string values are collected from JSON output.
const JSON_TEXT_KEYS: &[&str] = &["text", "markdown", "content", "ocr_text"];

/// Lowercase fragments that mark an argument-style mismatch.
const USAGE_ERROR_MARKERS: &[&str] = &["unrecognized arguments", "too few arguments", "usage:"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputDirMode {
    /// `marker INPUT --output_dir DIR`
    Flag,
    /// `marker INPUT DIR`
    Positional,
}

pub struct MarkerTool {
    command: String,
    timeout: Duration,
    mode: Mutex<Option<OutputDirMode>>,
}

impl MarkerTool {
    /// A blank command falls back to `marker_single`.
    pub fn new(command: &str, timeout: Duration) -> Self {
        let command = command.trim();
        let command = if command.is_empty() {
            DEFAULT_MARKER_COMMAND
        } else {
            command
        };
        Self {
            command: command.to_string(),
            timeout,
            mode: Mutex::new(None),
        }
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    /// Argument style detected so far, if any call has succeeded.
    pub fn mode(&self) -> Option<OutputDirMode> {
        match self.mode.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    fn remember(&self, mode: OutputDirMode) {
        let mut guard = match self.mode.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if *guard != Some(mode) {
            tracing::info!(mode = ?mode, "Marker output-directory style detected");
        }
        *guard = Some(mode);
    }

    pub fn extract(&self, runner: &CommandRunner, path: &Path) -> Result<String, ExtractionError> {
        let (binary, fixed_args) = resolve_command("Marker", &self.command)?;

        let out_dir = tempfile::Builder::new().prefix("marker_extract_").tempdir()?;
        let mode = self.mode().unwrap_or(OutputDirMode::Flag);

        let output = runner.run(
            TOOL,
            &binary,
            &build_args(&fixed_args, path, out_dir.path(), mode),
            self.timeout,
        )?;

        if output.success {
            self.remember(mode);
        } else {
            let message = output.failure_message(TOOL);
            if mode != OutputDirMode::Flag || !looks_like_usage_error(&message) {
                return Err(ExtractionError::CommandFailed(message));
            }

            tracing::debug!(error = %message, "Marker rejected --output_dir, retrying positional");
            let retry = runner.run(
                TOOL,
                &binary,
                &build_args(&fixed_args, path, out_dir.path(), OutputDirMode::Positional),
                self.timeout,
            )?;
            if !retry.success {
                return Err(ExtractionError::CommandFailed(retry.failure_message(TOOL)));
            }
            self.remember(OutputDirMode::Positional);
        }

        read_marker_output(out_dir.path()).ok_or(ExtractionError::NoMarkerOutput)
    }
}

fn build_args(fixed: &[OsString], input: &Path, out_dir: &Path, mode: OutputDirMode) -> Vec<OsString> {
    let mut args = fixed.to_vec();
    args.push(input.as_os_str().to_os_string());
    if mode == OutputDirMode::Flag {
        args.push("--output_dir".into());
    }
    args.push(out_dir.as_os_str().to_os_string());
    args
}

fn looks_like_usage_error(message: &str) -> bool {
    let lowered = message.to_lowercase();
    USAGE_ERROR_MARKERS.iter().any(|m| lowered.contains(m))
}

/// Pick the tool's text from its output directory.
///
/// The largest non-empty `.md`/`.txt` file wins; otherwise text values are
/// collected from the first JSON file that has any.
pub fn read_marker_output(dir: &Path) -> Option<String> {
    let mut files = Vec::new();
    collect_files(dir, &mut files);
    files.sort();

    let best = files
        .iter()
        .filter(|p| has_extension(p, &["md", "txt"]))
        .filter_map(|p| std::fs::read(p).ok())
        .map(|bytes| String::from_utf8_lossy(&bytes).trim().to_string())
        .filter(|text| !text.is_empty())
        .max_by_key(|text| text.chars().count());
    if let Some(text) = best {
        return Some(normalize_extracted_text(&text));
    }

    for path in files.iter().filter(|p| has_extension(p, &["json"])) {
        let Ok(bytes) = std::fs::read(path) else {
            continue;
        };
        let Ok(payload) = serde_json::from_str::<Value>(&String::from_utf8_lossy(&bytes)) else {
            continue;
        };
        let mut values = Vec::new();
        collect_text_values(&payload, &mut values);
        if !values.is_empty() {
            let text = normalize_extracted_text(&values.join("\n\n"));
            if !text.is_empty() {
                return Some(text);
            }
        }
    }

    None
}

fn has_extension(path: &Path, wanted: &[&str]) -> bool {
    path.extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .map(|e| wanted.contains(&e.as_str()))
        .unwrap_or(false)
}

fn collect_files(dir: &Path, out: &mut Vec<PathBuf>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        match entry.file_type() {
            Ok(ft) if ft.is_dir() => collect_files(&path, out),
            Ok(ft) if ft.is_file() => out.push(path),
            _ => {}
        }
    }
}

fn collect_text_values(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::String(s) => {
            let token = s.trim();
            if !token.is_empty() {
                out.push(token.to_string());
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_text_values(item, out);
            }
        }
        Value::Object(map) => {
            for (key, child) in map {
                let wanted = JSON_TEXT_KEYS.contains(&key.to_lowercase().as_str());
                if wanted || child.is_object() || child.is_array() {
                    collect_text_values(child, out);
                }
            }
        }
        _ => {}
    }
}
