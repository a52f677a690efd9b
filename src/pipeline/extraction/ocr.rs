//! General image OCR fallback via `tesseract FILE stdout`.

use std::path::Path;
use std::time::Duration;

use super::command::{resolve_command, CommandRunner};
use super::sanitize::normalize_extracted_text;
use super::ExtractionError;

const TOOL: &str = "tesseract";

pub struct TesseractTool {
    command: String,
    timeout: Duration,
}

impl TesseractTool {
    pub fn new(command: &str, timeout: Duration) -> Self {
        Self {
            command: command.trim().to_string(),
            timeout,
        }
    }

    pub fn extract(&self, runner: &CommandRunner, path: &Path) -> Result<String, ExtractionError> {
        let (binary, mut args) = resolve_command(TOOL, &self.command)?;
        args.push(path.as_os_str().to_os_string());
        args.push("stdout".into());

        let output = runner.run(TOOL, &binary, &args, self.timeout)?;
        if !output.success {
            return Err(ExtractionError::CommandFailed(output.failure_message(TOOL)));
        }
        let text = normalize_extracted_text(&output.stdout);
        if text.is_empty() {
            return Err(ExtractionError::EmptyOutput { tool: TOOL.into() });
        }
        Ok(text)
    }
}
