//! PDF text-layer fallback via `pdftotext -layout FILE -`.

use std::path::Path;
use std::time::Duration;

use super::command::{resolve_command, CommandRunner};
use super::sanitize::normalize_extracted_text;
use super::ExtractionError;

const TOOL: &str = "pdftotext";

pub struct PdfTextTool {
    command: String,
    timeout: Duration,
}

impl PdfTextTool {
    pub fn new(command: &str, timeout: Duration) -> Self {
        Self {
            command: command.trim().to_string(),
            timeout,
        }
    }

    pub fn extract(&self, runner: &CommandRunner, path: &Path) -> Result<String, ExtractionError> {
        let (binary, mut args) = resolve_command(TOOL, &self.command)?;
        args.push("-layout".into());
        args.push(path.as_os_str().to_os_string());
        args.push("-".into());

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

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    /// Tool whose command runs `body` through `sh`, with the input PDF beside it.
    fn fake_tool(dir: &Path, body: &str) -> (PdfTextTool, std::path::PathBuf) {
        let script = dir.join("fake_pdftotext");
        std::fs::write(&script, format!("{body}\n")).unwrap();
        let input = dir.join("doc.pdf");
        std::fs::write(&input, b"%PDF").unwrap();
        let tool = PdfTextTool::new(&format!("sh {}", script.display()), Duration::from_secs(5));
        (tool, input)
    }

    #[test]
    fn passes_layout_flag_and_stdout_target() {
        let dir = tempfile::tempdir().unwrap();
        let (tool, input) = fake_tool(dir.path(), r#"echo "$1 $3""#);
        let runner = CommandRunner::new().unwrap();
        assert_eq!(tool.extract(&runner, &input).unwrap(), "-layout -");
    }

    #[test]
    fn stdout_is_normalized() {
        let dir = tempfile::tempdir().unwrap();
        let (tool, input) = fake_tool(dir.path(), r"printf 'CRP 12   \n\n'");
        let runner = CommandRunner::new().unwrap();
        assert_eq!(tool.extract(&runner, &input).unwrap(), "CRP 12");
    }

    #[test]
    fn blank_stdout_is_empty_output() {
        let dir = tempfile::tempdir().unwrap();
        let (tool, input) = fake_tool(dir.path(), r"printf '   \n'");
        let runner = CommandRunner::new().unwrap();
        let err = tool.extract(&runner, &input).unwrap_err();
        assert_eq!(err.to_string(), "pdftotext produced empty output");
    }

    #[test]
    fn nonzero_exit_reports_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let (tool, input) = fake_tool(dir.path(), "echo 'Syntax Error: Couldn'\\''t find trailer' >&2; exit 1");
        let runner = CommandRunner::new().unwrap();
        let err = tool.extract(&runner, &input).unwrap_err();
        assert_eq!(err.to_string(), "Syntax Error: Couldn't find trailer");
    }

    #[test]
    fn missing_binary_reports_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let tool = PdfTextTool::new("no-such-pdftotext-casevault", Duration::from_secs(5));
        let runner = CommandRunner::new().unwrap();
        let err = tool.extract(&runner, &dir.path().join("a.pdf")).unwrap_err();
        assert!(matches!(err, ExtractionError::CommandNotFound { .. }));
    }
}
