/// Normalize extracted text before it is stored or searched.
///
/// Carriage returns and page-break form feeds become newlines. Any other
/// control character (NUL included) is dropped. Lines lose trailing
/// whitespace and consecutive blank lines collapse to one.
pub fn normalize_extracted_text(raw: &str) -> String {
    let cleaned: String = raw
        .replace("\r\n", "\n")
        .chars()
        .filter_map(|c| match c {
            '\r' | '\u{c}' => Some('\n'),
            '\n' | '\t' => Some(c),
            c if c.is_control() => None,
            c => Some(c),
        })
        .collect();

    let mut lines: Vec<&str> = Vec::new();
    for line in cleaned.lines().map(str::trim_end) {
        if line.is_empty() && lines.last().is_some_and(|prev| prev.is_empty()) {
            continue;
        }
        lines.push(line);
    }
    lines.join("\n").trim().to_string()
}

/// Collapse every run of whitespace into one space.
pub fn collapse_whitespace(line: &str) -> String {
    line.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Cut a line to `max` characters, ending in `...` when something was removed.
pub fn ellipsize(line: &str, max: usize) -> String {
    if line.chars().count() <= max {
        return line.to_string();
    }
    let keep: String = line.chars().take(max.saturating_sub(3)).collect();
    format!("{keep}...")
}
