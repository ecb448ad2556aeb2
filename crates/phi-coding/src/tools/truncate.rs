//! Line- and byte-capped truncation for tool output.

use serde_json::{Value, json};

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Truncation {
    pub content: String,
    pub truncated: bool,
    /// `"lines"` or `"bytes"`; empty when nothing was cut.
    pub truncated_by: &'static str,
    pub total_lines: usize,
    pub total_bytes: usize,
    pub output_lines: usize,
    pub output_bytes: usize,
    pub last_line_partial: bool,
    pub first_line_exceeds_limit: bool,
    pub max_lines: usize,
    pub max_bytes: usize,
}

impl Truncation {
    pub fn details(&self) -> Value {
        json!({
            "truncated": self.truncated,
            "truncatedBy": self.truncated_by,
            "totalLines": self.total_lines,
            "totalBytes": self.total_bytes,
            "outputLines": self.output_lines,
            "outputBytes": self.output_bytes,
            "lastLinePartial": self.last_line_partial,
            "firstLineExceedsLimit": self.first_line_exceeds_limit,
            "maxLines": self.max_lines,
            "maxBytes": self.max_bytes,
        })
    }
}

/// Keep the first lines of `content` within the caps.
pub fn truncate_head(content: &str, max_lines: usize, max_bytes: usize) -> Truncation {
    let total_bytes = content.len();
    let lines: Vec<&str> = content.split('\n').collect();
    let total_lines = lines.len();

    if total_lines <= max_lines && total_bytes <= max_bytes {
        return Truncation {
            content: content.to_string(),
            total_lines,
            total_bytes,
            output_lines: total_lines,
            output_bytes: total_bytes,
            max_lines,
            max_bytes,
            ..Truncation::default()
        };
    }

    if total_lines > 0 && lines[0].len() > max_bytes {
        return Truncation {
            content: String::new(),
            truncated: true,
            truncated_by: "bytes",
            total_lines,
            total_bytes,
            first_line_exceeds_limit: true,
            max_lines,
            max_bytes,
            ..Truncation::default()
        };
    }

    let mut out: Vec<&str> = Vec::new();
    let mut out_bytes = 0usize;
    let mut truncated_by = "lines";
    for (index, line) in lines.iter().enumerate().take(max_lines) {
        let mut line_bytes = line.len();
        if index > 0 {
            line_bytes += 1;
        }
        if out_bytes + line_bytes > max_bytes {
            truncated_by = "bytes";
            break;
        }
        out.push(line);
        out_bytes += line_bytes;
    }
    if out.len() >= max_lines && out_bytes <= max_bytes {
        truncated_by = "lines";
    }

    let content = out.join("\n");
    Truncation {
        output_lines: out.len(),
        output_bytes: content.len(),
        content,
        truncated: true,
        truncated_by,
        total_lines,
        total_bytes,
        max_lines,
        max_bytes,
        ..Truncation::default()
    }
}

/// Keep the last lines of `content` within the caps. When even the last
/// line alone is over the byte cap, its tail is kept and marked partial.
pub fn truncate_tail(content: &str, max_lines: usize, max_bytes: usize) -> Truncation {
    let total_bytes = content.len();
    let lines: Vec<&str> = content.split('\n').collect();
    let total_lines = lines.len();

    if total_lines <= max_lines && total_bytes <= max_bytes {
        return Truncation {
            content: content.to_string(),
            total_lines,
            total_bytes,
            output_lines: total_lines,
            output_bytes: total_bytes,
            max_lines,
            max_bytes,
            ..Truncation::default()
        };
    }

    let mut out: Vec<String> = Vec::new();
    let mut out_bytes = 0usize;
    let mut truncated_by = "lines";
    let mut last_line_partial = false;

    for line in lines.iter().rev() {
        if out.len() >= max_lines {
            break;
        }
        let mut line_bytes = line.len();
        if !out.is_empty() {
            line_bytes += 1;
        }
        if out_bytes + line_bytes > max_bytes {
            truncated_by = "bytes";
            if out.is_empty() {
                let tail = tail_within_bytes(line, max_bytes);
                out_bytes = tail.len();
                out.insert(0, tail);
                last_line_partial = true;
            }
            break;
        }
        out.insert(0, line.to_string());
        out_bytes += line_bytes;
    }
    if out.len() >= max_lines && out_bytes <= max_bytes {
        truncated_by = "lines";
    }

    let content = out.join("\n");
    Truncation {
        output_lines: out.len(),
        output_bytes: content.len(),
        content,
        truncated: true,
        truncated_by,
        total_lines,
        total_bytes,
        last_line_partial,
        max_lines,
        max_bytes,
        ..Truncation::default()
    }
}

/// Last `max_bytes` of `s`, aligned to a character boundary.
fn tail_within_bytes(s: &str, max_bytes: usize) -> String {
    if s.len() <= max_bytes {
        return s.to_string();
    }
    let mut start = s.len() - max_bytes;
    while !s.is_char_boundary(start) {
        start += 1;
    }
    s[start..].to_string()
}

pub fn format_size(bytes: usize) -> String {
    if bytes < 1024 {
        return format!("{bytes}B");
    }
    if bytes < 1024 * 1024 {
        return format!("{:.1}KB", bytes as f64 / 1024.0);
    }
    format!("{:.1}MB", bytes as f64 / (1024.0 * 1024.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_within_limits_passes_through() {
        let result = truncate_head("a\nb\nc", 10, 1024);
        assert!(!result.truncated);
        assert_eq!(result.content, "a\nb\nc");
        assert_eq!(result.total_lines, 3);
        assert_eq!(result.output_lines, 3);
    }

    #[test]
    fn head_truncation_cuts_by_lines() {
        let content = (1..=10).map(|n| n.to_string()).collect::<Vec<_>>().join("\n");
        let result = truncate_head(&content, 4, 1024);
        assert!(result.truncated);
        assert_eq!(result.truncated_by, "lines");
        assert_eq!(result.content, "1\n2\n3\n4");
        assert_eq!(result.output_lines, 4);
        assert_eq!(result.total_lines, 10);
    }

    #[test]
    fn head_truncation_cuts_by_bytes_mid_list() {
        let content = "aaaa\nbbbb\ncccc";
        let result = truncate_head(content, 10, 9);
        assert!(result.truncated);
        assert_eq!(result.truncated_by, "bytes");
        assert_eq!(result.content, "aaaa\nbbbb");
    }

    #[test]
    fn oversized_first_line_is_flagged() {
        let content = "x".repeat(100);
        let result = truncate_head(&content, 10, 50);
        assert!(result.truncated);
        assert!(result.first_line_exceeds_limit);
        assert_eq!(result.content, "");
        assert_eq!(result.output_lines, 0);
    }

    #[test]
    fn tail_truncation_keeps_the_last_lines() {
        let content = (1..=10).map(|n| n.to_string()).collect::<Vec<_>>().join("\n");
        let result = truncate_tail(&content, 3, 1024);
        assert!(result.truncated);
        assert_eq!(result.truncated_by, "lines");
        assert_eq!(result.content, "8\n9\n10");
    }

    #[test]
    fn tail_truncation_keeps_a_partial_final_line_when_needed() {
        let content = format!("short\n{}", "y".repeat(100));
        let result = truncate_tail(&content, 10, 20);
        assert!(result.truncated);
        assert_eq!(result.truncated_by, "bytes");
        assert!(result.last_line_partial);
        assert_eq!(result.content, "y".repeat(20));
    }

    #[test]
    fn partial_tail_respects_utf8_boundaries() {
        let content = format!("a\n{}", "é".repeat(50));
        let result = truncate_tail(&content, 10, 11);
        assert!(result.last_line_partial);
        assert!(result.content.chars().all(|c| c == 'é'));
        assert!(result.content.len() <= 11);
    }

    #[test]
    fn sizes_format_human_readably() {
        assert_eq!(format_size(512), "512B");
        assert_eq!(format_size(2048), "2.0KB");
        assert_eq!(format_size(3 * 1024 * 1024), "3.0MB");
    }

    #[test]
    fn details_use_camel_case_keys() {
        let result = truncate_head("a", 1, 10);
        let details = result.details();
        assert_eq!(details["truncated"], false);
        assert!(details.get("totalLines").is_some());
        assert!(details.get("firstLineExceedsLimit").is_some());
    }
}
