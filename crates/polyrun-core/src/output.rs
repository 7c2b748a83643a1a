//! Guest output truncation.

use serde::{Deserialize, Serialize};

pub const DEFAULT_MAX_OUTPUT_LINES: usize = 10_000;
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 500 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputLimits {
    pub max_lines: usize,
    pub max_bytes: usize,
}

impl Default for OutputLimits {
    fn default() -> Self {
        Self {
            max_lines: DEFAULT_MAX_OUTPUT_LINES,
            max_bytes: DEFAULT_MAX_OUTPUT_BYTES,
        }
    }
}

impl OutputLimits {
    pub fn notice(&self) -> String {
        format!(
            "⚠ Output truncated (exceeded {} lines or {} KB). Showing first portion only.",
            self.max_lines,
            self.max_bytes / 1024
        )
    }
}

/// Keeps the leading portion of `text` within both limits and appends a single
/// notice line when anything was cut. Text within limits is returned unchanged.
pub fn truncate_output(text: &str, limits: &OutputLimits) -> String {
    let mut kept = text;
    let mut truncated = false;

    if kept.len() > limits.max_bytes {
        let mut end = limits.max_bytes;
        while !kept.is_char_boundary(end) {
            end -= 1;
        }
        kept = &kept[..end];
        truncated = true;
    }

    let mut consumed = 0;
    for (index, line) in kept.split_inclusive('\n').enumerate() {
        if index == limits.max_lines {
            truncated = true;
            break;
        }
        consumed += line.len();
    }
    kept = &kept[..consumed];

    if !truncated {
        return text.to_string();
    }

    let mut result = String::with_capacity(kept.len() + 96);
    result.push_str(kept);
    if !result.is_empty() && !result.ends_with('\n') {
        result.push('\n');
    }
    result.push_str(&limits.notice());
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_output_is_untouched() {
        let limits = OutputLimits::default();
        assert_eq!(truncate_output("a\nb\n", &limits), "a\nb\n");
        assert_eq!(truncate_output("", &limits), "");
    }

    #[test]
    fn test_line_limit_keeps_first_lines_plus_notice() {
        let text: String = (0..10_005).map(|i| format!("{}\n", i)).collect();
        let result = truncate_output(&text, &OutputLimits::default());
        let lines: Vec<&str> = result.lines().collect();
        assert_eq!(lines.len(), 10_001);
        assert_eq!(lines[0], "0");
        assert_eq!(lines[9_999], "9999");
        assert!(lines[10_000].starts_with("⚠ Output truncated (exceeded 10000 lines or 500 KB)"));
    }

    #[test]
    fn test_byte_limit_respects_char_boundaries() {
        let limits = OutputLimits {
            max_lines: 100,
            max_bytes: 5,
        };
        // "é" is two bytes, the cut must not split it.
        let result = truncate_output("abcdé tail", &limits);
        let (head, notice) = result.split_once('\n').unwrap();
        assert_eq!(head, "abcd");
        assert!(notice.starts_with("⚠ Output truncated"));
    }

    #[test]
    fn test_exactly_at_limit_is_not_truncated() {
        let limits = OutputLimits {
            max_lines: 2,
            max_bytes: 1024,
        };
        assert_eq!(truncate_output("x\ny\n", &limits), "x\ny\n");
        assert_eq!(truncate_output("x\ny", &limits), "x\ny");
        assert!(truncate_output("x\ny\nz", &limits).ends_with("Showing first portion only."));
    }
}
