//! Reference section discovery.
//!
//! Finds where reference lists live in a document, either under a
//! recognizable header (`## References`, `**Sources**`, ...) or, when no
//! header validates, as an implicit block of footnote definitions.

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

/// Number of lines after a candidate header searched for a reference entry.
pub const DEFAULT_LOOKAHEAD: usize = 20;

/// Level assigned to bold standalone headers: any real heading outranks them.
const BOLD_HEADER_LEVEL: usize = 7;

static HEADING_HEADER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^\s{0,3}(#{1,4})\s+(?:\*\*|__)?\s*(?:references|sources|citations|works\s+cited|bibliography)\s*:?\s*(?:\*\*|__)?\s*:?\s*$",
    )
    .unwrap()
});

static BOLD_HEADER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^\s*(?:\*\*|__)\s*(?:references|sources|citations|works\s+cited|bibliography)\s*:?\s*(?:\*\*|__)\s*:?\s*$",
    )
    .unwrap()
});

static HEADING_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s{0,3}(#{1,6})\s+\S").unwrap());

static ENTRY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(?:\d+[.)]\s+\S|[-*+]\s+\S|\[\^[^\]\s]+\]:|\[\^\d+\])").unwrap()
});

static FOOTNOTE_DEF_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*\[\^[^\]\s]+\]:\s*\S").unwrap());

static GROUPED_FOOTNOTE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(?:\[\^\d+\]\s*)+[^\s:\[]").unwrap());

/// Returns the heading level of a reference-list header line, or `None` if
/// the line is not one.
pub fn header_level(line: &str) -> Option<usize> {
    if let Some(cap) = HEADING_HEADER_RE.captures(line) {
        return Some(cap[1].len());
    }
    if BOLD_HEADER_RE.is_match(line) {
        return Some(BOLD_HEADER_LEVEL);
    }
    None
}

/// Returns the level of any markdown ATX heading.
fn heading_level(line: &str) -> Option<usize> {
    HEADING_RE.captures(line).map(|cap| cap[1].len())
}

/// True for lines shaped like a reference entry: numbered, bulleted, or a
/// footnote definition / marker.
pub fn looks_like_entry(line: &str) -> bool {
    ENTRY_RE.is_match(line)
}

/// True for lines that can open an implicit reference section.
pub fn is_implicit_start(line: &str) -> bool {
    FOOTNOTE_DEF_RE.is_match(line) || GROUPED_FOOTNOTE_RE.is_match(line)
}

pub(crate) fn is_fence(line: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed.starts_with("```") || trimmed.starts_with("~~~")
}

/// Scans a document for reference sections.
///
/// Returns `(start_line, end_line)` pairs, 0-based and half-open, in
/// document order. An empty result means there is nothing to do.
///
/// # Examples
///
/// ```
/// let text = "Intro [1].\n\n## References\n\n1. A title. https://example.com\n";
/// let sections = refmark::scanner::scan(text);
/// assert_eq!(sections, vec![(2, 5)]);
/// ```
pub fn scan(text: &str) -> Vec<(usize, usize)> {
    let lines: Vec<&str> = text.lines().collect();
    scan_lines(&lines, DEFAULT_LOOKAHEAD)
}

/// Same as [`scan`], over pre-split lines and with a custom look-ahead.
pub fn scan_lines(lines: &[&str], lookahead: usize) -> Vec<(usize, usize)> {
    let sections = scan_headers(lines, lookahead);
    if !sections.is_empty() {
        return sections;
    }

    match find_implicit_start(lines) {
        Some(start) => vec![(start, lines.len())],
        None => Vec::new(),
    }
}

/// Returns the section single-section mode works on: the last one found.
///
/// Trailing sections are assumed to be authoritative. This is a heuristic:
/// prose that legitimately contains its own "References" heading after the
/// real list will win instead.
pub fn last_section(lines: &[&str], lookahead: usize) -> Option<(usize, usize)> {
    scan_lines(lines, lookahead).pop()
}

fn scan_headers(lines: &[&str], lookahead: usize) -> Vec<(usize, usize)> {
    let mut sections = Vec::new();
    let mut in_fence = false;
    let mut i = 0;

    while i < lines.len() {
        let line = lines[i];
        if is_fence(line) {
            in_fence = !in_fence;
            i += 1;
            continue;
        }
        if in_fence {
            i += 1;
            continue;
        }

        if let Some(level) = header_level(line) {
            if validate_header(lines, i, level, lookahead) {
                let end = section_end(lines, i, level);
                sections.push((i, end));
                i = end;
                continue;
            }
            debug!(line = i + 1, header = line.trim(), "rejected reference header without entries");
        }
        i += 1;
    }

    sections
}

/// A header only counts when an entry-shaped line follows it before any
/// competing heading.
fn validate_header(lines: &[&str], header: usize, level: usize, lookahead: usize) -> bool {
    for line in lines.iter().skip(header + 1).take(lookahead) {
        if let Some(other) = heading_level(line) {
            if other <= level {
                return false;
            }
        }
        if header_level(line).is_some() {
            return false;
        }
        if looks_like_entry(line) {
            return true;
        }
    }
    false
}

fn section_end(lines: &[&str], header: usize, level: usize) -> usize {
    let mut in_fence = false;
    for (offset, line) in lines.iter().enumerate().skip(header + 1) {
        if is_fence(line) {
            in_fence = !in_fence;
            continue;
        }
        if in_fence {
            continue;
        }
        if matches!(heading_level(line), Some(other) if other <= level) || header_level(line).is_some() {
            return offset;
        }
    }
    lines.len()
}

fn find_implicit_start(lines: &[&str]) -> Option<usize> {
    let mut in_fence = false;
    for (i, line) in lines.iter().enumerate() {
        if is_fence(line) {
            in_fence = !in_fence;
            continue;
        }
        if !in_fence && is_implicit_start(line) {
            return Some(i);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(text: &str) -> Vec<&str> {
        text.lines().collect()
    }

    #[test]
    fn test_header_levels() {
        assert_eq!(header_level("# References"), Some(1));
        assert_eq!(header_level("#### Works Cited"), Some(4));
        assert_eq!(header_level("## **Sources**"), Some(2));
        assert_eq!(header_level("**Bibliography**"), Some(BOLD_HEADER_LEVEL));
        assert_eq!(header_level("**Citations:**"), Some(BOLD_HEADER_LEVEL));
        assert_eq!(header_level("##### References"), None);
        assert_eq!(header_level("References are listed below"), None);
        assert_eq!(header_level("## Further Reading"), None);
    }

    #[test]
    fn test_empty_document() {
        assert!(scan("").is_empty());
    }

    #[test]
    fn test_no_sections() {
        // Given: prose without any reference list
        let text = "# Title\n\nJust some text [1].\n";

        // Then: nothing is found, which is not an error
        assert!(scan(text).is_empty());
    }

    #[test]
    fn test_header_section_to_end() {
        // Given: a numbered reference list under a heading at the end
        let text = "# Paper\n\nBody [1].\n\n## References\n\n1. First. https://a.org\n2. Second. https://b.org\n";

        // When: we scan
        let sections = scan(text);

        // Then: the section runs from the header to the end of the document
        assert_eq!(sections, vec![(4, 8)]);
    }

    #[test]
    fn test_header_section_stops_at_next_heading() {
        let text = "## References\n1. A. https://a.org\n## Appendix\nMore text.";
        assert_eq!(scan(text), vec![(0, 2)]);
    }

    #[test]
    fn test_subheading_does_not_end_section() {
        let text = "## References\n### Articles\n1. A. https://a.org\n### Books\n2. B.";
        assert_eq!(scan(text), vec![(0, 5)]);
    }

    #[test]
    fn test_rejects_header_without_entries() {
        // Given: a "References" heading that introduces prose, not a list
        let text = "## References\n\nWe discuss how references work.\n\n## Method\n\nText.";

        // Then: the header is rejected and nothing is found
        assert!(scan(text).is_empty());
    }

    #[test]
    fn test_rejects_header_when_heading_comes_first() {
        // Given: a table-of-contents style header followed directly by a heading
        let text = "# References\n\n# Introduction\n\n1. Step one.\n";
        assert!(scan(text).is_empty());
    }

    #[test]
    fn test_lookahead_window() {
        // Given: an entry 25 lines below the header
        let mut text = String::from("## Sources\n");
        for _ in 0..24 {
            text.push_str("filler\n");
        }
        text.push_str("1. Late entry.\n");
        let all = lines(&text);

        // Then: a 20-line window rejects the header, a wider one accepts it
        assert!(scan_lines(&all, DEFAULT_LOOKAHEAD).is_empty());
        assert_eq!(scan_lines(&all, 30), vec![(0, 26)]);
    }

    #[test]
    fn test_bold_header() {
        let text = "Body [^1].\n\n**Sources**\n\n[^1]: Some source. https://x.org";
        assert_eq!(scan(text), vec![(2, 5)]);
    }

    #[test]
    fn test_multiple_sections_in_order() {
        // Given: two chapters each with their own reference list
        let text = "# Chapter 1\nText [1].\n## References\n1. A.\n# Chapter 2\nText [1].\n## References\n1. B.\n";

        // When: we scan
        let sections = scan(text);

        // Then: both are returned in document order
        assert_eq!(sections, vec![(2, 4), (6, 8)]);
        assert_eq!(last_section(&lines(text), DEFAULT_LOOKAHEAD), Some((6, 8)));
    }

    #[test]
    fn test_implicit_footnote_section() {
        // Given: footnote definitions without any header
        let text = "Text with a note [^1].\n\n[^1]: Author. Title. https://x.org\n[^2]: Other.";

        // Then: the implicit section starts at the first definition
        assert_eq!(scan(text), vec![(2, 4)]);
    }

    #[test]
    fn test_implicit_grouped_footnotes() {
        let text = "Claim [^1] [^2].\n\n[^1] [^2] Shared Title | Source\n<https://x.org>";
        assert_eq!(scan(text), vec![(2, 4)]);
    }

    #[test]
    fn test_headers_inside_code_fence_ignored() {
        let text = "```\n## References\n1. Not real.\n```\nText.";
        assert!(scan(text).is_empty());
    }

    #[test]
    fn test_looks_like_entry() {
        assert!(looks_like_entry("1. Title"));
        assert!(looks_like_entry("12) Title"));
        assert!(looks_like_entry("- bullet"));
        assert!(looks_like_entry("[^3]: def"));
        assert!(looks_like_entry("[^Smith-2020-ab]: def"));
        assert!(looks_like_entry("[^1] [^2] Title"));
        assert!(!looks_like_entry("Plain prose."));
        assert!(!looks_like_entry(""));
    }
}
