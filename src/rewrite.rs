//! Inline marker rewriting.
//!
//! Substitutes final labels for the original numeric or footnote markers in
//! body text. Work is done line by line so that markdown table rows can be
//! detected: inside a table a label opening with `[^` is escaped as `\[^`
//! to keep the row from being read as a footnote reference.

use std::collections::HashMap;

use serde::Serialize;

use crate::model::InlineStyle;
use crate::scanner::is_fence;
use crate::usage::{footnote_markers, numeric_markers};

/// Character prepended to footnote-shaped labels inside table rows.
pub const TABLE_ESCAPE: char = '\\';

/// One marker substitution, in document order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Replacement {
    pub original: String,
    pub replacement: String,
}

/// The rewritten body and what changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RewriteOutcome {
    pub body: String,
    pub replacement_count: usize,
    pub log: Vec<Replacement>,
}

/// A line is a table row when it starts with `|` after optional whitespace.
pub fn is_table_line(line: &str) -> bool {
    line.trim_start().starts_with('|')
}

/// Escapes or unescapes a footnote-shaped label for its surrounding context.
pub fn fit_label(label: &str, in_table: bool) -> String {
    let bare = label
        .strip_prefix(TABLE_ESCAPE)
        .filter(|rest| rest.starts_with("[^"))
        .unwrap_or(label);
    if in_table && bare.starts_with("[^") {
        format!("{TABLE_ESCAPE}{bare}")
    } else {
        bare.to_string()
    }
}

/// Replaces inline markers in `body` using `mapping`.
///
/// # Arguments
///
/// * `body` - Body text of one section
/// * `mapping` - Final label for each original reference number
/// * `style` - Which marker shape the body uses
///
/// # Returns
///
/// The rewritten body, the number of markers changed and an ordered log
/// of each substitution.
///
/// Numeric style rewrites ranges, comma groups and single markers; any
/// number missing from the mapping becomes a bare `[^n]` so unresolved
/// citations stay distinguishable from ordinary bracketed prose. Footnote
/// style only rewrites `[^n]` and leaves unmapped numbers untouched.
/// Lines inside fenced code blocks are never modified.
///
/// # Examples
///
/// ```
/// use std::collections::HashMap;
/// use refmark::{replace_all, InlineStyle};
///
/// let mapping = HashMap::from([(1, "[^A-2024]".to_string())]);
/// let outcome = replace_all("| data [1] |", &mapping, InlineStyle::Numeric);
/// assert_eq!(outcome.body, "| data \\[^A-2024] |");
/// ```
pub fn replace_all(body: &str, mapping: &HashMap<u32, String>, style: InlineStyle) -> RewriteOutcome {
    let mut log = Vec::new();
    let mut in_fence = false;

    let lines: Vec<String> = body
        .split('\n')
        .map(|line| {
            if is_fence(line) {
                in_fence = !in_fence;
                return line.to_string();
            }
            if in_fence {
                return line.to_string();
            }
            rewrite_line(line, mapping, style, &mut log)
        })
        .collect();

    RewriteOutcome {
        body: lines.join("\n"),
        replacement_count: log.len(),
        log,
    }
}

fn rewrite_line(
    line: &str,
    mapping: &HashMap<u32, String>,
    style: InlineStyle,
    log: &mut Vec<Replacement>,
) -> String {
    let in_table = is_table_line(line);
    let label_for = |number: u32| -> String {
        match mapping.get(&number) {
            Some(label) => fit_label(label, in_table),
            None => fit_label(&format!("[^{number}]"), in_table),
        }
    };

    let mut edits: Vec<(usize, usize, String)> = Vec::new();
    match style {
        InlineStyle::Numeric => {
            for marker in numeric_markers(line) {
                let replacement: String = marker.numbers.iter().map(|n| label_for(*n)).collect();
                edits.push((marker.start, marker.end, replacement));
            }
        }
        InlineStyle::Footnote => {
            for marker in footnote_markers(line) {
                if let Some(label) = mapping.get(&marker.number) {
                    edits.push((marker.start, marker.end, fit_label(label, in_table)));
                }
            }
        }
    }

    let mut applied: Vec<Replacement> = Vec::new();
    let mut result = line.to_string();
    // Apply from the end so earlier spans stay valid
    for (start, end, replacement) in edits.into_iter().rev() {
        let original = &line[start..end];
        if original == replacement {
            continue;
        }
        applied.push(Replacement {
            original: original.to_string(),
            replacement: replacement.clone(),
        });
        result.replace_range(start..end, &replacement);
    }
    applied.reverse();
    log.extend(applied);

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapping(entries: &[(u32, &str)]) -> HashMap<u32, String> {
        entries.iter().map(|(n, l)| (*n, l.to_string())).collect()
    }

    #[test]
    fn test_table_escaping() {
        // Given: a footnote-shaped label
        let map = mapping(&[(1, "[^A-2024]")]);

        // When: the same marker is rewritten inside and outside a table
        let table = replace_all("| data [1] |", &map, InlineStyle::Numeric);
        let plain = replace_all("plain [1] text", &map, InlineStyle::Numeric);

        // Then: only the table row gets the escape
        assert_eq!(table.body, "| data \\[^A-2024] |");
        assert_eq!(plain.body, "plain [^A-2024] text");
    }

    #[test]
    fn test_escaped_label_unescaped_outside_table() {
        let map = mapping(&[(1, "\\[^A-2024]")]);
        assert_eq!(replace_all("x [1]", &map, InlineStyle::Numeric).body, "x [^A-2024]");
        assert_eq!(replace_all(" | x [1] |", &map, InlineStyle::Numeric).body, " | x \\[^A-2024] |");
    }

    #[test]
    fn test_range_with_unmapped_fallback() {
        // Given: a range where 2 has no label
        let map = mapping(&[(1, "[^A-2020]"), (3, "[^C-2021]")]);

        // When: we rewrite
        let outcome = replace_all("See [1-3].", &map, InlineStyle::Numeric);

        // Then: the unmapped number falls back to a bare footnote
        assert_eq!(outcome.body, "See [^A-2020][^2][^C-2021].");
        assert_eq!(outcome.replacement_count, 1);
        assert_eq!(outcome.log[0].original, "[1-3]");
    }

    #[test]
    fn test_link_labels_and_inline_code_untouched() {
        // Given: a reference-style link, an inline code index and one real citation
        let map = mapping(&[(1, "[^A-2024]")]);

        // When: we rewrite
        let outcome = replace_all("See [the docs][1] and `a[1]`, as shown [1].", &map, InlineStyle::Numeric);

        // Then: only the citation changes
        assert_eq!(outcome.body, "See [the docs][1] and `a[1]`, as shown [^A-2024].");
        assert_eq!(outcome.replacement_count, 1);
    }

    #[test]
    fn test_comma_group() {
        let map = mapping(&[(1, "[^A-2020]"), (2, "[^B-2020]")]);
        let outcome = replace_all("Both [1, 2] agree.", &map, InlineStyle::Numeric);
        assert_eq!(outcome.body, "Both [^A-2020][^B-2020] agree.");
    }

    #[test]
    fn test_unmapped_single_normalized() {
        let outcome = replace_all("Unknown [7].", &HashMap::new(), InlineStyle::Numeric);
        assert_eq!(outcome.body, "Unknown [^7].");
        assert_eq!(outcome.log, vec![Replacement { original: "[7]".into(), replacement: "[^7]".into() }]);
    }

    #[test]
    fn test_footnote_style_leaves_unmapped() {
        // Given: footnote markers where only 1 is mapped
        let map = mapping(&[(1, "[^A-2024]")]);

        // When: we rewrite in footnote style
        let outcome = replace_all("A [^1] and B [^2], plus [3].", &map, InlineStyle::Footnote);

        // Then: 2 stays as it was and numeric brackets are not touched
        assert_eq!(outcome.body, "A [^A-2024] and B [^2], plus [3].");
        assert_eq!(outcome.replacement_count, 1);
    }

    #[test]
    fn test_footnote_style_in_table_keeps_single_escape() {
        let map = mapping(&[(2, "[^B-2022]")]);
        let outcome = replace_all("| a | \\[^2] |", &map, InlineStyle::Footnote);
        assert_eq!(outcome.body, "| a | \\[^B-2022] |");
    }

    #[test]
    fn test_log_order_and_multiline() {
        let map = mapping(&[(1, "[^A-2020]"), (2, "[^B-2020]")]);
        let outcome = replace_all("First [2] then [1].\nAgain [1].", &map, InlineStyle::Numeric);
        assert_eq!(outcome.body, "First [^B-2020] then [^A-2020].\nAgain [^A-2020].");
        let originals: Vec<&str> = outcome.log.iter().map(|r| r.original.as_str()).collect();
        assert_eq!(originals, vec!["[2]", "[1]", "[1]"]);
        assert_eq!(outcome.replacement_count, 3);
    }

    #[test]
    fn test_code_and_links_untouched() {
        let map = mapping(&[(1, "[^A-2020]")]);
        let body = "```\nlet x = a[1];\n```\nA [1](https://x.org) link.";
        let outcome = replace_all(body, &map, InlineStyle::Numeric);
        assert_eq!(outcome.body, body);
        assert_eq!(outcome.replacement_count, 0);
    }

    #[test]
    fn test_preserves_trailing_newline() {
        let map = mapping(&[(1, "[^A-2020]")]);
        assert_eq!(replace_all("x [1]\n", &map, InlineStyle::Numeric).body, "x [^A-2020]\n");
    }
}
