//! Inline citation usage analysis.
//!
//! Finds which reference numbers a body cites and compares them with the
//! numbers a reference list defines. Nothing here removes references:
//! unused ones are flagged, undefined ones are reported.

use std::collections::BTreeSet;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::model::{CitationStyle, DocumentSection, InlineStyle, ParsedReference, UsageSets};
use crate::scanner::is_fence;

/// Widest `[n-m]` range that is expanded; wider ones are not treated as citations.
pub const MAX_RANGE_SPAN: u32 = 500;

static NUMERIC_MARKER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\[(\d+(?:\s*[-–]\s*\d+)?(?:\s*,\s*\d+(?:\s*[-–]\s*\d+)?)*)\]").unwrap()
});

static FOOTNOTE_MARKER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\\?)\[\^(\d+)\]").unwrap());

/// Shape of a numeric marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerKind {
    /// `[n]`
    Single,
    /// `[n-m]`
    Range,
    /// `[n,m,...]`, parts may themselves be ranges
    Group,
}

/// A numeric citation marker found in one line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NumericMarker {
    pub start: usize,
    pub end: usize,
    pub kind: MarkerKind,
    pub numbers: Vec<u32>,
}

/// A footnote citation marker (`[^n]`, possibly escaped) found in one line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FootnoteMarker {
    pub start: usize,
    pub end: usize,
    pub escaped: bool,
    pub number: u32,
}

/// Expands the inside of a numeric marker: `"1, 3-5"` gives `[1, 3, 4, 5]`.
///
/// Returns `None` for zero, reversed ranges, or ranges wider than
/// [`MAX_RANGE_SPAN`]; such brackets are ordinary prose.
pub fn expand_marker(inner: &str) -> Option<Vec<u32>> {
    let mut numbers = Vec::new();
    for part in inner.split(',') {
        let part = part.trim();
        match part.split_once(['-', '–']) {
            Some((low, high)) => {
                let low: u32 = low.trim().parse().ok()?;
                let high: u32 = high.trim().parse().ok()?;
                if low == 0 || high < low || high - low > MAX_RANGE_SPAN {
                    return None;
                }
                numbers.extend(low..=high);
            }
            None => {
                let number: u32 = part.parse().ok()?;
                if number == 0 {
                    return None;
                }
                numbers.push(number);
            }
        }
    }
    Some(numbers)
}

/// Finds numeric markers in a single line.
///
/// Markdown links (`[1](url)`), link definitions (`[1]: url` at the
/// start of a line), the label of a reference-style link (`[text][1]`)
/// and anything inside an inline code span are not citations and are
/// skipped. Adjacent markers such as `[1][2]` are still both citations.
pub fn numeric_markers(line: &str) -> Vec<NumericMarker> {
    let spans = code_spans(line);
    let mut markers: Vec<NumericMarker> = Vec::new();

    for cap in NUMERIC_MARKER_RE.captures_iter(line) {
        let Some(whole) = cap.get(0) else { continue };
        if in_code_span(&spans, whole.start()) {
            continue;
        }
        let before = &line[..whole.start()];
        let after = &line[whole.end()..];
        if after.starts_with('(') {
            continue;
        }
        if after.starts_with(':') && before.trim().is_empty() {
            continue;
        }
        if before.ends_with(']') && markers.last().map_or(true, |m| m.end != whole.start()) {
            continue;
        }

        let inner = &cap[1];
        let Some(numbers) = expand_marker(inner) else { continue };
        let kind = if inner.contains(',') {
            MarkerKind::Group
        } else if inner.contains(['-', '–']) {
            MarkerKind::Range
        } else {
            MarkerKind::Single
        };
        markers.push(NumericMarker {
            start: whole.start(),
            end: whole.end(),
            kind,
            numbers,
        });
    }

    markers
}

/// Finds footnote markers in a single line, skipping definitions (`[^n]:`)
/// and inline code spans.
pub fn footnote_markers(line: &str) -> Vec<FootnoteMarker> {
    let spans = code_spans(line);
    FOOTNOTE_MARKER_RE
        .captures_iter(line)
        .filter_map(|cap| {
            let whole = cap.get(0)?;
            if in_code_span(&spans, whole.start()) {
                return None;
            }
            if line[whole.end()..].starts_with(':') {
                return None;
            }
            let number: u32 = cap[2].parse().ok().filter(|n| *n > 0)?;
            Some(FootnoteMarker {
                start: whole.start(),
                end: whole.end(),
                escaped: !cap[1].is_empty(),
                number,
            })
        })
        .collect()
}

/// Byte ranges of inline code spans in a line.
///
/// A span opens with a run of backticks and closes at the next run of the
/// same length; an unmatched run is literal text.
fn code_spans(line: &str) -> Vec<(usize, usize)> {
    let bytes = line.as_bytes();
    let run_end = |from: usize| (from..bytes.len()).find(|&k| bytes[k] != b'`').unwrap_or(bytes.len());

    let mut spans = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'`' {
            i += 1;
            continue;
        }
        let open = i;
        i = run_end(i);
        let width = i - open;

        let mut j = i;
        while j < bytes.len() {
            if bytes[j] != b'`' {
                j += 1;
                continue;
            }
            let close = j;
            j = run_end(j);
            if j - close == width {
                spans.push((open, j));
                i = j;
                break;
            }
        }
    }
    spans
}

fn in_code_span(spans: &[(usize, usize)], position: usize) -> bool {
    spans.iter().any(|&(start, end)| start <= position && position < end)
}

/// Lines outside fenced code blocks.
fn prose_lines(body: &str) -> impl Iterator<Item = &str> {
    let mut in_fence = false;
    body.lines().filter(move |line| {
        if is_fence(line) {
            in_fence = !in_fence;
            return false;
        }
        !in_fence
    })
}

/// Collects every reference number cited in a body.
///
/// # Arguments
///
/// * `body` - Body text; fenced code blocks are ignored
/// * `style` - Marker shapes to look for
///
/// # Returns
///
/// The cited numbers, sorted.
///
/// Numeric style expands comma groups and ranges, footnote style reads
/// `[^n]`, and `Auto` unions both.
pub fn find_referenced_numbers(body: &str, style: CitationStyle) -> BTreeSet<u32> {
    let mut numbers = BTreeSet::new();
    for line in prose_lines(body) {
        if matches!(style, CitationStyle::Numeric | CitationStyle::Auto) {
            for marker in numeric_markers(line) {
                numbers.extend(marker.numbers);
            }
        }
        if matches!(style, CitationStyle::Footnote | CitationStyle::Auto) {
            numbers.extend(footnote_markers(line).into_iter().map(|m| m.number));
        }
    }
    numbers
}

/// Picks the bracket form most used in a body. Ties go to numeric.
pub fn detect_style(body: &str) -> InlineStyle {
    let (mut numeric, mut footnote) = (0usize, 0usize);
    for line in prose_lines(body) {
        numeric += numeric_markers(line).len();
        footnote += footnote_markers(line).len();
    }
    if footnote > numeric {
        InlineStyle::Footnote
    } else {
        InlineStyle::Numeric
    }
}

/// Referenced numbers that have no definition.
pub fn find_undefined_references(
    body: &str,
    defined: &BTreeSet<u32>,
    style: CitationStyle,
) -> BTreeSet<u32> {
    find_referenced_numbers(body, style)
        .difference(defined)
        .copied()
        .collect()
}

/// Partitions a section's references into used and unused, flagging each
/// record, and reports undefined citations.
///
/// Unused references stay in the section; only their `unused` flag is set.
pub fn filter_unreferenced(section: &mut DocumentSection) -> UsageSets {
    let style = CitationStyle::from(section.inline_ref_style);
    let referenced = find_referenced_numbers(&section.body_content, style);

    let mut usage = UsageSets::default();
    for reference in section.references.iter_mut() {
        let used = referenced.contains(&reference.original_number);
        reference.unused = !used;
        if used {
            usage.used.insert(reference.original_number);
        } else {
            usage.unused.insert(reference.original_number);
        }
    }

    let defined = section.defined_numbers();
    usage.undefined = referenced.difference(&defined).copied().collect();
    usage
}

/// Numbers missing between 1 and the highest defined number.
pub fn find_numbering_gaps(references: &[ParsedReference]) -> Vec<u32> {
    let defined: BTreeSet<u32> = references.iter().map(|r| r.original_number).collect();
    let Some(&max) = defined.iter().next_back() else {
        return Vec::new();
    };
    (1..=max).filter(|n| !defined.contains(n)).collect()
}
