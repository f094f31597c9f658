//! Section orchestration.
//!
//! Drives the pipeline over a whole document: scan for reference sections,
//! parse and annotate each list, hand the records to a
//! [`ReferenceResolver`], analyze inline usage, rewrite markers, render the
//! resolved reference list and stitch everything back together.
//!
//! Every section is processed with its own [`SectionContext`]. Nothing
//! accumulated for one section (labels, citations, review items) is visible
//! while another is processed.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::identifiers::categorize;
use crate::lookup::{ReferenceResolver, Resolution};
use crate::model::{CitationStyle, DocumentSection, InlineStyle, ParsedReference, UsageSets};
use crate::parser::{is_finalized_line, match_entry, parse_section, Grammar};
use crate::rewrite::{fit_label, replace_all, RewriteOutcome};
use crate::scanner::{last_section, scan_lines, DEFAULT_LOOKAHEAD};
use crate::usage::{detect_style, filter_unreferenced, find_numbering_gaps};

/// Placeholder line separating body text before a reference list from body
/// text that continues after it, inside [`DocumentSection::body_content`].
pub const BODY_SPLIT_MARKER: &str = "<!-- refmark:references -->";

/// Which reference sections to process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SectionMode {
    /// Only the last reference section; everything else is body text
    #[default]
    Single,
    /// Every reference section, each with the body text preceding it
    Multi,
}

/// Pipeline configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineOptions {
    pub mode: SectionMode,
    /// `Auto` detects the inline style per section
    pub style: CitationStyle,
    /// Lines searched after a candidate header for a reference entry
    pub lookahead: usize,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        PipelineOptions {
            mode: SectionMode::Single,
            style: CitationStyle::Auto,
            lookahead: DEFAULT_LOOKAHEAD,
        }
    }
}

impl PipelineOptions {
    pub fn multi() -> Self {
        PipelineOptions {
            mode: SectionMode::Multi,
            ..Default::default()
        }
    }
}

/// A reference that needs a human look.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReviewItem {
    pub section_index: usize,
    pub number: u32,
    /// 1-based line of the definition
    pub line_number: usize,
    pub reason: String,
}

/// State accumulated while processing one section.
///
/// A fresh context is created for every section and dropped afterwards.
#[derive(Debug, Default)]
pub struct SectionContext {
    pub section_index: usize,
    /// Number → final label, handed to the rewriter
    pub labels: HashMap<u32, String>,
    /// Number → citation text for the rendered reference list
    pub citations: HashMap<u32, String>,
    pub review: Vec<ReviewItem>,
}

impl SectionContext {
    pub fn new(section_index: usize) -> Self {
        SectionContext {
            section_index,
            ..Default::default()
        }
    }
}

/// Everything produced for one section.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessedSection {
    pub section: DocumentSection,
    pub usage: UsageSets,
    pub gaps: Vec<u32>,
    pub rewrite: RewriteOutcome,
    pub review: Vec<ReviewItem>,
    /// The rendered reference list, header included
    pub reference_text: String,
}

/// Result of [`process_document`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessedDocument {
    pub text: String,
    pub sections: Vec<ProcessedSection>,
}

impl ProcessedDocument {
    /// `(section_index, number)` for every citation without a definition.
    pub fn undefined_citations(&self) -> Vec<(usize, u32)> {
        self.sections
            .iter()
            .flat_map(|s| s.usage.undefined.iter().map(move |n| (s.section.section_index, *n)))
            .collect()
    }

    pub fn replacement_count(&self) -> usize {
        self.sections.iter().map(|s| s.rewrite.replacement_count).sum()
    }

    pub fn review_items(&self) -> impl Iterator<Item = &ReviewItem> {
        self.sections.iter().flat_map(|s| s.review.iter())
    }
}

/// Usage summary for one section, without any rewriting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SectionReport {
    pub section_index: usize,
    /// 1-based line where the reference list starts
    pub line_number: usize,
    pub inline_style: InlineStyle,
    pub defined: BTreeSet<u32>,
    #[serde(flatten)]
    pub usage: UsageSets,
    pub gaps: Vec<u32>,
}

/// Locates, parses and annotates the reference sections of a document.
///
/// `lines` is the whole document. Bodies are assigned in document order:
/// each section gets the text between the previous reference list and its
/// own. The last section also gets the text after its list, joined to the
/// rest with [`BODY_SPLIT_MARKER`]; its `body_end` is then the end of the
/// document and its body range spans the reference list.
pub fn build_sections(lines: &[&str], options: &PipelineOptions) -> Vec<DocumentSection> {
    let ranges = match options.mode {
        SectionMode::Single => last_section(lines, options.lookahead).into_iter().collect(),
        SectionMode::Multi => scan_lines(lines, options.lookahead),
    };

    let count = ranges.len();
    let mut sections = Vec::with_capacity(count);
    let mut previous_end = 0;

    for (section_index, (ref_start, ref_end)) in ranges.into_iter().enumerate() {
        let is_last = section_index + 1 == count;
        let body_start = previous_end;
        let body_end = if is_last { lines.len() } else { ref_start };
        let after: &[&str] = if is_last { &lines[ref_end..] } else { &[] };
        let body_content = join_body(&lines[body_start..ref_start], after);

        let inline_ref_style = match options.style {
            CitationStyle::Auto => detect_style(&body_content),
            CitationStyle::Numeric => InlineStyle::Numeric,
            CitationStyle::Footnote => InlineStyle::Footnote,
        };

        let mut references = parse_section(&lines[ref_start..ref_end], ref_start, section_index);
        categorize(&mut references);

        debug!(
            section = section_index,
            start = ref_start + 1,
            end = ref_end,
            references = references.len(),
            style = %inline_ref_style,
            "reference section located"
        );

        sections.push(DocumentSection {
            section_index,
            body_start,
            body_end,
            ref_start,
            ref_end,
            body_content,
            inline_ref_style,
            references,
        });
        previous_end = ref_end;
    }

    sections
}

/// Reports used / unused / undefined numbers and numbering gaps per section.
pub fn check_document(text: &str, options: &PipelineOptions) -> Vec<SectionReport> {
    let lines: Vec<&str> = text.lines().collect();
    build_sections(&lines, options)
        .into_iter()
        .map(|mut section| {
            let usage = filter_unreferenced(&mut section);
            SectionReport {
                section_index: section.section_index,
                line_number: section.ref_start + 1,
                inline_style: section.inline_ref_style,
                defined: section.defined_numbers(),
                gaps: find_numbering_gaps(&section.references),
                usage,
            }
        })
        .collect()
}

/// Runs the full pipeline over a document.
///
/// # Arguments
///
/// * `text` - The whole Markdown document
/// * `options` - Section mode, inline style override and header look-ahead
/// * `resolver` - Supplies a label (and optionally citation text) per reference
///
/// # Returns
///
/// The reassembled text together with a per-section account of usage,
/// numbering gaps, replacements and review items.
///
/// Sections without parsed references are left exactly as they were. A
/// document without reference sections is returned unchanged.
pub fn process_document<R>(text: &str, options: &PipelineOptions, resolver: &mut R) -> ProcessedDocument
where
    R: ReferenceResolver + ?Sized,
{
    let lines: Vec<&str> = text.lines().collect();
    let sections: Vec<ProcessedSection> = build_sections(&lines, options)
        .into_iter()
        .map(|section| process_section(section, &lines, &mut *resolver))
        .collect();

    if sections.is_empty() {
        debug!("no reference section found");
        return ProcessedDocument {
            text: text.to_string(),
            sections,
        };
    }

    let mut output = reassemble(&sections);
    if text.ends_with('\n') {
        output.push('\n');
    }
    ProcessedDocument { text: output, sections }
}

/// Resolves, analyzes and rewrites one section with a fresh context.
pub fn process_section<R>(mut section: DocumentSection, lines: &[&str], resolver: &mut R) -> ProcessedSection
where
    R: ReferenceResolver + ?Sized,
{
    let mut context = SectionContext::new(section.section_index);

    if section.references.is_empty() {
        let reference_text = lines[section.ref_start..section.ref_end].join("\n");
        let rewrite = RewriteOutcome {
            body: section.body_content.clone(),
            ..Default::default()
        };
        return ProcessedSection {
            section,
            usage: UsageSets::default(),
            gaps: Vec::new(),
            rewrite,
            review: Vec::new(),
            reference_text,
        };
    }

    let resolutions = resolver.resolve(section.section_index, &section.references);
    apply_resolutions(&mut section.references, &resolutions, &mut context);

    let usage = filter_unreferenced(&mut section);
    for number in &usage.undefined {
        warn!(
            section = section.section_index,
            number, "citation has no matching reference definition"
        );
    }
    let gaps = find_numbering_gaps(&section.references);
    if !gaps.is_empty() {
        debug!(section = section.section_index, ?gaps, "reference numbering has gaps");
    }

    let rewrite = replace_all(&section.body_content, &context.labels, section.inline_ref_style);
    let reference_text = render_reference_section(&section, lines, &context.citations).join("\n");

    info!(
        section = section.section_index,
        references = section.references.len(),
        resolved = context.labels.len(),
        replacements = rewrite.replacement_count,
        "processed reference section"
    );

    ProcessedSection {
        section,
        usage,
        gaps,
        rewrite,
        review: context.review,
        reference_text,
    }
}

fn apply_resolutions(
    references: &mut [ParsedReference],
    resolutions: &BTreeMap<u32, Resolution>,
    context: &mut SectionContext,
) {
    for reference in references.iter_mut() {
        let number = reference.original_number;
        match resolutions.get(&number) {
            Some(Resolution::Resolved { label, citation }) => {
                reference.processed = true;
                reference.new_label = Some(label.clone());
                context.labels.insert(number, label.clone());
                if let Some(citation) = citation {
                    context.citations.insert(number, citation.clone());
                }
            }
            Some(Resolution::Unresolved { reason }) => {
                warn!(section = context.section_index, number, reason = %reason, "reference left unresolved");
                reference.flag_for_review(reason.clone());
            }
            None => {
                warn!(section = context.section_index, number, "resolver returned nothing for reference");
                reference.flag_for_review("no resolution returned");
            }
        }

        if reference.needs_review {
            context.review.push(ReviewItem {
                section_index: context.section_index,
                number,
                line_number: reference.line_number,
                reason: reference.review_reason.clone().unwrap_or_default(),
            });
        }
    }
}

/// Renders the reference list of a processed section.
///
/// `lines` is the whole document; `citations` holds the citation text
/// produced by the resolver. Resolved records become
/// `<label>: <citation>`, falling back to title, source and URL when no
/// citation text was supplied. Definitions where every record is
/// unresolved keep their original lines, as do headers, blank lines and
/// anything that did not parse. A footnote definition or numbered entry
/// superseded by a later, resolved one of the same number is dropped;
/// superseded grouped-marker lines are kept verbatim.
pub fn render_reference_section(
    section: &DocumentSection,
    lines: &[&str],
    citations: &HashMap<u32, String>,
) -> Vec<String> {
    let block = &lines[section.ref_start..section.ref_end];

    let mut by_line: BTreeMap<usize, Vec<&ParsedReference>> = BTreeMap::new();
    for reference in &section.references {
        let offset = reference.line_number.saturating_sub(section.ref_start + 1);
        by_line.entry(offset).or_default().push(reference);
    }
    let resolved: BTreeSet<u32> = section
        .references
        .iter()
        .filter(|r| r.new_label.is_some())
        .map(|r| r.original_number)
        .collect();

    let mut rendered = Vec::with_capacity(block.len());
    let mut i = 0;
    while i < block.len() {
        if let Some(group) = by_line.get(&i) {
            let consumed = group.iter().map(|r| r.line_count).max().unwrap_or(1).max(1);
            let end = (i + consumed).min(block.len());
            if group.iter().all(|r| r.new_label.is_none()) {
                rendered.extend(block[i..end].iter().map(|l| l.to_string()));
            } else {
                rendered.extend(group.iter().map(|r| render_entry(r, citations)));
            }
            i = end;
            continue;
        }

        if !is_finalized_line(block[i]) {
            if let Some(entry) = match_entry(block, i) {
                // Grouped markers may be body prose that opened an implicit section
                if entry.grammar != Grammar::GroupedFootnotes && entry.numbers.iter().all(|n| resolved.contains(n)) {
                    debug!(line = section.ref_start + i + 1, "dropped superseded reference definition");
                    i += entry.consumed.max(1);
                    continue;
                }
            }
        }

        rendered.push(block[i].to_string());
        i += 1;
    }

    rendered
}

fn render_entry(reference: &ParsedReference, citations: &HashMap<u32, String>) -> String {
    let number = reference.original_number;
    let label = match &reference.new_label {
        Some(label) => fit_label(label, false),
        None => format!("[^{number}]"),
    };
    let text = citations
        .get(&number)
        .cloned()
        .unwrap_or_else(|| fallback_citation(reference));
    format!("{label}: {text}")
}

/// Citation text built from what the parser recovered.
fn fallback_citation(reference: &ParsedReference) -> String {
    let mut parts: Vec<&str> = Vec::new();
    let title = reference.title.trim().trim_end_matches('.');
    if !title.is_empty() {
        parts.push(title);
    }
    if let Some(source) = reference.source_name.as_deref() {
        let source = source.trim().trim_end_matches('.');
        if !source.is_empty() {
            parts.push(source);
        }
    }

    let mut text = parts.join(". ");
    if !text.is_empty() {
        text.push('.');
    }
    if let Some(url) = &reference.url {
        if !text.is_empty() {
            text.push(' ');
        }
        text.push_str(url);
    }
    if text.is_empty() {
        text = reference.original_text.split_whitespace().collect::<Vec<_>>().join(" ");
    }
    text
}

fn join_body(before: &[&str], after: &[&str]) -> String {
    if after.is_empty() {
        return before.join("\n");
    }
    let mut parts: Vec<&str> = before.to_vec();
    parts.push(BODY_SPLIT_MARKER);
    parts.extend_from_slice(after);
    parts.join("\n")
}

/// Splits a (possibly rewritten) body back into the text before the
/// reference list and the text after it.
///
/// `before_len` is the number of body lines preceding the list; the split
/// marker is expected right after them.
pub fn split_body(body: &str, before_len: usize) -> (String, Option<String>) {
    let lines: Vec<&str> = body.split('\n').collect();
    match lines.get(before_len) {
        Some(line) if *line == BODY_SPLIT_MARKER => (
            lines[..before_len].join("\n"),
            Some(lines[before_len + 1..].join("\n")),
        ),
        _ => (body.to_string(), None),
    }
}

fn reassemble(sections: &[ProcessedSection]) -> String {
    let mut blocks: Vec<String> = Vec::new();

    for processed in sections {
        let section = &processed.section;
        let before_len = section.ref_start - section.body_start;
        let (before, after) = split_body(&processed.rewrite.body, before_len);

        if before_len > 0 {
            blocks.push(before);
        }
        blocks.push(processed.reference_text.clone());
        if section.body_end > section.ref_end {
            if let Some(after) = after {
                blocks.push(after);
            }
        }
    }

    blocks.join("\n")
}
