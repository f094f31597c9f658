//! Shared data model for parsed references and document sections.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// A single reference definition recovered from a reference list.
///
/// Records are created by the parser, annotated by the identifier extractor
/// and only have their processing flags touched afterwards. They are never
/// removed once created: unused references are flagged, not dropped.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParsedReference {
    /// Number used by the inline markers (`[3]`, `[^3]`)
    pub original_number: u32,
    /// The source text of the definition, verbatim (all consumed lines)
    pub original_text: String,
    /// Extracted title, possibly empty
    pub title: String,
    pub url: Option<String>,
    /// Publisher / site / journal name when one could be split off the title
    pub source_name: Option<String>,
    /// 1-based line number of the definition in the whole document
    pub line_number: usize,
    /// Number of document lines the definition spans (grouped footnotes may
    /// pull their URL from a following line)
    pub line_count: usize,
    pub section_index: usize,
    /// Free-text metadata such as `doi`, `year`, `authors`, `pmid`
    pub extracted_metadata: BTreeMap<String, String>,
    /// Bibliographic type, set by the identifier extractor
    pub reference_type: Option<ReferenceType>,

    pub processed: bool,
    pub new_label: Option<String>,
    pub needs_review: bool,
    pub review_reason: Option<String>,
    /// Defined but never cited in the section body
    pub unused: bool,
}

impl ParsedReference {
    /// Creates an unprocessed record with empty metadata.
    pub fn new(original_number: u32, original_text: impl Into<String>, title: impl Into<String>) -> Self {
        ParsedReference {
            original_number,
            original_text: original_text.into(),
            title: title.into(),
            url: None,
            source_name: None,
            line_number: 1,
            line_count: 1,
            section_index: 0,
            extracted_metadata: BTreeMap::new(),
            reference_type: None,
            processed: false,
            new_label: None,
            needs_review: false,
            review_reason: None,
            unused: false,
        }
    }

    /// Marks the record for manual review with the given reason.
    pub fn flag_for_review(&mut self, reason: impl Into<String>) {
        self.needs_review = true;
        self.review_reason = Some(reason.into());
    }
}

/// Bracket form used by inline citation markers in a body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InlineStyle {
    /// `[1]`, `[1,2]`, `[1-3]`
    Numeric,
    /// `[^1]`
    Footnote,
}

impl fmt::Display for InlineStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InlineStyle::Numeric => write!(f, "numeric"),
            InlineStyle::Footnote => write!(f, "footnote"),
        }
    }
}

/// Style selector for marker searches. `Auto` matches both bracket forms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CitationStyle {
    #[default]
    Auto,
    Numeric,
    Footnote,
}

impl From<InlineStyle> for CitationStyle {
    fn from(style: InlineStyle) -> Self {
        match style {
            InlineStyle::Numeric => CitationStyle::Numeric,
            InlineStyle::Footnote => CitationStyle::Footnote,
        }
    }
}

/// Bibliographic type detected from a reference URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceType {
    JournalArticle,
    Book,
    BookChapter,
    NewspaperArticle,
    Webpage,
    WebArticle,
    Blog,
    PdfDocument,
    Unknown,
}

impl ReferenceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReferenceType::JournalArticle => "journal_article",
            ReferenceType::Book => "book",
            ReferenceType::BookChapter => "book_chapter",
            ReferenceType::NewspaperArticle => "newspaper_article",
            ReferenceType::Webpage => "webpage",
            ReferenceType::WebArticle => "web_article",
            ReferenceType::Blog => "blog",
            ReferenceType::PdfDocument => "pdf_document",
            ReferenceType::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ReferenceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One reference list together with the body text that cites it.
///
/// Line ranges are 0-based and half-open. `ref_start` points at the header
/// line for header-delimited sections and at the first definition for
/// implicit ones.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentSection {
    pub section_index: usize,
    pub body_start: usize,
    pub body_end: usize,
    pub ref_start: usize,
    pub ref_end: usize,
    /// Body text; may contain [`BODY_SPLIT_MARKER`](crate::document::BODY_SPLIT_MARKER)
    /// on its own line when prose continues after the reference list
    pub body_content: String,
    pub inline_ref_style: InlineStyle,
    pub references: Vec<ParsedReference>,
}

impl DocumentSection {
    /// Numbers with a live definition in this section.
    pub fn defined_numbers(&self) -> BTreeSet<u32> {
        self.references.iter().map(|r| r.original_number).collect()
    }
}

/// Result of comparing inline markers against defined references.
///
/// `used` and `undefined` never intersect: a number is only undefined when
/// it has no definition, and only used when it has one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UsageSets {
    pub used: BTreeSet<u32>,
    pub unused: BTreeSet<u32>,
    pub undefined: BTreeSet<u32>,
}

impl UsageSets {
    pub fn has_undefined(&self) -> bool {
        !self.undefined.is_empty()
    }
}
