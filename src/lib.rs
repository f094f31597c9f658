//! refmark: normalize generated reference lists in Markdown documents.
//!
//! This library provides functionality to:
//! - Locate reference sections by header or implicit footnote blocks
//! - Parse reference entries written in several common layouts
//! - Extract PMID / PMCID / DOI identifiers and classify references
//! - Find used, unused and undefined inline citations
//! - Rewrite inline markers to final labels and reassemble the document

pub mod document;
pub mod identifiers;
pub mod labels;
pub mod lookup;
pub mod model;
pub mod parser;
pub mod rewrite;
pub mod scanner;
pub mod usage;

pub use document::{
    build_sections, check_document, process_document, render_reference_section, PipelineOptions,
    ProcessedDocument, ProcessedSection, ReviewItem, SectionMode, SectionReport, BODY_SPLIT_MARKER,
};
pub use identifiers::{annotate, categorize, classify, clean_doi, extract_doi, extract_pmcid, extract_pmid};
pub use labels::{load_labels, parse_labels, LabelsError};
pub use lookup::{
    plan_strategies, CascadeResolver, LabelEntry, LookupBackend, LookupOutcome, LookupStrategy,
    ReferenceResolver, Resolution, StaticLabels,
};
pub use model::{CitationStyle, DocumentSection, InlineStyle, ParsedReference, ReferenceType, UsageSets};
pub use parser::{parse, parse_section, split_title_source};
pub use rewrite::{replace_all, Replacement, RewriteOutcome};
pub use scanner::{last_section, scan, scan_lines, DEFAULT_LOOKAHEAD};
pub use usage::{
    detect_style, filter_unreferenced, find_numbering_gaps, find_referenced_numbers, find_undefined_references,
};
