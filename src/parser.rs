//! Reference entry parser.
//!
//! Turns the lines of a reference section into [`ParsedReference`] records.
//! Each line (or line group) is tried against an ordered list of grammars
//! and the first match wins:
//!
//! 1. cited URL list: `N. Title, accessed <date>, <URL>`
//! 2. bare bracketed link: `N. [Title](URL)`
//! 3. bracketed link with metadata: `N. [Title](URL). Authors. Journal. 2020.`
//! 4. footnote definition: `[^N]: free text`
//! 5. grouped footnote markers: `[^N1] [^N2] Title | Source` (URL may follow on the next line)
//! 6. plain numbered text: `N. free text`
//!
//! Lines whose marker already has a finalized citation-key shape
//! (`[^Smith-2020-ab]:`) are passed through untouched, which keeps repeated
//! runs from re-parsing their own output. Lines matching nothing are skipped.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use crate::identifiers::clean_doi;
use crate::model::ParsedReference;

static CITED_URL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*(\d+)\.\s+(.+?)\s*,?\s+accessed\s+(.+?),?\s+<?(https?://[^\s>]+)>?\s*$").unwrap()
});

// Link targets may hold one level of balanced parentheses, as in
// `https://en.wikipedia.org/wiki/Heart_(organ)`.
static BARE_LINK_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(\d+)\.\s+\[([^\]]+)\]\(<?((?:[^()\s<>]|\([^()\s<>]*\))+)>?\)\s*\.?\s*$").unwrap()
});

static LINK_WITH_METADATA_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(\d+)\.\s+\[([^\]]+)\]\(<?((?:[^()\s<>]|\([^()\s<>]*\))+)>?\)\s*[.,;:]?\s+(\S.*)$").unwrap()
});

static FOOTNOTE_DEF_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*\[\^(\d+)\]:\s*(.*)$").unwrap());

static GROUPED_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*((?:\[\^\d+\]\s*)+)([^\s:].*)$").unwrap());

static GROUPED_MARKER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[\^(\d+)\]").unwrap());

static PLAIN_NUMBERED_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*(\d+)[.)]\s+(\S.*)$").unwrap());

static FINALIZED_LINE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*\\?\[\^([^\]\s]+)\]").unwrap());

static FINALIZED_KEY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z][^\]\s]*?-(?:1[5-9]|20)\d{2}[a-z]?(?:-[^\]\s]+)?$").unwrap()
});

static MARKDOWN_LINK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[([^\]]*)\]\(<?(https?://(?:[^()\s<>]|\([^()\s<>]*\))+)>?\)").unwrap());

static RAW_URL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<?(https?://[^\s<>]+)>?").unwrap());

static ANGLE_URL_LINE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*<?(https?://[^\s<>]+)>?\s*$").unwrap());

static DOI_TOKEN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bdoi:\s*(10\.\d{4,9}/[^\s<>]+)").unwrap());

static DOI_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(10\.\d{4,9}/[^\s,;<>\]]+)").unwrap());

static YEAR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(1[5-9]\d{2}|20\d{2})\b").unwrap());

static YEAR_ONLY_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{4}$").unwrap());

static ET_AL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bet\s+al\.").unwrap());

static PERIOD_BOUNDARY_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\.(?:\s+|$)").unwrap());

/// Stand-in for the period of "et al." while splitting on periods.
const ET_AL_PLACEHOLDER: &str = "et al\u{1}";

/// The reference-line grammars, in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Grammar {
    CitedUrl,
    BareLink,
    LinkWithMetadata,
    FootnoteDefinition,
    GroupedFootnotes,
    PlainNumbered,
}

/// What a grammar recovered from one line or line group.
#[derive(Debug, Clone, PartialEq)]
pub struct EntryMatch {
    pub grammar: Grammar,
    /// One number for every grammar except grouped footnotes
    pub numbers: Vec<u32>,
    pub title: String,
    pub url: Option<String>,
    pub source: Option<String>,
    pub metadata: BTreeMap<String, String>,
    /// Set when the entry parsed but should be checked by a human
    pub review_reason: Option<String>,
    /// Number of lines consumed, starting at the matched line
    pub consumed: usize,
}

impl EntryMatch {
    fn new(grammar: Grammar, number: u32, title: impl Into<String>) -> Self {
        EntryMatch {
            grammar,
            numbers: vec![number],
            title: title.into(),
            url: None,
            source: None,
            metadata: BTreeMap::new(),
            review_reason: None,
            consumed: 1,
        }
    }
}

/// Parses the lines of a reference section.
///
/// Line numbers in the result are 1-based relative to `lines`.
pub fn parse(lines: &[&str]) -> Vec<ParsedReference> {
    parse_section(lines, 0, 0)
}

/// Parses reference lines that start at document line index `first_line`
/// (0-based) and belong to section `section_index`.
///
/// When a number is defined twice, the later definition supersedes the
/// earlier one.
pub fn parse_section(lines: &[&str], first_line: usize, section_index: usize) -> Vec<ParsedReference> {
    let mut references: Vec<ParsedReference> = Vec::new();
    let mut i = 0;

    while i < lines.len() {
        let line = lines[i];
        if line.trim().is_empty() {
            i += 1;
            continue;
        }

        if is_finalized_line(line) {
            debug!(line = first_line + i + 1, "finalized reference passed through");
            i += 1;
            continue;
        }

        let Some(entry) = match_entry(lines, i) else {
            debug!(line = first_line + i + 1, text = line.trim(), "skipped unparsable reference line");
            i += 1;
            continue;
        };

        let consumed = entry.consumed.max(1);
        let original_text = lines[i..(i + consumed).min(lines.len())].join("\n");

        for &number in &entry.numbers {
            let mut record = ParsedReference::new(number, original_text.clone(), entry.title.clone());
            record.url = entry.url.clone();
            record.source_name = entry.source.clone();
            record.line_number = first_line + i + 1;
            record.line_count = consumed;
            record.section_index = section_index;
            record.extracted_metadata = entry.metadata.clone();
            if let Some(reason) = &entry.review_reason {
                record.flag_for_review(reason.clone());
            }
            insert_superseding(&mut references, record);
        }

        i += consumed;
    }

    references
}

fn insert_superseding(references: &mut Vec<ParsedReference>, record: ParsedReference) {
    if let Some(pos) = references
        .iter()
        .position(|r| r.original_number == record.original_number)
    {
        debug!(
            number = record.original_number,
            earlier = references[pos].line_number,
            later = record.line_number,
            "reference redefined, later definition wins"
        );
        references.remove(pos);
    }
    references.push(record);
}

/// Tries every grammar in priority order at line `index`.
pub fn match_entry(lines: &[&str], index: usize) -> Option<EntryMatch> {
    let line = lines.get(index)?;
    parse_cited_url(line)
        .or_else(|| parse_bare_link(line))
        .or_else(|| parse_link_with_metadata(line))
        .or_else(|| parse_footnote_definition(line))
        .or_else(|| parse_grouped_footnotes(lines, index))
        .or_else(|| parse_plain_numbered(line))
}

/// True when the token is an already assigned citation key such as
/// `[^Smith-2020-ab]`.
pub fn is_finalized_key(token: &str) -> bool {
    let token = token.trim().trim_start_matches('\\');
    token
        .strip_prefix("[^")
        .and_then(|rest| rest.strip_suffix(']'))
        .is_some_and(|key| FINALIZED_KEY_RE.is_match(key))
}

/// True when a line defines an already finalized reference.
pub fn is_finalized_line(line: &str) -> bool {
    FINALIZED_LINE_RE
        .captures(line)
        .is_some_and(|cap| FINALIZED_KEY_RE.is_match(&cap[1]))
}

fn parse_number(text: &str) -> Option<u32> {
    text.parse::<u32>().ok().filter(|n| *n > 0)
}

/// Grammar 1: `N. Title, accessed <date>, <URL>`.
pub fn parse_cited_url(line: &str) -> Option<EntryMatch> {
    let cap = CITED_URL_RE.captures(line)?;
    let number = parse_number(&cap[1])?;
    let title = cap[2].trim().trim_end_matches(',').trim();

    let mut entry = EntryMatch::new(Grammar::CitedUrl, number, title);
    entry.url = Some(clean_url(&cap[4]));
    entry
        .metadata
        .insert("accessed".to_string(), cap[3].trim().to_string());
    Some(entry)
}

/// Grammar 2: `N. [Title](URL)` with nothing after the link.
pub fn parse_bare_link(line: &str) -> Option<EntryMatch> {
    let cap = BARE_LINK_RE.captures(line)?;
    let number = parse_number(&cap[1])?;
    let (title, source) = split_title_source(&cap[2]);

    let mut entry = EntryMatch::new(Grammar::BareLink, number, title);
    entry.url = Some(cap[3].to_string());
    entry.source = source;
    Some(entry)
}

/// Grammar 3: `N. [Title](URL). <free text>`, mining the free text for
/// a DOI, a year, and an author / journal guess.
pub fn parse_link_with_metadata(line: &str) -> Option<EntryMatch> {
    let cap = LINK_WITH_METADATA_RE.captures(line)?;
    let number = parse_number(&cap[1])?;
    let free_text = &cap[4];

    let mut entry = EntryMatch::new(Grammar::LinkWithMetadata, number, cap[2].trim());
    entry.url = Some(cap[3].to_string());
    entry.metadata = mine_metadata(free_text);

    let without_doi = DOI_TOKEN_RE.replace_all(free_text, "");
    let without_doi = DOI_RE.replace_all(&without_doi, "");
    let segments: Vec<String> = split_period_segments(&without_doi)
        .into_iter()
        .filter(|s| !YEAR_ONLY_RE.is_match(s) && !s.eq_ignore_ascii_case("doi:"))
        .collect();
    if let Some(authors) = segments.first() {
        entry.metadata.insert("authors".to_string(), authors.clone());
    }
    if let Some(journal) = segments.get(1) {
        entry.metadata.insert("journal".to_string(), journal.clone());
        entry.source = Some(journal.clone());
    }
    Some(entry)
}

/// Grammar 4: `[^N]: <free text>`.
pub fn parse_footnote_definition(line: &str) -> Option<EntryMatch> {
    let cap = FOOTNOTE_DEF_RE.captures(line)?;
    let number = parse_number(&cap[1])?;
    let text = cap[2].trim();

    let mut entry = EntryMatch::new(Grammar::FootnoteDefinition, number, "");
    entry.url = find_url(text);
    entry.metadata = mine_metadata(text);

    let cleaned = strip_links_and_urls(text);
    let segments = split_period_segments(&cleaned);
    let title = match segments.as_slice() {
        [first, second, ..] if first.matches(',').count() >= 2 => second.clone(),
        [first, ..] => first.clone(),
        [] => String::new(),
    };
    entry.title = trim_title(&title);
    Some(entry)
}

/// Grammar 5: `[^N1] [^N2] ... Title`, optionally followed by the URL in
/// angle brackets on the next non-empty line. Produces one number per marker.
pub fn parse_grouped_footnotes(lines: &[&str], index: usize) -> Option<EntryMatch> {
    let line = lines.get(index)?;
    let cap = GROUPED_RE.captures(line)?;
    let numbers: Vec<u32> = GROUPED_MARKER_RE
        .captures_iter(&cap[1])
        .filter_map(|m| parse_number(&m[1]))
        .collect();
    if numbers.is_empty() {
        return None;
    }

    let rest = cap[2].trim();
    let mut url = find_url(rest);
    let label_text = match MARKDOWN_LINK_RE.captures(rest) {
        Some(link) => link[1].to_string(),
        None => RAW_URL_RE.replace_all(rest, "").trim().to_string(),
    };
    let (title, source) = split_title_source(&label_text);

    let mut consumed = 1;
    if url.is_none() {
        if let Some(next) = (index + 1..lines.len()).find(|&j| !lines[j].trim().is_empty()) {
            if let Some(url_cap) = ANGLE_URL_LINE_RE.captures(lines[next]) {
                url = Some(clean_url(&url_cap[1]));
                consumed = next - index + 1;
            }
        }
    }

    Some(EntryMatch {
        grammar: Grammar::GroupedFootnotes,
        numbers,
        title,
        url,
        source,
        metadata: BTreeMap::new(),
        review_reason: None,
        consumed,
    })
}

/// Grammar 6: `N. <text>`; the fallback for numbered lines.
pub fn parse_plain_numbered(line: &str) -> Option<EntryMatch> {
    let cap = PLAIN_NUMBERED_RE.captures(line)?;
    let number = parse_number(&cap[1])?;
    let text = cap[2].trim();

    let cleaned = strip_links_and_urls(text);
    let first_sentence = PERIOD_BOUNDARY_RE
        .split(&cleaned)
        .next()
        .unwrap_or_default()
        .to_string();
    let (title, source) = split_title_source(&first_sentence);

    let mut entry = EntryMatch::new(Grammar::PlainNumbered, number, trim_title(&title));
    entry.source = source;
    entry.url = find_url(text);
    entry.metadata = mine_metadata(text);
    if entry.url.is_none() {
        entry.review_reason = Some("no URL found in reference text".to_string());
    }
    Some(entry)
}

/// Splits `Title | Source` or `Title - Source` into its parts.
///
/// A pipe (plain or escaped) is preferred. Otherwise the right-most dash,
/// en dash or em dash separates the source, unless the right-hand side is a
/// bare four-digit year, in which case the whole text is the title.
pub fn split_title_source(text: &str) -> (String, Option<String>) {
    let text = text.trim();

    for separator in [" \\| ", " | "] {
        if let Some(pos) = text.rfind(separator) {
            let title = text[..pos].trim();
            let source = text[pos + separator.len()..].trim();
            if !title.is_empty() && !source.is_empty() {
                return (title.to_string(), Some(source.to_string()));
            }
        }
    }

    let dash = [" - ", " – ", " — ", "—"]
        .iter()
        .filter_map(|sep| text.rfind(sep).map(|pos| (pos, sep.len())))
        .max_by_key(|(pos, _)| *pos);
    if let Some((pos, len)) = dash {
        let title = text[..pos].trim();
        let source = text[pos + len..].trim();
        if YEAR_ONLY_RE.is_match(source) {
            return (text.to_string(), None);
        }
        if !title.is_empty() && !source.is_empty() {
            return (title.to_string(), Some(source.to_string()));
        }
    }

    (text.to_string(), None)
}

/// Splits free text on sentence periods, not treating "et al." as a boundary.
pub fn split_period_segments(text: &str) -> Vec<String> {
    let protected = ET_AL_RE.replace_all(text, ET_AL_PLACEHOLDER);
    PERIOD_BOUNDARY_RE
        .split(&protected)
        .map(|s| s.replace('\u{1}', ".").trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Pulls a DOI and a publication year out of free text.
pub fn mine_metadata(text: &str) -> BTreeMap<String, String> {
    let mut metadata = BTreeMap::new();

    let doi = DOI_TOKEN_RE
        .captures(text)
        .or_else(|| DOI_RE.captures(text))
        .map(|cap| clean_doi(&cap[1]));
    if let Some(doi) = doi.filter(|d| !d.is_empty()) {
        metadata.insert("doi".to_string(), doi);
    }

    let without_ids = RAW_URL_RE.replace_all(text, "");
    let without_ids = DOI_RE.replace_all(&without_ids, "");
    if let Some(cap) = YEAR_RE.captures(&without_ids) {
        metadata.insert("year".to_string(), cap[1].to_string());
    }

    metadata
}

/// Finds a URL in free text: a markdown link first, then a raw URL, then a
/// `doi:` token rewritten as a canonical DOI URL.
fn find_url(text: &str) -> Option<String> {
    if let Some(cap) = MARKDOWN_LINK_RE.captures(text) {
        return Some(cap[2].to_string());
    }
    if let Some(cap) = RAW_URL_RE.captures(text) {
        let url = clean_url(&cap[1]);
        if !url.is_empty() {
            return Some(url);
        }
    }
    DOI_TOKEN_RE
        .captures(text)
        .map(|cap| format!("https://doi.org/{}", clean_doi(&cap[1])))
}

/// Replaces markdown links with their text and drops raw URLs and `doi:` tokens.
fn strip_links_and_urls(text: &str) -> String {
    let text = MARKDOWN_LINK_RE.replace_all(text, "$1");
    let text = RAW_URL_RE.replace_all(&text, "");
    let text = DOI_TOKEN_RE.replace_all(&text, "");
    text.trim().to_string()
}

/// Drops trailing punctuation and unbalanced closing parentheses from a URL.
fn clean_url(url: &str) -> String {
    let mut url = url.trim().trim_end_matches(['.', ',', ';', ':', '>']);
    while url.ends_with(')') && url.matches(')').count() > url.matches('(').count() {
        url = &url[..url.len() - 1];
    }
    url.to_string()
}

fn trim_title(title: &str) -> String {
    title
        .trim()
        .trim_matches(|c: char| matches!(c, '"' | '“' | '”' | '*' | '_'))
        .trim()
        .trim_end_matches([',', ';', ':'])
        .trim()
        .to_string()
}
