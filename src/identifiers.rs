//! Reference type detection and identifier extraction.
//!
//! Classifies a reference by its URL and pulls PubMed, PubMed Central and
//! DOI identifiers out of it.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::model::{ParsedReference, ReferenceType};

static PMID_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile(&[
        r"(?i)pubmed\.ncbi\.nlm\.nih\.gov/(\d+)",
        r"(?i)ncbi\.nlm\.nih\.gov/pubmed/(\d+)",
        r"(?i)europepmc\.org/(?:abstract|article)/MED/(\d+)",
        r"(?i)[?&]pmid=(\d+)",
    ])
});

static PMCID_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile(&[
        r"(?i)ncbi\.nlm\.nih\.gov/pmc/articles/(PMC\d+)",
        r"(?i)pmc\.ncbi\.nlm\.nih\.gov/articles/(PMC\d+)",
        r"(?i)europepmc\.org/(?:article/PMC|articles)/(PMC\d+)",
        r"(?i)[?&]pmcid=(PMC\d+)",
    ])
});

static DOI_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile(&[
        r"(?i)doi\.org/(10\.\d{4,9}/[^\s?#]+)",
        r"(?i)/doi/(?:abs/|full/|pdf/|epdf/|fulltext/)?(10\.\d{4,9}/[^\s?#]+)",
        r"(10\.\d{4,9}/[^\s?#&]+)",
    ])
});

static HOST_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z][a-z0-9+.-]*://(?:[^@/]*@)?([^/:?#]+)").unwrap());

static DATED_PATH_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"/(?:19|20)\d{2}/\d{1,2}/").unwrap());

/// Path segments publishers append after a DOI that a greedy match picks up.
const DOI_TRAILING_SEGMENTS: &[&str] = &[
    "/full", "/abstract", "/pdf", "/epdf", "/pdfft", "/fulltext", "/full-text", "/html", "/meta",
    "/references", "/summary", "/epub", "/figures", "/supplemental", "/citedby",
];

const JOURNAL_DOMAINS: &[&str] = &[
    "nature.com", "sciencedirect.com", "springer.com", "wiley.com", "thelancet.com", "nejm.org",
    "jamanetwork.com", "bmj.com", "frontiersin.org", "plos.org", "mdpi.com", "tandfonline.com",
    "academic.oup.com", "cell.com", "science.org", "pnas.org", "arxiv.org", "biorxiv.org",
    "medrxiv.org", "ahajournals.org", "sagepub.com", "karger.com", "thieme-connect.com",
    "jstor.org", "acm.org", "ieee.org", "cochranelibrary.com", "journals.lww.com",
];

const BOOK_DOMAINS: &[&str] = &["books.google.com", "openlibrary.org", "worldcat.org"];

const NEWSPAPER_DOMAINS: &[&str] = &[
    "nytimes.com", "washingtonpost.com", "theguardian.com", "bbc.co.uk", "bbc.com", "reuters.com",
    "apnews.com", "wsj.com", "ft.com", "cnn.com", "npr.org", "bloomberg.com", "latimes.com",
    "usatoday.com", "economist.com", "theatlantic.com", "independent.co.uk", "telegraph.co.uk",
];

const BLOG_DOMAINS: &[&str] = &[
    "medium.com", "substack.com", "wordpress.com", "blogspot.com", "tumblr.com", "ghost.io",
];

fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns.iter().map(|p| Regex::new(p).unwrap()).collect()
}

fn first_capture(patterns: &[Regex], text: &str) -> Option<String> {
    patterns
        .iter()
        .find_map(|re| re.captures(text))
        .map(|cap| cap[1].to_string())
}

/// Extracts a PubMed identifier from a URL.
pub fn extract_pmid(url: &str) -> Option<String> {
    first_capture(&PMID_PATTERNS, url)
}

/// Extracts a PubMed Central identifier (`PMC1234567`) from a URL.
pub fn extract_pmcid(url: &str) -> Option<String> {
    first_capture(&PMCID_PATTERNS, url).map(|id| id.to_ascii_uppercase())
}

/// Extracts a DOI from a URL, dropping publisher path suffixes.
///
/// ```
/// use refmark::identifiers::extract_doi;
///
/// let url = "https://www.frontiersin.org/articles/10.3389/fcvm.2018.00062/full";
/// assert_eq!(extract_doi(url).as_deref(), Some("10.3389/fcvm.2018.00062"));
/// ```
pub fn extract_doi(url: &str) -> Option<String> {
    first_capture(&DOI_PATTERNS, url)
        .map(|doi| clean_doi(&doi))
        .filter(|doi| !doi.is_empty())
}

/// Normalizes a raw DOI match: decodes `%2F`, drops trailing punctuation,
/// unbalanced closing brackets, and known publisher path segments.
pub fn clean_doi(raw: &str) -> String {
    let mut doi = raw.trim().replace("%2F", "/").replace("%2f", "/");

    loop {
        let before = doi.len();

        let trimmed = doi.trim_end_matches(['.', ',', ';', ':', '>', '"', '\'']).len();
        doi.truncate(trimmed);

        for close in [')', ']'] {
            let open = if close == ')' { '(' } else { '[' };
            if doi.ends_with(close) && doi.matches(close).count() > doi.matches(open).count() {
                doi.pop();
            }
        }

        let lower = doi.to_ascii_lowercase();
        if let Some(segment) = DOI_TRAILING_SEGMENTS.iter().find(|s| lower.ends_with(*s)) {
            doi.truncate(doi.len() - segment.len());
        } else if lower.ends_with(".pdf") {
            doi.truncate(doi.len() - 4);
        }

        if doi.len() == before {
            return doi;
        }
    }
}

/// Returns the lowercase host of a URL without a leading `www.`.
fn host_of(lower_url: &str) -> Option<&str> {
    HOST_RE
        .captures(lower_url)
        .and_then(|cap| cap.get(1))
        .map(|m| m.as_str().trim_start_matches("www."))
}

fn host_matches(host: &str, domains: &[&str]) -> bool {
    domains.iter().any(|domain| {
        host == *domain
            || host
                .strip_suffix(domain)
                .is_some_and(|prefix| prefix.ends_with('.'))
    })
}

/// Classifies a reference URL.
///
/// Checks run in order: PubMed / PMC links, an embedded DOI, a `.pdf`
/// path, known journal domains, book sites, newspaper domains, blog shapes,
/// article-like paths, and finally a plain webpage.
pub fn classify(url: &str) -> ReferenceType {
    let url = url.trim();
    if url.is_empty() {
        return ReferenceType::Unknown;
    }

    if extract_pmid(url).is_some() || extract_pmcid(url).is_some() {
        return ReferenceType::JournalArticle;
    }

    let lower = url.to_ascii_lowercase();

    if let Some(doi) = extract_doi(url) {
        // ISBN-prefixed DOIs belong to books; a `_N` suffix is a chapter
        if doi.contains("/978-") || doi.contains("/979-") {
            if doi.contains('_') || lower.contains("chapter") {
                return ReferenceType::BookChapter;
            }
            return ReferenceType::Book;
        }
        return ReferenceType::JournalArticle;
    }

    let Some(host) = host_of(&lower) else {
        return ReferenceType::Unknown;
    };
    let path = lower
        .split(['?', '#'])
        .next()
        .unwrap_or_default();

    if path.ends_with(".pdf") {
        return ReferenceType::PdfDocument;
    }
    if host_matches(host, JOURNAL_DOMAINS) {
        return ReferenceType::JournalArticle;
    }
    if host_matches(host, BOOK_DOMAINS) || host.starts_with("books.google.") {
        return ReferenceType::Book;
    }
    if host_matches(host, NEWSPAPER_DOMAINS) {
        return ReferenceType::NewspaperArticle;
    }
    if host.starts_with("blog.")
        || host_matches(host, BLOG_DOMAINS)
        || path.contains("/blog/")
        || path.contains("/blogs/")
    {
        return ReferenceType::Blog;
    }
    if ["/news/", "/article/", "/articles/", "/story/", "/stories/"]
        .iter()
        .any(|segment| path.contains(segment))
        || DATED_PATH_RE.is_match(path)
    {
        return ReferenceType::WebArticle;
    }

    ReferenceType::Webpage
}

/// Sets the type and URL identifiers of one reference.
pub fn annotate(reference: &mut ParsedReference) {
    let Some(url) = reference.url.clone() else {
        reference.reference_type = Some(ReferenceType::Unknown);
        return;
    };

    reference.reference_type = Some(classify(&url));

    let identifiers = [
        ("pmid", extract_pmid(&url)),
        ("pmcid", extract_pmcid(&url)),
        ("doi", extract_doi(&url)),
    ];
    for (key, value) in identifiers {
        if let Some(value) = value {
            reference.extracted_metadata.insert(key.to_string(), value);
        }
    }
}

/// Annotates every reference and groups their numbers by detected type.
pub fn categorize(references: &mut [ParsedReference]) -> BTreeMap<ReferenceType, Vec<u32>> {
    let mut groups: BTreeMap<ReferenceType, Vec<u32>> = BTreeMap::new();
    for reference in references.iter_mut() {
        annotate(reference);
        let kind = reference.reference_type.unwrap_or(ReferenceType::Unknown);
        groups.entry(kind).or_default().push(reference.original_number);
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;

    // ===========================================
    // Tests for identifier extraction
    // ===========================================

    #[test]
    fn test_extract_pmid() {
        assert_eq!(
            extract_pmid("https://pubmed.ncbi.nlm.nih.gov/33024307/").as_deref(),
            Some("33024307")
        );
        assert_eq!(
            extract_pmid("https://www.ncbi.nlm.nih.gov/pubmed/12345").as_deref(),
            Some("12345")
        );
        assert_eq!(extract_pmid("https://example.com/12345"), None);
    }

    #[test]
    fn test_extract_pmcid() {
        assert_eq!(
            extract_pmcid("https://www.ncbi.nlm.nih.gov/pmc/articles/PMC7537588/").as_deref(),
            Some("PMC7537588")
        );
        assert_eq!(
            extract_pmcid("https://pmc.ncbi.nlm.nih.gov/articles/pmc123/").as_deref(),
            Some("PMC123")
        );
    }

    #[test]
    fn test_extract_doi_from_doi_org() {
        assert_eq!(
            extract_doi("https://doi.org/10.1038/s41579-020-00459-7").as_deref(),
            Some("10.1038/s41579-020-00459-7")
        );
    }

    #[test]
    fn test_extract_doi_strips_full_suffix() {
        // Given: a publisher URL where the DOI is followed by a view segment
        let url = "https://www.frontiersin.org/articles/10.3389/fcvm.2018.00062/full";

        // Then: the segment is not part of the DOI
        assert_eq!(extract_doi(url).as_deref(), Some("10.3389/fcvm.2018.00062"));
    }

    #[test]
    fn test_extract_doi_publisher_paths() {
        assert_eq!(
            extract_doi("https://onlinelibrary.wiley.com/doi/abs/10.1002/ejhf.1234/abstract").as_deref(),
            Some("10.1002/ejhf.1234")
        );
        assert_eq!(
            extract_doi("https://journals.plos.org/x?id=10.1371/journal.pone.0001&type=printable").as_deref(),
            Some("10.1371/journal.pone.0001")
        );
        assert_eq!(
            extract_doi("https://example.org/10.1000/abc.pdf").as_deref(),
            Some("10.1000/abc")
        );
    }

    #[test]
    fn test_clean_doi_keeps_balanced_parentheses() {
        assert_eq!(clean_doi("10.1002/(SICI)1097-0258"), "10.1002/(SICI)1097-0258");
        assert_eq!(clean_doi("10.1000/xyz)."), "10.1000/xyz");
        assert_eq!(clean_doi("10.1000%2Fxyz"), "10.1000/xyz");
    }

    // ===========================================
    // Tests for classification
    // ===========================================

    #[test]
    fn test_classify_order() {
        assert_eq!(classify("https://pubmed.ncbi.nlm.nih.gov/1/"), ReferenceType::JournalArticle);
        assert_eq!(classify("https://doi.org/10.1000/xyz"), ReferenceType::JournalArticle);
        assert_eq!(classify("https://link.springer.com/chapter/10.1007/978-3-030-1_7"), ReferenceType::BookChapter);
        assert_eq!(classify("https://doi.org/10.1007/978-3-030-12345-6"), ReferenceType::Book);
        assert_eq!(classify("https://who.int/report.PDF?dl=1"), ReferenceType::PdfDocument);
        assert_eq!(classify("https://www.nature.com/articles/abc"), ReferenceType::JournalArticle);
        assert_eq!(classify("https://books.google.com/books?id=x"), ReferenceType::Book);
        assert_eq!(classify("https://www.nytimes.com/2020/01/01/health/x.html"), ReferenceType::NewspaperArticle);
        assert_eq!(classify("https://blog.example.com/post"), ReferenceType::Blog);
        assert_eq!(classify("https://someone.substack.com/p/x"), ReferenceType::Blog);
        assert_eq!(classify("https://example.com/news/x"), ReferenceType::WebArticle);
        assert_eq!(classify("https://example.com/2021/05/post"), ReferenceType::WebArticle);
        assert_eq!(classify("https://www.mayoclinic.org/diseases"), ReferenceType::Webpage);
    }

    #[test]
    fn test_classify_unknown() {
        assert_eq!(classify(""), ReferenceType::Unknown);
        assert_eq!(classify("not a url"), ReferenceType::Unknown);
    }

    #[test]
    fn test_domain_suffix_must_be_label_boundary() {
        assert_eq!(classify("https://notnature.com/x"), ReferenceType::Webpage);
        assert_eq!(classify("https://www.nature.com/x"), ReferenceType::JournalArticle);
    }

    // ===========================================
    // Tests for categorize
    // ===========================================

    #[test]
    fn test_categorize_annotates_and_groups() {
        // Given: references with different URL kinds
        let mut a = ParsedReference::new(1, "1. A", "A");
        a.url = Some("https://pubmed.ncbi.nlm.nih.gov/42/".to_string());
        let mut b = ParsedReference::new(2, "2. B", "B");
        b.url = Some("https://www.bbc.com/news/x".to_string());
        let c = ParsedReference::new(3, "3. C", "C");
        let mut refs = vec![a, b, c];

        // When: we categorize them
        let groups = categorize(&mut refs);

        // Then: each record carries its type and identifiers, and groups list numbers
        assert_eq!(refs[0].reference_type, Some(ReferenceType::JournalArticle));
        assert_eq!(refs[0].extracted_metadata.get("pmid").map(String::as_str), Some("42"));
        assert_eq!(refs[1].reference_type, Some(ReferenceType::NewspaperArticle));
        assert_eq!(refs[2].reference_type, Some(ReferenceType::Unknown));
        assert_eq!(groups.get(&ReferenceType::JournalArticle), Some(&vec![1]));
        assert_eq!(groups.get(&ReferenceType::NewspaperArticle), Some(&vec![2]));
        assert_eq!(groups.get(&ReferenceType::Unknown), Some(&vec![3]));
    }
}
