//! The seam to the external lookup stage.
//!
//! Resolving a reference to a final label (database lookups, formatting)
//! happens outside this crate. The orchestrator only needs something that
//! turns a section's references into a number → label map, which is what
//! [`ReferenceResolver`] describes. Two implementations are provided: a
//! static label table, and a cascade that walks an ordered list of lookup
//! strategies against a caller-supplied [`LookupBackend`].

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::identifiers::{extract_doi, extract_pmcid, extract_pmid};
use crate::model::ParsedReference;

/// Outcome of resolving one reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Resolution {
    Resolved {
        label: String,
        /// Rendered citation text for the reference list, if the lookup
        /// stage produced one
        citation: Option<String>,
    },
    Unresolved {
        reason: String,
    },
}

/// Produces labels for the references of one section.
///
/// Numbers absent from the returned map are treated as unresolved.
pub trait ReferenceResolver {
    fn resolve(&mut self, section_index: usize, references: &[ParsedReference]) -> BTreeMap<u32, Resolution>;
}

/// A label, and optionally the citation text to print in the reference list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelEntry {
    pub label: String,
    #[serde(default)]
    pub citation: Option<String>,
}

impl LabelEntry {
    pub fn new(label: impl Into<String>) -> Self {
        LabelEntry {
            label: label.into(),
            citation: None,
        }
    }

    pub fn with_citation(mut self, citation: impl Into<String>) -> Self {
        self.citation = Some(citation.into());
        self
    }
}

/// Resolver backed by precomputed labels.
///
/// Per-section entries take precedence over global ones.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StaticLabels {
    global: HashMap<u32, LabelEntry>,
    per_section: HashMap<usize, HashMap<u32, LabelEntry>>,
}

impl StaticLabels {
    pub fn new() -> Self {
        StaticLabels::default()
    }

    /// Adds a label that applies to every section.
    pub fn insert(&mut self, number: u32, entry: LabelEntry) {
        self.global.insert(number, entry);
    }

    /// Adds a label that only applies to one section.
    pub fn insert_for_section(&mut self, section_index: usize, number: u32, entry: LabelEntry) {
        self.per_section
            .entry(section_index)
            .or_default()
            .insert(number, entry);
    }

    pub fn get(&self, section_index: usize, number: u32) -> Option<&LabelEntry> {
        self.per_section
            .get(&section_index)
            .and_then(|labels| labels.get(&number))
            .or_else(|| self.global.get(&number))
    }

    pub fn len(&self) -> usize {
        self.global.len() + self.per_section.values().map(HashMap::len).sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<const N: usize> From<[(u32, &str); N]> for StaticLabels {
    fn from(entries: [(u32, &str); N]) -> Self {
        let mut labels = StaticLabels::new();
        for (number, label) in entries {
            labels.insert(number, LabelEntry::new(label));
        }
        labels
    }
}

impl ReferenceResolver for StaticLabels {
    fn resolve(&mut self, section_index: usize, references: &[ParsedReference]) -> BTreeMap<u32, Resolution> {
        references
            .iter()
            .map(|reference| {
                let number = reference.original_number;
                let resolution = match self.get(section_index, number) {
                    Some(entry) => Resolution::Resolved {
                        label: entry.label.clone(),
                        citation: entry.citation.clone(),
                    },
                    None => Resolution::Unresolved {
                        reason: "no label supplied".to_string(),
                    },
                };
                (number, resolution)
            })
            .collect()
    }
}

/// One way of looking a reference up, tried in cascade order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "strategy", content = "value", rename_all = "snake_case")]
pub enum LookupStrategy {
    Pmid(String),
    Pmcid(String),
    Doi(String),
    /// Scrape metadata from the reference URL
    Scrape(String),
    TitleSearch(String),
}

impl LookupStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            LookupStrategy::Pmid(_) => "pmid",
            LookupStrategy::Pmcid(_) => "pmcid",
            LookupStrategy::Doi(_) => "doi",
            LookupStrategy::Scrape(_) => "scrape",
            LookupStrategy::TitleSearch(_) => "title_search",
        }
    }
}

/// Answer from a backend for one strategy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupOutcome {
    Found { label: String, citation: Option<String> },
    NotFound,
}

/// Performs the actual lookups. Implemented outside this crate.
pub trait LookupBackend {
    fn lookup(&mut self, strategy: &LookupStrategy) -> LookupOutcome;
}

/// Builds the ordered cascade for a reference: PMID, PMCID, DOI, URL
/// scraping, then a title search.
pub fn plan_strategies(reference: &ParsedReference) -> Vec<LookupStrategy> {
    let metadata = &reference.extracted_metadata;
    let url = reference.url.as_deref();
    let from_url = |extract: fn(&str) -> Option<String>| url.and_then(extract);

    let mut plan = Vec::new();
    if let Some(pmid) = metadata.get("pmid").cloned().or_else(|| from_url(extract_pmid)) {
        plan.push(LookupStrategy::Pmid(pmid));
    }
    if let Some(pmcid) = metadata.get("pmcid").cloned().or_else(|| from_url(extract_pmcid)) {
        plan.push(LookupStrategy::Pmcid(pmcid));
    }
    if let Some(doi) = metadata.get("doi").cloned().or_else(|| from_url(extract_doi)) {
        plan.push(LookupStrategy::Doi(doi));
    }
    if let Some(url) = url {
        plan.push(LookupStrategy::Scrape(url.to_string()));
    }
    let title = reference.title.trim();
    if !title.is_empty() {
        plan.push(LookupStrategy::TitleSearch(title.to_string()));
    }
    plan
}

/// Resolver that runs [`plan_strategies`] against a backend and stops at
/// the first strategy that finds something.
#[derive(Debug)]
pub struct CascadeResolver<B> {
    backend: B,
}

impl<B: LookupBackend> CascadeResolver<B> {
    pub fn new(backend: B) -> Self {
        CascadeResolver { backend }
    }

    pub fn into_inner(self) -> B {
        self.backend
    }

    fn resolve_one(&mut self, reference: &ParsedReference) -> Resolution {
        let plan = plan_strategies(reference);
        if plan.is_empty() {
            return Resolution::Unresolved {
                reason: "no identifier, URL or title to look up".to_string(),
            };
        }

        for strategy in &plan {
            if let LookupOutcome::Found { label, citation } = self.backend.lookup(strategy) {
                return Resolution::Resolved { label, citation };
            }
        }

        let tried: Vec<&str> = plan.iter().map(LookupStrategy::name).collect();
        Resolution::Unresolved {
            reason: format!("not found (tried {})", tried.join(", ")),
        }
    }
}

impl<B: LookupBackend> ReferenceResolver for CascadeResolver<B> {
    fn resolve(&mut self, _section_index: usize, references: &[ParsedReference]) -> BTreeMap<u32, Resolution> {
        references
            .iter()
            .map(|reference| (reference.original_number, self.resolve_one(reference)))
            .collect()
    }
}
