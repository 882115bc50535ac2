//! Citation Assembler - labels excerpts for traceable prompting
//!
//! Provides:
//! - One citation per distinct (source, location)
//! - Labelled context block in passage order
//! - Extraction of the labels a generated answer actually cites

use crate::retrieval::{Location, Passage};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// Characters of passage content kept as the citation snippet
pub const SNIPPET_CHARS: usize = 200;

/// Citation for one (source, location)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    /// Ordinal label, e.g. "[1]"
    pub label: String,

    /// Source document
    pub source: String,

    /// Position within the source
    pub location: Location,

    /// Document title
    pub title: String,

    /// Leading text of the first passage seen for this key
    pub snippet: String,
}

/// Result of one assembly pass
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AssembledContext {
    /// Labelled excerpts, ready to embed in a prompt
    pub context_text: String,

    /// Distinct citations in label order
    pub citations: Vec<Citation>,

    /// Label assigned to each input passage, parallel to the input
    pub passage_labels: Vec<String>,
}

/// Builds context blocks and citation lists from retrieved passages
#[derive(Debug, Default, Clone, Copy)]
pub struct CitationAssembler;

impl CitationAssembler {
    pub fn new() -> Self {
        Self
    }

    /// Label passages by (source, location) in first-encounter order
    pub fn build(&self, passages: &[Passage]) -> AssembledContext {
        let mut labels: HashMap<(String, Location), String> = HashMap::new();
        let mut assembled = AssembledContext::default();

        for passage in passages {
            let key = (passage.source.clone(), passage.location.clone());

            let label = match labels.get(&key) {
                Some(label) => label.clone(),
                None => {
                    let label = format!("[{}]", assembled.citations.len() + 1);
                    assembled.citations.push(Citation {
                        label: label.clone(),
                        source: passage.source.clone(),
                        location: passage.location.clone(),
                        title: passage.title.clone(),
                        snippet: passage.content.chars().take(SNIPPET_CHARS).collect(),
                    });
                    labels.insert(key, label.clone());
                    label
                }
            };

            assembled.context_text.push_str(&format!(
                "{} {} | {}\n{}\n\n",
                label, passage.title, passage.location, passage.content
            ));
            assembled.passage_labels.push(label);
        }

        assembled
    }
}

/// Labels from `citations` that appear in `text`, in label order
pub fn cited_labels(text: &str, citations: &[Citation]) -> Vec<String> {
    let Ok(pattern) = regex_lite::Regex::new(r"\[(\d+)\]") else {
        return Vec::new();
    };

    let used: BTreeSet<usize> = pattern
        .captures_iter(text)
        .filter_map(|cap| cap.get(1)?.as_str().parse::<usize>().ok())
        .filter(|idx| *idx > 0 && *idx <= citations.len())
        .collect();

    used.into_iter()
        .map(|idx| citations[idx - 1].label.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::{IndexHit, Passage};
    use proptest::prelude::*;

    fn passage(id: &str, source: &str, page: i64, content: &str) -> Passage {
        Passage::from_hit(IndexHit {
            id: Some(id.to_string()),
            source: Some(source.to_string()),
            location: Some(serde_json::json!(page)),
            content: content.to_string(),
            title: Some(format!("Title of {}", source)),
            score: None,
        })
    }

    #[test]
    fn test_same_source_location_reuses_label() {
        let passages = vec![
            passage("a", "p.pdf", 3, "first"),
            passage("b", "p.pdf", 3, "second"),
            passage("c", "p.pdf", 5, "third"),
        ];

        let assembled = CitationAssembler::new().build(&passages);

        assert_eq!(assembled.passage_labels, vec!["[1]", "[1]", "[2]"]);
        assert_eq!(assembled.citations.len(), 2);
        assert_eq!(assembled.citations[0].location, Location::Page(3));
        assert_eq!(assembled.citations[1].location, Location::Page(5));
        assert_eq!(assembled.citations[0].snippet, "first");
    }

    #[test]
    fn test_context_text_format() {
        let assembled = CitationAssembler::new().build(&[passage("a", "p.pdf", 3, "Body text")]);
        assert_eq!(assembled.context_text, "[1] Title of p.pdf | 3\nBody text\n\n");
    }

    #[test]
    fn test_unknown_location_renders_placeholder() {
        let mut p = passage("a", "p.pdf", 1, "x");
        p.location = Location::unknown();
        let assembled = CitationAssembler::new().build(&[p]);
        assert!(assembled.context_text.starts_with("[1] Title of p.pdf | ?\n"));
    }

    #[test]
    fn test_empty_input() {
        let assembled = CitationAssembler::new().build(&[]);
        assert!(assembled.citations.is_empty());
        assert!(assembled.context_text.is_empty());
    }

    #[test]
    fn test_snippet_is_truncated() {
        let long = "y".repeat(SNIPPET_CHARS * 2);
        let assembled = CitationAssembler::new().build(&[passage("a", "p.pdf", 1, &long)]);
        assert_eq!(assembled.citations[0].snippet.chars().count(), SNIPPET_CHARS);
    }

    #[test]
    fn test_cited_labels() {
        let assembled = CitationAssembler::new().build(&[
            passage("a", "a.pdf", 1, "x"),
            passage("b", "b.pdf", 1, "y"),
        ]);
        let used = cited_labels("Stable to 400 C [2], see also [2] and [7].", &assembled.citations);
        assert_eq!(used, vec!["[2]"]);
    }

    proptest! {
        #[test]
        fn prop_labels_are_contiguous_and_stable(
            keys in prop::collection::vec((0u8..4, 0i64..4), 0..40)
        ) {
            let passages: Vec<Passage> = keys
                .iter()
                .enumerate()
                .map(|(i, (src, page))| passage(&i.to_string(), &format!("s{}.pdf", src), *page, "c"))
                .collect();

            let assembled = CitationAssembler::new().build(&passages);

            prop_assert!(assembled.citations.len() <= passages.len());
            for (i, citation) in assembled.citations.iter().enumerate() {
                prop_assert_eq!(&citation.label, &format!("[{}]", i + 1));
            }

            let mut by_key: HashMap<(String, Location), String> = HashMap::new();
            for (p, label) in passages.iter().zip(&assembled.passage_labels) {
                let key = (p.source.clone(), p.location.clone());
                let existing = by_key.entry(key).or_insert_with(|| label.clone());
                prop_assert_eq!(existing.as_str(), label.as_str());
            }
        }
    }
}
