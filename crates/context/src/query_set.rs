//! Query Set derivation
//!
//! Turns one user question into an ordered list of retrieval queries:
//! the question itself first, then variants where domain abbreviations are
//! spelled out. Order is merge precedence downstream.

use proposalforge_common::{AppError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Ordered retrieval queries for one question
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuerySet {
    queries: Vec<String>,
}

impl QuerySet {
    /// Build from explicit queries, dropping blanks and exact repeats
    pub fn from_queries(queries: Vec<String>) -> Self {
        let mut unique: Vec<String> = Vec::with_capacity(queries.len());
        for query in queries {
            let query = query.trim().to_string();
            if !query.is_empty() && !unique.contains(&query) {
                unique.push(query);
            }
        }
        Self { queries: unique }
    }

    /// The original question
    pub fn question(&self) -> Option<&str> {
        self.queries.first().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.queries.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.queries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queries.is_empty()
    }

    pub fn into_vec(self) -> Vec<String> {
        self.queries
    }
}

/// Query expander configuration
#[derive(Debug, Clone)]
pub struct QueryExpanderConfig {
    /// Enable abbreviation expansion
    pub enable_expansion: bool,

    /// Maximum variants added after the question
    pub max_expansions: usize,
}

impl Default for QueryExpanderConfig {
    fn default() -> Self {
        Self {
            enable_expansion: true,
            max_expansions: 3,
        }
    }
}

/// Expands questions using a domain synonym dictionary
pub struct QueryExpander {
    config: QueryExpanderConfig,

    /// Abbreviation → spelled-out forms
    synonyms: HashMap<String, Vec<String>>,
}

impl QueryExpander {
    /// Create a new expander with the default chemistry dictionary
    pub fn new(config: QueryExpanderConfig) -> Self {
        Self {
            config,
            synonyms: Self::load_default_synonyms(),
        }
    }

    /// Add or replace a dictionary entry
    pub fn with_synonym(mut self, term: &str, expansions: &[&str]) -> Self {
        self.synonyms.insert(
            term.to_lowercase(),
            expansions.iter().map(|s| s.to_string()).collect(),
        );
        self
    }

    /// Derive the Query Set for a question
    pub fn expand(&self, question: &str) -> Result<QuerySet> {
        let question = question.trim();
        if question.is_empty() {
            return Err(AppError::MissingArgument {
                field: "question".to_string(),
            });
        }

        let mut queries = vec![question.to_string()];
        if self.config.enable_expansion {
            queries.extend(self.variants(question));
        }

        let mut set = QuerySet::from_queries(queries);
        set.queries.truncate(1 + self.config.max_expansions);
        Ok(set)
    }

    /// One variant per matched abbreviation/expansion pair, in question order
    fn variants(&self, question: &str) -> Vec<String> {
        let mut variants = Vec::new();

        for word in question.split_whitespace() {
            let term: String = word
                .chars()
                .filter(|c| c.is_alphanumeric() || *c == '-')
                .collect::<String>()
                .to_lowercase();

            let Some(expansions) = self.synonyms.get(&term) else {
                continue;
            };

            for expansion in expansions {
                let variant = replace_word(question, word, expansion);
                if variant != question && !variants.contains(&variant) {
                    variants.push(variant);
                }
            }
        }

        variants
    }

    fn load_default_synonyms() -> HashMap<String, Vec<String>> {
        let mut synonyms = HashMap::new();

        // Common materials-chemistry abbreviations
        synonyms.insert("mof".to_string(), vec!["metal-organic framework".to_string()]);
        synonyms.insert("mofs".to_string(), vec!["metal-organic frameworks".to_string()]);
        synonyms.insert("cof".to_string(), vec!["covalent organic framework".to_string()]);
        synonyms.insert("co2".to_string(), vec!["carbon dioxide".to_string()]);
        synonyms.insert("dac".to_string(), vec!["direct air capture".to_string()]);
        synonyms.insert("oer".to_string(), vec!["oxygen evolution reaction".to_string()]);
        synonyms.insert("orr".to_string(), vec!["oxygen reduction reaction".to_string()]);
        synonyms.insert("xrd".to_string(), vec!["x-ray diffraction".to_string()]);
        synonyms.insert("sem".to_string(), vec!["scanning electron microscopy".to_string()]);
        synonyms.insert("tga".to_string(), vec!["thermogravimetric analysis".to_string()]);
        synonyms.insert("bet".to_string(), vec!["brunauer-emmett-teller surface area".to_string()]);
        synonyms.insert("nmr".to_string(), vec!["nuclear magnetic resonance".to_string()]);
        synonyms.insert("dft".to_string(), vec!["density functional theory".to_string()]);
        synonyms.insert("pce".to_string(), vec!["power conversion efficiency".to_string()]);

        synonyms
    }
}

/// Replace whole-word occurrences of `word` in `text`, keeping any
/// punctuation attached to the token
fn replace_word(text: &str, word: &str, replacement: &str) -> String {
    let core = word.trim_matches(|c: char| !(c.is_alphanumeric() || c == '-'));
    if core.is_empty() {
        return text.to_string();
    }

    text.split(' ')
        .map(|token| {
            if token == word {
                token.replacen(core, replacement, 1)
            } else {
                token.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
