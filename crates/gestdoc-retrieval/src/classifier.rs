//! Rule-based query classification.
//!
//! Rules are evaluated in priority order and the first match wins:
//! error codes and error words, then parameter cues, then procedural verbs.
//! Everything else is `GENERAL`. Feature extraction runs on every query so
//! that boosting and diversification see the same reading of it.

use regex::Regex;

use gestdoc_core::config::BoostTable;
use gestdoc_core::error::{Error, Result};
use gestdoc_core::text::significant_terms;
use gestdoc_core::types::{QueryCategory, QueryContext, QueryFeatures, SearchFilters};

/// Compiled pattern tables. Built once, shared by reference.
#[derive(Debug, Clone)]
pub struct ClassifierRules {
    /// Strict error-code shape used for routing: `AB12`, `IVA-220`.
    error_code: Regex,
    /// Looser shape used for boosting and anchors: also `E001`.
    code_feature: Regex,
    error_words: Regex,
    parameter_words: Regex,
    key_value: Regex,
    procedure_words: Regex,
    quoted: Regex,
}

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| Error::InvalidConfig(format!("classifier pattern {pattern:?}: {e}")))
}

impl ClassifierRules {
    pub fn italian() -> Result<Self> {
        Ok(Self {
            error_code: compile(r"\b[A-Z]{2,4}-?\d{2,4}\b")?,
            code_feature: compile(r"\b[A-Z]{1,4}-?\d{2,4}\b")?,
            error_words: compile(r"(?i)\b(?:errore|codice)\b")?,
            parameter_words: compile(r"(?i)\b(?:param|impostaz|valori|predefin)\w*")?,
            key_value: compile(r"\b([A-Za-z_][\w.]*)\s*=\s*\S+")?,
            procedure_words: compile(r"(?i)\b(?:configurare|stampare|generare|inviare|contabilizzare|impostare|passo|passi|step)\b")?,
            quoted: compile(r#""([^"]+)"|«([^»]+)»"#)?,
        })
    }

    pub fn category(&self, text: &str) -> QueryCategory {
        if self.error_code.is_match(text) || self.error_words.is_match(text) {
            QueryCategory::Error
        } else if self.parameter_words.is_match(text) || self.key_value.is_match(text) {
            QueryCategory::Parameter
        } else if self.procedure_words.is_match(text) {
            QueryCategory::Procedure
        } else {
            QueryCategory::General
        }
    }

    pub fn features(&self, text: &str) -> QueryFeatures {
        let error_codes = unique(self.code_feature.find_iter(text).map(|m| m.as_str().to_string()));
        let param_keys = unique(self.key_value.captures_iter(text).filter_map(|c| c.get(1)).map(|m| m.as_str().to_lowercase()));
        let quoted = self.quoted.captures_iter(text).filter_map(|c| c.get(1).or_else(|| c.get(2))).map(|m| m.as_str().trim().to_string()).filter(|s| !s.is_empty());
        let identifiers = text.split(|c: char| !(c.is_alphanumeric() || c == '_' || c == '-')).filter(|t| is_identifier_like(t)).map(str::to_string);
        let anchors = unique(error_codes.iter().cloned().chain(param_keys.iter().cloned()).chain(quoted).chain(identifiers));
        QueryFeatures { terms: significant_terms(text), error_codes, param_keys, anchors }
    }
}

/// Tokens that look like codes or identifiers rather than prose:
/// containing a digit, an underscore, or a capital after the first char.
fn is_identifier_like(token: &str) -> bool {
    let token = token.trim_matches('-');
    if token.chars().count() < 2 || !token.chars().any(char::is_alphabetic) { return false; }
    token.chars().any(|c| c.is_ascii_digit() || c == '_') || token.chars().skip(1).any(char::is_uppercase)
}

fn unique(items: impl Iterator<Item = String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for item in items {
        if !out.iter().any(|o| o.eq_ignore_ascii_case(&item)) { out.push(item); }
    }
    out
}

/// Maps raw query text to a [`QueryContext`]. Pure and synchronous.
#[derive(Debug, Clone)]
pub struct Classifier {
    rules: ClassifierRules,
    boosts: BoostTable,
}

impl Classifier {
    pub fn new(rules: ClassifierRules, boosts: BoostTable) -> Self { Self { rules, boosts } }

    pub fn classify(&self, text: &str) -> QueryContext { self.classify_filtered(text, SearchFilters::default()) }

    pub fn classify_filtered(&self, text: &str, filters: SearchFilters) -> QueryContext {
        let category = if text.trim().is_empty() { QueryCategory::General } else { self.rules.category(text) };
        QueryContext { category, filters, boosts: self.boosts.for_category(category), features: self.rules.features(text) }
    }
}
