//! Domain types shared by the stores and the retrieval engine.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::Hasher;
use twox_hash::XxHash64;

use crate::text::normalize_for_hash;

pub type FragmentId = String;

/// Position of a fragment in the document hierarchy.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum HierarchyLevel {
    Parent,
    Child,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ContentCategory {
    Parameter,
    Procedure,
    Concept,
    Error,
    Faq,
}

impl ContentCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Parameter => "parameter",
            Self::Procedure => "procedure",
            Self::Concept => "concept",
            Self::Error => "error",
            Self::Faq => "faq",
        }
    }
}

/// Encode a dotted version string ("2024.1", "7.2.15-beta") into an ordered key.
///
/// Up to three numeric components are kept, 16 bits each, so keys compare the
/// same way the versions do. Returns `None` when no leading number exists.
pub fn version_key(version: &str) -> Option<u64> {
    let mut parts = [0u64; 3];
    let mut seen = 0usize;
    for raw in version.trim().split(['.', '-', '_']).take(3) {
        let digits: String = raw.chars().take_while(char::is_ascii_digit).collect();
        if digits.is_empty() { break; }
        let n: u64 = digits.parse().ok()?;
        parts[seen] = n.min(0xFFFF);
        seen += 1;
    }
    if seen == 0 { return None; }
    Some((parts[0] << 32) | (parts[1] << 16) | parts[2])
}

/// Inclusive version range a fragment applies to. Missing bounds are open.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct VersionRange {
    pub min: Option<String>,
    pub max: Option<String>,
}

impl VersionRange {
    /// Lower/upper keys with open bounds mapped to `0` and `u64::MAX`.
    pub fn key_bounds(&self) -> (u64, u64) {
        let lo = self.min.as_deref().and_then(version_key).unwrap_or(0);
        let hi = self.max.as_deref().and_then(version_key).unwrap_or(u64::MAX);
        (lo, hi)
    }

    pub fn contains_key(&self, key: u64) -> bool {
        let (lo, hi) = self.key_bounds();
        lo <= key && key <= hi
    }
}

impl fmt::Display for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.min, &self.max) {
            (Some(a), Some(b)) if a == b => write!(f, "{a}"),
            (Some(a), Some(b)) => write!(f, "{a}–{b}"),
            (Some(a), None) => write!(f, "≥{a}"),
            (None, Some(b)) => write!(f, "≤{b}"),
            (None, None) => write!(f, "any"),
        }
    }
}

/// Where a fragment lives in the source documentation.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Locator {
    pub source_url: String,
    #[serde(default)]
    pub anchor: Option<String>,
    #[serde(default)]
    pub page_range: Option<(u32, u32)>,
}

/// An immutable, independently indexed unit of documentation text.
///
/// - `id`: globally unique, derived from the content hash (see [`Fragment::derive_id`])
/// - `path`: ordered heading labels from the manual root to this section
/// - `parent_id`: set on `CHILD` fragments, points at the enclosing `PARENT`
/// - `summary`: extractive summary computed at ingestion, read-only here
/// - `param_name`/`error_code`: filled by ingestion for parameter and error sections
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Fragment {
    #[serde(default)]
    pub id: FragmentId,
    #[serde(default)]
    pub title: String,
    pub text: String,
    #[serde(default)]
    pub path: Vec<String>,
    pub level: HierarchyLevel,
    pub category: ContentCategory,
    #[serde(default)]
    pub version: VersionRange,
    pub module: String,
    #[serde(default)]
    pub locator: Locator,
    #[serde(default)]
    pub content_hash: u64,
    #[serde(default)]
    pub parent_id: Option<FragmentId>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub param_name: Option<String>,
    #[serde(default)]
    pub error_code: Option<String>,
}

impl Fragment {
    /// xxHash64 of the whitespace-normalized text.
    pub fn content_hash_of(text: &str) -> u64 {
        let mut hasher = XxHash64::with_seed(0);
        hasher.write(normalize_for_hash(text).as_bytes());
        hasher.finish()
    }

    /// Stable identifier: same path and same text always give the same id.
    pub fn derive_id(path: &[String], content_hash: u64) -> FragmentId {
        let mut hasher = XxHash64::with_seed(0x6765_7374);
        for label in path {
            hasher.write(label.as_bytes());
            hasher.write_u8(0x1f);
        }
        hasher.write_u64(content_hash);
        format!("frag-{:016x}", hasher.finish())
    }

    /// Fill hash, id and title when the producer left them empty.
    pub fn with_derived_fields(mut self) -> Self {
        if self.content_hash == 0 { self.content_hash = Self::content_hash_of(&self.text); }
        if self.id.is_empty() { self.id = Self::derive_id(&self.path, self.content_hash); }
        if self.title.is_empty() {
            if let Some(last) = self.path.last() { self.title.clone_from(last); }
        }
        self
    }

    /// Section key used by diversification.
    pub fn section_key(&self) -> String {
        if self.path.is_empty() { "unknown".to_string() } else { self.path.join("/") }
    }

    pub fn is_child(&self) -> bool { self.level == HierarchyLevel::Child }

    /// Text fed to the dense encoder at ingestion.
    pub fn embedding_text(&self) -> String {
        if self.title.is_empty() { self.text.clone() } else { format!("{}. {}", self.title, self.text) }
    }
}

/// Which backend produced a hit.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Dense,
    Lexical,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self { Self::Dense => "dense", Self::Lexical => "lexical" })
    }
}

/// The minimal surface returned by both stores.
///
/// `rank` is 1-based within the store's own result list; `score` is the raw,
/// store-specific score (cosine similarity, BM25) and is never compared
/// across stores.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchHit {
    pub id: FragmentId,
    pub rank: usize,
    pub score: f32,
    pub source: SourceKind,
}

/// Hard filters pushed down to both stores.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SearchFilters {
    pub module: Option<String>,
    pub version: Option<String>,
}

impl SearchFilters {
    pub fn is_empty(&self) -> bool { self.module.is_none() && self.version.is_none() }

    pub fn version_key(&self) -> Option<u64> { self.version.as_deref().and_then(version_key) }

    /// True when the fragment satisfies every filter that is set.
    pub fn admits(&self, fragment: &Fragment) -> bool {
        if let Some(module) = &self.module {
            if !fragment.module.eq_ignore_ascii_case(module) { return false; }
        }
        match self.version_key() {
            Some(key) => fragment.version.contains_key(key),
            None => true,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueryCategory {
    Parameter,
    Procedure,
    Error,
    General,
}

impl fmt::Display for QueryCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Parameter => "PARAMETER",
            Self::Procedure => "PROCEDURE",
            Self::Error => "ERROR",
            Self::General => "GENERAL",
        })
    }
}

/// Multiplicative field boosts for one query category.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BoostWeights {
    pub title: f64,
    pub structural_path: f64,
    pub parameter_name: f64,
    pub error_code: f64,
}

impl Default for BoostWeights {
    fn default() -> Self {
        Self { title: 1.4, structural_path: 1.2, parameter_name: 2.0, error_code: 2.5 }
    }
}

/// Lexical features pulled out of the query once, at classification time.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueryFeatures {
    /// Lowercased, stopword-free terms in query order.
    pub terms: Vec<String>,
    /// Error codes as written in the query (`E001`, `IVA-22`).
    pub error_codes: Vec<String>,
    /// Keys of `key=value` pairs, lowercased.
    pub param_keys: Vec<String>,
    /// Distinctive tokens the diversification stage looks for verbatim.
    pub anchors: Vec<String>,
}

/// Resolved per-query routing state. Read-only after classification.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueryContext {
    pub category: QueryCategory,
    pub filters: SearchFilters,
    pub boosts: BoostWeights,
    pub features: QueryFeatures,
}

/// Which stores returned a candidate.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Sources {
    pub from_dense: bool,
    pub from_lexical: bool,
}

/// A fragment plus the scoring state accumulated during one query.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Candidate {
    pub fragment: Fragment,
    pub dense_rank: Option<usize>,
    pub dense_score: Option<f32>,
    pub lexical_rank: Option<usize>,
    pub lexical_score: Option<f32>,
    /// Raw reciprocal-rank-fusion score.
    pub fused_score: f64,
    /// Product of the field boosts that fired (1.0 when none did).
    pub boost: f64,
    pub rerank_score: Option<f32>,
    pub sources: Sources,
}

impl Candidate {
    pub fn new(fragment: Fragment) -> Self {
        Self {
            fragment,
            dense_rank: None,
            dense_score: None,
            lexical_rank: None,
            lexical_score: None,
            fused_score: 0.0,
            boost: 1.0,
            rerank_score: None,
            sources: Sources::default(),
        }
    }

    pub fn id(&self) -> &str { &self.fragment.id }

    pub fn boosted_score(&self) -> f64 { self.fused_score * self.boost }
}

/// How an item's content relates to its fragment.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    /// The full fragment text.
    Fragment,
    /// The parent's extractive summary, placed before its first child.
    ParentSummary,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContextItem {
    pub candidate: Candidate,
    pub kind: ItemKind,
    pub content: String,
    pub tokens: usize,
}

/// Everything a caller needs to cite a fragment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Citation {
    pub fragment_id: FragmentId,
    pub title: String,
    pub source_url: String,
    pub anchor: Option<String>,
    pub page_range: Option<(u32, u32)>,
    pub module: String,
    pub version: VersionRange,
}

impl From<&Fragment> for Citation {
    fn from(f: &Fragment) -> Self {
        Self {
            fragment_id: f.id.clone(),
            title: f.title.clone(),
            source_url: f.locator.source_url.clone(),
            anchor: f.locator.anchor.clone(),
            page_range: f.locator.page_range,
            module: f.module.clone(),
            version: f.version.clone(),
        }
    }
}

impl fmt::Display for Citation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{} {}] {}", self.title, self.module, self.version, self.source_url)?;
        if let Some(anchor) = &self.anchor { write!(f, "#{anchor}")?; }
        if let Some((a, b)) = self.page_range { write!(f, " (pp. {a}-{b})")?; }
        Ok(())
    }
}

/// Final output of the engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResultSet {
    pub category: QueryCategory,
    pub items: Vec<ContextItem>,
    /// Candidates that survived diversification, consumed or not.
    pub total_count: usize,
    pub truncated: bool,
    pub degraded: bool,
    pub failed_sources: Vec<SourceKind>,
    pub reranked: bool,
    pub tokens_used: usize,
}

impl ResultSet {
    pub fn empty(category: QueryCategory) -> Self {
        Self {
            category,
            items: Vec::new(),
            total_count: 0,
            truncated: false,
            degraded: false,
            failed_sources: Vec::new(),
            reranked: false,
            tokens_used: 0,
        }
    }

    pub fn len(&self) -> usize { self.items.len() }

    pub fn is_empty(&self) -> bool { self.items.is_empty() }

    pub fn ids(&self) -> Vec<&str> { self.items.iter().map(|i| i.candidate.id()).collect() }

    pub fn citations(&self) -> Vec<Citation> {
        self.items.iter().map(|i| Citation::from(&i.candidate.fragment)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_keys_order_like_versions() {
        let a = version_key("7.2").expect("7.2");
        let b = version_key("7.10").expect("7.10");
        let c = version_key("2024.1.3-beta").expect("year version");
        assert!(a < b);
        assert!(b < c);
        assert_eq!(version_key("v7"), None);
        assert_eq!(version_key("8"), Some(8 << 32));
    }

    #[test]
    fn open_version_bounds_admit_everything() {
        let open = VersionRange::default();
        assert!(open.contains_key(0));
        assert!(open.contains_key(u64::MAX));
        let closed = VersionRange { min: Some("7.0".into()), max: Some("7.9".into()) };
        assert!(closed.contains_key(version_key("7.4").expect("key")));
        assert!(!closed.contains_key(version_key("8.0").expect("key")));
    }

    #[test]
    fn derived_id_is_stable_and_whitespace_insensitive() {
        let path = vec!["Contabilità".to_string(), "IVA".to_string()];
        let h1 = Fragment::content_hash_of("Aliquota  IVA\npredefinita");
        let h2 = Fragment::content_hash_of("Aliquota IVA predefinita");
        assert_eq!(h1, h2);
        assert_eq!(Fragment::derive_id(&path, h1), Fragment::derive_id(&path, h2));
        let other = vec!["Magazzino".to_string()];
        assert_ne!(Fragment::derive_id(&path, h1), Fragment::derive_id(&other, h1));
    }
}
