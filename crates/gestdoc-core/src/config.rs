//! Lightweight configuration loader, typed settings and path helpers.
//!
//! Uses Figment to merge `config.toml` + `config.<env>.toml` + `APP_*` env vars
//! (`__` separates nesting, e.g. `APP_RETRIEVAL__K_FINAL=5`). Typed sections
//! fall back to their defaults when absent.

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::Error;
use crate::types::{BoostWeights, QueryCategory};

pub struct Config {
    figment: Figment,
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let env_name = env::var("RUST_ENV").unwrap_or_else(|_| "dev".to_string());

        let mut figment = Figment::new().merge(Toml::file("config.toml"));
        match env_name.as_str() {
            "dev" | "development" => figment = figment.merge(Toml::file("config.dev.toml")),
            "prod" | "production" => figment = figment.merge(Toml::file("config.prod.toml")),
            "test" | "testing" => figment = figment.merge(Toml::file("config.test.toml")),
            _ => {}
        }
        figment = figment.merge(Env::prefixed("APP_").split("__"));

        let config = Self { figment };
        config.validate()?;
        Ok(config)
    }

    /// Wrap an already assembled figment (tests, embedding applications).
    pub fn from_figment(figment: Figment) -> Self { Self { figment } }

    pub fn get<T>(&self, key: &str) -> anyhow::Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        self.figment
            .extract_inner(key)
            .map_err(|e| anyhow::anyhow!("Failed to get '{}': {}", key, e))
    }

    /// Extract a section, layering it over the type's defaults.
    pub fn section<T>(&self, key: &str) -> anyhow::Result<T>
    where
        T: serde::de::DeserializeOwned + Serialize + Default,
    {
        if !self.figment.contains(key) { return Ok(T::default()); }
        Figment::from(Serialized::defaults(T::default()))
            .merge(Serialized::defaults(self.figment.find_value(key)?))
            .extract()
            .map_err(|e| anyhow::anyhow!("Failed to read section '{}': {}", key, e))
    }

    pub fn retrieval(&self) -> anyhow::Result<RetrievalSettings> {
        let settings: RetrievalSettings = self.section("retrieval")?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn data(&self) -> anyhow::Result<DataSettings> { self.section("data") }

    pub fn models(&self) -> anyhow::Result<ModelSettings> { self.section("models") }

    fn validate(&self) -> anyhow::Result<()> {
        if self.figment.contains("retrieval") {
            self.retrieval()?;
        }
        Ok(())
    }
}

/// Boost weights per query category, kept as named fields so every category
/// is always present and statically checked.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BoostTable {
    pub parameter: BoostWeights,
    pub procedure: BoostWeights,
    pub error: BoostWeights,
    pub general: BoostWeights,
}

impl BoostTable {
    pub fn for_category(&self, category: QueryCategory) -> BoostWeights {
        match category {
            QueryCategory::Parameter => self.parameter,
            QueryCategory::Procedure => self.procedure,
            QueryCategory::Error => self.error,
            QueryCategory::General => self.general,
        }
    }

    fn all(&self) -> [(&'static str, BoostWeights); 4] {
        [("parameter", self.parameter), ("procedure", self.procedure), ("error", self.error), ("general", self.general)]
    }
}

/// Tunables of the retrieval pipeline. Every constant here is a default, not
/// a tuned optimum.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetrievalSettings {
    pub k_dense: usize,
    pub k_lexical: usize,
    pub k_rerank: usize,
    pub k_final: usize,
    pub rrf_k: f64,
    pub backend_timeout_ms: u64,
    pub fetch_timeout_ms: u64,
    pub rerank_timeout_ms: u64,
    /// Characters of `"{title}. {text}"` handed to the cross-encoder.
    pub rerank_max_chars: usize,
    pub max_per_section: usize,
    pub anchor_bonus: f64,
    pub token_budget: usize,
    /// Budget for the fallback summary of a parent lacking a precomputed one.
    pub summary_max_tokens: usize,
    /// Scale fetch depth by query category (ERROR favours lexical, PROCEDURE dense).
    pub adaptive_depth: bool,
    pub boosts: BoostTable,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            k_dense: 40,
            k_lexical: 20,
            k_rerank: 30,
            k_final: 10,
            rrf_k: 60.0,
            backend_timeout_ms: 2_000,
            fetch_timeout_ms: 2_000,
            rerank_timeout_ms: 2_000,
            rerank_max_chars: 200,
            max_per_section: 2,
            anchor_bonus: 0.15,
            token_budget: 2_600,
            summary_max_tokens: 120,
            adaptive_depth: false,
            boosts: BoostTable::default(),
        }
    }
}

impl RetrievalSettings {
    pub fn backend_timeout(&self) -> Duration { Duration::from_millis(self.backend_timeout_ms) }
    pub fn fetch_timeout(&self) -> Duration { Duration::from_millis(self.fetch_timeout_ms) }
    pub fn rerank_timeout(&self) -> Duration { Duration::from_millis(self.rerank_timeout_ms) }

    /// Fetch depth `(dense, lexical)` for a category.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
    pub fn fetch_depth(&self, category: QueryCategory) -> (usize, usize) {
        if !self.adaptive_depth { return (self.k_dense, self.k_lexical); }
        let scale = |k: usize, f: f64| ((k as f64 * f).round() as usize).max(1);
        match category {
            QueryCategory::Error => (scale(self.k_dense, 0.5), scale(self.k_lexical, 2.0)),
            QueryCategory::Parameter => (scale(self.k_dense, 0.7), scale(self.k_lexical, 1.3)),
            QueryCategory::Procedure => (scale(self.k_dense, 1.3), scale(self.k_lexical, 0.7)),
            QueryCategory::General => (self.k_dense, self.k_lexical),
        }
    }

    pub fn validate(&self) -> Result<(), Error> {
        let positive = [
            ("k_dense", self.k_dense),
            ("k_lexical", self.k_lexical),
            ("k_rerank", self.k_rerank),
            ("k_final", self.k_final),
            ("max_per_section", self.max_per_section),
            ("token_budget", self.token_budget),
            ("summary_max_tokens", self.summary_max_tokens),
        ];
        for (name, value) in positive {
            if value == 0 { return Err(Error::InvalidConfig(format!("retrieval.{name} must be > 0"))); }
        }
        if !self.rrf_k.is_finite() || self.rrf_k < 0.0 {
            return Err(Error::InvalidConfig(format!("retrieval.rrf_k must be finite and >= 0, got {}", self.rrf_k)));
        }
        if !self.anchor_bonus.is_finite() || self.anchor_bonus < 0.0 {
            return Err(Error::InvalidConfig("retrieval.anchor_bonus must be finite and >= 0".into()));
        }
        for (category, w) in self.boosts.all() {
            for (field, value) in [("title", w.title), ("structural_path", w.structural_path), ("parameter_name", w.parameter_name), ("error_code", w.error_code)] {
                if !value.is_finite() || value <= 0.0 {
                    return Err(Error::InvalidConfig(format!("retrieval.boosts.{category}.{field} must be finite and > 0, got {value}")));
                }
            }
        }
        Ok(())
    }
}

/// On-disk locations used by the CLI and the reference stores.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DataSettings {
    pub fragments_dir: String,
    pub tantivy_index_dir: String,
    pub lancedb_dir: String,
    pub lancedb_table: String,
}

impl Default for DataSettings {
    fn default() -> Self {
        Self {
            fragments_dir: "../dev_data/fragments".to_string(),
            tantivy_index_dir: "../dev_data/indexes/tantivy".to_string(),
            lancedb_dir: "../dev_data/indexes/lancedb".to_string(),
            lancedb_table: "fragments".to_string(),
        }
    }
}

impl DataSettings {
    pub fn fragments_path(&self) -> PathBuf { expand_path(&self.fragments_dir) }
    pub fn tantivy_path(&self) -> PathBuf { expand_path(&self.tantivy_index_dir) }
    pub fn lancedb_path(&self) -> PathBuf { expand_path(&self.lancedb_dir) }
}

/// Model locations. `None` lets the model crate search its usual places.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ModelSettings {
    pub embedder_dir: Option<String>,
    pub reranker_dir: Option<String>,
    /// Run without a cross-encoder; fusion order is kept.
    pub disable_reranker: bool,
}

impl ModelSettings {
    pub fn embedder_path(&self) -> Option<PathBuf> { self.embedder_dir.as_deref().map(expand_path) }
    pub fn reranker_path(&self) -> Option<PathBuf> { self.reranker_dir.as_deref().map(expand_path) }
}

/// Expand a user-provided path string:
/// - Expands leading '~' to the user's home directory
/// - Expands ${VAR} and $VAR environment variables
/// - Returns a PathBuf without attempting to canonicalize
pub fn expand_path<S: AsRef<str>>(input: S) -> PathBuf {
    let s = input.as_ref();
    let expanded_env = shellexpand::env(s).unwrap_or(std::borrow::Cow::Borrowed(s));
    let expanded = shellexpand::tilde(&expanded_env);
    PathBuf::from(expanded.as_ref())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_sections_fall_back_to_defaults() {
        let config = Config::from_figment(Figment::new());
        assert_eq!(config.retrieval().expect("retrieval"), RetrievalSettings::default());
        assert_eq!(config.data().expect("data").lancedb_table, "fragments");
    }

    #[test]
    fn partial_section_overrides_only_given_keys() {
        let figment = Figment::new().merge(Toml::string(
            "[retrieval]\nk_final = 5\n[retrieval.boosts.error]\nerror_code = 4.0\n",
        ));
        let settings = Config::from_figment(figment).retrieval().expect("retrieval");
        assert_eq!(settings.k_final, 5);
        assert_eq!(settings.k_dense, 40);
        assert!((settings.boosts.error.error_code - 4.0).abs() < f64::EPSILON);
        assert!((settings.boosts.error.title - 1.4).abs() < f64::EPSILON);
        assert!((settings.boosts.general.error_code - 2.5).abs() < f64::EPSILON);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let mut bad = RetrievalSettings::default();
        bad.k_final = 0;
        assert!(matches!(bad.validate(), Err(Error::InvalidConfig(_))));
        let mut bad = RetrievalSettings::default();
        bad.boosts.parameter.parameter_name = -1.0;
        assert!(bad.validate().is_err());
        let bad = RetrievalSettings { rrf_k: f64::NAN, ..Default::default() };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn adaptive_depth_follows_category() {
        let mut s = RetrievalSettings::default();
        assert_eq!(s.fetch_depth(QueryCategory::Error), (40, 20));
        s.adaptive_depth = true;
        assert_eq!(s.fetch_depth(QueryCategory::Error), (20, 40));
        assert_eq!(s.fetch_depth(QueryCategory::Procedure), (52, 14));
        assert_eq!(s.fetch_depth(QueryCategory::General), (40, 20));
    }

    #[test]
    fn env_overrides_nested_keys() {
        figment::Jail::expect_with(|jail| {
            jail.create_file("config.toml", "[retrieval]\nk_final = 7\n")?;
            jail.set_env("RUST_ENV", "test");
            jail.set_env("APP_RETRIEVAL__MAX_PER_SECTION", "3");
            let config = Config::load().map_err(|e| e.to_string())?;
            let settings = config.retrieval().map_err(|e| e.to_string())?;
            assert_eq!(settings.k_final, 7);
            assert_eq!(settings.max_per_section, 3);
            Ok(())
        });
    }
}
