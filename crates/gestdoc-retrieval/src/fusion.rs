//! Candidate fusion: parallel dense + lexical fetch, reciprocal-rank fusion,
//! hydration, hard-filter re-check and field boosts.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;
use tracing::{debug, instrument, warn};

use gestdoc_core::config::RetrievalSettings;
use gestdoc_core::error::{Error, Result};
use gestdoc_core::text::words;
use gestdoc_core::traits::{DenseStore, Embedder, FragmentStore, LexicalStore};
use gestdoc_core::types::{Candidate, Fragment, FragmentId, QueryContext, SearchHit, SourceKind, Sources};

/// One fused entry before hydration.
#[derive(Debug, Clone, PartialEq)]
pub struct RrfEntry {
    pub id: FragmentId,
    pub dense: Option<(usize, f32)>,
    pub lexical: Option<(usize, f32)>,
    pub score: f64,
}

/// `1 / (k + rank)` with 1-based ranks.
#[allow(clippy::cast_precision_loss)]
pub fn rrf_contribution(k: f64, rank: usize) -> f64 { 1.0 / (k + rank as f64) }

/// Merge both hit lists by fragment id and score them with RRF.
///
/// A store that repeats an id keeps only its best (lowest) rank. Output is
/// ordered by score descending, then id ascending.
pub fn rrf_merge(dense: &[SearchHit], lexical: &[SearchHit], k: f64) -> Vec<RrfEntry> {
    let mut merged: BTreeMap<&str, RrfEntry> = BTreeMap::new();
    for (hits, kind) in [(dense, SourceKind::Dense), (lexical, SourceKind::Lexical)] {
        for hit in hits {
            let entry = merged.entry(hit.id.as_str()).or_insert_with(|| RrfEntry { id: hit.id.clone(), dense: None, lexical: None, score: 0.0 });
            let slot = match kind { SourceKind::Dense => &mut entry.dense, SourceKind::Lexical => &mut entry.lexical };
            let rank = hit.rank.max(1);
            if !matches!(*slot, Some((best, _)) if best <= rank) { *slot = Some((rank, hit.score)); }
        }
    }
    let mut out: Vec<RrfEntry> = merged.into_values().map(|mut e| {
        e.score = e.dense.map_or(0.0, |(r, _)| rrf_contribution(k, r)) + e.lexical.map_or(0.0, |(r, _)| rrf_contribution(k, r));
        e
    }).collect();
    out.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
    out
}

/// Multiplier from the field boosts that fire for this fragment, combined as
/// `exp(Σ ln w)`.
pub fn boost_multiplier(fragment: &Fragment, ctx: &QueryContext) -> f64 {
    let w = &ctx.boosts;
    let terms = &ctx.features.terms;
    let mut log_sum = 0.0f64;

    let title_words: Vec<String> = words(&fragment.title).collect();
    if terms.iter().any(|t| title_words.contains(t)) { log_sum += w.title.ln(); }

    let path_words: Vec<String> = fragment.path.iter().flat_map(|label| words(label).collect::<Vec<_>>()).collect();
    if terms.iter().any(|t| path_words.contains(t)) { log_sum += w.structural_path.ln(); }

    if let Some(param) = &fragment.param_name {
        let param = param.to_lowercase();
        if ctx.features.param_keys.contains(&param) || terms.contains(&param) { log_sum += w.parameter_name.ln(); }
    }

    let has_code = ctx.features.error_codes.iter().any(|code| {
        fragment.error_code.as_deref().is_some_and(|c| c.eq_ignore_ascii_case(code)) || fragment.text.contains(code.as_str()) || fragment.title.contains(code.as_str())
    });
    if has_code { log_sum += w.error_code.ln(); }

    log_sum.exp()
}

/// Sort by boosted fused score descending, id ascending on ties.
pub fn sort_by_fused(candidates: &mut [Candidate]) {
    candidates.sort_by(|a, b| b.boosted_score().total_cmp(&a.boosted_score()).then_with(|| a.id().cmp(b.id())));
}

/// Backends borrowed for one fusion pass.
pub struct Backends<'a, D, L, F> {
    pub dense: &'a D,
    pub lexical: &'a L,
    pub fragments: &'a F,
    pub embedder: Arc<dyn Embedder>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FusionOutcome {
    pub candidates: Vec<Candidate>,
    pub failed_sources: Vec<SourceKind>,
}

fn describe(result: std::result::Result<anyhow::Result<Vec<SearchHit>>, tokio::time::error::Elapsed>, budget: Duration) -> std::result::Result<Vec<SearchHit>, String> {
    match result {
        Ok(Ok(hits)) => Ok(hits),
        Ok(Err(e)) => Err(format!("{e:#}")),
        Err(_) => Err(format!("timed out after {} ms", budget.as_millis())),
    }
}

async fn embed_query(embedder: Arc<dyn Embedder>, query: String) -> anyhow::Result<Vec<f32>> {
    let mut vectors = tokio::task::spawn_blocking(move || embedder.embed_batch(&[query])).await??;
    vectors.pop().ok_or_else(|| anyhow::anyhow!("embedder returned no vector"))
}

/// Fan out to both stores, fuse, hydrate and boost. Returns at most
/// `k_rerank` candidates.
#[instrument(skip_all, fields(category = %ctx.category))]
pub async fn fuse<D, L, F>(backends: Backends<'_, D, L, F>, query: &str, ctx: &QueryContext, settings: &RetrievalSettings) -> Result<FusionOutcome>
where
    D: DenseStore,
    L: LexicalStore,
    F: FragmentStore,
{
    let (k_dense, k_lexical) = settings.fetch_depth(ctx.category);
    let budget = settings.backend_timeout();
    let filters = &ctx.filters;

    let dense_branch = async {
        let vector = embed_query(Arc::clone(&backends.embedder), query.to_string()).await?;
        backends.dense.search(&vector, k_dense, filters).await
    };
    let lexical_branch = backends.lexical.search(query, k_lexical, filters);
    let (dense, lexical) = tokio::join!(timeout(budget, dense_branch), timeout(budget, lexical_branch));

    let mut failed_sources = Vec::new();
    let (dense, lexical) = match (describe(dense, budget), describe(lexical, budget)) {
        (Err(dense), Err(lexical)) => return Err(Error::RetrievalUnavailable { dense, lexical }),
        (dense, lexical) => {
            let mut keep = |kind: SourceKind, r: std::result::Result<Vec<SearchHit>, String>| match r {
                Ok(hits) => hits,
                Err(reason) => {
                    warn!(error = %Error::BackendUnavailable { source_kind: kind, reason }, "continuing with one backend");
                    failed_sources.push(kind);
                    Vec::new()
                }
            };
            (keep(SourceKind::Dense, dense), keep(SourceKind::Lexical, lexical))
        }
    };
    debug!(dense = dense.len(), lexical = lexical.len(), "backend hits");

    let entries = rrf_merge(&dense, &lexical, settings.rrf_k);
    if entries.is_empty() { return Ok(FusionOutcome { candidates: Vec::new(), failed_sources }); }

    let ids: Vec<FragmentId> = entries.iter().map(|e| e.id.clone()).collect();
    let fetch_budget = settings.fetch_timeout();
    let fragments = match timeout(fetch_budget, backends.fragments.get_by_ids(&ids)).await {
        Ok(Ok(fragments)) => fragments,
        Ok(Err(e)) => return Err(fetch_failure(format!("{e:#}"))),
        Err(_) => return Err(fetch_failure(format!("timed out after {} ms", fetch_budget.as_millis()))),
    };
    let mut by_id: BTreeMap<FragmentId, Fragment> = fragments.into_iter().map(|f| (f.id.clone(), f)).collect();

    let mut candidates = Vec::with_capacity(entries.len());
    for entry in entries {
        let Some(fragment) = by_id.remove(&entry.id) else {
            warn!(id = %entry.id, "hit without fragment, dropped");
            continue;
        };
        if !ctx.filters.admits(&fragment) {
            debug!(id = %entry.id, "fragment outside hard filters, dropped");
            continue;
        }
        let mut c = Candidate::new(fragment);
        c.dense_rank = entry.dense.map(|(r, _)| r);
        c.dense_score = entry.dense.map(|(_, s)| s);
        c.lexical_rank = entry.lexical.map(|(r, _)| r);
        c.lexical_score = entry.lexical.map(|(_, s)| s);
        c.sources = Sources { from_dense: entry.dense.is_some(), from_lexical: entry.lexical.is_some() };
        c.fused_score = entry.score;
        c.boost = boost_multiplier(&c.fragment, ctx);
        candidates.push(c);
    }
    sort_by_fused(&mut candidates);
    candidates.truncate(settings.k_rerank);
    debug!(candidates = candidates.len(), "fused");
    Ok(FusionOutcome { candidates, failed_sources })
}

fn fetch_failure(reason: String) -> Error {
    let reason = format!("fragment fetch failed: {reason}");
    Error::RetrievalUnavailable { dense: reason.clone(), lexical: reason }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gestdoc_core::types::{BoostWeights, ContentCategory, HierarchyLevel, Locator, QueryCategory, QueryFeatures, SearchFilters, VersionRange};
    use proptest::prelude::*;

    fn hit(id: &str, rank: usize, source: SourceKind) -> SearchHit { SearchHit { id: id.into(), rank, score: 1.0, source } }

    fn fragment(title: &str, path: &[&str], text: &str) -> Fragment {
        Fragment {
            id: "f".into(), title: title.into(), text: text.into(), path: path.iter().map(|s| (*s).to_string()).collect(),
            level: HierarchyLevel::Child, category: ContentCategory::Concept, version: VersionRange::default(), module: "m".into(),
            locator: Locator::default(), content_hash: 1, parent_id: None, summary: None, param_name: None, error_code: None,
        }
    }

    fn ctx(terms: &[&str], codes: &[&str]) -> QueryContext {
        QueryContext {
            category: QueryCategory::General,
            filters: SearchFilters::default(),
            boosts: BoostWeights::default(),
            features: QueryFeatures { terms: terms.iter().map(|s| (*s).to_string()).collect(), error_codes: codes.iter().map(|s| (*s).to_string()).collect(), ..QueryFeatures::default() },
        }
    }

    #[test]
    fn fragment_in_both_lists_merges_scores() {
        let out = rrf_merge(&[hit("a", 1, SourceKind::Dense), hit("b", 2, SourceKind::Dense)], &[hit("b", 1, SourceKind::Lexical)], 60.0);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].id, "b");
        assert_eq!(out[0].dense.map(|d| d.0), Some(2));
        assert_eq!(out[0].lexical.map(|l| l.0), Some(1));
        assert!((out[0].score - (1.0 / 62.0 + 1.0 / 61.0)).abs() < 1e-12);
    }

    #[test]
    fn rank_one_in_both_is_the_maximum() {
        let out = rrf_merge(&[hit("x", 1, SourceKind::Dense), hit("y", 2, SourceKind::Dense)], &[hit("y", 2, SourceKind::Lexical), hit("x", 1, SourceKind::Lexical)], 60.0);
        assert_eq!(out[0].id, "x");
        assert!((out[0].score - 2.0 / 61.0).abs() < 1e-12);
    }

    #[test]
    fn ties_break_on_id() {
        let out = rrf_merge(&[hit("b", 1, SourceKind::Dense)], &[hit("a", 1, SourceKind::Lexical)], 60.0);
        assert_eq!(out.iter().map(|e| e.id.as_str()).collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[test]
    fn boosts_multiply_as_log_sum() {
        let mut f = fragment("Errori di fatturazione", &["Fatturazione", "Errori"], "Il codice E001 indica ...");
        assert!((boost_multiplier(&f, &ctx(&["fatturazione"], &[])) - 1.4 * 1.2).abs() < 1e-9);
        assert!((boost_multiplier(&f, &ctx(&["zzz"], &["E001"])) - 2.5).abs() < 1e-9);
        f.param_name = Some("Aliquota_IVA".into());
        assert!((boost_multiplier(&f, &ctx(&["aliquota_iva"], &[])) - 2.0).abs() < 1e-9);
        assert!((boost_multiplier(&f, &ctx(&[], &[])) - 1.0).abs() < 1e-12);
    }

    proptest! {
        #[test]
        fn merged_ids_are_unique(dense in proptest::collection::vec(0u8..20, 0..30), lexical in proptest::collection::vec(0u8..20, 0..30)) {
            let d: Vec<SearchHit> = dense.iter().enumerate().map(|(i, id)| hit(&format!("f{id}"), i + 1, SourceKind::Dense)).collect();
            let l: Vec<SearchHit> = lexical.iter().enumerate().map(|(i, id)| hit(&format!("f{id}"), i + 1, SourceKind::Lexical)).collect();
            let out = rrf_merge(&d, &l, 60.0);
            let mut ids: Vec<&str> = out.iter().map(|e| e.id.as_str()).collect();
            let before = ids.len();
            ids.sort_unstable();
            ids.dedup();
            prop_assert_eq!(before, ids.len());
            for w in out.windows(2) { prop_assert!(w[0].score >= w[1].score); }
        }

        #[test]
        fn improving_a_rank_never_lowers_the_score(k in 0.0f64..200.0, rank in 2usize..500, other in proptest::option::of(1usize..500), boost in 0.1f64..10.0) {
            let base = other.map_or(0.0, |r| rrf_contribution(k, r));
            let worse = (rrf_contribution(k, rank) + base) * boost;
            let better = (rrf_contribution(k, rank - 1) + base) * boost;
            prop_assert!(better >= worse);
        }
    }
}
