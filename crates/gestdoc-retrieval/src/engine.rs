use std::collections::HashMap;
use std::sync::Arc;

use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use gestdoc_core::config::RetrievalSettings;
use gestdoc_core::error::{Error, Result};
use gestdoc_core::traits::{DenseStore, Embedder, FragmentStore, LexicalStore, RerankModel};
use gestdoc_core::types::{Candidate, Fragment, FragmentId, QueryContext, ResultSet, SearchFilters};

use crate::assemble::assemble;
use crate::classifier::{Classifier, ClassifierRules};
use crate::diversify::{diversify, DiversityParams};
use crate::fusion::{fuse, Backends};
use crate::rerank::rerank;

/// Per-call options. `top_k` overrides `k_final`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetrieveOptions {
    pub version_filter: Option<String>,
    pub module_filter: Option<String>,
    pub top_k: Option<usize>,
}

impl RetrieveOptions {
    fn filters(&self) -> Result<SearchFilters> {
        let filters = SearchFilters { module: self.module_filter.clone(), version: self.version_filter.clone() };
        if let Some(v) = &filters.version {
            if filters.version_key().is_none() { return Err(Error::InvalidFilter(format!("unparseable version '{v}'"))); }
        }
        Ok(filters)
    }
}

/// The hybrid retrieval pipeline over concrete stores.
///
/// Stateless between calls; every `retrieve` builds its own candidates.
pub struct Retriever<D, L, F> {
    dense: D,
    lexical: L,
    fragments: F,
    embedder: Arc<dyn Embedder>,
    reranker: Option<Arc<dyn RerankModel>>,
    classifier: Classifier,
    settings: RetrievalSettings,
}

impl<D, L, F> Retriever<D, L, F>
where
    D: DenseStore,
    L: LexicalStore,
    F: FragmentStore,
{
    pub fn new(dense: D, lexical: L, fragments: F, embedder: Arc<dyn Embedder>, settings: RetrievalSettings) -> Result<Self> {
        settings.validate()?;
        let classifier = Classifier::new(ClassifierRules::italian()?, settings.boosts);
        Ok(Self { dense, lexical, fragments, embedder, reranker: None, classifier, settings })
    }

    #[must_use]
    pub fn with_reranker(mut self, reranker: Arc<dyn RerankModel>) -> Self {
        self.reranker = Some(reranker);
        self
    }

    pub fn settings(&self) -> &RetrievalSettings { &self.settings }

    pub fn classify(&self, query: &str) -> QueryContext { self.classifier.classify(query) }

    pub async fn retrieve(&self, query: &str, options: &RetrieveOptions) -> Result<ResultSet> {
        self.retrieve_with_cancel(query, options, &CancellationToken::new()).await
    }

    /// Like [`Retriever::retrieve`], abandoning in-flight backend calls as
    /// soon as `cancel` fires.
    pub async fn retrieve_with_cancel(&self, query: &str, options: &RetrieveOptions, cancel: &CancellationToken) -> Result<ResultSet> {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                info!("retrieval cancelled");
                Err(Error::Cancelled)
            }
            result = self.run(query, options) => result,
        }
    }

    #[instrument(skip_all, fields(query = %query))]
    async fn run(&self, query: &str, options: &RetrieveOptions) -> Result<ResultSet> {
        if query.trim().is_empty() {
            debug!("empty query");
            return Ok(ResultSet::empty(self.classifier.classify(query).category));
        }
        let filters = options.filters()?;
        let ctx = self.classifier.classify_filtered(query, filters);
        debug!(category = %ctx.category, "classified");

        let backends = Backends { dense: &self.dense, lexical: &self.lexical, fragments: &self.fragments, embedder: Arc::clone(&self.embedder) };
        let fusion = fuse(backends, query, &ctx, &self.settings).await?;
        let (reranked_list, reranked) = rerank(self.reranker.as_ref(), query, fusion.candidates, &self.settings).await;

        let params = DiversityParams {
            max_per_section: self.settings.max_per_section,
            k_final: options.top_k.unwrap_or(self.settings.k_final).max(1),
            anchor_bonus: self.settings.anchor_bonus,
        };
        let selected = diversify(reranked_list, &ctx.features, params);
        let total_count = selected.len();
        let parents = self.prefetch_parents(&selected).await;
        let assembly = assemble(selected, &parents, self.settings.token_budget, self.settings.summary_max_tokens);

        let result = ResultSet {
            category: ctx.category,
            items: assembly.items,
            total_count,
            truncated: assembly.truncated,
            degraded: !fusion.failed_sources.is_empty(),
            failed_sources: fusion.failed_sources,
            reranked,
            tokens_used: assembly.tokens_used,
        };
        info!(items = result.len(), degraded = result.degraded, reranked, truncated = result.truncated, "retrieved");
        Ok(result)
    }

    /// Parents of selected children that are not themselves selected. A
    /// failed fetch only costs the summaries.
    async fn prefetch_parents(&self, selected: &[Candidate]) -> HashMap<FragmentId, Fragment> {
        let mut parents: HashMap<FragmentId, Fragment> = selected.iter().filter(|c| !c.fragment.is_child()).map(|c| (c.fragment.id.clone(), c.fragment.clone())).collect();
        let mut missing: Vec<FragmentId> = Vec::new();
        for c in selected.iter().filter(|c| c.fragment.is_child()) {
            if let Some(p) = &c.fragment.parent_id {
                if !parents.contains_key(p) && !missing.contains(p) { missing.push(p.clone()); }
            }
        }
        if missing.is_empty() { return parents; }
        match timeout(self.settings.fetch_timeout(), self.fragments.get_by_ids(&missing)).await {
            Ok(Ok(fetched)) => parents.extend(fetched.into_iter().map(|f| (f.id.clone(), f))),
            Ok(Err(e)) => warn!(error = %format!("{e:#}"), "parent fetch failed, children emitted alone"),
            Err(_) => warn!("parent fetch timed out, children emitted alone"),
        }
        parents
    }
}
