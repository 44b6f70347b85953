#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use gestdoc_core::config::RetrievalSettings;
use gestdoc_core::traits::{DenseStore, Embedder, FragmentStore, LexicalStore, RerankModel};
use gestdoc_core::types::{ContentCategory, Fragment, FragmentId, HierarchyLevel, Locator, SearchFilters, SearchHit, SourceKind, VersionRange};
use gestdoc_retrieval::Retriever;

pub struct ScriptedStore {
    hits: Result<Vec<SearchHit>, String>,
    delay: Option<Duration>,
    blocking: bool,
    pub calls: AtomicUsize,
}

impl ScriptedStore {
    pub fn returning(source: SourceKind, ids: &[&str]) -> Self {
        let hits = ids.iter().enumerate().map(|(i, id)| SearchHit { id: (*id).to_string(), rank: i + 1, score: 1.0 / (i as f32 + 1.0), source }).collect();
        Self { hits: Ok(hits), delay: None, blocking: false, calls: AtomicUsize::new(0) }
    }

    pub fn failing(reason: &str) -> Self { Self { hits: Err(reason.to_string()), delay: None, blocking: false, calls: AtomicUsize::new(0) } }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Spend the delay on the blocking pool with a sleeping thread, the way
    /// the tantivy store runs a slow search.
    pub fn blocking(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self.blocking = true;
        self
    }

    async fn respond(&self, top_k: usize) -> anyhow::Result<Vec<SearchHit>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.delay {
            Some(d) if self.blocking => tokio::task::spawn_blocking(move || std::thread::sleep(d)).await?,
            Some(d) => tokio::time::sleep(d).await,
            None => {}
        }
        match &self.hits {
            Ok(hits) => Ok(hits.iter().take(top_k).cloned().collect()),
            Err(reason) => Err(anyhow!("{reason}")),
        }
    }
}

impl DenseStore for ScriptedStore {
    async fn search(&self, _vector: &[f32], top_k: usize, _filters: &SearchFilters) -> anyhow::Result<Vec<SearchHit>> { self.respond(top_k).await }
}

impl LexicalStore for ScriptedStore {
    async fn search(&self, _query: &str, top_k: usize, _filters: &SearchFilters) -> anyhow::Result<Vec<SearchHit>> { self.respond(top_k).await }
}

pub struct MemoryFragments {
    by_id: HashMap<FragmentId, Fragment>,
    fail: bool,
    pub calls: AtomicUsize,
}

impl MemoryFragments {
    pub fn new(fragments: &[Fragment]) -> Self {
        Self { by_id: fragments.iter().map(|f| (f.id.clone(), f.clone())).collect(), fail: false, calls: AtomicUsize::new(0) }
    }

    pub fn failing() -> Self { Self { by_id: HashMap::new(), fail: true, calls: AtomicUsize::new(0) } }
}

impl FragmentStore for MemoryFragments {
    async fn get_by_ids(&self, ids: &[FragmentId]) -> anyhow::Result<Vec<Fragment>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail { return Err(anyhow!("fragment store offline")); }
        Ok(ids.iter().filter_map(|id| self.by_id.get(id).cloned()).collect())
    }
}

pub struct ConstantEmbedder;

impl Embedder for ConstantEmbedder {
    fn dim(&self) -> usize { 4 }
    fn max_len(&self) -> usize { 16 }
    fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> { Ok(texts.iter().map(|_| vec![0.5; 4]).collect()) }
}

pub struct FailingEmbedder;

impl Embedder for FailingEmbedder {
    fn dim(&self) -> usize { 4 }
    fn max_len(&self) -> usize { 16 }
    fn embed_batch(&self, _texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> { Err(anyhow!("embedding model crashed")) }
}

/// Scores passages by a fixed preference list; unknown passages score 0.
pub struct PreferringReranker(pub Vec<&'static str>);

impl RerankModel for PreferringReranker {
    #[allow(clippy::cast_precision_loss)]
    fn score(&self, _query: &str, texts: &[String]) -> anyhow::Result<Vec<f32>> {
        Ok(texts.iter().map(|t| self.0.iter().position(|p| t.contains(p)).map_or(0.0, |i| 100.0 - i as f32)).collect())
    }
}

pub struct BrokenReranker;

impl RerankModel for BrokenReranker {
    fn score(&self, _query: &str, _texts: &[String]) -> anyhow::Result<Vec<f32>> { Err(anyhow!("model not loaded")) }
}

pub struct SlowReranker(pub Duration);

impl RerankModel for SlowReranker {
    fn score(&self, _query: &str, texts: &[String]) -> anyhow::Result<Vec<f32>> {
        std::thread::sleep(self.0);
        Ok(vec![1.0; texts.len()])
    }
}

pub fn fragment(id: &str, path: &[&str], text: &str) -> Fragment {
    Fragment {
        id: id.to_string(),
        title: path.last().map(|s| (*s).to_string()).unwrap_or_default(),
        text: text.to_string(),
        path: path.iter().map(|s| (*s).to_string()).collect(),
        level: HierarchyLevel::Child,
        category: ContentCategory::Procedure,
        version: VersionRange { min: Some("7.0".into()), max: None },
        module: "fatturazione".to_string(),
        locator: Locator { source_url: format!("https://docs.example.it/{id}"), anchor: Some(id.to_string()), page_range: Some((1, 2)) },
        content_hash: 7,
        parent_id: None,
        summary: None,
        param_name: None,
        error_code: None,
    }
}

pub fn settings() -> RetrievalSettings {
    RetrievalSettings { backend_timeout_ms: 200, fetch_timeout_ms: 200, rerank_timeout_ms: 200, ..RetrievalSettings::default() }
}

pub type TestRetriever = Retriever<Arc<ScriptedStore>, Arc<ScriptedStore>, Arc<MemoryFragments>>;

pub fn retriever(dense: &Arc<ScriptedStore>, lexical: &Arc<ScriptedStore>, fragments: &Arc<MemoryFragments>, settings: RetrievalSettings) -> TestRetriever {
    Retriever::new(Arc::clone(dense), Arc::clone(lexical), Arc::clone(fragments), Arc::new(ConstantEmbedder), settings).expect("retriever")
}
