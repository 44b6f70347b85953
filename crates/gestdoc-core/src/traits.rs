//! Collaborator interfaces consumed by the retrieval engine.
//!
//! The engine only ever talks to these traits; the tantivy and lancedb crates
//! provide the concrete stores. Store methods return `anyhow::Result` and the
//! engine maps failures into [`crate::error::Error`] at its boundary.

use std::future::Future;
use std::sync::Arc;

use crate::types::{Fragment, FragmentId, SearchFilters, SearchHit};

pub trait Embedder: Send + Sync {
    fn dim(&self) -> usize;
    fn max_len(&self) -> usize;
    fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>>;
}

/// Nearest-neighbour search over fragment embeddings.
pub trait DenseStore: Send + Sync {
    fn search(
        &self,
        vector: &[f32],
        top_k: usize,
        filters: &SearchFilters,
    ) -> impl Future<Output = anyhow::Result<Vec<SearchHit>>> + Send;
}

/// BM25-style search; the store owns Italian analysis (stemming, stopwords).
pub trait LexicalStore: Send + Sync {
    fn search(
        &self,
        query: &str,
        top_k: usize,
        filters: &SearchFilters,
    ) -> impl Future<Output = anyhow::Result<Vec<SearchHit>>> + Send;
}

/// Batched hydration of fragment text and metadata. Unknown ids are omitted.
pub trait FragmentStore: Send + Sync {
    fn get_by_ids(&self, ids: &[FragmentId]) -> impl Future<Output = anyhow::Result<Vec<Fragment>>> + Send;
}

/// Cross-encoder relevance model. Returns one score per text, in input order.
pub trait RerankModel: Send + Sync {
    fn score(&self, query: &str, texts: &[String]) -> anyhow::Result<Vec<f32>>;
}

impl<T: DenseStore> DenseStore for Arc<T> {
    fn search(&self, vector: &[f32], top_k: usize, filters: &SearchFilters) -> impl Future<Output = anyhow::Result<Vec<SearchHit>>> + Send {
        (**self).search(vector, top_k, filters)
    }
}

impl<T: LexicalStore> LexicalStore for Arc<T> {
    fn search(&self, query: &str, top_k: usize, filters: &SearchFilters) -> impl Future<Output = anyhow::Result<Vec<SearchHit>>> + Send {
        (**self).search(query, top_k, filters)
    }
}

impl<T: FragmentStore> FragmentStore for Arc<T> {
    fn get_by_ids(&self, ids: &[FragmentId]) -> impl Future<Output = anyhow::Result<Vec<Fragment>>> + Send {
        (**self).get_by_ids(ids)
    }
}
