use anyhow::{Result, bail};
use std::path::Path;
use std::time::Instant;

use candle_core::{DType, Device};
use candle_transformers::models::xlm_roberta::{Config as XLMRobertaConfig, XLMRobertaForSequenceClassification};
use tokenizers::Tokenizer;
use tracing::{debug, info};

use gestdoc_core::text::significant_terms;
use gestdoc_core::traits::RerankModel;

use crate::device::select_device;
use crate::model::{load_config, load_tokenizer, load_var_builder};
use crate::tokenize::tokenize_batch_on_device;

pub const RERANK_MAX_LEN: usize = 512;
/// Pairs per forward pass.
pub const RERANK_BATCH: usize = 16;

/// `bge-reranker` style cross-encoder: one relevance logit per (query, passage).
pub struct CrossEncoderReranker { model: XLMRobertaForSequenceClassification, tokenizer: Tokenizer, device: Device }

impl CrossEncoderReranker {
    pub fn load(model_dir: &Path) -> Result<Self> {
        let device = select_device();
        info!(dir = %model_dir.display(), "loading cross-encoder reranker");
        let tokenizer = load_tokenizer(model_dir)?;
        let config: XLMRobertaConfig = load_config(model_dir)?;
        let vb = load_var_builder(model_dir, &device)?;
        let model = XLMRobertaForSequenceClassification::new(1, &config, vb)?;
        info!("reranker ready");
        Ok(Self { model, tokenizer, device })
    }

    /// Score one batch of (query, passage) pairs in a single forward pass.
    fn score_batch(&self, query: &str, texts: &[String]) -> Result<Vec<f32>> {
        let pairs: Vec<(&str, &str)> = texts.iter().map(|t| (query, t.as_str())).collect();
        let (input_ids, attention_mask) = tokenize_batch_on_device(&self.tokenizer, pairs, RERANK_MAX_LEN, &self.device)?;
        let token_type_ids = input_ids.zeros_like()?;
        let logits = self.model.forward(&input_ids, &attention_mask, &token_type_ids)?;
        let values = logits.to_device(&Device::Cpu)?.flatten_all()?.to_dtype(DType::F32)?.to_vec1::<f32>()?;
        if values.len() != texts.len() { bail!("reranker returned {} logits for {} pairs", values.len(), texts.len()); }
        Ok(values)
    }
}

impl RerankModel for CrossEncoderReranker {
    fn score(&self, query: &str, texts: &[String]) -> Result<Vec<f32>> {
        let start = Instant::now();
        let mut scores = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(RERANK_BATCH) {
            scores.extend(self.score_batch(query, chunk)?);
        }
        debug!(pairs = scores.len(), ms = start.elapsed().as_millis(), "cross-encoder scored");
        Ok(scores)
    }
}

/// Term-overlap scorer used when no cross-encoder is available in tests:
/// fraction of significant query terms present in the passage.
#[derive(Debug, Default, Clone, Copy)]
pub struct OverlapReranker;

impl RerankModel for OverlapReranker {
    #[allow(clippy::cast_precision_loss)]
    fn score(&self, query: &str, texts: &[String]) -> Result<Vec<f32>> {
        let terms = significant_terms(query);
        if terms.is_empty() { return Ok(vec![0.0; texts.len()]); }
        Ok(texts.iter().map(|t| {
            let passage = t.to_lowercase();
            let hits = terms.iter().filter(|term| passage.contains(term.as_str())).count();
            hits as f32 / terms.len() as f32
        }).collect())
    }
}
