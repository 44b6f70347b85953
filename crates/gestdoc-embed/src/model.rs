use anyhow::{Result, anyhow, bail};
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::path::Path;
use std::time::Instant;

use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::xlm_roberta::{Config as XLMRobertaConfig, XLMRobertaModel};
use tokenizers::Tokenizer;
use tracing::{debug, info, warn};
use twox_hash::XxHash64;

use gestdoc_core::traits::Embedder;

use crate::device::select_device;
use crate::pool::masked_mean_l2;
use crate::tokenize::tokenize_on_device;

pub const BGE_M3_DIM: usize = 1024;
pub const BGE_M3_MAX_LEN: usize = 256;

/// Load `model.safetensors` when present, falling back to `pytorch_model.bin`.
pub(crate) fn load_var_builder(model_dir: &Path, device: &Device) -> Result<VarBuilder<'static>> {
    let safetensors = model_dir.join("model.safetensors");
    let weights: HashMap<String, Tensor> = if safetensors.exists() {
        candle_core::safetensors::load(&safetensors, device)?
    } else {
        let bin = model_dir.join("pytorch_model.bin");
        if !bin.exists() { bail!("no weights found in {}", model_dir.display()); }
        candle_core::pickle::read_all(&bin)?.into_iter().map(|(k, t)| -> Result<(String, Tensor)> { Ok((k, t.to_device(device)?)) }).collect::<Result<_>>()?
    };
    Ok(VarBuilder::from_tensors(weights, DType::F32, device))
}

pub(crate) fn load_tokenizer(model_dir: &Path) -> Result<Tokenizer> {
    let tokenizer_path = model_dir.join("tokenizer.json");
    Tokenizer::from_file(&tokenizer_path).map_err(|e| anyhow!("Failed to load tokenizer from {}: {}", tokenizer_path.display(), e))
}

pub(crate) fn load_config<T: serde::de::DeserializeOwned>(model_dir: &Path) -> Result<T> {
    let config_path = model_dir.join("config.json");
    let raw = std::fs::read_to_string(&config_path).map_err(|e| anyhow!("Failed to read {}: {}", config_path.display(), e))?;
    Ok(serde_json::from_str(&raw)?)
}

/// BGE-M3 dense encoder (XLM-RoBERTa, mean pooled, L2-normalized).
pub struct EmbeddingModel { model: XLMRobertaModel, tokenizer: Tokenizer, device: Device }

impl EmbeddingModel {
    pub fn load(model_dir: &Path) -> Result<Self> {
        let device = select_device();
        info!(dir = %model_dir.display(), "loading BGE-M3 embedder");
        let tokenizer = load_tokenizer(model_dir)?;
        let config: XLMRobertaConfig = load_config(model_dir)?;
        let vb = load_var_builder(model_dir, &device)?;
        let model = XLMRobertaModel::new(&config, vb)?;
        info!("BGE-M3 embedder ready");
        Ok(Self { model, tokenizer, device })
    }

    pub fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
        let start = Instant::now();
        let (input_ids, attention_mask) = tokenize_on_device(&self.tokenizer, text, BGE_M3_MAX_LEN, &self.device)?;
        let token_type_ids = Tensor::zeros((1, BGE_M3_MAX_LEN), DType::I64, &self.device)?;
        let hidden = self.model.forward(&input_ids, &attention_mask, &token_type_ids, None, None, None)?;
        let pooled = masked_mean_l2(&hidden, &attention_mask)?;
        let emb = pooled.to_device(&Device::Cpu)?.squeeze(0)?.to_vec1::<f32>()?;
        if emb.len() != BGE_M3_DIM { bail!("unexpected embedding dim {}", emb.len()); }
        let ms = start.elapsed().as_millis();
        if ms > 100 { warn!(ms, "slow embedding"); } else { debug!(ms, "embedded text"); }
        Ok(emb)
    }
}

impl Embedder for EmbeddingModel {
    fn dim(&self) -> usize { BGE_M3_DIM }
    fn max_len(&self) -> usize { BGE_M3_MAX_LEN }
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> { texts.iter().map(|t| self.embed_text(t)).collect() }
}

/// Hash-bucket embedder for tests and model-less runs. Texts sharing words
/// land close together, which is enough to exercise the dense path.
pub struct FakeEmbedder { dim: usize }

impl FakeEmbedder {
    pub fn new(dim: usize) -> Self { Self { dim: dim.max(1) } }

    #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0f32; self.dim];
        for token in gestdoc_core::text::words(text) {
            let mut hasher = XxHash64::with_seed(0);
            token.hash(&mut hasher);
            let h = hasher.finish();
            let idx = (h as usize) % self.dim;
            v[idx] += 0.5 + (((h >> 32) as u32) as f32) / (u32::MAX as f32);
        }
        let norm = (v.iter().map(|x| x * x).sum::<f32>()).sqrt().max(1e-6);
        for x in &mut v { *x /= norm; }
        v
    }
}

impl Embedder for FakeEmbedder {
    fn dim(&self) -> usize { self.dim }
    fn max_len(&self) -> usize { BGE_M3_MAX_LEN }
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> { Ok(texts.iter().map(|t| self.embed_text(t)).collect()) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fake_embeddings_share_buckets_for_shared_words() {
        let e = FakeEmbedder::new(1024);
        let a = e.embed_text("registri iva");
        let b = e.embed_text("stampa registri iva");
        let c = e.embed_text("backup database");
        let dot = |x: &[f32], y: &[f32]| x.iter().zip(y).map(|(p, q)| p * q).sum::<f32>();
        assert!(dot(&a, &b) > dot(&a, &c));
    }

    #[test]
    fn empty_text_is_zero_vector() {
        let v = FakeEmbedder::new(8).embed_text("");
        assert!(v.iter().all(|x| *x == 0.0));
    }
}
