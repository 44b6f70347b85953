use anyhow::{Result, anyhow};
use std::path::{Path, PathBuf};
use tracing::info;

use gestdoc_core::traits::{Embedder, RerankModel};

pub mod device;
pub mod model;
pub mod pool;
pub mod rerank;
pub mod tokenize;

pub use device::select_device;
pub use model::{EmbeddingModel, FakeEmbedder, BGE_M3_DIM};
pub use pool::masked_mean_l2;
pub use rerank::{CrossEncoderReranker, OverlapReranker};

fn env_flag(name: &str) -> bool {
    std::env::var(name).ok().is_some_and(|v| v == "1" || v.eq_ignore_ascii_case("true"))
}

/// Dense embedder: `APP_USE_FAKE_EMBEDDINGS=1` selects the hash embedder,
/// otherwise BGE-M3 is loaded from `model_dir` or the usual locations.
pub fn get_default_embedder(model_dir: Option<&Path>) -> Result<Box<dyn Embedder>> {
    if env_flag("APP_USE_FAKE_EMBEDDINGS") { info!("using FakeEmbedder"); return Ok(Box::new(FakeEmbedder::new(BGE_M3_DIM))); }
    let dir = resolve_model_dir(model_dir, "bge-m3")?;
    Ok(Box::new(EmbeddingModel::load(&dir)?))
}

/// Cross-encoder reranker: `APP_USE_FAKE_RERANKER=1` selects the overlap
/// scorer, otherwise `bge-reranker-large` is loaded.
pub fn get_default_reranker(model_dir: Option<&Path>) -> Result<Box<dyn RerankModel>> {
    if env_flag("APP_USE_FAKE_RERANKER") { info!("using OverlapReranker"); return Ok(Box::new(OverlapReranker)); }
    let dir = resolve_model_dir(model_dir, "bge-reranker-large")?;
    Ok(Box::new(CrossEncoderReranker::load(&dir)?))
}

fn resolve_model_dir(explicit: Option<&Path>, name: &str) -> Result<PathBuf> {
    if let Some(p) = explicit {
        if p.exists() { info!(dir = %p.display(), "using configured model dir"); return Ok(p.to_path_buf()); }
        return Err(anyhow!("configured model dir {} does not exist", p.display()));
    }
    if let Ok(dir) = std::env::var("APP_MODEL_DIR") { let p = PathBuf::from(&dir).join(name); if p.exists() { info!(dir = %p.display(), "using APP_MODEL_DIR"); return Ok(p); } }
    for root in ["../models", "models"] { let p = Path::new(root).join(name); if p.exists() { info!(dir = %p.display(), "using model dir"); return Ok(p); } }
    Err(anyhow!("Could not locate {} model directory", name))
}
