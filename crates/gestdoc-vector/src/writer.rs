use anyhow::{Result, bail};
use arrow_array::{FixedSizeListArray, Int64Array, RecordBatch, StringArray};
use indicatif::{ProgressBar, ProgressStyle};
use lancedb::Connection;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use gestdoc_core::types::Fragment;

use crate::schema::{build_fragment_schema, key_to_i64};
use crate::table::{open_db, upsert_batch};

const BATCH_SIZE: usize = 1000;

/// Writes fragments with their precomputed embeddings into LanceDB.
pub struct LanceFragmentIndexer { pub(crate) db: Connection, pub(crate) table_name: String }

impl LanceFragmentIndexer {
	pub async fn new(db_path: &Path, table_name: &str) -> Result<Self> {
		let db = open_db(db_path.to_string_lossy().as_ref()).await?;
		Ok(Self { db, table_name: table_name.to_string() })
	}

	/// Re-indexing a fragment id replaces its row.
	pub async fn index(&self, fragments: &[Fragment], embeddings: &[Vec<f32>]) -> Result<usize> {
		if fragments.is_empty() { info!("no fragments to index"); return Ok(0); }
		if fragments.len() != embeddings.len() { bail!("fragments ({}) and embeddings ({}) length must match", fragments.len(), embeddings.len()); }
		let dim = embeddings[0].len();
		if dim == 0 || embeddings.iter().any(|e| e.len() != dim) { bail!("embeddings must share a non-zero dimension"); }
		info!(count = fragments.len(), table = %self.table_name, "indexing fragments into LanceDB");
		let pb = ProgressBar::new(fragments.len() as u64);
		if let Ok(style) = ProgressStyle::default_bar().template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} fragments ({percent}%)") { pb.set_style(style.progress_chars("#>-")); }
		let mut processed = 0usize;
		for (frags, embs) in fragments.chunks(BATCH_SIZE).zip(embeddings.chunks(BATCH_SIZE)) {
			let batch = to_record_batch(frags, embs, dim)?;
			upsert_batch(&self.db, &self.table_name, batch).await?;
			processed += frags.len();
			pb.set_position(processed as u64);
		}
		pb.finish_and_clear();
		info!(processed, "LanceDB indexing completed");
		Ok(processed)
	}
}

fn to_record_batch(fragments: &[Fragment], embeddings: &[Vec<f32>], dim: usize) -> Result<RecordBatch> {
	let dim_i32 = i32::try_from(dim)?;
	let mut ids = Vec::with_capacity(fragments.len()); let mut modules = Vec::with_capacity(fragments.len());
	let mut mins = Vec::with_capacity(fragments.len()); let mut maxs = Vec::with_capacity(fragments.len());
	let mut payloads = Vec::with_capacity(fragments.len()); let mut vectors: Vec<Option<Vec<Option<f32>>>> = Vec::with_capacity(fragments.len());
	for (f, e) in fragments.iter().zip(embeddings) {
		let (lo, hi) = f.version.key_bounds();
		ids.push(f.id.clone()); modules.push(f.module.to_lowercase());
		mins.push(key_to_i64(lo)); maxs.push(key_to_i64(hi));
		payloads.push(serde_json::to_string(f)?);
		vectors.push(Some(e.iter().map(|&x| Some(x)).collect()));
	}
	Ok(RecordBatch::try_new(build_fragment_schema(dim_i32), vec![
		Arc::new(StringArray::from(ids)),
		Arc::new(StringArray::from(modules)),
		Arc::new(Int64Array::from(mins)),
		Arc::new(Int64Array::from(maxs)),
		Arc::new(StringArray::from(payloads)),
		Arc::new(FixedSizeListArray::from_iter_primitive::<arrow_array::types::Float32Type, _, _>(vectors.into_iter(), dim_i32)),
	])?)
}
