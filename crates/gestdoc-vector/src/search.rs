use anyhow::{Result, anyhow};
use arrow_array::{Array, Float32Array, RecordBatch, StringArray};
use futures::TryStreamExt;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::{Connection, DistanceType};
use std::collections::HashMap;
use std::path::Path;
use tracing::debug;

use gestdoc_core::traits::{DenseStore, FragmentStore};
use gestdoc_core::types::{Fragment, FragmentId, SearchFilters, SearchHit, SourceKind};

use crate::schema::key_to_i64;
use crate::table::{open_db, sql_literal};

/// Read side of the fragment table: cosine kNN plus id lookups.
pub struct LanceFragmentStore { pub(crate) db: Connection, pub(crate) table_name: String }

impl LanceFragmentStore {
	pub async fn open(db_path: &Path, table_name: &str) -> Result<Self> {
		let db = open_db(db_path.to_string_lossy().as_ref()).await?;
		Ok(Self { db, table_name: table_name.to_string() })
	}

	pub async fn count(&self) -> Result<usize> {
		let table = self.db.open_table(&self.table_name).execute().await?;
		Ok(table.count_rows(None).await?)
	}

	pub async fn search_vec(&self, vector: &[f32], top_k: usize, filters: &SearchFilters) -> Result<Vec<SearchHit>> {
		if top_k == 0 { return Ok(Vec::new()); }
		let table = self.db.open_table(&self.table_name).execute().await?;
		let mut query = table.vector_search(vector.to_vec())?.distance_type(DistanceType::Cosine).limit(top_k);
		if let Some(predicate) = filter_sql(filters)? { query = query.only_if(predicate); }
		let mut stream = query.execute().await?;
		let mut hits = Vec::new();
		while let Some(batch) = stream.try_next().await? {
			let ids = string_column(&batch, "id")?;
			let distances = batch.column_by_name("_distance").and_then(|c| c.as_any().downcast_ref::<Float32Array>());
			for i in 0..batch.num_rows() {
				let score = distances.map_or(0.0, |d| 1.0 - d.value(i));
				hits.push(SearchHit { id: ids.value(i).to_string(), rank: hits.len() + 1, score, source: SourceKind::Dense });
			}
		}
		debug!(hits = hits.len(), "dense search");
		Ok(hits)
	}

	pub async fn fetch(&self, ids: &[FragmentId]) -> Result<Vec<Fragment>> {
		if ids.is_empty() { return Ok(Vec::new()); }
		let table = self.db.open_table(&self.table_name).execute().await?;
		let list = ids.iter().map(|id| sql_literal(id)).collect::<Vec<_>>().join(", ");
		let mut stream = table.query().only_if(format!("id IN ({list})")).limit(ids.len()).execute().await?;
		let mut by_id: HashMap<String, Fragment> = HashMap::with_capacity(ids.len());
		while let Some(batch) = stream.try_next().await? {
			let payloads = string_column(&batch, "payload")?;
			for i in 0..batch.num_rows() {
				let fragment: Fragment = serde_json::from_str(payloads.value(i))?;
				by_id.insert(fragment.id.clone(), fragment);
			}
		}
		Ok(ids.iter().filter_map(|id| by_id.remove(id)).collect())
	}
}

fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray> {
	batch.column_by_name(name).and_then(|c| c.as_any().downcast_ref::<StringArray>()).ok_or_else(|| anyhow!("column '{name}' missing"))
}

/// SQL predicate for the hard filters, `None` when unfiltered.
pub fn filter_sql(filters: &SearchFilters) -> Result<Option<String>> {
	let mut parts = Vec::new();
	if let Some(module) = &filters.module { parts.push(format!("module = {}", sql_literal(&module.to_lowercase()))); }
	if let Some(version) = &filters.version {
		let key = key_to_i64(filters.version_key().ok_or_else(|| anyhow!("unparseable version filter '{version}'"))?);
		parts.push(format!("version_min <= {key} AND version_max >= {key}"));
	}
	Ok(if parts.is_empty() { None } else { Some(parts.join(" AND ")) })
}

impl DenseStore for LanceFragmentStore {
	async fn search(&self, vector: &[f32], top_k: usize, filters: &SearchFilters) -> Result<Vec<SearchHit>> {
		self.search_vec(vector, top_k, filters).await
	}
}

impl FragmentStore for LanceFragmentStore {
	async fn get_by_ids(&self, ids: &[FragmentId]) -> Result<Vec<Fragment>> {
		self.fetch(ids).await
	}
}
