use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::ops::Bound;
use tantivy::collector::TopDocs;
use tantivy::query::{BooleanQuery, Occur, Query, QueryParser, RangeQuery, TermQuery, TermSetQuery};
use tantivy::schema::{IndexRecordOption, Value};
use tantivy::{TantivyDocument, Term};
use tracing::debug;

use gestdoc_core::traits::{FragmentStore, LexicalStore};
use gestdoc_core::types::{Fragment, FragmentId, SearchFilters, SearchHit, SourceKind};

use crate::index::TantivyFragmentIndex;

/// Per-field weights of the BM25 query: exact identifiers first, then
/// headings, then body text.
const FIELD_BOOSTS: [(&str, f32); 5] = [("title", 2.0), ("path", 1.5), ("text", 1.0), ("param_name", 3.0), ("error_code", 4.0)];

impl TantivyFragmentIndex {
	fn build_query(&self, query_text: &str, filters: &SearchFilters) -> Result<Box<dyn Query>> {
		let f = &self.fields;
		let mut parser = QueryParser::for_index(&self.index, vec![f.title, f.path, f.text, f.param_name, f.error_code]);
		for (name, boost) in FIELD_BOOSTS {
			parser.set_field_boost(self.index.schema().get_field(name)?, boost);
		}
		let (text_query, errors) = parser.parse_query_lenient(query_text);
		if !errors.is_empty() { debug!(?errors, "lenient query parse dropped parts of the query"); }
		if filters.is_empty() { return Ok(text_query); }

		let mut clauses: Vec<(Occur, Box<dyn Query>)> = vec![(Occur::Must, text_query)];
		if let Some(module) = &filters.module {
			let term = Term::from_field_text(f.module, &module.to_lowercase());
			clauses.push((Occur::Must, Box::new(TermQuery::new(term, IndexRecordOption::Basic))));
		}
		if let Some(version) = &filters.version {
			let key = filters.version_key().ok_or_else(|| anyhow!("unparseable version filter '{version}'"))?;
			let min = RangeQuery::new(Bound::Unbounded, Bound::Included(Term::from_field_u64(f.version_min, key)));
			let max = RangeQuery::new(Bound::Included(Term::from_field_u64(f.version_max, key)), Bound::Unbounded);
			clauses.push((Occur::Must, Box::new(min)));
			clauses.push((Occur::Must, Box::new(max)));
		}
		Ok(Box::new(BooleanQuery::new(clauses)))
	}

	pub fn search_hits(&self, query_text: &str, top_k: usize, filters: &SearchFilters) -> Result<Vec<SearchHit>> {
		if top_k == 0 || query_text.trim().is_empty() { return Ok(Vec::new()); }
		let query = self.build_query(query_text, filters)?;
		let searcher = self.reader.searcher();
		let top_docs = searcher.search(&query, &TopDocs::with_limit(top_k))?;
		let mut hits = Vec::with_capacity(top_docs.len());
		for (rank, (score, addr)) in top_docs.into_iter().enumerate() {
			let doc: TantivyDocument = searcher.doc(addr)?;
			let id = doc.get_first(self.fields.id).and_then(|v| v.as_str()).ok_or_else(|| anyhow!("document without id"))?;
			hits.push(SearchHit { id: id.to_string(), rank: rank + 1, score, source: SourceKind::Lexical });
		}
		debug!(query = query_text, hits = hits.len(), "lexical search");
		Ok(hits)
	}

	pub fn fetch(&self, ids: &[FragmentId]) -> Result<Vec<Fragment>> {
		if ids.is_empty() { return Ok(Vec::new()); }
		let terms = ids.iter().map(|id| Term::from_field_text(self.fields.id, id));
		let query = TermSetQuery::new(terms);
		let searcher = self.reader.searcher();
		let top_docs = searcher.search(&query, &TopDocs::with_limit(ids.len()))?;
		let mut by_id: HashMap<String, Fragment> = HashMap::with_capacity(top_docs.len());
		for (_, addr) in top_docs {
			let doc: TantivyDocument = searcher.doc(addr)?;
			let payload = doc.get_first(self.fields.payload).and_then(|v| v.as_str()).ok_or_else(|| anyhow!("document without payload"))?;
			let fragment: Fragment = serde_json::from_str(payload)?;
			by_id.insert(fragment.id.clone(), fragment);
		}
		Ok(ids.iter().filter_map(|id| by_id.remove(id)).collect())
	}
}

impl LexicalStore for TantivyFragmentIndex {
	async fn search(&self, query: &str, top_k: usize, filters: &SearchFilters) -> Result<Vec<SearchHit>> {
		let index = self.clone();
		let (query, filters) = (query.to_string(), filters.clone());
		tokio::task::spawn_blocking(move || index.search_hits(&query, top_k, &filters)).await?
	}
}

impl FragmentStore for TantivyFragmentIndex {
	async fn get_by_ids(&self, ids: &[FragmentId]) -> Result<Vec<Fragment>> {
		let index = self.clone();
		let ids = ids.to_vec();
		tokio::task::spawn_blocking(move || index.fetch(&ids)).await?
	}
}
