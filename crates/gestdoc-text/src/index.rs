use anyhow::Result;
use std::path::PathBuf;
use tantivy::schema::Field;
use tantivy::{doc, Index, IndexReader, IndexWriter, ReloadPolicy, Term};
use tracing::info;

use gestdoc_core::types::Fragment;

use crate::tantivy_utils::{build_schema, register_tokenizers};

#[derive(Clone, Copy)]
pub(crate) struct Fields {
	pub id: Field,
	pub title: Field,
	pub path: Field,
	pub text: Field,
	pub param_name: Field,
	pub error_code: Field,
	pub module: Field,
	pub version_min: Field,
	pub version_max: Field,
	pub payload: Field,
}

/// Lexical side of the fragment store: one tantivy document per fragment,
/// with the full fragment kept as a JSON payload for hydration.
///
/// Cloning shares the underlying index and reader.
#[derive(Clone)]
pub struct TantivyFragmentIndex {
	pub(crate) index: Index,
	pub(crate) reader: IndexReader,
	pub(crate) fields: Fields,
}

impl TantivyFragmentIndex {
	/// Create a fresh index in `index_dir`, wiping any previous one.
	pub fn create(index_dir: PathBuf) -> Result<Self> {
		if index_dir.exists() { std::fs::remove_dir_all(&index_dir)?; }
		std::fs::create_dir_all(&index_dir)?;
		Self::from_index(Index::create_in_dir(&index_dir, build_schema())?)
	}

	pub fn open(index_dir: PathBuf) -> Result<Self> {
		Self::from_index(Index::open_in_dir(&index_dir)?)
	}

	pub fn in_memory() -> Result<Self> {
		Self::from_index(Index::create_in_ram(build_schema()))
	}

	fn from_index(index: Index) -> Result<Self> {
		register_tokenizers(&index);
		let schema = index.schema();
		let fields = Fields {
			id: schema.get_field("id")?,
			title: schema.get_field("title")?,
			path: schema.get_field("path")?,
			text: schema.get_field("text")?,
			param_name: schema.get_field("param_name")?,
			error_code: schema.get_field("error_code")?,
			module: schema.get_field("module")?,
			version_min: schema.get_field("version_min")?,
			version_max: schema.get_field("version_max")?,
			payload: schema.get_field("payload")?,
		};
		let reader = index.reader_builder().reload_policy(ReloadPolicy::Manual).try_into()?;
		Ok(Self { index, reader, fields })
	}

	/// Add or replace fragments. A fragment whose id is already indexed is
	/// deleted first, so re-ingesting unchanged text is idempotent.
	pub fn index(&self, fragments: &[Fragment]) -> Result<usize> {
		let f = &self.fields;
		let mut index_writer: IndexWriter = self.index.writer(50_000_000)?;
		for fragment in fragments {
			index_writer.delete_term(Term::from_field_text(f.id, &fragment.id));
			let (version_min, version_max) = fragment.version.key_bounds();
			let mut document = doc!(
				f.id => fragment.id.clone(),
				f.title => fragment.title.clone(),
				f.text => fragment.text.clone(),
				f.module => fragment.module.to_lowercase(),
				f.version_min => version_min,
				f.version_max => version_max,
				f.payload => serde_json::to_string(fragment)?,
			);
			for label in &fragment.path { document.add_text(f.path, label); }
			if let Some(param) = &fragment.param_name { document.add_text(f.param_name, param); }
			if let Some(code) = &fragment.error_code { document.add_text(f.error_code, code); }
			index_writer.add_document(document)?;
		}
		index_writer.commit()?;
		self.reader.reload()?;
		info!(count = fragments.len(), docs = self.num_docs(), "tantivy index committed");
		Ok(fragments.len())
	}

	pub fn num_docs(&self) -> u64 { self.reader.searcher().num_docs() }
}
