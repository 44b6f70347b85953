use tantivy::schema::{IndexRecordOption, Schema, TextFieldIndexing, TextOptions, FAST, INDEXED, STORED, STRING};
use tantivy::tokenizer::{AsciiFoldingFilter, Language, LowerCaser, RawTokenizer, RemoveLongFilter, SimpleTokenizer, Stemmer, StopWordFilter, TextAnalyzer};
use tantivy::Index;

use gestdoc_core::text::ITALIAN_STOPWORDS;

pub const ITALIAN_TOKENIZER: &str = "it_text";
pub const EXACT_TOKENIZER: &str = "exact_lower";

pub fn build_schema() -> Schema {
	let mut schema_builder = Schema::builder();
	let _id_field = schema_builder.add_text_field("id", STRING | STORED);
	let italian = TextFieldIndexing::default().set_tokenizer(ITALIAN_TOKENIZER).set_index_option(IndexRecordOption::WithFreqsAndPositions);
	let italian_options = TextOptions::default().set_indexing_options(italian);
	let _title_field = schema_builder.add_text_field("title", italian_options.clone());
	let _path_field = schema_builder.add_text_field("path", italian_options.clone());
	let _text_field = schema_builder.add_text_field("text", italian_options);
	let exact = TextFieldIndexing::default().set_tokenizer(EXACT_TOKENIZER).set_index_option(IndexRecordOption::WithFreqs);
	let exact_options = TextOptions::default().set_indexing_options(exact);
	let _param_field = schema_builder.add_text_field("param_name", exact_options.clone());
	let _error_field = schema_builder.add_text_field("error_code", exact_options);
	let _module_field = schema_builder.add_text_field("module", STRING);
	let _version_min_field = schema_builder.add_u64_field("version_min", INDEXED | FAST);
	let _version_max_field = schema_builder.add_u64_field("version_max", INDEXED | FAST);
	let _payload_field = schema_builder.add_text_field("payload", STORED);
	schema_builder.build()
}

/// Italian analyzer: lowercase, stopwords, accent folding, Snowball stemming.
pub fn register_tokenizers(index: &Index) {
	let italian = TextAnalyzer::builder(SimpleTokenizer::default())
		.filter(RemoveLongFilter::limit(40))
		.filter(LowerCaser)
		.filter(StopWordFilter::remove(ITALIAN_STOPWORDS.iter().map(|s| (*s).to_string())))
		.filter(AsciiFoldingFilter)
		.filter(Stemmer::new(Language::Italian))
		.build();
	index.tokenizers().register(ITALIAN_TOKENIZER, italian);
	let exact = TextAnalyzer::builder(RawTokenizer::default()).filter(LowerCaser).build();
	index.tokenizers().register(EXACT_TOKENIZER, exact);
}
