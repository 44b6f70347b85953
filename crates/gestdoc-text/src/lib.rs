//! gestdoc-text
//!
//! Tantivy-backed lexical store: Italian analysis, BM25 over title, path,
//! body and exact identifier fields, module/version filters pushed into the
//! query, and batched fragment hydration from the stored payload.

pub mod tantivy_utils;
pub mod index;
pub mod search;

pub use index::TantivyFragmentIndex;
