//! gestdoc-retrieval
//!
//! Hybrid retrieval engine: classify the query, fuse dense and lexical hits
//! with reciprocal-rank fusion, rerank with a cross-encoder, cap same-section
//! duplicates and assemble a token-budgeted, citable context.

pub mod assemble;
pub mod classifier;
pub mod diversify;
pub mod engine;
pub mod fusion;
pub mod rerank;

pub use classifier::{Classifier, ClassifierRules};
pub use engine::{RetrieveOptions, Retriever};
