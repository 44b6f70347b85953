//! LanceDB dense store: fragment rows with embeddings, cosine kNN with
//! module/version filters pushed down as SQL, and id lookups.

pub mod schema;
pub mod search;
pub mod table;
pub mod writer;

pub use search::LanceFragmentStore;
pub use writer::LanceFragmentIndexer;
