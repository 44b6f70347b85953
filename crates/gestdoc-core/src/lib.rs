//! gestdoc-core
//!
//! Domain types, error taxonomy, collaborator traits and configuration shared
//! by the stores and the retrieval engine.

pub mod config;
pub mod error;
pub mod fragments;
pub mod text;
pub mod traits;
pub mod types;
