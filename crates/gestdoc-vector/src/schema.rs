use arrow_schema::{DataType, Field, Schema};
use std::sync::Arc;

/// Fragment table layout: filter columns stay flat so `only_if` can push
/// them down, the full fragment rides along as JSON in `payload`.
pub fn build_fragment_schema(dim: i32) -> Arc<Schema> {
	Arc::new(Schema::new(vec![
		Field::new("id", DataType::Utf8, false),
		Field::new("module", DataType::Utf8, false),
		Field::new("version_min", DataType::Int64, false),
		Field::new("version_max", DataType::Int64, false),
		Field::new("payload", DataType::Utf8, false),
		Field::new("vector", DataType::FixedSizeList(Arc::new(Field::new("item", DataType::Float32, true)), dim), true),
	]))
}

/// Version keys fit in 48 bits; open upper bounds saturate.
pub fn key_to_i64(key: u64) -> i64 { i64::try_from(key).unwrap_or(i64::MAX) }
