//! LanceDB connection helpers.
use anyhow::Result;
use arrow_array::{RecordBatch, RecordBatchIterator};
use lancedb::{connect, Connection};

pub async fn open_db(uri: &str) -> Result<Connection> {
	Ok(connect(uri).execute().await?)
}

pub async fn table_exists(conn: &Connection, name: &str) -> Result<bool> {
	Ok(conn.table_names().execute().await?.iter().any(|n| n == name))
}

/// Insert-or-replace rows keyed by `id`; creates the table on first write.
pub async fn upsert_batch(conn: &Connection, name: &str, batch: RecordBatch) -> Result<()> {
	let schema = batch.schema();
	let reader = Box::new(RecordBatchIterator::new(vec![Ok(batch)].into_iter(), schema));
	if table_exists(conn, name).await? {
		let table = conn.open_table(name).execute().await?;
		let mut mi = table.merge_insert(&["id"]);
		mi.when_matched_update_all(None).when_not_matched_insert_all();
		mi.execute(reader).await?;
	} else {
		conn.create_table(name, reader).execute().await?;
	}
	Ok(())
}

/// SQL string literal with quotes escaped.
pub fn sql_literal(value: &str) -> String { format!("'{}'", value.replace('\'', "''")) }
