//! LanceDB connection and housekeeping helpers.
//!
//! Provides the database open function, an ensure-table helper, the key/value
//! `meta` table that carries the index manifest, and the row reader used on load.
use anyhow::{Result, anyhow, bail};
use arrow_array::cast::AsArray;
use arrow_array::{Array, FixedSizeListArray, Int32Array, Int64Array, RecordBatch, RecordBatchIterator, StringArray};
use futures::TryStreamExt;
use lancedb::query::ExecutableQuery;
use lancedb::{connect, Connection};
use std::collections::HashMap;
use std::sync::Arc;

use opsrag_core::types::Chunk;

use crate::schema::{build_meta_schema, CHUNKS_TABLE, META_TABLE};

pub async fn open_db(uri: &str) -> Result<Connection> {
    Ok(connect(uri).execute().await?)
}

pub async fn table_exists(conn: &Connection, name: &str) -> Result<bool> {
    Ok(conn.table_names().execute().await?.iter().any(|n| n == name))
}

pub async fn ensure_table(conn: &Connection, name: &str, schema: Arc<arrow_schema::Schema>) -> Result<()> {
    if table_exists(conn, name).await? {
        return Ok(());
    }
    // create empty table with 0 rows
    let iter = RecordBatchIterator::new(vec![].into_iter(), schema.clone());
    conn.create_table(name, Box::new(iter)).execute().await?;
    Ok(())
}

/// Write all `entries` into a fresh `meta` table. Only called on staging databases.
pub async fn write_meta(conn: &Connection, entries: &[(String, String)]) -> Result<()> {
    let schema = build_meta_schema();
    let keys: Vec<String> = entries.iter().map(|(k, _)| k.clone()).collect();
    let values: Vec<String> = entries.iter().map(|(_, v)| v.clone()).collect();
    let rb = RecordBatch::try_new(
        schema.clone(),
        vec![Arc::new(StringArray::from(keys)), Arc::new(StringArray::from(values))],
    )?;
    let reader = Box::new(RecordBatchIterator::new(vec![Ok(rb)].into_iter(), schema));
    conn.create_table(META_TABLE, reader).execute().await?;
    Ok(())
}

pub async fn read_meta(conn: &Connection) -> Result<HashMap<String, String>> {
    if !table_exists(conn, META_TABLE).await? { bail!("meta table missing"); }
    let t = conn.open_table(META_TABLE).execute().await?;
    let mut out = HashMap::new();
    let mut stream = t.query().execute().await?;
    while let Some(batch) = stream.try_next().await? {
        let key = batch.column_by_name("key").and_then(|c| c.as_any().downcast_ref::<StringArray>()).ok_or_else(|| anyhow!("meta.key column missing"))?;
        let val = batch.column_by_name("value").and_then(|c| c.as_any().downcast_ref::<StringArray>()).ok_or_else(|| anyhow!("meta.value column missing"))?;
        for i in 0..batch.num_rows() { out.insert(key.value(i).to_string(), val.value(i).to_string()); }
    }
    Ok(out)
}

/// Read every `(chunk, vector)` row, ordered by chunk index.
pub async fn read_chunks(conn: &Connection) -> Result<Vec<(Chunk, Vec<f32>)>> {
    if !table_exists(conn, CHUNKS_TABLE).await? { bail!("chunks table missing"); }
    let t = conn.open_table(CHUNKS_TABLE).execute().await?;
    let mut rows = Vec::new();
    let mut stream = t.query().execute().await?;
    while let Some(batch) = stream.try_next().await? {
        let idx_col = batch.column_by_name("chunk_index").and_then(|c| c.as_any().downcast_ref::<Int32Array>()).ok_or_else(|| anyhow!("chunks.chunk_index column missing"))?;
        let off_col = batch.column_by_name("offset").and_then(|c| c.as_any().downcast_ref::<Int64Array>()).ok_or_else(|| anyhow!("chunks.offset column missing"))?;
        let text_col = batch.column_by_name("text").and_then(|c| c.as_any().downcast_ref::<StringArray>()).ok_or_else(|| anyhow!("chunks.text column missing"))?;
        let vec_col = batch.column_by_name("vector").and_then(|c| c.as_any().downcast_ref::<FixedSizeListArray>()).ok_or_else(|| anyhow!("chunks.vector column missing"))?;
        for i in 0..batch.num_rows() {
            let index = usize::try_from(idx_col.value(i)).map_err(|_| anyhow!("negative chunk_index at row {}", i))?;
            if !vec_col.is_valid(i) { bail!("chunk {} has no vector", index); }
            let offset = if off_col.is_null(i) { None } else { Some(usize::try_from(off_col.value(i)).map_err(|_| anyhow!("negative offset for chunk {}", index))?) };
            let list = vec_col.value(i);
            let vector = list.as_primitive::<arrow_array::types::Float32Type>().values().iter().copied().collect::<Vec<f32>>();
            rows.push((Chunk::new(index, offset, text_col.value(i)), vector));
        }
    }
    rows.sort_by_key(|(c, _)| c.index);
    Ok(rows)
}
