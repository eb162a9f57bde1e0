use anyhow::{Result, anyhow, ensure};
use arrow_array::{FixedSizeListArray, Int32Array, Int64Array, RecordBatch, RecordBatchIterator, StringArray};
use lancedb::Connection;
use std::sync::Arc;
use tracing::debug;

use opsrag_core::types::Chunk;

use crate::schema::{build_chunks_schema, CHUNKS_TABLE};
use crate::table::ensure_table;

const WRITE_BATCH: usize = 1000;

/// Write `chunks`/`embeddings` into a new `chunks` table on `conn`.
pub async fn write_chunks(conn: &Connection, chunks: &[Chunk], embeddings: &[Vec<f32>], dim: usize) -> Result<()> {
	ensure!(chunks.len() == embeddings.len(), "chunks and embeddings length must match ({} vs {})", chunks.len(), embeddings.len());
	let dim = i32::try_from(dim).map_err(|_| anyhow!("dimension {} out of range", dim))?;
	let schema = build_chunks_schema(dim);
	if chunks.is_empty() {
		return ensure_table(conn, CHUNKS_TABLE, schema).await;
	}
	let mut table = None;
	for (batch_no, (c, e)) in chunks.chunks(WRITE_BATCH).zip(embeddings.chunks(WRITE_BATCH)).enumerate() {
		let record_batch = to_record_batch(c, e, dim)?;
		let reader = Box::new(RecordBatchIterator::new(vec![Ok(record_batch)].into_iter(), schema.clone()));
		match &table {
			None => table = Some(conn.create_table(CHUNKS_TABLE, reader).execute().await?),
			Some(t) => { t.add(reader).execute().await?; }
		}
		debug!(batch = batch_no, rows = c.len(), "wrote chunk batch");
	}
	Ok(())
}

fn to_record_batch(chunks: &[Chunk], embeddings: &[Vec<f32>], dim: i32) -> Result<RecordBatch> {
	let mut indices = Vec::with_capacity(chunks.len()); let mut offsets = Vec::with_capacity(chunks.len()); let mut texts = Vec::with_capacity(chunks.len());
	let mut vectors: Vec<Option<Vec<Option<f32>>>> = Vec::with_capacity(chunks.len());
	for (chunk, embedding) in chunks.iter().zip(embeddings) {
		indices.push(i32::try_from(chunk.index).map_err(|_| anyhow!("chunk index {} out of range", chunk.index))?);
		offsets.push(chunk.offset.map(|o| o as i64));
		texts.push(chunk.text.as_str());
		vectors.push(Some(embedding.iter().map(|&x| Some(x)).collect()));
	}
	let record_batch = RecordBatch::try_new(build_chunks_schema(dim), vec![
		Arc::new(Int32Array::from(indices)),
		Arc::new(Int64Array::from(offsets)),
		Arc::new(StringArray::from(texts)),
		Arc::new(FixedSizeListArray::from_iter_primitive::<arrow_array::types::Float32Type, _, _>(vectors.into_iter(), dim)),
	])?;
	Ok(record_batch)
}
