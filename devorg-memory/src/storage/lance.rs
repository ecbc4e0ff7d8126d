//! Vector index backed by LanceDB

use arrow_array::{
    Array, FixedSizeListArray, Float32Array, RecordBatch, RecordBatchIterator, StringArray,
};
use arrow_schema::{DataType, Field, Schema};
use async_trait::async_trait;
use futures::TryStreamExt;
use lance_arrow::FixedSizeListArrayExt;
use lancedb::connect;
use lancedb::query::{ExecutableQuery, QueryBase};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

use crate::error::{Error, Result};
use crate::storage::vector::{SearchHit, VectorFilter, VectorIndex, VectorMetadata};

const TABLE_NAME: &str = "memory_vectors";

/// Vector index using a local LanceDB table
pub struct LanceVectorIndex {
    db: lancedb::Connection,
    dimensions: usize,
}

impl LanceVectorIndex {
    /// Open (or create) the LanceDB database under `path`
    pub async fn open(path: impl AsRef<Path>, dimensions: usize) -> Result<Self> {
        let uri = path.as_ref().to_string_lossy().into_owned();
        let db = connect(&uri)
            .execute()
            .await
            .map_err(|e| Error::vector_db(e.to_string()))?;

        let index = Self { db, dimensions };
        index.ensure_table().await?;
        Ok(index)
    }

    fn schema(&self) -> Schema {
        Schema::new(vec![
            Field::new("id", DataType::Utf8, false),
            Field::new("agent_id", DataType::Utf8, false),
            Field::new("memory_type", DataType::Utf8, false),
            Field::new(
                "vector",
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, true)),
                    self.dimensions as i32,
                ),
                false,
            ),
        ])
    }

    async fn ensure_table(&self) -> Result<()> {
        let tables = self
            .db
            .table_names()
            .execute()
            .await
            .map_err(|e| Error::vector_db(e.to_string()))?;

        if !tables.iter().any(|t| t == TABLE_NAME) {
            let schema = Arc::new(self.schema());
            let empty_batch = RecordBatch::new_empty(schema.clone());
            let reader = RecordBatchIterator::new(vec![Ok(empty_batch)], schema);

            self.db
                .create_table(TABLE_NAME, Box::new(reader))
                .execute()
                .await
                .map_err(|e| Error::vector_db(e.to_string()))?;
        }

        Ok(())
    }

    async fn table(&self) -> Result<lancedb::Table> {
        self.db
            .open_table(TABLE_NAME)
            .execute()
            .await
            .map_err(|e| Error::vector_db(e.to_string()))
    }
}

#[async_trait]
impl VectorIndex for LanceVectorIndex {
    async fn insert(&self, id: &str, vector: &[f32], metadata: &VectorMetadata) -> Result<()> {
        if vector.len() != self.dimensions {
            return Err(Error::vector_db(format!(
                "Embedding dimension mismatch: expected {}, got {}",
                self.dimensions,
                vector.len()
            )));
        }

        // Overwrite semantics: drop any previous row for this id
        self.delete(id).await?;

        let values = Float32Array::from(vector.to_vec());
        let vector_array = FixedSizeListArray::try_new_from_values(values, self.dimensions as i32)
            .map_err(|e: arrow_schema::ArrowError| Error::vector_db(e.to_string()))?;

        let schema = Arc::new(self.schema());
        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![
                Arc::new(StringArray::from(vec![id.to_string()])) as Arc<dyn Array>,
                Arc::new(StringArray::from(vec![metadata.agent_id.clone()])),
                Arc::new(StringArray::from(vec![metadata.memory_type.as_str().to_string()])),
                Arc::new(vector_array),
            ],
        )
        .map_err(|e| Error::vector_db(e.to_string()))?;

        let reader = RecordBatchIterator::new(vec![Ok(batch)], schema);
        self.table()
            .await?
            .add(Box::new(reader))
            .execute()
            .await
            .map_err(|e| Error::vector_db(e.to_string()))?;

        debug!(memory_id = %id, "Indexed memory vector");
        Ok(())
    }

    async fn search(
        &self,
        vector: &[f32],
        limit: usize,
        min_score: f32,
        filter: &VectorFilter,
    ) -> Result<Vec<SearchHit>> {
        let table = self.table().await?;

        let mut query = table
            .vector_search(vector.to_vec())
            .map_err(|e: lancedb::Error| Error::vector_db(e.to_string()))?
            .limit(limit);

        let mut filters = Vec::new();
        if let Some(agent_id) = &filter.agent_id {
            filters.push(format!("agent_id = '{}'", quote(agent_id)));
        }
        if let Some(memory_type) = filter.memory_type {
            filters.push(format!("memory_type = '{}'", memory_type.as_str()));
        }
        if !filters.is_empty() {
            query = query.only_if(filters.join(" AND "));
        }

        let batches: Vec<RecordBatch> = query
            .execute()
            .await
            .map_err(|e: lancedb::Error| Error::vector_db(e.to_string()))?
            .try_collect::<Vec<RecordBatch>>()
            .await
            .map_err(|e: lancedb::Error| Error::vector_db(e.to_string()))?;

        let mut hits = Vec::new();
        for batch in batches {
            let ids = batch
                .column_by_name("id")
                .and_then(|c| c.as_any().downcast_ref::<StringArray>())
                .ok_or_else(|| Error::vector_db("id column is missing or not StringArray"))?;
            let distances = batch
                .column_by_name("_distance")
                .and_then(|c| c.as_any().downcast_ref::<Float32Array>())
                .ok_or_else(|| Error::vector_db("_distance column is missing or not Float32Array"))?;

            for i in 0..batch.num_rows() {
                // LanceDB returns L2 distance, convert to similarity score
                let score = 1.0 / (1.0 + distances.value(i));
                if score >= min_score {
                    hits.push(SearchHit {
                        id: ids.value(i).to_string(),
                        score,
                    });
                }
            }
        }

        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        Ok(hits)
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.table()
            .await?
            .delete(&format!("id = '{}'", quote(id)))
            .await
            .map_err(|e| Error::vector_db(e.to_string()))?;
        Ok(())
    }
}

/// Escape a value for use inside a single-quoted filter literal
fn quote(value: &str) -> String {
    value.replace('\'', "''")
}
