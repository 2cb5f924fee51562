// Per-bot LanceDB index module
// Each bot owns one database directory acting as a durable cache of
// embedded document chunks. The cache is derived data: it is always
// reconstructible from the bot's file store and is deleted wholesale on
// invalidation.

#[cfg(test)]
mod tests;

use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::array::{
    Array, FixedSizeListArray, Float32Array, RecordBatchIterator, StringArray, UInt32Array,
};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use futures::TryStreamExt;
use lancedb::{
    Connection,
    query::{ExecutableQuery, QueryBase},
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::BotError;

const TABLE_NAME: &str = "chunks";

/// An embedded chunk ready to be persisted in a bot's index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddedChunk {
    /// The vector embedding of `content`.
    pub vector: Vec<f32>,
    /// The chunk text, stored alongside the vector so retrieval needs no
    /// second lookup.
    pub content: String,
    /// Absolute path of the source file, when known.
    pub source_path: Option<String>,
    /// Bare file name of the source, when known. Kept as an independent
    /// key because either field may be absent on stored rows.
    pub source_file_name: Option<String>,
    pub chunk_index: u32,
    pub token_count: u32,
}

impl EmbeddedChunk {
    /// Deterministic row id derived from source identity and content, so
    /// re-inserting identical content overwrites instead of duplicating.
    #[inline]
    pub fn row_id(&self) -> String {
        let mut hasher = std::hash::DefaultHasher::new();
        self.source_file_name.hash(&mut hasher);
        self.chunk_index.hash(&mut hasher);
        self.content.hash(&mut hasher);
        format!("{:016x}", hasher.finish())
    }
}

/// Source-location metadata of one stored chunk, as read back from the
/// docstore columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredChunkSource {
    pub source_path: Option<String>,
    pub source_file_name: Option<String>,
}

/// A chunk returned by similarity search.
#[derive(Debug, Clone)]
pub struct RetrievedChunk {
    pub content: String,
    pub source_file_name: Option<String>,
    pub distance: f32,
    pub similarity_score: f32,
}

/// Vector store + docstore for a single bot.
pub struct BotIndex {
    connection: Connection,
    index_dir: PathBuf,
    vector_dimension: usize,
}

impl std::fmt::Debug for BotIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BotIndex")
            .field("index_dir", &self.index_dir)
            .field("vector_dimension", &self.vector_dimension)
            .finish_non_exhaustive()
    }
}

impl BotIndex {
    /// Whether a persisted index exists for this directory. An empty
    /// directory does not count; it can be left behind by a failed build.
    #[inline]
    pub fn exists(index_dir: &Path) -> bool {
        std::fs::read_dir(index_dir)
            .map(|mut entries| entries.next().is_some())
            .unwrap_or(false)
    }

    /// Open (or create) the index database under `index_dir`.
    #[inline]
    pub async fn open(index_dir: &Path, vector_dimension: usize) -> Result<Self, BotError> {
        std::fs::create_dir_all(index_dir).map_err(|e| {
            BotError::Index(format!(
                "Failed to create index directory {}: {}",
                index_dir.display(),
                e
            ))
        })?;

        let uri = format!("file://{}", index_dir.display());
        let connection = lancedb::connect(&uri)
            .execute()
            .await
            .map_err(|e| BotError::Index(format!("Failed to connect to index: {}", e)))?;

        let index = Self {
            connection,
            index_dir: index_dir.to_path_buf(),
            vector_dimension,
        };
        index.initialize_table().await?;

        debug!("Opened bot index at {}", index_dir.display());
        Ok(index)
    }

    async fn initialize_table(&self) -> Result<(), BotError> {
        let table_names = self
            .connection
            .table_names()
            .execute()
            .await
            .map_err(|e| BotError::Index(format!("Failed to list tables: {}", e)))?;

        if table_names.contains(&TABLE_NAME.to_string()) {
            return Ok(());
        }

        self.connection
            .create_empty_table(TABLE_NAME, self.schema())
            .execute()
            .await
            .map_err(|e| BotError::Index(format!("Failed to create chunks table: {}", e)))?;

        info!(
            "Created chunks table at {} with {} dimensions",
            self.index_dir.display(),
            self.vector_dimension
        );
        Ok(())
    }

    fn schema(&self) -> Arc<Schema> {
        Arc::new(Schema::new(vec![
            Field::new("id", DataType::Utf8, false),
            Field::new(
                "vector",
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, false)),
                    self.vector_dimension as i32,
                ),
                false,
            ),
            Field::new("content", DataType::Utf8, false),
            Field::new("source_path", DataType::Utf8, true),
            Field::new("source_file_name", DataType::Utf8, true),
            Field::new("chunk_index", DataType::UInt32, false),
            Field::new("token_count", DataType::UInt32, false),
        ]))
    }

    /// Insert a batch of embedded chunks. Rows with ids already present
    /// are replaced, making repeated inserts of the same content
    /// idempotent.
    #[inline]
    pub async fn insert_chunks(&self, chunks: &[EmbeddedChunk]) -> Result<(), BotError> {
        if chunks.is_empty() {
            debug!("No chunks to insert");
            return Ok(());
        }

        for chunk in chunks {
            if chunk.vector.len() != self.vector_dimension {
                return Err(BotError::Index(format!(
                    "Embedding dimension mismatch: got {}, index expects {}",
                    chunk.vector.len(),
                    self.vector_dimension
                )));
            }
        }

        let table = self.open_table().await?;

        // Content-hash deduplication: drop any rows being re-inserted
        let ids: Vec<String> = chunks.iter().map(|c| format!("'{}'", c.row_id())).collect();
        table
            .delete(&format!("id IN ({})", ids.join(", ")))
            .await
            .map_err(|e| BotError::Index(format!("Failed to clear duplicate rows: {}", e)))?;

        let record_batch = self.create_record_batch(chunks)?;
        let schema = record_batch.schema();
        let reader = RecordBatchIterator::new(std::iter::once(Ok(record_batch)), schema);
        table
            .add(reader)
            .execute()
            .await
            .map_err(|e| BotError::Index(format!("Failed to insert chunks: {}", e)))?;

        info!(
            "Inserted {} chunks into {}",
            chunks.len(),
            self.index_dir.display()
        );
        Ok(())
    }

    fn create_record_batch(&self, chunks: &[EmbeddedChunk]) -> Result<RecordBatch, BotError> {
        let len = chunks.len();
        let mut ids = Vec::with_capacity(len);
        let mut contents = Vec::with_capacity(len);
        let mut source_paths = Vec::with_capacity(len);
        let mut source_file_names = Vec::with_capacity(len);
        let mut chunk_indices = Vec::with_capacity(len);
        let mut token_counts = Vec::with_capacity(len);
        let mut flat_values = Vec::with_capacity(len * self.vector_dimension);

        for chunk in chunks {
            ids.push(chunk.row_id());
            contents.push(chunk.content.as_str());
            source_paths.push(chunk.source_path.as_deref());
            source_file_names.push(chunk.source_file_name.as_deref());
            chunk_indices.push(chunk.chunk_index);
            token_counts.push(chunk.token_count);
            flat_values.extend_from_slice(&chunk.vector);
        }

        let values_array = Float32Array::from(flat_values);
        let field = Arc::new(Field::new("item", DataType::Float32, false));
        let vector_array = FixedSizeListArray::try_new(
            field,
            self.vector_dimension as i32,
            Arc::new(values_array),
            None,
        )
        .map_err(|e| BotError::Index(format!("Failed to create vector array: {}", e)))?;

        let arrays: Vec<Arc<dyn Array>> = vec![
            Arc::new(StringArray::from(ids)),
            Arc::new(vector_array),
            Arc::new(StringArray::from(contents)),
            Arc::new(StringArray::from(source_paths)),
            Arc::new(StringArray::from(source_file_names)),
            Arc::new(UInt32Array::from(chunk_indices)),
            Arc::new(UInt32Array::from(token_counts)),
        ];

        RecordBatch::try_new(self.schema(), arrays)
            .map_err(|e| BotError::Index(format!("Failed to create record batch: {}", e)))
    }

    /// Number of chunks in the index.
    #[inline]
    pub async fn count_chunks(&self) -> Result<usize, BotError> {
        let table = self.open_table().await?;
        table
            .count_rows(None)
            .await
            .map_err(|e| BotError::Index(format!("Failed to count chunks: {}", e)))
    }

    /// Read the source metadata of every stored chunk. Both metadata
    /// columns are returned as-is; callers decide how to resolve them to
    /// paths.
    #[inline]
    pub async fn stored_sources(&self) -> Result<Vec<StoredChunkSource>, BotError> {
        let table = self.open_table().await?;

        let mut results = table
            .query()
            .execute()
            .await
            .map_err(|e| BotError::Index(format!("Failed to scan docstore: {}", e)))?;

        let mut sources = Vec::new();
        while let Some(batch) = results
            .try_next()
            .await
            .map_err(|e| BotError::Index(format!("Failed to read docstore stream: {}", e)))?
        {
            sources.extend(Self::parse_source_batch(&batch)?);
        }

        debug!(
            "Scanned {} stored chunk sources from {}",
            sources.len(),
            self.index_dir.display()
        );
        Ok(sources)
    }

    fn parse_source_batch(batch: &RecordBatch) -> Result<Vec<StoredChunkSource>, BotError> {
        let source_paths = batch
            .column_by_name("source_path")
            .ok_or_else(|| BotError::Index("Missing source_path column".to_string()))?
            .as_any()
            .downcast_ref::<StringArray>()
            .ok_or_else(|| BotError::Index("Invalid source_path column type".to_string()))?;

        let file_names = batch
            .column_by_name("source_file_name")
            .ok_or_else(|| BotError::Index("Missing source_file_name column".to_string()))?
            .as_any()
            .downcast_ref::<StringArray>()
            .ok_or_else(|| BotError::Index("Invalid source_file_name column type".to_string()))?;

        let mut sources = Vec::with_capacity(batch.num_rows());
        for row in 0..batch.num_rows() {
            sources.push(StoredChunkSource {
                source_path: (!source_paths.is_null(row))
                    .then(|| source_paths.value(row).to_string()),
                source_file_name: (!file_names.is_null(row))
                    .then(|| file_names.value(row).to_string()),
            });
        }
        Ok(sources)
    }

    /// Similarity search over the chunk vectors.
    #[inline]
    pub async fn search(
        &self,
        query_vector: &[f32],
        limit: usize,
    ) -> Result<Vec<RetrievedChunk>, BotError> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let table = self.open_table().await?;
        let results = table
            .vector_search(query_vector)
            .map_err(|e| BotError::Index(format!("Failed to create vector search: {}", e)))?
            .column("vector")
            .limit(limit)
            .execute()
            .await
            .map_err(|e| BotError::Index(format!("Failed to execute search: {}", e)))?;

        let batches: Vec<RecordBatch> = results
            .try_collect()
            .await
            .map_err(|e| BotError::Index(format!("Failed to read search stream: {}", e)))?;

        let mut retrieved = Vec::new();
        for batch in &batches {
            retrieved.extend(Self::parse_search_batch(batch)?);
        }

        debug!("Retrieved {} chunks for query", retrieved.len());
        Ok(retrieved)
    }

    fn parse_search_batch(batch: &RecordBatch) -> Result<Vec<RetrievedChunk>, BotError> {
        let contents = batch
            .column_by_name("content")
            .ok_or_else(|| BotError::Index("Missing content column".to_string()))?
            .as_any()
            .downcast_ref::<StringArray>()
            .ok_or_else(|| BotError::Index("Invalid content column type".to_string()))?;

        let file_names = batch
            .column_by_name("source_file_name")
            .ok_or_else(|| BotError::Index("Missing source_file_name column".to_string()))?
            .as_any()
            .downcast_ref::<StringArray>()
            .ok_or_else(|| BotError::Index("Invalid source_file_name column type".to_string()))?;

        let distances = batch
            .column_by_name("_distance")
            .map(|col| col.as_any().downcast_ref::<Float32Array>());

        let mut retrieved = Vec::with_capacity(batch.num_rows());
        for row in 0..batch.num_rows() {
            let distance = distances
                .flatten()
                .map_or(0.0, |d| if d.is_null(row) { 0.0 } else { d.value(row) });

            retrieved.push(RetrievedChunk {
                content: contents.value(row).to_string(),
                source_file_name: (!file_names.is_null(row))
                    .then(|| file_names.value(row).to_string()),
                distance,
                similarity_score: 1.0 - distance,
            });
        }
        Ok(retrieved)
    }

    async fn open_table(&self) -> Result<lancedb::Table, BotError> {
        self.connection
            .open_table(TABLE_NAME)
            .execute()
            .await
            .map_err(|e| BotError::Index(format!("Failed to open chunks table: {}", e)))
    }

    /// Delete a bot's entire index cache directory. Missing directories
    /// are fine; failures are logged and reported so callers can decide
    /// whether they matter.
    #[inline]
    pub fn delete_index_dir(index_dir: &Path) -> Result<(), BotError> {
        if !index_dir.exists() {
            return Ok(());
        }

        std::fs::remove_dir_all(index_dir).map_err(|e| {
            warn!(
                "Failed to remove index directory {}: {}",
                index_dir.display(),
                e
            );
            BotError::Index(format!(
                "Failed to remove index directory {}: {}",
                index_dir.display(),
                e
            ))
        })?;

        info!("Deleted index cache at {}", index_dir.display());
        Ok(())
    }
}
