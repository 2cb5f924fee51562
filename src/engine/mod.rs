// Chat-engine factory: per request, reconcile a bot's file store with its
// persisted index cache and produce a retrieval-augmented engine.
//
// The decision is recomputed on every chat request rather than held in a
// resident state machine. Durability lives entirely in the filesystem, so
// the factory stays correct across restarts and out-of-band file changes.


use std::collections::HashMap;
use std::sync::{Arc, Weak};

use futures::Stream;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::BotError;
use crate::config::Config;
use crate::database::lancedb::{BotIndex, EmbeddedChunk, RetrievedChunk};
use crate::documents::chunking::chunk_document;
use crate::documents::{LoadedDocument, load_bot_documents};
use crate::index::plan_incremental;
use crate::model::{ChatTurn, ModelClient};

/// Retrieval depth for bots with indexed documents.
pub const RETRIEVAL_TOP_K: usize = 5;

/// Which state the factory observed for a bot's index on this request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexDecision {
    /// File store empty or absent: retrieval disabled, stale cache removed.
    NoDocuments,
    /// Persisted index found: loaded, with incremental inserts for new files.
    ExistingIndex,
    /// Documents on disk but no usable index: built fresh from all files.
    NoIndexYet,
}

/// Builds chat engines, serializing index builds per bot.
#[derive(Clone)]
pub struct EngineFactory {
    config: Config,
    model: ModelClient,
    // Advisory locks keyed by bot id, closing the race where two first
    // requests both observe "no index yet" and build concurrently. Weak
    // entries die with the last in-flight build and are pruned on lookup.
    build_locks: Arc<Mutex<HashMap<String, Weak<Mutex<()>>>>>,
}

/// A retrieval-augmented chat engine bound to one bot's knowledge.
#[derive(Debug)]
pub struct ChatEngine {
    index: Option<BotIndex>,
    top_k: usize,
    model: ModelClient,
    decision: IndexDecision,
}

impl EngineFactory {
    #[inline]
    pub fn new(config: Config, model: ModelClient) -> Self {
        Self {
            config,
            model,
            build_locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Produce a chat engine for `bot_id`, reconciling the file store with
    /// the index cache first.
    #[inline]
    pub async fn build_engine(&self, bot_id: &str) -> Result<ChatEngine, BotError> {
        ensure_safe_bot_id(bot_id)?;

        let lock = self.bot_lock(bot_id).await;
        let _guard = lock.lock().await;

        let files_dir = self.config.bot_files_dir(bot_id);
        let index_dir = self.config.bot_index_dir(bot_id);

        let documents = load_bot_documents(&files_dir)
            .await
            .map_err(|e| BotError::Document(format!("Failed to load documents: {:#}", e)))?;

        if documents.is_empty() {
            // An index with zero source documents is meaningless; drop any
            // stale cache so the bot reverts to instruction-only mode.
            if let Err(e) = BotIndex::delete_index_dir(&index_dir) {
                warn!("Could not remove stale cache for bot {}: {}", bot_id, e);
            }
            debug!("Bot {} has no documents, retrieval disabled", bot_id);
            return Ok(ChatEngine {
                index: None,
                top_k: 0,
                model: self.model.clone(),
                decision: IndexDecision::NoDocuments,
            });
        }

        let dimension = self.model.embedding_dimension();

        if BotIndex::exists(&index_dir) {
            match BotIndex::open(&index_dir, dimension).await {
                Ok(index) => {
                    let new_documents =
                        plan_incremental(&index, &files_dir, documents).await;
                    if new_documents.is_empty() {
                        debug!("Bot {} index is current, no inserts", bot_id);
                    } else {
                        info!(
                            "Bot {}: inserting {} new documents incrementally",
                            bot_id,
                            new_documents.len()
                        );
                        self.index_documents(&index, &new_documents).await?;
                    }
                    return Ok(ChatEngine {
                        index: Some(index),
                        top_k: RETRIEVAL_TOP_K,
                        model: self.model.clone(),
                        decision: IndexDecision::ExistingIndex,
                    });
                }
                Err(e) => {
                    // Corrupted or version-mismatched cache: rebuild from
                    // scratch instead of surfacing the failure.
                    warn!(
                        "Bot {} index failed to load ({}), rebuilding",
                        bot_id, e
                    );
                    BotIndex::delete_index_dir(&index_dir)?;
                }
            }
        }

        info!(
            "Bot {}: building fresh index from {} documents",
            bot_id,
            documents.len()
        );
        let index = BotIndex::open(&index_dir, dimension).await?;
        self.index_documents(&index, &documents).await?;

        Ok(ChatEngine {
            index: Some(index),
            top_k: RETRIEVAL_TOP_K,
            model: self.model.clone(),
            decision: IndexDecision::NoIndexYet,
        })
    }

    /// Chunk, embed, and insert a set of documents.
    async fn index_documents(
        &self,
        index: &BotIndex,
        documents: &[LoadedDocument],
    ) -> Result<(), BotError> {
        let mut chunks = Vec::new();
        for document in documents {
            let source_path = document.source_path.to_string_lossy().into_owned();
            for chunk in chunk_document(document, &self.config.chunking) {
                chunks.push(EmbeddedChunk {
                    vector: Vec::new(),
                    content: chunk.content,
                    source_path: Some(source_path.clone()),
                    source_file_name: Some(document.file_name.clone()),
                    chunk_index: chunk.chunk_index as u32,
                    token_count: chunk.token_count as u32,
                });
            }
        }

        if chunks.is_empty() {
            debug!("Documents produced no chunks, nothing to index");
            return Ok(());
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let embeddings = self.model.embed_batch(&texts).await?;
        for (chunk, vector) in chunks.iter_mut().zip(embeddings) {
            chunk.vector = vector;
        }

        index.insert_chunks(&chunks).await
    }

    async fn bot_lock(&self, bot_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.build_locks.lock().await;
        locks.retain(|_, weak| weak.strong_count() > 0);

        if let Some(existing) = locks.get(bot_id).and_then(Weak::upgrade) {
            return existing;
        }

        let lock = Arc::new(Mutex::new(()));
        locks.insert(bot_id.to_string(), Arc::downgrade(&lock));
        lock
    }

    #[cfg(test)]
    async fn lock_entry_count(&self) -> usize {
        self.build_locks.lock().await.len()
    }
}

impl ChatEngine {
    #[inline]
    pub fn decision(&self) -> IndexDecision {
        self.decision
    }

    #[inline]
    pub fn retrieval_enabled(&self) -> bool {
        self.top_k > 0
    }

    /// Retrieve the top-K chunks most similar to `query`.
    #[inline]
    pub async fn retrieve(&self, query: &str) -> Result<Vec<RetrievedChunk>, BotError> {
        let Some(index) = self.index.as_ref() else {
            return Ok(Vec::new());
        };
        if self.top_k == 0 {
            return Ok(Vec::new());
        }

        let query_vector = self.model.embed_query(query).await?;
        index.search(&query_vector, self.top_k).await
    }

    /// Stream an answer for the conversation. Retrieval context for the
    /// last user message is injected as an additional system turn after
    /// the caller-provided instruction.
    #[inline]
    pub async fn answer_stream(
        &self,
        system_instruction: Option<String>,
        messages: Vec<ChatTurn>,
    ) -> Result<impl Stream<Item = Result<String, BotError>> + Send + use<>, BotError> {
        let last_user = messages
            .iter()
            .rev()
            .find(|m| m.role == "user")
            .map(|m| m.content.clone())
            .unwrap_or_default();

        let mut effective = Vec::with_capacity(messages.len() + 2);
        if let Some(instruction) = system_instruction {
            effective.push(ChatTurn::system(instruction));
        }

        if !last_user.is_empty() {
            let retrieved = self.retrieve(&last_user).await?;
            if !retrieved.is_empty() {
                effective.push(ChatTurn::system(format_context(&retrieved)));
            }
        }

        effective.extend(messages);
        self.model.chat_stream(effective).await
    }
}

/// Render retrieved chunks as a context block for the model.
fn format_context(chunks: &[RetrievedChunk]) -> String {
    let mut context = String::from(
        "Relevant excerpts from the uploaded documents. Use them to answer when applicable:\n",
    );
    for chunk in chunks {
        context.push_str("\n---\n");
        if let Some(name) = &chunk.source_file_name {
            context.push_str(&format!("[{}]\n", name));
        }
        context.push_str(&chunk.content);
    }
    context
}

/// Build the instruction prepended to every conversation, from the bot's
/// free-text knowledge base and persona name.
///
/// The knowledge base is always instruction text and never indexed; when
/// both it and the persona are empty, no system message is used at all.
#[inline]
pub fn system_instruction(knowledge_base: &str, agent_name: &str) -> Option<String> {
    let knowledge_base = knowledge_base.trim();
    let agent_name = agent_name.trim();

    if !knowledge_base.is_empty() {
        let persona = if agent_name.is_empty() {
            String::new()
        } else {
            format!("You are {}, a helpful assistant. ", agent_name)
        };
        return Some(format!(
            "{}Answer using the following business information:\n\n{}",
            persona, knowledge_base
        ));
    }

    if !agent_name.is_empty() {
        return Some(format!("You are {}, a helpful assistant.", agent_name));
    }

    None
}

/// Bot ids become filesystem path components under the data directory.
/// Server-generated ids are UUIDs; anything outside that charset (in
/// particular path separators and `..`) is rejected before any path is
/// derived from it.
fn ensure_safe_bot_id(bot_id: &str) -> Result<(), BotError> {
    let safe = !bot_id.is_empty()
        && bot_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_'));
    if safe {
        Ok(())
    } else {
        Err(BotError::Server(format!("Invalid bot id: {bot_id}")))
    }
}

/// Validate an incoming conversation: non-empty, last turn authored by
/// the user.
#[inline]
pub fn validate_conversation(messages: &[ChatTurn]) -> Result<(), BotError> {
    let Some(last) = messages.last() else {
        return Err(BotError::Server("Conversation is empty".to_string()));
    };
    if last.role != "user" {
        return Err(BotError::Server(
            "Last message must be from the user".to_string(),
        ));
    }
    Ok(())
}

/// Remove a bot's file store and index cache entirely. Used when the
/// owning bot is deleted.
#[inline]
pub fn purge_bot_data(config: &Config, bot_id: &str) -> Result<(), BotError> {
    ensure_safe_bot_id(bot_id)?;

    let files_dir = config.bot_files_dir(bot_id);
    if files_dir.exists() {
        std::fs::remove_dir_all(&files_dir)?;
    }
    BotIndex::delete_index_dir(&config.bot_index_dir(bot_id))
}

/// Remove one uploaded file and invalidate the whole index cache, forcing
/// a full rebuild on the next chat request. Surgical removal from the
/// index is deliberately not attempted.
#[inline]
pub fn remove_bot_file(config: &Config, bot_id: &str, file_name: &str) -> Result<bool, BotError> {
    ensure_safe_bot_id(bot_id)?;

    let path = config.bot_files_dir(bot_id).join(file_name);
    if !path.is_file() {
        return Ok(false);
    }

    std::fs::remove_file(&path)?;
    BotIndex::delete_index_dir(&config.bot_index_dir(bot_id))?;
    info!("Removed {} and invalidated index for bot {}", file_name, bot_id);
    Ok(true)
}
