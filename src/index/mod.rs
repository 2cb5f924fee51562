// Incremental indexing support: decide which documents in a bot's file
// store are not yet represented in its persisted index.


use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::database::lancedb::BotIndex;
use crate::documents::{LoadedDocument, normalize_path};

/// Scan a bot's persisted docstore and return the set of normalized
/// absolute paths already represented in the index.
///
/// Two independent metadata keys are consulted for each stored chunk: the
/// explicit source path, and the file name resolved against the bot's
/// file directory. The indexing layer does not guarantee which one is
/// populated. Any failure degrades to an empty set so indexing treats
/// everything as new instead of erroring.
#[inline]
pub async fn indexed_path_set(index: &BotIndex, files_dir: &Path) -> HashSet<PathBuf> {
    let sources = match index.stored_sources().await {
        Ok(sources) => sources,
        Err(e) => {
            warn!("Failed to scan indexed sources, treating all documents as new: {}", e);
            return HashSet::new();
        }
    };

    let mut paths = HashSet::new();
    for source in sources {
        if let Some(source_path) = source.source_path {
            paths.insert(normalize_path(Path::new(&source_path)));
        }
        if let Some(file_name) = source.source_file_name {
            paths.insert(normalize_path(&files_dir.join(file_name)));
        }
    }

    debug!("Index covers {} distinct source paths", paths.len());
    paths
}

/// Keep only documents whose path is absent from the indexed set.
///
/// A document matches the index when either its normalized source path or
/// its file name resolved against `files_dir` is present. Everything else
/// is new; suppressing duplicate content for path-less rows is the
/// index's own content-hash deduplication at insertion time.
#[inline]
pub fn filter_new_documents(
    documents: Vec<LoadedDocument>,
    indexed: &HashSet<PathBuf>,
    files_dir: &Path,
) -> Vec<LoadedDocument> {
    if indexed.is_empty() {
        return documents;
    }

    documents
        .into_iter()
        .filter(|doc| {
            let by_path = indexed.contains(&normalize_path(&doc.source_path));
            let by_name = indexed.contains(&normalize_path(&files_dir.join(&doc.file_name)));
            if by_path || by_name {
                debug!("Already indexed, skipping: {}", doc.file_name);
                false
            } else {
                true
            }
        })
        .collect()
}

/// Load the indexed-path set and filter in one step.
#[inline]
pub async fn plan_incremental(
    index: &BotIndex,
    files_dir: &Path,
    documents: Vec<LoadedDocument>,
) -> Vec<LoadedDocument> {
    let indexed = indexed_path_set(index, files_dir).await;
    filter_new_documents(documents, &indexed, files_dir)
}
