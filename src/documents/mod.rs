
pub mod chunking;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::fs;
use tracing::{debug, warn};

/// A document loaded from a bot's file store, ready for chunking.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedDocument {
    /// Absolute path of the source file.
    pub source_path: PathBuf,
    /// Bare file name, kept separately because stored metadata may carry
    /// either the full path or just the name.
    pub file_name: String,
    pub text: String,
}

/// File extensions accepted by the loader. Upload validation enforces the
/// matching MIME allow-list before files ever reach this directory.
pub const SUPPORTED_EXTENSIONS: &[&str] = &["pdf", "txt", "md"];

/// Load every supported document in a bot's upload directory.
///
/// A missing directory yields an empty list. Extraction failures are
/// isolated per file: the bad file is skipped with a warning and the rest
/// of the directory is still loaded.
#[inline]
pub async fn load_bot_documents(files_dir: &Path) -> Result<Vec<LoadedDocument>> {
    if !files_dir.is_dir() {
        debug!("No file store at {}, treating as empty", files_dir.display());
        return Ok(Vec::new());
    }

    let mut entries = fs::read_dir(files_dir)
        .await
        .with_context(|| format!("Failed to read file store: {}", files_dir.display()))?;

    let mut documents = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .context("Failed to iterate file store")?
    {
        let path = entry.path();
        if !path.is_file() || !is_supported(&path) {
            continue;
        }

        match load_document(&path).await {
            Ok(Some(doc)) => documents.push(doc),
            Ok(None) => debug!("Skipping empty document: {}", path.display()),
            Err(e) => warn!("Failed to extract {}: {:#}", path.display(), e),
        }
    }

    // Deterministic ordering so incremental runs insert in a stable order.
    documents.sort_by(|a, b| a.file_name.cmp(&b.file_name));

    debug!(
        "Loaded {} documents from {}",
        documents.len(),
        files_dir.display()
    );
    Ok(documents)
}

#[inline]
pub fn is_supported(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| {
            let ext = ext.to_ascii_lowercase();
            SUPPORTED_EXTENSIONS.contains(&ext.as_str())
        })
}

/// Extract text from a single file. Returns `None` when extraction
/// succeeds but yields nothing worth indexing.
async fn load_document(path: &Path) -> Result<Option<LoadedDocument>> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .context("File has no valid UTF-8 name")?;

    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    let text = match extension.as_str() {
        "pdf" => {
            let pdf_path = path.to_path_buf();
            // pdf-extract is synchronous and CPU heavy
            tokio::task::spawn_blocking(move || pdf_extract::extract_text(&pdf_path))
                .await
                .context("PDF extraction task panicked")?
                .with_context(|| format!("Failed to extract PDF text: {}", path.display()))?
        }
        _ => fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read text file: {}", path.display()))?,
    };

    if text.trim().is_empty() {
        return Ok(None);
    }

    let source_path = normalize_path(path);
    Ok(Some(LoadedDocument {
        source_path,
        file_name,
        text,
    }))
}

/// Resolve a path to its canonical absolute form, falling back to the
/// original when the file no longer exists (stored metadata can outlive
/// the file it points to).
#[inline]
pub fn normalize_path(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}
