use super::*;
use tempfile::TempDir;

const DIM: usize = 4;

fn chunk(file_name: &str, chunk_index: u32, content: &str, vector: [f32; DIM]) -> EmbeddedChunk {
    EmbeddedChunk {
        vector: vector.to_vec(),
        content: content.to_string(),
        source_path: Some(format!("/data/files/bot-1/{file_name}")),
        source_file_name: Some(file_name.to_string()),
        chunk_index,
        token_count: content.split_whitespace().count() as u32,
    }
}

#[tokio::test]
async fn open_creates_empty_index() {
    let dir = TempDir::new().expect("tempdir");
    let index_dir = dir.path().join("idx");

    assert!(!BotIndex::exists(&index_dir));
    let index = BotIndex::open(&index_dir, DIM).await.expect("open");

    assert!(BotIndex::exists(&index_dir));
    assert_eq!(index.count_chunks().await.expect("count"), 0);
}

#[tokio::test]
async fn insert_and_count() {
    let dir = TempDir::new().expect("tempdir");
    let index = BotIndex::open(&dir.path().join("idx"), DIM)
        .await
        .expect("open");

    index
        .insert_chunks(&[
            chunk("faq.txt", 0, "Refunds take ten days.", [1.0, 0.0, 0.0, 0.0]),
            chunk("faq.txt", 1, "We ship worldwide.", [0.0, 1.0, 0.0, 0.0]),
        ])
        .await
        .expect("insert");

    assert_eq!(index.count_chunks().await.expect("count"), 2);
}

#[tokio::test]
async fn reinserting_identical_chunks_is_idempotent() {
    let dir = TempDir::new().expect("tempdir");
    let index = BotIndex::open(&dir.path().join("idx"), DIM)
        .await
        .expect("open");

    let chunks = vec![chunk("faq.txt", 0, "Same content.", [0.5, 0.5, 0.0, 0.0])];
    index.insert_chunks(&chunks).await.expect("first insert");
    index.insert_chunks(&chunks).await.expect("second insert");

    assert_eq!(index.count_chunks().await.expect("count"), 1);
}

#[tokio::test]
async fn stored_sources_expose_both_metadata_keys() {
    let dir = TempDir::new().expect("tempdir");
    let index = BotIndex::open(&dir.path().join("idx"), DIM)
        .await
        .expect("open");

    let mut pathless = chunk("guide.md", 0, "Pathless chunk.", [0.0, 0.0, 1.0, 0.0]);
    pathless.source_path = None;

    index
        .insert_chunks(&[
            chunk("faq.txt", 0, "Has both keys.", [1.0, 0.0, 0.0, 0.0]),
            pathless,
        ])
        .await
        .expect("insert");

    let mut sources = index.stored_sources().await.expect("scan");
    sources.sort_by(|a, b| a.source_file_name.cmp(&b.source_file_name));

    assert_eq!(sources.len(), 2);
    assert_eq!(sources[0].source_file_name.as_deref(), Some("faq.txt"));
    assert!(sources[0].source_path.is_some());
    assert_eq!(sources[1].source_file_name.as_deref(), Some("guide.md"));
    assert!(sources[1].source_path.is_none());
}

#[tokio::test]
async fn search_returns_nearest_chunk_first() {
    let dir = TempDir::new().expect("tempdir");
    let index = BotIndex::open(&dir.path().join("idx"), DIM)
        .await
        .expect("open");

    index
        .insert_chunks(&[
            chunk("a.txt", 0, "About refunds.", [1.0, 0.0, 0.0, 0.0]),
            chunk("b.txt", 0, "About shipping.", [0.0, 1.0, 0.0, 0.0]),
            chunk("c.txt", 0, "About warranties.", [0.0, 0.0, 1.0, 0.0]),
        ])
        .await
        .expect("insert");

    let results = index
        .search(&[0.9, 0.1, 0.0, 0.0], 2)
        .await
        .expect("search");

    assert_eq!(results.len(), 2);
    assert_eq!(results[0].content, "About refunds.");
    assert!(results[0].distance <= results[1].distance);
}

#[tokio::test]
async fn search_with_zero_limit_retrieves_nothing() {
    let dir = TempDir::new().expect("tempdir");
    let index = BotIndex::open(&dir.path().join("idx"), DIM)
        .await
        .expect("open");

    index
        .insert_chunks(&[chunk("a.txt", 0, "Anything.", [1.0, 0.0, 0.0, 0.0])])
        .await
        .expect("insert");

    let results = index.search(&[1.0, 0.0, 0.0, 0.0], 0).await.expect("search");
    assert!(results.is_empty());
}

#[tokio::test]
async fn dimension_mismatch_is_rejected() {
    let dir = TempDir::new().expect("tempdir");
    let index = BotIndex::open(&dir.path().join("idx"), DIM)
        .await
        .expect("open");

    let bad = EmbeddedChunk {
        vector: vec![1.0; DIM + 1],
        content: "Wrong size.".to_string(),
        source_path: None,
        source_file_name: None,
        chunk_index: 0,
        token_count: 2,
    };

    assert!(index.insert_chunks(&[bad]).await.is_err());
}

#[tokio::test]
async fn delete_index_dir_removes_cache() {
    let dir = TempDir::new().expect("tempdir");
    let index_dir = dir.path().join("idx");

    {
        let index = BotIndex::open(&index_dir, DIM).await.expect("open");
        index
            .insert_chunks(&[chunk("a.txt", 0, "Some content.", [1.0, 0.0, 0.0, 0.0])])
            .await
            .expect("insert");
    }

    BotIndex::delete_index_dir(&index_dir).expect("delete");
    assert!(!index_dir.exists());

    // Deleting again is a no-op
    BotIndex::delete_index_dir(&index_dir).expect("idempotent delete");
}
