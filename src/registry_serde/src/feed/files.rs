use std::path::PathBuf;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use super::{page_entries, DocumentFeed, FeedSink};
use crate::source::load_document;

/// Documents read from local files: single documents, arrays, register pages
/// or JSON Lines.
#[derive(Debug, Clone)]
pub struct FileFeed {
    pub paths: Vec<PathBuf>,
    pub root: String,
}

impl FileFeed {
    pub fn new(paths: Vec<PathBuf>, root: &str) -> Self {
        FileFeed {
            paths,
            root: root.to_string(),
        }
    }
}

fn file_documents(payload: Value) -> Vec<Value> {
    match page_entries(&payload) {
        Some(entries) => entries,
        None if payload.is_object() => vec![payload],
        None => Vec::new(),
    }
}

#[async_trait]
impl DocumentFeed for FileFeed {
    async fn run(&mut self, sink: &mut FeedSink) -> Result<()> {
        for path in &self.paths {
            let documents = file_documents(load_document(path)?);
            if documents.is_empty() {
                warn!(path = %path.display(), "no documents found");
                continue;
            }
            debug!(path = %path.display(), documents = documents.len(), "feeding file");
            for document in documents {
                sink.push(&self.root, document).await?;
            }
        }
        Ok(())
    }
}
