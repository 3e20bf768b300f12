//! Producers of top-level documents for the writer.

use std::{collections::HashSet, sync::Arc};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;

use registry_schema::infer::PAGE_ENTRY_KEYS;

use crate::sync::SyncContext;

pub mod api;
pub mod files;

pub use api::{ApiClient, ApiConfig, ApiError, ApiFeed};
pub use files::FileFeed;

/// Page fields copied into every entry of a page.
pub const PAGE_METADATA_KEYS: [&str; 4] =
    ["source", "sourceUrl", "sourceDate", "jsonDocumentationUrl"];

/// One document bound for the root table `root`.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedItem {
    pub root: String,
    pub document: Value,
}

#[async_trait]
pub trait DocumentFeed: Send {
    /// Pushes every document of the feed into `sink`.
    async fn run(&mut self, sink: &mut FeedSink) -> Result<()>;
}

/// Sending half of the writer queue. Drops documents whose natural key was
/// already enqueued during this run.
pub struct FeedSink {
    sender: mpsc::Sender<FeedItem>,
    context: Arc<SyncContext>,
    seen: HashSet<(String, String)>,
    enqueued: usize,
    skipped: usize,
}

impl FeedSink {
    pub fn new(sender: mpsc::Sender<FeedItem>, context: Arc<SyncContext>) -> Self {
        FeedSink {
            sender,
            context,
            seen: HashSet::new(),
            enqueued: 0,
            skipped: 0,
        }
    }

    /// Queues `document` for `root`. Waits while the queue is full; returns
    /// `false` for a duplicate.
    pub async fn push(&mut self, root: &str, document: Value) -> Result<bool> {
        if let Some(key) = self.context.natural_key(root, &document) {
            if !self.seen.insert((root.to_string(), key)) {
                debug!(root, "duplicate natural key skipped");
                self.skipped += 1;
                return Ok(false);
            }
        }
        self.sender
            .send(FeedItem {
                root: root.to_string(),
                document,
            })
            .await
            .map_err(|_| anyhow!("[FeedSink::push] writer stopped accepting documents"))?;
        self.enqueued += 1;
        Ok(true)
    }

    pub fn has_root(&self, root: &str) -> bool {
        self.context.spec().root(root).is_some()
    }

    pub fn enqueued(&self) -> usize {
        self.enqueued
    }

    pub fn skipped(&self) -> usize {
        self.skipped
    }
}

/// Entries of a register payload: a page (`results`/`registerEntries`), a
/// bare entry, or a list. Page metadata is copied into each entry. `None`
/// for anything else.
pub fn page_entries(payload: &Value) -> Option<Vec<Value>> {
    match payload {
        Value::Object(page) => {
            let listed = PAGE_ENTRY_KEYS
                .iter()
                .find_map(|key| page.get(*key).and_then(Value::as_array));
            if let Some(items) = listed {
                let entries = items
                    .iter()
                    .filter_map(|item| item.as_object())
                    .map(|entry| {
                        let mut entry = entry.clone();
                        for key in PAGE_METADATA_KEYS {
                            if let Some(value) = page.get(key).filter(|v| !v.is_null()) {
                                entry.insert(key.to_string(), value.clone());
                            }
                        }
                        Value::Object(entry)
                    })
                    .collect();
                return Some(entries);
            }
            page.contains_key("registerNumber").then(|| vec![payload.clone()])
        }
        Value::Array(items) => Some(
            items
                .iter()
                .filter(|item| item.is_object())
                .cloned()
                .collect(),
        ),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use common::IdentifierNamer;
    use pretty_assertions::assert_eq;
    use registry_schema::{build_schema, infer_schema};
    use serde_json::json;

    use super::*;

    #[test]
    fn test_page_entries_copy_metadata() {
        let page = json!({
            "source": "Lobbyregister",
            "sourceDate": "2024-03-01T10:00:00Z",
            "sourceUrl": null,
            "results": [{"registerNumber": "R1", "sourceUrl": "kept"}, 7]
        });
        assert_eq!(
            page_entries(&page),
            Some(vec![json!({
                "registerNumber": "R1",
                "source": "Lobbyregister",
                "sourceDate": "2024-03-01T10:00:00Z",
                "sourceUrl": "kept"
            })])
        );
    }

    #[test]
    fn test_page_entries_other_shapes() {
        assert_eq!(
            page_entries(&json!({"registerNumber": "R1"})),
            Some(vec![json!({"registerNumber": "R1"})])
        );
        assert_eq!(
            page_entries(&json!([{"a": 1}, null])),
            Some(vec![json!({"a": 1})])
        );
        assert_eq!(page_entries(&json!({"unexpected": true})), None);
        assert_eq!(page_entries(&json!("text")), None);
    }

    #[tokio::test]
    async fn test_sink_drops_repeated_natural_keys() -> Result<()> {
        let node = infer_schema(&json!({"registerNumber": "R1"}), "register_entries")?;
        let keys = ["registerNumber".to_string()];
        let spec = build_schema(&node, &keys, IdentifierNamer::default())?;
        let (tx, mut rx) = mpsc::channel(8);
        let mut sink = FeedSink::new(tx, Arc::new(SyncContext::new(Arc::new(spec))));

        assert!(sink.push("register_entries", json!({"registerNumber": "R1"})).await?);
        assert!(!sink.push("register_entries", json!({"registerNumber": "R1", "x": 1})).await?);
        assert!(sink.push("register_entries", json!({"registerNumber": "R2"})).await?);
        assert!(sink.push("register_entries", json!({"name": "no key"})).await?);
        assert_eq!((sink.enqueued(), sink.skipped()), (3, 1));

        drop(sink);
        let mut roots = Vec::new();
        while let Some(item) = rx.recv().await {
            roots.push(item.document["registerNumber"].clone());
        }
        assert_eq!(roots, vec![json!("R1"), json!("R2"), Value::Null]);
        Ok(())
    }
}
