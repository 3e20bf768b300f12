use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::{
    feed::{DocumentFeed, FeedItem, FeedSink},
    persist::DbConn,
    sync::{SyncContext, SyncError},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestOptions {
    /// Capacity of the queue between the feed and the writer.
    pub queue_size: usize,
    /// Log progress after this many written documents; `0` disables it.
    pub progress_every: usize,
    /// Attempts added for busy/locked failures of one document.
    pub transient_retries: usize,
}

impl Default for IngestOptions {
    fn default() -> Self {
        IngestOptions {
            queue_size: 100,
            progress_every: 25,
            transient_retries: 3,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IngestSummary {
    /// Documents committed.
    pub processed: usize,
    /// Duplicates dropped by the feed and documents with nothing to write.
    pub skipped: usize,
    /// Documents rolled back after an error.
    pub failed: usize,
}

/// Drains `feed` into the database. The feed runs on the async runtime while a
/// single blocking writer owns the connection and commits one transaction per
/// document, so writes for the same natural key never overlap.
///
/// The connection is handed back together with the summary.
pub async fn ingest<F>(
    feed: &mut F,
    dbc: DbConn,
    context: Arc<SyncContext>,
    options: &IngestOptions,
) -> Result<(IngestSummary, DbConn)>
where
    F: DocumentFeed + ?Sized,
{
    let (sender, receiver) = mpsc::channel::<FeedItem>(options.queue_size.max(1));
    let writer_context = context.clone();
    let writer_options = *options;
    let writer = tokio::task::spawn_blocking(move || {
        write_queue(receiver, dbc, &writer_context, &writer_options)
    });

    let mut sink = FeedSink::new(sender, context);
    let fed = feed.run(&mut sink).await;
    let duplicates = sink.skipped();
    drop(sink);

    let (mut summary, dbc) = writer.await.context("[ingest] writer task panicked")?;
    summary.skipped += duplicates;
    fed.context("[ingest] document feed failed")?;
    info!(
        processed = summary.processed,
        skipped = summary.skipped,
        failed = summary.failed,
        "ingestion finished"
    );
    Ok((summary, dbc))
}

fn write_queue(
    mut receiver: mpsc::Receiver<FeedItem>,
    mut dbc: DbConn,
    context: &SyncContext,
    options: &IngestOptions,
) -> (IngestSummary, DbConn) {
    let mut summary = IngestSummary::default();
    while let Some(item) = receiver.blocking_recv() {
        match write_with_retry(&mut dbc, context, &item, options.transient_retries) {
            Ok(Some(_)) => {
                summary.processed += 1;
                if options.progress_every > 0 && summary.processed % options.progress_every == 0 {
                    info!(processed = summary.processed, failed = summary.failed, "progress");
                }
            }
            Ok(None) => summary.skipped += 1,
            Err(err) => {
                error!(root = %item.root, error = %err, "document rolled back");
                summary.failed += 1;
            }
        }
    }
    (summary, dbc)
}

fn write_with_retry(
    dbc: &mut DbConn,
    context: &SyncContext,
    item: &FeedItem,
    retries: usize,
) -> Result<Option<i64>, SyncError> {
    let mut attempt = 0;
    loop {
        match context.sync_document(&mut dbc.conn, &item.root, &item.document) {
            Err(err) if err.is_transient() && attempt < retries => {
                attempt += 1;
                warn!(root = %item.root, attempt, error = %err, "transient failure, retrying");
                std::thread::sleep(Duration::from_millis(100 * attempt as u64));
            }
            result => return result,
        }
    }
}
