use std::sync::Arc;

use anyhow::{anyhow, Result};
use common::format::{render_table, TableStyle};
use registry_serde::{
    cmd::{IngestApiArgs, IngestArgs, IngestCommands, IngestDbArgs, IngestFilesArgs},
    feed::{ApiClient, ApiFeed, FileFeed},
    ingest, DbConn, DocumentFeed, IngestSummary, SyncContext,
};
use tracing::{info, warn};

use crate::schema::build_spec;

#[derive(Debug, Default)]
pub struct Ingest {}

impl Ingest {
    pub async fn execute(&self, args: &IngestArgs) -> Result<()> {
        match &args.command {
            IngestCommands::Files(args) => self.files(args).await,
            IngestCommands::Api(args) => self.api(args).await,
        }
    }

    async fn files(&self, args: &IngestFilesArgs) -> Result<()> {
        let mut feed = FileFeed::new(args.paths.clone(), &args.into);
        self.run(&args.db, &[args.into.as_str()], &mut feed).await
    }

    async fn api(&self, args: &IngestApiArgs) -> Result<()> {
        let client = ApiClient::new(args.api_config())?;
        let mut feed = ApiFeed::new(client, &args.entries_root).with_query(args.query.clone());
        if !args.no_versions {
            feed = feed.with_versions(&args.versions_root);
        }
        if !args.no_statistics {
            feed = feed.with_statistics(&args.statistics_root);
        }
        self.run(&args.db, &[args.entries_root.as_str()], &mut feed).await
    }

    /// Prepares the database for `required_roots` and drains `feed` into it.
    async fn run<F: DocumentFeed>(
        &self,
        db: &IngestDbArgs,
        required_roots: &[&str],
        feed: &mut F,
    ) -> Result<()> {
        let spec = Arc::new(build_spec(&db.source)?);
        for root in required_roots {
            if spec.root(root).is_none() {
                return Err(anyhow!(
                    "[Ingest::run] root '{}' is not part of the inferred schema (roots: {})",
                    root,
                    spec.roots().map(|(name, _)| name).collect::<Vec<_>>().join(", ")
                ));
            }
        }

        let mut dbc = DbConn::new(&db.state_db_fs_path)?;
        if !dbc.schema_exists(&spec)? {
            info!(db = %db.state_db_fs_path, "creating tables");
        }
        dbc.apply_schema(&spec)?;

        let context = Arc::new(SyncContext::new(spec));
        let (summary, _) = ingest(feed, dbc, context, &db.options()).await?;
        if summary.failed > 0 {
            warn!(failed = summary.failed, "some documents were rolled back");
        }
        println!("{}", summary_table(&summary));
        Ok(())
    }
}

fn summary_table(summary: &IngestSummary) -> String {
    let counts = [summary.processed, summary.skipped, summary.failed].map(|n| n.to_string());
    render_table(
        TableStyle::Terminal,
        ["processed", "skipped", "failed"],
        [counts],
        &[0, 1, 2],
    )
}
