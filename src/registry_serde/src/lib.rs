//! Persistence side of the register ingestor: the state database handle, the
//! recursive sync engine, document feeds and the ingestion loop tying them
//! together.

pub mod cmd;
pub mod feed;
pub mod ingest;
pub mod persist;
pub mod source;
pub mod sync;

pub use feed::{DocumentFeed, FeedItem, FeedSink};
pub use ingest::{ingest, IngestOptions, IngestSummary};
pub use persist::DbConn;
pub use source::{load_document, SchemaSource};
pub use sync::{SyncContext, SyncError};
