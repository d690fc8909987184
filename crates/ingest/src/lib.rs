//! `rawsync-ingest`: transfer-and-reconcile pipeline.
//!
//! Pulls tabular files from an SFTP server into a staging directory, decodes
//! them, normalizes column names, and either upserts them by business key or
//! appends them to raw tables. No CLI concerns live here.

pub mod append;
pub mod config;
pub mod entity;
pub mod error;
pub mod loader;
pub mod lock;
pub mod model;
pub mod normalize;
pub mod pipeline;
pub mod reconcile;
pub mod routing;
pub mod sites;
pub mod store;
pub mod transfer;

pub use config::PipelineConfig;
pub use error::IngestError;
pub use model::{Loaded, RecordSet, Value};
pub use pipeline::{FileOutcome, Pipeline, RunReport, TargetAction, TargetOutcome};
pub use store::{SqliteStore, Store};
pub use transfer::{FileTransferAgent, RemoteEntry, RemoteSource, SftpSource, TransferReport};
