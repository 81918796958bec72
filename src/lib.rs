pub mod config;
pub mod error;
pub mod db;
pub mod ingest;
pub mod reconcile;
pub mod export;
pub mod pipeline;

pub use config::Config;
pub use error::{InstacoError, Result};
pub use pipeline::{run, RunOptions, RunSummary};
