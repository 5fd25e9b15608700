//! Playstats - streaming-history analytics engine
//!
//! Raw records are normalized into a canonical [`models::Dataset`], narrowed
//! by the [`filter`] pipeline and summarized by the [`analysis`] engine.
//! Every result is memoized in a [`cache::FingerprintCache`] keyed by the
//! dataset content and the request. The [`query::QueryFacade`] is the
//! interface the CLI and report generator use.

pub mod analysis;
pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod filter;
pub mod ingest;
pub mod models;
pub mod normalize;
pub mod query;
pub mod report;

pub use error::{EngineError, EngineResult};
