//! Aggregation engine.
//!
//! Every entry point validates its request against the dataset schema and
//! then routes the computation through the shared [`FingerprintCache`].

pub mod aggregator;
pub mod correlation;

pub use aggregator::{AggregationRequest, RankDirection, Reducer};

pub(crate) use aggregator::compute_aggregate;
use correlation::compute_correlation;

use crate::cache::FingerprintCache;
use crate::error::EngineResult;
use crate::models::{CorrelationMatrix, Dataset, RankedResult};
use serde::Serialize;
use std::sync::Arc;

/// Cache request key; the tag keeps operations with similar parameters
/// apart.
#[derive(Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum Operation<'a> {
    Aggregate(&'a AggregationRequest),
    Correlation { columns: &'a [String] },
}

#[derive(Debug, Clone)]
pub struct AggregationEngine {
    cache: Arc<FingerprintCache>,
}

impl AggregationEngine {
    pub fn new(cache: Arc<FingerprintCache>) -> Self {
        Self { cache }
    }

    pub fn cache(&self) -> &Arc<FingerprintCache> {
        &self.cache
    }

    /// Grouped reduction with top-N ranking.
    pub fn aggregate(
        &self,
        dataset: &Dataset,
        request: &AggregationRequest,
    ) -> EngineResult<Arc<RankedResult>> {
        request.validate(dataset)?;
        self.cache
            .get_or_compute(dataset, &Operation::Aggregate(request), || {
                compute_aggregate(dataset, request)
            })
    }

    /// Pearson correlation matrix over numeric columns.
    pub fn correlation_matrix(
        &self,
        dataset: &Dataset,
        columns: &[String],
    ) -> EngineResult<Arc<CorrelationMatrix>> {
        correlation::correlation_columns(dataset, columns)?;
        self.cache
            .get_or_compute(dataset, &Operation::Correlation { columns }, || {
                compute_correlation(dataset, columns)
            })
    }
}
