//! Traits for table store abstractions.
//!
//! This module defines the `TableStore` trait that abstracts the bronze table
//! format, so the writer and its serialization logic can be exercised without
//! a real table on disk.

use async_trait::async_trait;
use deltalake::arrow::array::RecordBatch;
use deltalake::arrow::datatypes::Schema;

use crate::config::ClusterKey;
use crate::error::DeltaError;

/// Trait for stores that hold one append-only table per cluster.
#[async_trait]
pub trait TableStore: Send + Sync + 'static {
    /// Handle to an opened table.
    type Table: Send + 'static;

    /// Open the cluster's table, creating it with `schema` if it does not exist.
    async fn create_or_open(
        &self,
        cluster: &ClusterKey,
        schema: &Schema,
    ) -> Result<Self::Table, DeltaError>;

    /// Append `batch` in a single commit.
    ///
    /// With `merge_schema`, columns unknown to the table are added; without it
    /// they are rejected. Returns the new table version.
    async fn append(
        &self,
        table: &mut Self::Table,
        batch: RecordBatch,
        merge_schema: bool,
    ) -> Result<i64, DeltaError>;
}
