//! Bronze table writer.
//!
//! Writes to the same cluster are serialized through a per-cluster async
//! mutex; different clusters commit concurrently.

mod delta;
mod stats;
mod traits;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use deltalake::arrow::array::RecordBatch;
use tracing::{debug, info};

pub use delta::{DeltaStore, open_table, table_arrow_schema, table_exists, table_url};
pub use stats::{TableStats, bronze_stats, table_stats};
pub use traits::TableStore;

use crate::config::ClusterKey;
use crate::error::DeltaError;
use crate::metrics::events::{BronzeCommitDuration, RowsWritten};
use sluice_core::emit;

type TableSlot<T> = Arc<tokio::sync::Mutex<Option<T>>>;

/// Appends annotated batches to per-cluster bronze tables.
pub struct BronzeWriter<S: TableStore = DeltaStore> {
    store: S,
    slots: Mutex<HashMap<ClusterKey, TableSlot<S::Table>>>,
}

impl<S: TableStore> BronzeWriter<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    fn slot(&self, cluster: &ClusterKey) -> TableSlot<S::Table> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.entry(cluster.clone()).or_default().clone()
    }

    /// Append `batch` to the cluster's table, creating it on first write.
    ///
    /// Returns the committed table version. A failed commit drops the cached
    /// table handle so the next write reopens it.
    pub async fn write(&self, cluster: &ClusterKey, batch: RecordBatch) -> Result<i64, DeltaError> {
        let slot = self.slot(cluster);
        let mut guard = slot.lock().await;

        let start = Instant::now();
        let rows = batch.num_rows() as u64;

        let result = async {
            let table = match &mut *guard {
                Some(table) => table,
                empty => {
                    debug!(cluster = %cluster, "Opening bronze table");
                    empty.insert(self.store.create_or_open(cluster, &batch.schema()).await?)
                }
            };
            self.store.append(table, batch, true).await
        }
        .await;

        match result {
            Ok(version) => {
                emit!(BronzeCommitDuration {
                    duration: start.elapsed(),
                    cluster: cluster.to_string(),
                });
                emit!(RowsWritten {
                    rows,
                    cluster: cluster.to_string(),
                });
                info!(cluster = %cluster, version, rows, "Appended to bronze table");
                Ok(version)
            }
            Err(e) => {
                *guard = None;
                Err(e)
            }
        }
    }
}
