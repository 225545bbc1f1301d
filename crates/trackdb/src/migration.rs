//! Version reconciliation at open time

use std::path::Path;
use std::sync::Arc;

use serde_json::Value;
use tracing::{info, warn};
use trackdb_core::{DbError, DbResult};
use trackdb_storage::{RawCollection, StorageStrategy};

use crate::config::DataBaseConfig;

/// Rewrites raw items stored at an older version
///
/// Called as `(old_version, target_version, raw_items)` and returns the items
/// to load. An error aborts opening the database.
pub type MigrationCallback = Arc<dyn Fn(u32, u32, Vec<Value>) -> DbResult<Vec<Value>> + Send + Sync>;

/// Bring a stored snapshot to the configured version
pub(crate) fn reconcile(
    path: &Path,
    stored: RawCollection,
    config: &DataBaseConfig,
    callback: Option<&MigrationCallback>,
    storage: &dyn StorageStrategy,
) -> DbResult<Vec<Value>> {
    let RawCollection { version: old, items } = stored;
    let target = config.version;

    if old > target {
        warn!("{} was written by version {}, newer than {}", path.display(), old, target);
        return Err(DbError::creation(
            path,
            format!("stored version {} is newer than supported version {}", old, target),
        ));
    }
    if old == target {
        return Ok(items);
    }

    let items = match callback {
        Some(migrate) => {
            info!("Migrating {} items in {} from version {} to {}", items.len(), path.display(), old, target);
            migrate(old, target, items).map_err(|e| {
                DbError::creation(path, format!("migration from {} to {} failed: {}", old, target, e))
            })?
        }
        None if old < config.min_compatible_version => {
            return Err(DbError::creation(
                path,
                format!(
                    "stored version {} is below the minimum compatible version {}",
                    old, config.min_compatible_version
                ),
            ));
        }
        None => {
            info!("Loading {} at compatible version {} as {}", path.display(), old, target);
            items
        }
    };

    storage
        .migrate(old, target)
        .map_err(|e| DbError::creation(path, e.to_string()))?;
    Ok(items)
}
