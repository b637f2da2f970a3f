use super::{Applied, StepContext};
use crate::model::{Collection, MigrationMarker, Record};
use crate::store::{Filter, RecordStore};
use crate::AppResult;

/// Read-only: a record listed by the Projects query has been moved.
pub async fn apply(_ctx: &StepContext<'_>, _record: &Record) -> AppResult<Applied> {
    Ok(Applied::succeeded("present in Projects"))
}

/// Whether `id` is queued in the destination collection.
pub async fn is_moved(store: &dyn RecordStore, id: &str) -> AppResult<bool> {
    let queued = store
        .query(
            Collection::Projects,
            Filter::Marker(MigrationMarker::ToMigrate),
        )
        .await?;
    Ok(queued.iter().any(|record| record.id == id))
}
