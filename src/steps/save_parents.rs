use super::{ensure_transfer_empty, Applied, StepContext};
use crate::model::{Prop, PropertyPatch, PropertyValue, Record};
use crate::store::full_relation;
use crate::AppResult;

/// Parks the parent relation as text in `Parent Transfer` so it survives the move.
pub async fn apply(ctx: &StepContext<'_>, record: &Record) -> AppResult<Applied> {
    let (ids, has_more) = record.relation(Prop::ParentLink)?;
    if ids.is_empty() && !has_more {
        return Ok(Applied::skipped("no parent relation"));
    }
    ensure_transfer_empty(record, Prop::ParentTransfer)?;

    let parents = full_relation(ctx.store, record, Prop::ParentLink).await?;
    let text = ctx.encode_ids(&parents);
    let patch = PropertyPatch::new().set(Prop::ParentTransfer, PropertyValue::Text(text));
    ctx.store.update(&record.id, patch.into_map()).await?;
    Ok(Applied::succeeded(format!(
        "saved {} parent{}",
        parents.len(),
        if parents.len() == 1 { "" } else { "s" }
    ))
    .with_details(parents))
}
