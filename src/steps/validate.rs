use super::{Applied, StepContext};
use crate::eligibility::validate_and_mark;
use crate::model::Record;
use crate::AppResult;

/// Checks eligibility. Ineligible records are marked `Error` here, which is
/// why the runner does not mark this step's failures a second time.
pub async fn apply(ctx: &StepContext<'_>, record: &Record) -> AppResult<Applied> {
    let eligibility = validate_and_mark(ctx.store, record, &ctx.config.rules()).await?;
    if eligibility.valid {
        return Ok(Applied::succeeded("eligible"));
    }
    Ok(Applied::failed(format!(
        "not eligible ({} problem{})",
        eligibility.errors.len(),
        if eligibility.errors.len() == 1 { "" } else { "s" }
    ))
    .with_details(eligibility.errors))
}
