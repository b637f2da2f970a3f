//! Moves project records from the Tasks database to the Projects database
//! while keeping their parent and subtask relations.
//!
//! Progress lives on the records themselves: the `Migration` select property
//! is the work queue and two text properties park relation lists across the
//! manual move. Each step in [`steps`] can therefore be re-run safely, and
//! [`orchestrator`] walks a single record through all of them.

pub mod config;
pub mod eligibility;
mod error;
pub mod logging;
pub mod model;
pub mod operator;
pub mod orchestrator;
pub mod report;
pub mod steps;
pub mod store;
pub mod summary;
pub mod transfer;

pub use error::{AppError, AppResult};
pub use logging::init as init_logging;
