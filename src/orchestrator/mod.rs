//! Single-record walk through the whole migration, driven by a state
//! machine. Each state's work reuses the per-record step functions.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::config::MigrationConfig;
use crate::model::{Collection, MigrationMarker, Prop, PropertyPatch, PropertyValue, Record};
use crate::operator::Operator;
use crate::steps::{self, verify_move, RecordOutcome, RecordReport, StepContext, StepKind};
use crate::store::RecordStore;
use crate::summary::RecordSummary;
use crate::{AppError, AppResult};

mod state;

pub use state::{
    entry_effects, transition, Effect, MigrationEvent, MigrationState, Transition,
    TransitionError,
};

/// Steps run while saving relations, in order.
pub const SAVE_STEPS: [StepKind; 4] = [
    StepKind::Validate,
    StepKind::FixAssignee,
    StepKind::SaveParentRelations,
    StepKind::SaveSubtaskRelations,
];

/// Steps run after the move has been confirmed, in order.
pub const UPDATE_STEPS: [StepKind; 3] = [
    StepKind::PostMoveUpdate,
    StepKind::RelinkParentProjects,
    StepKind::RelinkSubtasks,
];

/// The record created for a run.
#[derive(Debug, Clone, PartialEq)]
pub struct DemoRecord {
    pub title: String,
    pub status: String,
    pub kind: String,
    pub subtasks: Vec<String>,
}

impl Default for DemoRecord {
    fn default() -> Self {
        Self {
            title: format!("Migration demo {}", Utc::now().format("%Y-%m-%d %H:%M")),
            status: "Done".to_string(),
            kind: "Project".to_string(),
            subtasks: vec!["Demo subtask 1".to_string(), "Demo subtask 2".to_string()],
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StateChange {
    pub from: MigrationState,
    pub to: MigrationState,
    pub event: MigrationEvent,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrchestratorEvent {
    StateChanged(StateChange),
    StepApplied { step: StepKind, report: RecordReport },
}

pub type OrchestratorEventHandler = Arc<dyn Fn(OrchestratorEvent) + Send + Sync + 'static>;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestratorRun {
    pub record_id: Option<String>,
    pub subtask_ids: Vec<String>,
    pub state: MigrationState,
    pub history: Vec<StateChange>,
    pub steps: Vec<RecordReport>,
    pub move_attempts: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<AppError>,
}

impl OrchestratorRun {
    fn new() -> Self {
        Self {
            record_id: None,
            subtask_ids: Vec::new(),
            state: MigrationState::Init,
            history: Vec::new(),
            steps: Vec::new(),
            move_attempts: 0,
            error: None,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.state == MigrationState::Complete
    }

    fn record_id(&self) -> AppResult<&str> {
        self.record_id.as_deref().ok_or_else(|| {
            AppError::new("ORCHESTRATOR/NO_RECORD", "no record has been created yet")
        })
    }
}

pub struct MigrationOrchestrator<'a> {
    store: &'a dyn RecordStore,
    config: &'a MigrationConfig,
    operator: &'a dyn Operator,
    demo: DemoRecord,
    observer: Option<OrchestratorEventHandler>,
    max_move_attempts: Option<usize>,
}

impl<'a> MigrationOrchestrator<'a> {
    pub fn new(
        store: &'a dyn RecordStore,
        config: &'a MigrationConfig,
        operator: &'a dyn Operator,
    ) -> Self {
        Self {
            store,
            config,
            operator,
            demo: DemoRecord::default(),
            observer: None,
            max_move_attempts: None,
        }
    }

    pub fn with_demo(mut self, demo: DemoRecord) -> Self {
        self.demo = demo;
        self
    }

    pub fn with_observer(mut self, observer: OrchestratorEventHandler) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Gives up after `attempts` unsuccessful move verifications. Without a
    /// limit the run waits for the operator indefinitely.
    pub fn with_max_move_attempts(mut self, attempts: usize) -> Self {
        self.max_move_attempts = Some(attempts.max(1));
        self
    }

    fn emit(&self, event: OrchestratorEvent) {
        if let Some(callback) = &self.observer {
            callback(event);
        }
    }

    /// Drives the machine until it reaches `Complete` or `Error`. Failures
    /// end the run in `Error` with the cause kept in [`OrchestratorRun::error`].
    pub async fn run(&self) -> AppResult<OrchestratorRun> {
        let ctx = StepContext::new(self.store, self.config, self.operator);
        let mut run = OrchestratorRun::new();
        let mut effects = entry_effects(run.state);

        while !run.state.is_terminal() {
            let mut event = MigrationEvent::Continue;
            for effect in &effects {
                event = match self.perform(*effect, &ctx, &mut run).await {
                    Ok(event) => event,
                    Err(err) => {
                        warn!(
                            target: "taskmover",
                            event = "orchestrator_failed",
                            state = run.state.as_str(),
                            code = err.code(),
                            error = %err.message()
                        );
                        run.error = Some(err);
                        MigrationEvent::Failed
                    }
                };
                if event == MigrationEvent::Failed {
                    break;
                }
            }

            let next = transition(run.state, event)?;
            let change = StateChange {
                from: run.state,
                to: next.state,
                event,
                at: Utc::now(),
            };
            info!(
                target: "taskmover",
                event = "state_changed",
                from = change.from.as_str(),
                to = change.to.as_str(),
                trigger = ?event
            );
            run.history.push(change.clone());
            self.emit(OrchestratorEvent::StateChanged(change));
            run.state = next.state;
            effects = next.effects;
        }

        if run.state == MigrationState::Error && run.error.is_none() {
            run.error = Some(AppError::new(
                AppError::OPERATOR_ABORTED,
                "operator declined to continue",
            ));
        }
        Ok(run)
    }

    async fn perform(
        &self,
        effect: Effect,
        ctx: &StepContext<'_>,
        run: &mut OrchestratorRun,
    ) -> AppResult<MigrationEvent> {
        match effect {
            Effect::CreateRecord => {
                self.create_records(run).await?;
                Ok(MigrationEvent::Continue)
            }
            Effect::Confirm => {
                let record = self.store.retrieve(run.record_id()?).await?;
                let summary = RecordSummary::from_record(&record);
                let question = match run.state {
                    MigrationState::Moved => {
                        format!("{summary} is in {}. Apply the post-move updates?", Collection::Projects)
                    }
                    _ => format!("Created {summary}. Start the migration?"),
                };
                Ok(if self.operator.confirm(&question).await? {
                    MigrationEvent::Confirmed
                } else {
                    MigrationEvent::Declined
                })
            }
            Effect::SaveRelations => self.apply_steps(ctx, run, &SAVE_STEPS).await,
            Effect::DetachSubtasks => {
                self.apply_steps(ctx, run, &[StepKind::RemoveSubtasks]).await
            }
            Effect::AwaitMove => {
                let record = self.store.retrieve(run.record_id()?).await?;
                self.operator
                    .wait_for_move(&RecordSummary::from_record(&record), Collection::Projects)
                    .await?;
                Ok(MigrationEvent::Continue)
            }
            Effect::VerifyMove => {
                run.move_attempts += 1;
                if verify_move::is_moved(self.store, run.record_id()?).await? {
                    return Ok(MigrationEvent::Continue);
                }
                info!(
                    target: "taskmover",
                    event = "move_not_verified",
                    record_id = %run.record_id()?,
                    attempt = run.move_attempts
                );
                match self.max_move_attempts {
                    Some(limit) if run.move_attempts >= limit => Err(AppError::new(
                        "ORCHESTRATOR/NOT_MOVED",
                        format!(
                            "record not found in {} after {limit} attempt(s)",
                            Collection::Projects
                        ),
                    )),
                    _ => Ok(MigrationEvent::VerificationFailed),
                }
            }
            Effect::ApplyUpdates => self.apply_steps(ctx, run, &UPDATE_STEPS).await,
        }
    }

    async fn create_records(&self, run: &mut OrchestratorRun) -> AppResult<()> {
        let principals = self.store.list_principals().await?;

        for title in &self.demo.subtasks {
            let patch = PropertyPatch::new()
                .set(Prop::Title, PropertyValue::Title(title.clone()))
                .set(Prop::Status, PropertyValue::select(self.demo.status.as_str()))
                .set(Prop::Kind, PropertyValue::select("Task"));
            let subtask = self.store.create(Collection::Tasks, patch.into_map()).await?;
            run.subtask_ids.push(subtask.id);
        }

        let mut patch = PropertyPatch::new()
            .set(Prop::Title, PropertyValue::Title(self.demo.title.clone()))
            .set(Prop::Status, PropertyValue::select(self.demo.status.as_str()))
            .set(Prop::Kind, PropertyValue::select(self.demo.kind.as_str()))
            .set(
                Prop::Marker,
                PropertyValue::marker(Some(MigrationMarker::ToMigrate)),
            );
        if let Some(person) = principals.first() {
            patch.insert(Prop::Assignee, PropertyValue::People(vec![person.clone()]));
        }
        if !run.subtask_ids.is_empty() {
            patch.insert(
                Prop::ChildLink,
                PropertyValue::relation(run.subtask_ids.clone()),
            );
        }
        let record: Record = self.store.create(Collection::Tasks, patch.into_map()).await?;
        info!(
            target: "taskmover",
            event = "demo_record_created",
            record_id = %record.id,
            subtasks = run.subtask_ids.len()
        );
        run.record_id = Some(record.id);
        Ok(())
    }

    /// Runs `kinds` against the freshly read record. Any failed step stops the run.
    async fn apply_steps(
        &self,
        ctx: &StepContext<'_>,
        run: &mut OrchestratorRun,
        kinds: &[StepKind],
    ) -> AppResult<MigrationEvent> {
        for step in kinds {
            let record = self.store.retrieve(run.record_id()?).await?;
            let report = steps::process_record(ctx, *step, &record).await?;
            self.emit(OrchestratorEvent::StepApplied {
                step: *step,
                report: report.clone(),
            });
            let failed = report.outcome == RecordOutcome::Failed;
            let error = report.error.clone();
            let message = report.message.clone();
            run.steps.push(report);
            if failed {
                return Err(error.unwrap_or_else(|| {
                    AppError::new("ORCHESTRATOR/STEP_FAILED", message)
                        .with_context("step", step.as_str())
                }));
            }
        }
        Ok(MigrationEvent::Continue)
    }
}
