use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationState {
    Init,
    Created,
    SavingRelations,
    HandlingSubtasks,
    AwaitManualMove,
    Verifying,
    Moved,
    Updating,
    Complete,
    Error,
}

impl MigrationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            MigrationState::Init => "init",
            MigrationState::Created => "created",
            MigrationState::SavingRelations => "saving-relations",
            MigrationState::HandlingSubtasks => "handling-subtasks",
            MigrationState::AwaitManualMove => "await-manual-move",
            MigrationState::Verifying => "verifying",
            MigrationState::Moved => "moved",
            MigrationState::Updating => "updating",
            MigrationState::Complete => "complete",
            MigrationState::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, MigrationState::Complete | MigrationState::Error)
    }

    /// Leaving these states needs an explicit operator answer.
    pub fn needs_confirmation(&self) -> bool {
        matches!(self, MigrationState::Created | MigrationState::Moved)
    }
}

impl fmt::Display for MigrationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationEvent {
    /// The state's work finished.
    Continue,
    Confirmed,
    Declined,
    /// The record is not in the destination collection yet.
    VerificationFailed,
    Failed,
}

/// Work the runner performs on entering a state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Effect {
    CreateRecord,
    Confirm,
    SaveRelations,
    DetachSubtasks,
    AwaitMove,
    VerifyMove,
    ApplyUpdates,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub state: MigrationState,
    pub effects: Vec<Effect>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("state '{state}' is terminal")]
    Terminal { state: MigrationState },
    #[error("event {event:?} is not valid in state '{state}'")]
    Invalid {
        state: MigrationState,
        event: MigrationEvent,
    },
}

impl From<TransitionError> for AppError {
    fn from(error: TransitionError) -> Self {
        let state = match &error {
            TransitionError::Terminal { state } | TransitionError::Invalid { state, .. } => *state,
        };
        AppError::new("ORCHESTRATOR/INVALID_TRANSITION", error.to_string())
            .with_context("state", state.as_str())
    }
}

pub fn entry_effects(state: MigrationState) -> Vec<Effect> {
    match state {
        MigrationState::Init => vec![Effect::CreateRecord],
        MigrationState::Created | MigrationState::Moved => vec![Effect::Confirm],
        MigrationState::SavingRelations => vec![Effect::SaveRelations],
        MigrationState::HandlingSubtasks => vec![Effect::DetachSubtasks],
        MigrationState::AwaitManualMove => vec![Effect::AwaitMove],
        MigrationState::Verifying => vec![Effect::VerifyMove],
        MigrationState::Updating => vec![Effect::ApplyUpdates],
        MigrationState::Complete | MigrationState::Error => Vec::new(),
    }
}

/// The whole state machine. Pure: no store access, no operator input.
pub fn transition(
    state: MigrationState,
    event: MigrationEvent,
) -> Result<Transition, TransitionError> {
    use MigrationEvent as E;
    use MigrationState as S;

    if state.is_terminal() {
        return Err(TransitionError::Terminal { state });
    }
    let next = match (state, event) {
        (_, E::Failed) => S::Error,
        (S::Init, E::Continue) => S::Created,
        (S::Created, E::Confirmed) => S::SavingRelations,
        (S::Created, E::Declined) => S::Error,
        (S::SavingRelations, E::Continue) => S::HandlingSubtasks,
        (S::HandlingSubtasks, E::Continue) => S::AwaitManualMove,
        (S::AwaitManualMove, E::Continue) => S::Verifying,
        (S::Verifying, E::Continue) => S::Moved,
        (S::Verifying, E::VerificationFailed) => S::AwaitManualMove,
        (S::Moved, E::Confirmed) => S::Updating,
        (S::Moved, E::Declined) => S::Error,
        (S::Updating, E::Continue) => S::Complete,
        (state, event) => return Err(TransitionError::Invalid { state, event }),
    };
    Ok(Transition {
        state: next,
        effects: entry_effects(next),
    })
}
