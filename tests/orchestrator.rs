#![allow(clippy::unwrap_used, clippy::expect_used)]

mod util;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use taskmover_lib::config::MigrationConfig;
use taskmover_lib::model::{Collection, MigrationMarker, Prop};
use taskmover_lib::operator::ScriptedOperator;
use taskmover_lib::orchestrator::{
    DemoRecord, MigrationOrchestrator, MigrationState, OrchestratorEvent,
};
use taskmover_lib::store::MemoryStore;
use taskmover_lib::AppError;

use util::{ada, relation, text};

fn demo(subtasks: usize) -> DemoRecord {
    DemoRecord {
        title: "Orchestrated".into(),
        subtasks: (1..=subtasks).map(|n| format!("Sub {n}")).collect(),
        ..DemoRecord::default()
    }
}

fn moving_operator(store: &Arc<MemoryStore>) -> ScriptedOperator {
    let mover = store.clone();
    ScriptedOperator::new()
        .confirm_with(true)
        .confirm_with(true)
        .on_move(move |summary| mover.move_record(&summary.id, Collection::Projects))
}

#[tokio::test]
async fn demo_record_walks_every_state_to_complete() -> Result<()> {
    let store = Arc::new(MemoryStore::new());
    store.add_principal(ada());
    let config = MigrationConfig::default();
    let operator = moving_operator(&store);

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let run = MigrationOrchestrator::new(store.as_ref(), &config, &operator)
        .with_demo(demo(2))
        .with_observer(Arc::new(move |event: OrchestratorEvent| {
            if let OrchestratorEvent::StateChanged(change) = event {
                sink.lock().unwrap().push(change.to);
            }
        }))
        .run()
        .await?;

    assert_eq!(run.state, MigrationState::Complete, "{:?}", run.error);
    assert!(run.error.is_none());
    assert_eq!(
        *seen.lock().unwrap(),
        vec![
            MigrationState::Created,
            MigrationState::SavingRelations,
            MigrationState::HandlingSubtasks,
            MigrationState::AwaitManualMove,
            MigrationState::Verifying,
            MigrationState::Moved,
            MigrationState::Updating,
            MigrationState::Complete,
        ]
    );
    assert_eq!(operator.moves_requested(), 1);

    let record_id = run.record_id.clone().unwrap();
    assert_eq!(store.collection_of(&record_id), Some(Collection::Projects));
    let stored = store.snapshot(&record_id).unwrap();
    assert_eq!(stored.marker()?, Some(MigrationMarker::Migrated));
    assert_eq!(stored.select(Prop::ProjectStatus)?, Some("Completed"));
    assert_eq!(stored.people(Prop::Owner)?.to_vec(), vec![ada()]);
    assert!(relation(&stored, Prop::ChildLink).is_empty());
    assert_eq!(text(&stored, Prop::SubtaskTransfer), None);

    assert_eq!(run.subtask_ids.len(), 2);
    for id in &run.subtask_ids {
        let child = store.snapshot(id).unwrap();
        assert_eq!(relation(&child, Prop::TaskProject), vec![record_id.clone()]);
        assert_eq!(child.marker()?, None);
    }
    Ok(())
}

#[tokio::test]
async fn declining_after_creation_ends_in_error() -> Result<()> {
    let store = Arc::new(MemoryStore::new());
    let config = MigrationConfig::default();
    let operator = ScriptedOperator::new().confirm_with(false);

    let run = MigrationOrchestrator::new(store.as_ref(), &config, &operator)
        .with_demo(demo(0))
        .run()
        .await?;

    assert_eq!(run.state, MigrationState::Error);
    assert!(run.steps.is_empty());
    assert_eq!(
        run.error.as_ref().map(AppError::code),
        Some(AppError::OPERATOR_ABORTED)
    );
    let record_id = run.record_id.unwrap();
    assert_eq!(
        store.snapshot(&record_id).unwrap().marker()?,
        Some(MigrationMarker::ToMigrate)
    );
    Ok(())
}

#[tokio::test]
async fn failed_verification_loops_back_to_the_move() -> Result<()> {
    let store = Arc::new(MemoryStore::new());
    store.add_principal(ada());
    let config = MigrationConfig::default();
    let mover = store.clone();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let operator = ScriptedOperator::new()
        .confirm_with(true)
        .confirm_with(true)
        .on_move(move |summary| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                return Ok(());
            }
            mover.move_record(&summary.id, Collection::Projects)
        });

    let run = MigrationOrchestrator::new(store.as_ref(), &config, &operator)
        .with_demo(demo(1))
        .run()
        .await?;

    assert_eq!(run.state, MigrationState::Complete, "{:?}", run.error);
    assert_eq!(operator.moves_requested(), 2);
    assert_eq!(run.move_attempts, 2);
    let back_edges = run
        .history
        .iter()
        .filter(|change| {
            change.from == MigrationState::Verifying && change.to == MigrationState::AwaitManualMove
        })
        .count();
    assert_eq!(back_edges, 1);
    Ok(())
}

#[tokio::test]
async fn move_attempt_limit_stops_the_run() -> Result<()> {
    let store = Arc::new(MemoryStore::new());
    store.add_principal(ada());
    let config = MigrationConfig::default();
    let operator = ScriptedOperator::new().confirm_with(true);

    let run = MigrationOrchestrator::new(store.as_ref(), &config, &operator)
        .with_demo(demo(0))
        .with_max_move_attempts(2)
        .run()
        .await?;

    assert_eq!(run.state, MigrationState::Error);
    assert_eq!(operator.moves_requested(), 2);
    assert_eq!(
        run.error.as_ref().map(AppError::code),
        Some("ORCHESTRATOR/NOT_MOVED")
    );
    Ok(())
}

#[tokio::test]
async fn failing_step_stops_before_the_move() -> Result<()> {
    let store = Arc::new(MemoryStore::new());
    let config = MigrationConfig::default();
    let operator = ScriptedOperator::new().confirm_with(true);
    let ineligible = DemoRecord {
        status: "In progress".into(),
        ..demo(0)
    };

    let run = MigrationOrchestrator::new(store.as_ref(), &config, &operator)
        .with_demo(ineligible)
        .run()
        .await?;

    assert_eq!(run.state, MigrationState::Error);
    assert_eq!(operator.moves_requested(), 0);
    assert_eq!(run.steps.len(), 1);
    assert_eq!(
        store.snapshot(&run.record_id.unwrap()).unwrap().marker()?,
        Some(MigrationMarker::Error)
    );
    Ok(())
}
