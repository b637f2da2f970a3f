#![allow(clippy::unwrap_used, clippy::expect_used)]

mod util;

use anyhow::Result;
use taskmover_lib::config::MigrationConfig;
use taskmover_lib::eligibility::OverflowPolicy;
use taskmover_lib::model::{Collection, MigrationMarker, Person, Prop, PropertyValue};
use taskmover_lib::operator::ScriptedOperator;
use taskmover_lib::steps::{run_step, RecordOutcome, StepContext, StepKind, NOT_YET_MOVED};
use taskmover_lib::store::MemoryStore;
use taskmover_lib::{transfer, AppError};

use util::{ada, grace, project, relation, seed_with_subtasks, subtask, text, uid};

#[tokio::test]
async fn pre_move_steps_park_subtasks_and_detach_them() -> Result<()> {
    let store = MemoryStore::new();
    let config = MigrationConfig::default();
    let operator = ScriptedOperator::new();
    let project_id = uid(1);
    let subtasks = seed_with_subtasks(&store, project(&project_id, "Launch site"), 2);

    let ctx = StepContext::new(&store, &config, &operator);
    for step in [
        StepKind::Validate,
        StepKind::SaveParentRelations,
        StepKind::SaveSubtaskRelations,
        StepKind::RemoveSubtasks,
    ] {
        let report = run_step(&ctx, step).await?;
        assert!(!report.has_failures(), "{step} failed: {:?}", report.records);
    }

    let stored = store.snapshot(&project_id).unwrap();
    assert_eq!(stored.marker()?, Some(MigrationMarker::ToMigrate));
    assert!(relation(&stored, Prop::ChildLink).is_empty());
    let parked = transfer::decode(&text(&stored, Prop::SubtaskTransfer).unwrap())?;
    assert_eq!(parked, subtasks);
    assert_eq!(text(&stored, Prop::ParentTransfer), None);

    for id in &subtasks {
        let child = store.snapshot(id).unwrap();
        assert_eq!(child.marker()?, Some(MigrationMarker::ToRelink));
        assert_eq!(text(&child, Prop::ParentTransfer), Some(project_id.clone()));
    }
    Ok(())
}

#[tokio::test]
async fn ineligible_records_are_marked_and_leave_the_queue() -> Result<()> {
    let store = MemoryStore::new();
    let config = MigrationConfig::default();
    let operator = ScriptedOperator::new();
    store.insert(
        Collection::Tasks,
        project(&uid(1), "Draft").with(Prop::Status, PropertyValue::select("In progress")),
    );
    store.insert(Collection::Tasks, project(&uid(2), "Ready"));

    let ctx = StepContext::new(&store, &config, &operator);
    let report = run_step(&ctx, StepKind::Validate).await?;
    assert_eq!(report.failed(), 1);
    assert_eq!(report.succeeded(), 1);
    let failed = report.find(&uid(1)).unwrap();
    assert!(failed.details[0].contains("In progress"));
    assert_eq!(
        store.snapshot(&uid(1)).unwrap().marker()?,
        Some(MigrationMarker::Error)
    );

    let again = run_step(&ctx, StepKind::Validate).await?;
    assert_eq!(again.records.len(), 1);
    Ok(())
}

#[tokio::test]
async fn saving_parents_twice_fails_without_touching_the_field() -> Result<()> {
    let store = MemoryStore::new();
    let config = MigrationConfig::default();
    let operator = ScriptedOperator::new();
    let child = uid(1);
    let parents = vec![uid(50), uid(51)];
    store.insert(
        Collection::Tasks,
        project(&child, "Child").with(Prop::ParentLink, PropertyValue::relation(parents.clone())),
    );

    let ctx = StepContext::new(&store, &config, &operator);
    let first = run_step(&ctx, StepKind::SaveParentRelations).await?;
    assert_eq!(first.succeeded(), 1);
    let saved = text(&store.snapshot(&child).unwrap(), Prop::ParentTransfer).unwrap();
    assert_eq!(saved, transfer::encode(&parents));

    let second = run_step(&ctx, StepKind::SaveParentRelations).await?;
    let record = second.find(&child).unwrap();
    assert_eq!(record.outcome, RecordOutcome::Failed);
    assert_eq!(
        record.error.as_ref().map(AppError::code),
        Some(AppError::TRANSFER_FILLED)
    );
    let stored = store.snapshot(&child).unwrap();
    assert_eq!(text(&stored, Prop::ParentTransfer), Some(saved));
    assert_eq!(stored.marker()?, Some(MigrationMarker::Error));
    Ok(())
}

#[tokio::test]
async fn records_without_parent_are_skipped() -> Result<()> {
    let store = MemoryStore::new();
    let config = MigrationConfig::default();
    let operator = ScriptedOperator::new();
    store.insert(Collection::Tasks, project(&uid(1), "Root"));

    let ctx = StepContext::new(&store, &config, &operator);
    let report = run_step(&ctx, StepKind::SaveParentRelations).await?;
    assert_eq!(report.skipped(), 1);
    assert!(store.updates().is_empty());
    Ok(())
}

#[tokio::test]
async fn long_subtask_lists_are_read_in_full() -> Result<()> {
    let store = MemoryStore::new();
    let config = MigrationConfig::default();
    let operator = ScriptedOperator::new();
    let subtasks = seed_with_subtasks(&store, project(&uid(1), "Big"), 30);

    let ctx = StepContext::new(&store, &config, &operator);
    let report = run_step(&ctx, StepKind::SaveSubtaskRelations).await?;
    assert_eq!(report.succeeded(), 1);
    assert!(store.relation_reads() >= 1);
    let parked = transfer::decode(
        &text(&store.snapshot(&uid(1)).unwrap(), Prop::SubtaskTransfer).unwrap(),
    )?;
    assert_eq!(parked.len(), 30);
    assert_eq!(parked, subtasks);
    Ok(())
}

#[tokio::test]
async fn overflow_is_a_record_error_under_reject_policy() -> Result<()> {
    let store = MemoryStore::new();
    let config = MigrationConfig {
        overflow_policy: OverflowPolicy::Reject,
        ..MigrationConfig::default()
    };
    let operator = ScriptedOperator::new();
    seed_with_subtasks(&store, project(&uid(1), "Big"), 30);
    store.insert(Collection::Tasks, project(&uid(2), "Small"));

    let ctx = StepContext::new(&store, &config, &operator);
    let report = run_step(&ctx, StepKind::SaveSubtaskRelations).await?;
    let big = report.find(&uid(1)).unwrap();
    assert_eq!(
        big.error.as_ref().map(AppError::code),
        Some(AppError::RELATION_OVERFLOW)
    );
    assert_eq!(report.find(&uid(2)).unwrap().outcome, RecordOutcome::Skipped);
    assert_eq!(
        store.snapshot(&uid(1)).unwrap().marker()?,
        Some(MigrationMarker::Error)
    );
    Ok(())
}

#[tokio::test]
async fn removing_unsaved_subtasks_is_refused() -> Result<()> {
    let store = MemoryStore::new();
    let config = MigrationConfig::default();
    let operator = ScriptedOperator::new();
    seed_with_subtasks(&store, project(&uid(1), "Unsaved"), 2);

    let ctx = StepContext::new(&store, &config, &operator);
    let report = run_step(&ctx, StepKind::RemoveSubtasks).await?;
    let record = report.find(&uid(1)).unwrap();
    assert_eq!(
        record.error.as_ref().map(AppError::code),
        Some(AppError::RELATION_NOT_SAVED)
    );
    assert_eq!(relation(&store.snapshot(&uid(1)).unwrap(), Prop::ChildLink).len(), 2);
    Ok(())
}

#[tokio::test]
async fn subtask_held_by_another_project_marks_the_record() -> Result<()> {
    let store = MemoryStore::new();
    let config = MigrationConfig::default();
    let operator = ScriptedOperator::new();
    let project_id = uid(1);
    let other_project = uid(2);
    let subtasks = seed_with_subtasks(&store, project(&project_id, "Second home"), 2);
    store.insert(
        Collection::Tasks,
        subtask(&subtasks[1], "Subtask 2").with(
            Prop::ParentTransfer,
            PropertyValue::Text(transfer::encode(&[other_project.clone()])),
        ),
    );

    let ctx = StepContext::new(&store, &config, &operator);
    let saved = run_step(&ctx, StepKind::SaveSubtaskRelations).await?;
    let record = saved.find(&project_id).unwrap();
    assert_eq!(record.outcome, RecordOutcome::Failed);
    assert!(record.details.iter().any(|line| line == "marked Error"));

    let stored = store.snapshot(&project_id).unwrap();
    assert_eq!(stored.marker()?, Some(MigrationMarker::Error));
    let held = store.snapshot(&subtasks[1]).unwrap();
    assert_eq!(text(&held, Prop::ParentTransfer), Some(other_project));
    assert_eq!(held.marker()?, None);

    let removed = run_step(&ctx, StepKind::RemoveSubtasks).await?;
    assert!(removed.records.is_empty());
    assert_eq!(
        relation(&store.snapshot(&project_id).unwrap(), Prop::ChildLink),
        subtasks
    );
    Ok(())
}

#[tokio::test]
async fn several_assignees_keep_the_chosen_one() -> Result<()> {
    let store = MemoryStore::new();
    let config = MigrationConfig::default();
    let operator = ScriptedOperator::new().choose(Some(1));
    let existing = Person::named(uid(902), "Linus");
    store.insert(
        Collection::Tasks,
        project(&uid(1), "Shared")
            .with(Prop::Assignee, PropertyValue::People(vec![ada(), grace()]))
            .with(Prop::Participants, PropertyValue::People(vec![existing.clone()])),
    );

    let ctx = StepContext::new(&store, &config, &operator);
    let report = run_step(&ctx, StepKind::FixAssignee).await?;
    assert_eq!(report.succeeded(), 1);

    let stored = store.snapshot(&uid(1)).unwrap();
    assert_eq!(stored.people(Prop::Assignee)?.to_vec(), vec![grace()]);
    assert_eq!(stored.people(Prop::Participants)?.to_vec(), vec![existing, ada()]);
    Ok(())
}

#[tokio::test]
async fn operator_can_leave_assignees_alone() -> Result<()> {
    let store = MemoryStore::new();
    let config = MigrationConfig::default();
    let operator = ScriptedOperator::new().choose(None);
    store.insert(
        Collection::Tasks,
        project(&uid(1), "Shared").with(Prop::Assignee, PropertyValue::People(vec![ada(), grace()])),
    );

    let ctx = StepContext::new(&store, &config, &operator);
    let report = run_step(&ctx, StepKind::FixAssignee).await?;
    assert_eq!(report.skipped(), 1);
    assert!(store.updates().is_empty());
    Ok(())
}

#[tokio::test]
async fn missing_assignee_gets_the_fallback_principal() -> Result<()> {
    let store = MemoryStore::new();
    store.add_principal(grace());
    store.add_principal(ada());
    let config = MigrationConfig {
        fallback_assignee: Some("ADA@example.com".into()),
        ..MigrationConfig::default()
    };
    let operator = ScriptedOperator::new();
    store.insert(
        Collection::Tasks,
        project(&uid(1), "Orphan").with(Prop::Assignee, PropertyValue::People(Vec::new())),
    );
    store.insert(
        Collection::Tasks,
        project(&uid(2), "Orphan 2").with(Prop::Assignee, PropertyValue::People(Vec::new())),
    );

    let ctx = StepContext::new(&store, &config, &operator);
    let report = run_step(&ctx, StepKind::FixAssignee).await?;
    assert_eq!(report.succeeded(), 2);
    for id in [uid(1), uid(2)] {
        assert_eq!(store.snapshot(&id).unwrap().people(Prop::Assignee)?.to_vec(), vec![ada()]);
    }
    Ok(())
}

#[tokio::test]
async fn missing_fallback_is_reported_but_not_marked() -> Result<()> {
    let store = MemoryStore::new();
    let config = MigrationConfig::default();
    let operator = ScriptedOperator::new();
    store.insert(
        Collection::Tasks,
        project(&uid(1), "Orphan").with(Prop::Assignee, PropertyValue::People(Vec::new())),
    );
    store.insert(Collection::Tasks, project(&uid(2), "Assigned"));

    let ctx = StepContext::new(&store, &config, &operator);
    let report = run_step(&ctx, StepKind::FixAssignee).await?;
    assert_eq!(report.failed(), 1);
    assert_eq!(report.skipped(), 1);
    assert_eq!(
        store.snapshot(&uid(1)).unwrap().marker()?,
        Some(MigrationMarker::ToMigrate)
    );
    Ok(())
}

#[tokio::test]
async fn verify_move_without_records_is_not_an_error() -> Result<()> {
    let store = MemoryStore::new();
    let config = MigrationConfig::default();
    let operator = ScriptedOperator::new();
    store.insert(Collection::Tasks, project(&uid(1), "Still here"));

    let ctx = StepContext::new(&store, &config, &operator);
    let report = run_step(&ctx, StepKind::VerifyMove).await?;
    assert!(report.records.is_empty());
    assert!(!report.has_failures());
    assert_eq!(report.notes, vec![NOT_YET_MOVED.to_string()]);

    store.move_record(&uid(1), Collection::Projects)?;
    let report = run_step(&ctx, StepKind::VerifyMove).await?;
    assert_eq!(report.succeeded(), 1);
    assert!(report.notes.is_empty());
    Ok(())
}

#[tokio::test]
async fn post_move_update_writes_only_mapped_values() -> Result<()> {
    let store = MemoryStore::new();
    let config = MigrationConfig::default();
    let operator = ScriptedOperator::new();
    store.insert(
        Collection::Projects,
        project(&uid(1), "Cancelled one")
            .with(Prop::Status, PropertyValue::select("Cancelled"))
            .with(Prop::Priority, PropertyValue::select("High")),
    );

    let ctx = StepContext::new(&store, &config, &operator);
    let report = run_step(&ctx, StepKind::PostMoveUpdate).await?;
    assert_eq!(report.succeeded(), 1);

    let payloads = store.updates_for(&uid(1));
    assert_eq!(payloads.len(), 1);
    let allowed = [
        Prop::ProjectStatus,
        Prop::Category,
        Prop::Priority,
        Prop::Owner,
        Prop::TargetDate,
    ];
    for key in payloads[0].keys() {
        assert!(
            allowed.iter().any(|prop| prop.name() == key),
            "unexpected key {key}"
        );
    }
    assert!(!payloads[0].contains_key(Prop::Priority.name()));

    let stored = store.snapshot(&uid(1)).unwrap();
    assert_eq!(stored.select(Prop::ProjectStatus)?, Some("Cancelled"));
    assert_eq!(stored.people(Prop::Owner)?.to_vec(), vec![ada()]);
    assert_eq!(stored.select(Prop::Category)?, Some("Project"));
    assert_eq!(stored.select(Prop::Priority)?, Some("High"));
    Ok(())
}

#[tokio::test]
async fn relinking_parents_tolerates_missing_pages() -> Result<()> {
    let store = MemoryStore::new();
    let config = MigrationConfig::default();
    let operator = ScriptedOperator::new();
    let parent = uid(50);
    let missing = uid(51);
    store.insert(Collection::Projects, project(&parent, "Program"));
    store.insert(
        Collection::Projects,
        project(&uid(1), "Child").with(
            Prop::ParentTransfer,
            PropertyValue::Text(format!("{parent},{missing}")),
        ),
    );

    let ctx = StepContext::new(&store, &config, &operator);
    let report = run_step(&ctx, StepKind::RelinkParentProjects).await?;
    let child = report.find(&uid(1)).unwrap();
    assert_eq!(child.outcome, RecordOutcome::Succeeded);
    assert!(child.details.iter().any(|d| d.contains("Program")));
    assert!(child.details.iter().any(|d| d.contains("Unknown")));

    let stored = store.snapshot(&uid(1)).unwrap();
    assert_eq!(relation(&stored, Prop::ParentProjects), vec![parent, missing]);
    assert_eq!(text(&stored, Prop::ParentTransfer), None);
    assert_eq!(stored.marker()?, Some(MigrationMarker::Migrated));
    Ok(())
}

#[tokio::test]
async fn unreadable_parent_transfer_marks_error() -> Result<()> {
    let store = MemoryStore::new();
    let config = MigrationConfig::default();
    let operator = ScriptedOperator::new();
    store.insert(
        Collection::Projects,
        project(&uid(1), "Broken")
            .with(Prop::ParentTransfer, PropertyValue::Text("not an id".into())),
    );
    store.insert(Collection::Projects, project(&uid(2), "Fine"));

    let ctx = StepContext::new(&store, &config, &operator);
    let report = run_step(&ctx, StepKind::RelinkParentProjects).await?;
    assert_eq!(
        report.find(&uid(1)).unwrap().error.as_ref().map(AppError::code),
        Some(AppError::TRANSFER_INVALID)
    );
    assert_eq!(report.find(&uid(2)).unwrap().outcome, RecordOutcome::Skipped);
    assert_eq!(
        store.snapshot(&uid(1)).unwrap().marker()?,
        Some(MigrationMarker::Error)
    );
    Ok(())
}

#[tokio::test]
async fn relinking_subtasks_twice_never_duplicates_links() -> Result<()> {
    let store = MemoryStore::new();
    let config = MigrationConfig::default();
    let operator = ScriptedOperator::new();
    let project_id = uid(1);
    let linked = uid(10);
    let fresh = uid(11);
    store.insert(
        Collection::Tasks,
        subtask(&linked, "Already linked")
            .with(Prop::TaskProject, PropertyValue::relation(vec![project_id.clone()])),
    );
    store.insert(
        Collection::Tasks,
        subtask(&fresh, "Fresh")
            .with(Prop::Marker, PropertyValue::marker(Some(MigrationMarker::ToRelink)))
            .with(
                Prop::ParentTransfer,
                PropertyValue::Text(transfer::encode(&[project_id.clone()])),
            ),
    );
    let parked = transfer::encode(&[linked.clone(), fresh.clone()]);
    store.insert(
        Collection::Projects,
        project(&project_id, "Moved")
            .with(Prop::SubtaskTransfer, PropertyValue::Text(parked.clone())),
    );

    let ctx = StepContext::new(&store, &config, &operator);
    let first = run_step(&ctx, StepKind::RelinkSubtasks).await?;
    assert_eq!(first.succeeded(), 1);

    // Queue the same transfer content again.
    store.insert(
        Collection::Projects,
        project(&project_id, "Moved")
            .with(Prop::SubtaskTransfer, PropertyValue::Text(parked)),
    );
    let second = run_step(&ctx, StepKind::RelinkSubtasks).await?;
    assert_eq!(second.succeeded(), 1);

    for id in [&linked, &fresh] {
        let child = store.snapshot(id).unwrap();
        assert_eq!(relation(&child, Prop::TaskProject), vec![project_id.clone()]);
        assert_eq!(child.marker()?, None);
        assert_eq!(text(&child, Prop::ParentTransfer), None);
    }
    let stored = store.snapshot(&project_id).unwrap();
    assert_eq!(text(&stored, Prop::SubtaskTransfer), None);
    assert_eq!(stored.marker()?, Some(MigrationMarker::Migrated));
    Ok(())
}

#[tokio::test]
async fn failed_subtask_keeps_the_record_for_a_rerun() -> Result<()> {
    let store = MemoryStore::new();
    let config = MigrationConfig::default();
    let operator = ScriptedOperator::new();
    let project_id = uid(1);
    let ok = uid(10);
    let broken = uid(11);
    store.insert(Collection::Tasks, subtask(&ok, "Ok"));
    store.insert(Collection::Tasks, subtask(&broken, "Broken"));
    store.fail_updates_for(&broken);
    store.insert(
        Collection::Projects,
        project(&project_id, "Moved").with(
            Prop::SubtaskTransfer,
            PropertyValue::Text(transfer::encode(&[ok.clone(), broken.clone()])),
        ),
    );

    let ctx = StepContext::new(&store, &config, &operator);
    let report = run_step(&ctx, StepKind::RelinkSubtasks).await?;
    let record = report.find(&project_id).unwrap();
    assert_eq!(record.outcome, RecordOutcome::Failed);
    assert_eq!(record.details.len(), 2);
    assert!(record.details[0].ends_with("linked"));

    let stored = store.snapshot(&project_id).unwrap();
    assert!(text(&stored, Prop::SubtaskTransfer).is_some());
    assert_eq!(stored.marker()?, Some(MigrationMarker::ToMigrate));
    assert_eq!(
        relation(&store.snapshot(&ok).unwrap(), Prop::TaskProject),
        vec![project_id]
    );
    Ok(())
}

#[tokio::test]
async fn whole_pipeline_ends_in_migrated() -> Result<()> {
    let store = MemoryStore::new();
    let config = MigrationConfig::default();
    let operator = ScriptedOperator::new();
    let project_id = uid(1);
    let subtasks = seed_with_subtasks(&store, project(&project_id, "Launch site"), 3);

    let ctx = StepContext::new(&store, &config, &operator);
    for step in &StepKind::ALL[..5] {
        assert!(!run_step(&ctx, *step).await?.has_failures(), "{step}");
    }
    store.move_record(&project_id, Collection::Projects)?;
    for step in &StepKind::ALL[5..] {
        assert!(!run_step(&ctx, *step).await?.has_failures(), "{step}");
    }

    let stored = store.snapshot(&project_id).unwrap();
    assert_eq!(stored.marker()?, Some(MigrationMarker::Migrated));
    assert_eq!(stored.select(Prop::ProjectStatus)?, Some("Completed"));
    assert_eq!(text(&stored, Prop::SubtaskTransfer), None);
    for id in &subtasks {
        let child = store.snapshot(id).unwrap();
        assert_eq!(relation(&child, Prop::TaskProject), vec![project_id.clone()]);
        assert_eq!(child.marker()?, None);
        assert_eq!(text(&child, Prop::ParentTransfer), None);
    }

    let idle = run_step(&ctx, StepKind::RelinkSubtasks).await?;
    assert!(idle.records.is_empty());
    Ok(())
}
