use async_trait::async_trait;
use blueprint_core::{
    ElementService, KnowledgeEntry, KnowledgeSink, MemorySink, ServiceConfig, SinkError,
};
use blueprint_projection::RunTrigger;
use blueprint_snapshot::{Entity, PatchOp, TextPath};
use blueprint_store::{ProjectId, RevisionStatus, StageRequest};
use blueprint_test_utils::{key, purchase_snapshot, rename_material, stage_set_snapshot};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;

struct FailingSink;

struct HangingSink;

#[async_trait]
impl KnowledgeSink for HangingSink {
    async fn publish(&self, _entry: KnowledgeEntry) -> Result<(), SinkError> {
        std::future::pending().await
    }
}

#[async_trait]
impl KnowledgeSink for FailingSink {
    async fn publish(&self, _entry: KnowledgeEntry) -> Result<(), SinkError> {
        Err(SinkError("index offline".to_string()))
    }
}

#[tokio::test]
async fn approval_publishes_digest_and_rebuilds() {
    let sink = Arc::new(MemorySink::new());
    let service = ElementService::in_memory(ServiceConfig::new())
        .unwrap()
        .with_sink(sink.clone());
    let project = ProjectId::new();
    let element = service
        .create_element(project, "Backdrop", Some(stage_set_snapshot()), "seed")
        .unwrap();
    service.flush().await.unwrap();

    let live = service.current_snapshot(element.id).unwrap();
    let draft = service
        .create_draft(project, "materials", "edit", false)
        .revision_id;
    service
        .stage_change(
            draft,
            StageRequest::patch(
                element.id,
                element.active_version_id,
                vec![rename_material(&live, "mat_frame", "Pine 45x95")],
            ),
        )
        .unwrap();
    let approval = service.approve(draft, "alice").await.unwrap();
    service.flush().await.unwrap();

    let entry = sink.latest(element.id).unwrap();
    assert_eq!(entry.version_id, approval.committed[0].version_id);
    assert_eq!(entry.title, "Backdrop");
    assert!(entry.body.contains("Pine 45x95"));

    let outcome = service.last_rebuild(project).unwrap();
    assert_eq!(outcome.rebuilt.len(), 1);
    assert_eq!(outcome.rebuilt[0].trigger, RunTrigger::Approval);
    assert!(service
        .projection()
        .materials(element.id)
        .iter()
        .any(|m| m.label == "Pine 45x95"));
    assert_eq!(
        service.projection().last_synced(element.id),
        Some(approval.committed[0].version_id)
    );
}

#[tokio::test]
async fn sink_failure_does_not_fail_approval() {
    let service = ElementService::in_memory(ServiceConfig::new().with_rebuild(false))
        .unwrap()
        .with_sink(Arc::new(FailingSink));
    let project = ProjectId::new();
    let element = service
        .create_element(project, "Wrap", Some(purchase_snapshot()), "seed")
        .unwrap();

    let draft = service.create_draft(project, "notes", "edit", false).revision_id;
    service
        .stage_change(
            draft,
            StageRequest::patch(
                element.id,
                element.active_version_id,
                vec![PatchOp::set_text(TextPath::Notes, "handle with care")],
            ),
        )
        .unwrap();

    let approval = service.approve(draft, "alice").await.unwrap();
    assert_eq!(approval.committed.len(), 1);
    assert_eq!(
        service.store().revision(draft).unwrap().status,
        RevisionStatus::Approved
    );
    assert_eq!(service.history(element.id).unwrap().len(), 2);
}

#[tokio::test]
async fn stale_approval_is_retryable_conflict() {
    let service = ElementService::in_memory(ServiceConfig::new().with_knowledge(false)).unwrap();
    let project = ProjectId::new();
    let element = service
        .create_element(project, "Wrap", Some(purchase_snapshot()), "seed")
        .unwrap();
    let v1 = element.active_version_id;

    let stale = service.create_draft(project, "notes", "edit", true).revision_id;
    service
        .stage_change(
            stale,
            StageRequest::patch(element.id, v1, vec![PatchOp::set_text(TextPath::Notes, "a")]),
        )
        .unwrap();
    let winner = service.create_draft(project, "tasks", "edit", true).revision_id;
    service
        .stage_change(
            winner,
            StageRequest::patch(
                element.id,
                v1,
                vec![PatchOp::remove(Entity::Tasks, key("tsk_1"))],
            ),
        )
        .unwrap();
    service.approve(winner, "bob").await.unwrap();

    let err = service.approve(stale, "alice").await.unwrap_err();
    assert!(err.is_conflict());
    assert!(err.is_retryable());
    assert_eq!(err.conflicts()[0].element_id, element.id);
    assert!(err.to_string().contains(&element.id.to_string()));
    assert_eq!(service.history(element.id).unwrap().len(), 2);
    assert_eq!(service.list_drafts(project).len(), 1);
}

#[tokio::test]
async fn tombstone_violation_is_not_retryable() {
    let service = ElementService::in_memory(ServiceConfig::new().with_rebuild(false)).unwrap();
    let project = ProjectId::new();
    let element = service
        .create_element(project, "Wrap", Some(purchase_snapshot()), "seed")
        .unwrap();
    let live = service.current_snapshot(element.id).unwrap();

    let remove = service.create_draft(project, "tasks", "edit", true).revision_id;
    service
        .stage_change(
            remove,
            StageRequest::patch(
                element.id,
                None,
                vec![PatchOp::remove(Entity::Tasks, key("tsk_2"))],
            ),
        )
        .unwrap();
    service.approve(remove, "alice").await.unwrap();

    let revive = service.create_draft(project, "tasks", "edit", true).revision_id;
    service
        .stage_change(
            revive,
            StageRequest::patch(
                element.id,
                None,
                vec![PatchOp::upsert(live.task("tsk_2").cloned().unwrap())],
            ),
        )
        .unwrap();
    let err = service.approve(revive, "bob").await.unwrap_err();
    assert!(!err.is_retryable());
    assert!(err.is_validation());
    assert!(err.to_string().contains("tsk_2"));
}

#[tokio::test]
async fn discarded_draft_leaves_no_trace() {
    let service = ElementService::in_memory(ServiceConfig::new().with_rebuild(false)).unwrap();
    let project = ProjectId::new();
    let element = service
        .create_element(project, "Wrap", Some(purchase_snapshot()), "seed")
        .unwrap();
    let draft = service.create_draft(project, "notes", "edit", false).revision_id;
    service
        .stage_change(
            draft,
            StageRequest::patch(
                element.id,
                None,
                vec![PatchOp::set_text(TextPath::Notes, "never")],
            ),
        )
        .unwrap();

    let rejected = service.discard(draft, "alice").unwrap();
    assert_eq!(rejected.status, RevisionStatus::Rejected);
    assert!(service.list_drafts(project).is_empty());
    assert!(service.approve(draft, "alice").await.is_err());
    assert_eq!(service.current_snapshot(element.id).unwrap().free_text.notes, "");
}

#[tokio::test]
async fn hung_sink_is_cut_off() {
    let service = ElementService::in_memory(
        ServiceConfig::new().with_publish_timeout(Duration::from_millis(20)),
    )
    .unwrap()
    .with_sink(Arc::new(HangingSink));
    let project = ProjectId::new();
    let element = service
        .create_element(project, "Wrap", Some(purchase_snapshot()), "seed")
        .unwrap();
    service.flush().await.unwrap();

    let draft = service.create_draft(project, "notes", "edit", false).revision_id;
    service
        .stage_change(
            draft,
            StageRequest::patch(
                element.id,
                None,
                vec![PatchOp::set_text(TextPath::Notes, "two coats")],
            ),
        )
        .unwrap();
    let approval = tokio::time::timeout(Duration::from_secs(5), service.approve(draft, "alice"))
        .await
        .expect("approval waited on the sink")
        .unwrap();
    service.flush().await.unwrap();

    assert_eq!(approval.committed.len(), 1);
    let outcome = service.last_rebuild(project).unwrap();
    assert_eq!(outcome.rebuilt[0].trigger, RunTrigger::Approval);
}

#[tokio::test]
async fn full_rebuild_queue_does_not_fail_writes() {
    let service = ElementService::in_memory(ServiceConfig::new().with_queue_capacity(1)).unwrap();
    let first = ProjectId::new();
    let second = ProjectId::new();
    let kept = service
        .create_element(first, "Wrap", Some(purchase_snapshot()), "seed")
        .unwrap();
    let dropped = service
        .create_element(second, "Wrap", Some(purchase_snapshot()), "seed")
        .unwrap();
    service.flush().await.unwrap();

    assert!(service.last_rebuild(first).is_some());
    assert!(service.last_rebuild(second).is_none());
    assert_eq!(service.projection().counts(kept.id).tasks, 2);

    let caught_up = service.rebuild_now(second, false);
    assert_eq!(caught_up.rebuilt.len(), 1);
    assert_eq!(service.projection().counts(dropped.id).tasks, 2);
}
