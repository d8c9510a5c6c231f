use blueprint_snapshot::{Entity, PatchOp, TextPath};
use blueprint_store::{
    ElementId, ProjectId, RevisionStatus, StageRequest, Store, StoreError, VersionId,
};
use blueprint_test_utils::{key, purchase_snapshot, rename_material, stage_set_snapshot};

fn project_with_two_elements(store: &Store) -> (ProjectId, (ElementId, VersionId), (ElementId, VersionId)) {
    let project = ProjectId::new();
    let a = store
        .create_element(project, "Wrap", Some(purchase_snapshot()), "seed")
        .unwrap();
    let b = store
        .create_element(project, "Backdrop", Some(stage_set_snapshot()), "seed")
        .unwrap();
    (
        project,
        (a.id, a.active_version_id.unwrap()),
        (b.id, b.active_version_id.unwrap()),
    )
}

#[test]
fn stale_approval_conflicts_and_leaves_element_pinned() {
    let store = Store::new();
    let (project, (element, v1), _) = project_with_two_elements(&store);

    let stale = store.create_draft(project, "notes", "edit", true).revision_id;
    store
        .stage_change(
            stale,
            StageRequest::patch(element, Some(v1), vec![PatchOp::set_text(TextPath::Notes, "first")]),
        )
        .unwrap();

    let winner = store.create_draft(project, "tasks", "edit", true).revision_id;
    store
        .stage_change(
            winner,
            StageRequest::patch(element, Some(v1), vec![PatchOp::set_text(TextPath::Notes, "second")]),
        )
        .unwrap();
    let v2 = store.approve(winner, "bob").unwrap().committed[0].version_id;

    let versions_before = store.version_count();
    let err = store.approve(stale, "alice").unwrap_err();

    assert!(err.is_conflict());
    assert_eq!(err.conflicts().len(), 1);
    assert_eq!(err.conflicts()[0].element_id, element);
    assert_eq!(err.conflicts()[0].expected, v1);
    assert_eq!(err.conflicts()[0].actual, Some(v2));
    assert!(err.to_string().contains(&element.to_string()));

    assert_eq!(store.element(element).unwrap().active_version_id, Some(v2));
    assert_eq!(store.version_count(), versions_before);
    assert_eq!(store.revision(stale).unwrap().status, RevisionStatus::Draft);
}

#[test]
fn one_conflict_blocks_every_element() {
    let store = Store::new();
    let (project, (a, a1), (b, b1)) = project_with_two_elements(&store);

    let draft = store.create_draft(project, "bulk", "edit", true).revision_id;
    store
        .stage_change(
            draft,
            StageRequest::patch(a, Some(a1), vec![PatchOp::set_text(TextPath::Notes, "a")]),
        )
        .unwrap();
    store
        .stage_change(
            draft,
            StageRequest::patch(b, Some(b1), vec![PatchOp::set_text(TextPath::Notes, "b")]),
        )
        .unwrap();

    let other = store.create_draft(project, "side", "edit", true).revision_id;
    store
        .stage_change(
            other,
            StageRequest::patch(b, Some(b1), vec![PatchOp::set_text(TextPath::Risks, "moved")]),
        )
        .unwrap();
    store.approve(other, "bob").unwrap();

    let err = store.approve(draft, "alice").unwrap_err();
    assert_eq!(err.conflicts().len(), 1);
    assert_eq!(err.conflicts()[0].element_id, b);

    // a was not conflicting but must not advance either
    assert_eq!(store.element(a).unwrap().active_version_id, Some(a1));
    assert_eq!(store.current_snapshot(a).unwrap().free_text.notes, "");
}

#[test]
fn redraft_after_conflict_succeeds() {
    let store = Store::new();
    let (project, (element, v1), _) = project_with_two_elements(&store);

    let late = store.create_draft(project, "notes", "edit", true).revision_id;
    store
        .stage_change(
            late,
            StageRequest::patch(element, Some(v1), vec![PatchOp::set_text(TextPath::Notes, "late")]),
        )
        .unwrap();
    let early = store.create_draft(project, "tasks", "edit", true).revision_id;
    store
        .stage_change(
            early,
            StageRequest::patch(
                element,
                Some(v1),
                vec![PatchOp::remove(Entity::Tasks, key("tsk_1"))],
            ),
        )
        .unwrap();
    store.approve(early, "bob").unwrap();
    assert!(store.approve(late, "alice").is_err());

    let fresh_base = store.element(element).unwrap().current_version_id();
    let retry = store.create_draft(project, "notes", "edit", true).revision_id;
    store
        .stage_change(
            retry,
            StageRequest::patch(element, fresh_base, vec![PatchOp::set_text(TextPath::Notes, "late")]),
        )
        .unwrap();
    let approval = store.approve(retry, "alice").unwrap();

    let snapshot = store.current_snapshot(element).unwrap();
    assert_eq!(snapshot.free_text.notes, "late");
    assert!(snapshot.tombstones.contains(Entity::Tasks, "tsk_1"));
    assert_eq!(approval.committed[0].previous_version_id, fresh_base);
    assert_eq!(store.history(element).unwrap().len(), 3);
}

#[test]
fn unset_base_replays_on_whatever_is_live() {
    let store = Store::new();
    let (project, _, (element, _)) = project_with_two_elements(&store);
    let live = store.current_snapshot(element).unwrap();

    let first = store.create_draft(project, "materials", "edit", true).revision_id;
    store
        .stage_change(
            first,
            StageRequest::patch(element, None, vec![rename_material(&live, "mat_frame", "Pine 45x95")]),
        )
        .unwrap();
    let second = store.create_draft(project, "materials", "edit", true).revision_id;
    store
        .stage_change(
            second,
            StageRequest::patch(element, None, vec![PatchOp::set_text(TextPath::Notes, "ok")]),
        )
        .unwrap();

    store.approve(first, "alice").unwrap();
    store.approve(second, "bob").unwrap();

    let snapshot = store.current_snapshot(element).unwrap();
    assert_eq!(snapshot.material("mat_frame").unwrap().label, "Pine 45x95");
    assert_eq!(snapshot.free_text.notes, "ok");
}

#[test]
fn history_is_newest_first_and_chained() {
    let store = Store::new();
    let (project, (element, v1), _) = project_with_two_elements(&store);
    let draft = store.create_draft(project, "notes", "edit", false).revision_id;
    store
        .describe_revision(draft, "Client notes", vec!["client".to_string()])
        .unwrap();
    store
        .stage_change(
            draft,
            StageRequest::patch(element, Some(v1), vec![PatchOp::set_text(TextPath::Notes, "x")]),
        )
        .unwrap();
    store.approve(draft, "alice").unwrap();

    let history = store.history(element).unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].based_on_version_id, Some(history[1].id));
    assert_eq!(history[0].summary, "Client notes");
    assert_eq!(history[0].tags, vec!["client".to_string()]);
    assert_eq!(history[1].id, v1);
}

#[test]
fn approving_deleted_element_is_not_found() {
    let store = Store::new();
    let (project, (element, v1), _) = project_with_two_elements(&store);
    let draft = store.create_draft(project, "notes", "edit", false).revision_id;
    store
        .stage_change(
            draft,
            StageRequest::patch(element, Some(v1), vec![PatchOp::set_text(TextPath::Notes, "x")]),
        )
        .unwrap();
    store.delete_element(element).unwrap();

    // The pending change went with the element
    assert!(store.changes(draft).unwrap().is_empty());
    assert!(matches!(
        store.stage_change(draft, StageRequest::patch(element, None, Vec::new())),
        Err(StoreError::ElementNotFound(_))
    ));
}
