use std::cell::Cell;
use std::collections::BTreeSet;
use sync_alerts::{
    Alert, AlertDraft, AlertPayload, AlertRenderer, AlertStore, AlertText, AlertType,
    ClientBridge, NodeKind, RawAlert, SyncNode,
};

#[derive(Default)]
struct RecordingBridge {
    acks: Cell<usize>,
}

impl ClientBridge for RecordingBridge {
    fn acknowledge_alerts(&self) {
        self.acks.set(self.acks.get() + 1);
    }

    fn lookup_email(&self, user: u64) -> Option<String> {
        Some(format!("user{user}@example.com"))
    }
}

fn node(handle: u64, parent: u64, kind: NodeKind) -> SyncNode {
    SyncNode {
        handle,
        parent,
        kind,
    }
}

fn removed_nodes_draft(user: u64, ts: i64, nodes: &[u64]) -> AlertDraft {
    AlertDraft::new(
        ts,
        user,
        "",
        AlertPayload::RemovedSharedNode {
            nodes: nodes.iter().copied().collect(),
        },
    )
}

#[test]
fn same_kind_and_actor_merge_to_one_alert() {
    let mut store = AlertStore::default();
    for ts in 0..5 {
        store.add_from_live_event(removed_nodes_draft(7, 100 + ts, &[10 + ts as u64]));
    }
    // a different actor stays separate
    store.add_from_live_event(removed_nodes_draft(8, 200, &[99]));

    let committed: Vec<_> = store.alerts().iter().filter(|a| !a.removed()).collect();
    assert_eq!(committed.len(), 2);
    match &committed[0].payload {
        AlertPayload::RemovedSharedNode { nodes } => {
            assert_eq!(nodes, &BTreeSet::from([10, 11, 12, 13, 14]));
        }
        other => panic!("unexpected payload {other:?}"),
    }
    assert_eq!(committed[0].timestamp, 104);
    // merging consumed no extra ids
    assert_eq!(committed[1].id, 2);
}

#[test]
fn ids_strictly_increase_in_store_order() {
    let mut store = AlertStore::default();
    for i in 0..20u64 {
        store.add_from_live_event(AlertDraft::new(
            i as i64,
            i,
            "",
            AlertPayload::NewShare { folder: i },
        ));
    }
    let ids: Vec<u32> = store.alerts().iter().map(|a| a.id).collect();
    assert!(ids.windows(2).all(|w| w[0] < w[1]));
}

#[test]
fn convert_noted_twice_is_a_noop() {
    let mut store = AlertStore::default();
    store.begin_noting_shared_nodes();
    store.note_shared_node(
        1,
        AlertType::NewSharedNodes,
        50,
        &node(100, 5, NodeKind::File),
    );
    store.note_shared_node(
        1,
        AlertType::NewSharedNodes,
        60,
        &node(101, 5, NodeKind::Folder),
    );
    store.convert_noted_shared_nodes(true, Some(1));
    assert_eq!(store.alerts().len(), 1);
    match &store.alerts()[0].payload {
        AlertPayload::NewSharedNodes {
            parent,
            files,
            folders,
        } => {
            assert_eq!(*parent, 5);
            assert_eq!(files, &BTreeSet::from([100]));
            assert_eq!(folders, &BTreeSet::from([101]));
        }
        other => panic!("unexpected payload {other:?}"),
    }

    // nothing newly noted: no new alert, no duplicate handles
    store.convert_noted_shared_nodes(true, Some(1));
    store.convert_noted_shared_nodes(true, None);
    assert_eq!(store.alerts().len(), 1);
    match &store.alerts()[0].payload {
        AlertPayload::NewSharedNodes { files, folders, .. } => {
            assert_eq!(files.len() + folders.len(), 2);
        }
        _ => unreachable!(),
    }
}

#[test]
fn remove_node_alerts_scrubs_everywhere() {
    let mut store = AlertStore::default();
    store.note_shared_node(
        1,
        AlertType::NewSharedNodes,
        10,
        &node(100, 5, NodeKind::File),
    );
    store.note_shared_node(
        1,
        AlertType::NewSharedNodes,
        10,
        &node(101, 5, NodeKind::File),
    );
    store.convert_noted_shared_nodes(true, None);
    store.add_from_live_event(removed_nodes_draft(2, 20, &[100]));

    store.remove_node_alerts(&node(100, 5, NodeKind::File));
    for alert in store.alerts().iter().filter(|a| !a.removed()) {
        assert!(!alert.references_node(100));
    }
    // the single-node removal alert emptied out and was tombstoned
    let removal = store
        .alerts()
        .iter()
        .find(|a| a.alert_type() == AlertType::RemovedSharedNode)
        .unwrap();
    assert!(removal.removed());
    assert!(!store.notify_queue().contains(&removal.id));
    // the new-nodes alert still carries its other handle
    let put = store
        .alerts()
        .iter()
        .find(|a| a.alert_type() == AlertType::NewSharedNodes)
        .unwrap();
    assert!(!put.removed());
    assert!(put.references_node(101));
}

#[test]
fn trim_keeps_newest_two_hundred() {
    let mut store = AlertStore::default();
    for i in 0..250u64 {
        // distinct actors so nothing merges
        store.add_from_live_event(AlertDraft::new(
            i as i64,
            i,
            "",
            AlertPayload::NewShare { folder: i },
        ));
    }
    let live: Vec<_> = store.alerts().iter().filter(|a| !a.removed()).collect();
    let dead: Vec<_> = store.alerts().iter().filter(|a| a.removed()).collect();
    assert_eq!(live.len(), 200);
    assert_eq!(dead.len(), 50);
    // the 50 oldest were the ones tombstoned
    assert!(dead.iter().all(|a| a.id <= 50));
    assert!(live.iter().all(|a| a.id > 50));
}

#[test]
fn catchup_acknowledge_cycle() {
    let mut store = AlertStore::default();
    let bridge = RecordingBridge::default();

    store.begin_catchup();
    for i in 0..5 {
        let raw = RawAlert::from_value(serde_json::json!({
            "t": "share",
            "u": 40 + i,
            "m": format!("u{i}@example.com"),
            "ts": 1000 + i,
            "n": 500 + i,
        }))
        .unwrap();
        store.add_from_catchup(&raw);
    }
    store.finish_catchup();

    let ids: Vec<u32> = store.alerts().iter().map(|a| a.id).collect();
    assert_eq!(ids, vec![1, 2, 3, 4, 5]);
    assert!(store.alerts().iter().all(|a| !a.seen));
    assert!(store.notify_queue().is_empty());

    store.acknowledge_all(&bridge);
    assert!(store.alerts().iter().all(|a| a.seen));
    assert_eq!(bridge.acks.get(), 1);

    // everything already seen: nothing changes, nothing is signalled
    store.acknowledge_all(&bridge);
    assert_eq!(bridge.acks.get(), 1);
    let before: Vec<_> = store.alerts().to_vec();
    store.on_acknowledge_received();
    assert_eq!(store.alerts(), &before[..]);
}

#[test]
fn acknowledge_without_unseen_alerts_stays_silent() {
    let mut store = AlertStore::default();
    let bridge = RecordingBridge::default();

    // empty store: nothing to flip, nothing signalled
    store.acknowledge_all(&bridge);
    assert_eq!(bridge.acks.get(), 0);

    store.add_from_live_event(AlertDraft::new(
        10,
        1,
        "",
        AlertPayload::NewShare { folder: 3 },
    ));
    store.acknowledge_all(&bridge);
    assert_eq!(bridge.acks.get(), 1);

    // repeat acknowledge flips nothing and stays silent at the bridge
    store.acknowledge_all(&bridge);
    store.acknowledge_all(&bridge);
    assert_eq!(bridge.acks.get(), 1);
}

#[test]
fn provisional_self_echo_consumes_nothing() {
    let mut store = AlertStore::default();
    store.add_from_live_event(AlertDraft::new(
        1,
        9,
        "",
        AlertPayload::NewShare { folder: 1 },
    ));

    store.start_provisional();
    store.add_from_live_event(removed_nodes_draft(7, 10, &[1]));
    store.eval_provisional(7);

    assert_eq!(store.alerts().len(), 1);
    // the discarded draft burned no id
    store.add_from_live_event(AlertDraft::new(
        2,
        10,
        "",
        AlertPayload::NewShare { folder: 2 },
    ));
    assert_eq!(store.alerts().last().unwrap().id, 2);
}

#[test]
fn provisional_commit_for_other_actor() {
    let mut store = AlertStore::default();
    store.start_provisional();
    store.add_from_live_event(removed_nodes_draft(7, 10, &[1]));
    store.add_from_live_event(AlertDraft::new(
        11,
        7,
        "",
        AlertPayload::Payment {
            success: true,
            plan: 4,
        },
    ));
    store.eval_provisional(99);
    // both pass: actor 7 is not the acting user, payments always surface
    assert_eq!(store.alerts().len(), 2);
    assert_eq!(store.notify_queue().len(), 2);
}

#[test]
fn stash_defers_removals_until_promoted() {
    let mut store = AlertStore::default();
    store.note_shared_node(
        3,
        AlertType::RemovedSharedNode,
        10,
        &node(100, 5, NodeKind::File),
    );
    store.note_shared_node(
        3,
        AlertType::RemovedSharedNode,
        12,
        &node(101, 5, NodeKind::Folder),
    );
    store.stash_deleted_noted_shared_nodes(3);
    assert!(!store.deleted_shared_nodes_stash_empty());

    // converting noted entries leaves the stash untouched
    store.convert_noted_shared_nodes(false, None);
    assert!(store.alerts().is_empty());

    store.convert_stashed_deleted_shared_nodes();
    assert!(store.deleted_shared_nodes_stash_empty());
    assert_eq!(store.alerts().len(), 1);
    match &store.alerts()[0].payload {
        AlertPayload::RemovedSharedNode { nodes } => {
            assert_eq!(nodes, &BTreeSet::from([100, 101]));
        }
        other => panic!("unexpected payload {other:?}"),
    }
}

#[test]
fn renoted_node_is_not_double_counted_against_the_stash() {
    let mut store = AlertStore::default();
    store.note_shared_node(
        3,
        AlertType::RemovedSharedNode,
        10,
        &node(100, 5, NodeKind::File),
    );
    store.stash_deleted_noted_shared_nodes(3);
    assert!(!store.deleted_shared_nodes_stash_empty());

    // the node reappears before the stashed removal is ever promoted; the
    // re-note cancels it, so conversion surfaces the node exactly once
    store.note_shared_node(
        3,
        AlertType::NewSharedNodes,
        11,
        &node(100, 5, NodeKind::File),
    );
    store.convert_noted_shared_nodes(true, Some(3));
    store.convert_stashed_deleted_shared_nodes();

    assert!(store.deleted_shared_nodes_stash_empty());
    let live: Vec<&Alert> = store.alerts().iter().filter(|a| !a.removed()).collect();
    assert_eq!(live.len(), 1);
    match &live[0].payload {
        AlertPayload::NewSharedNodes { files, .. } => {
            assert_eq!(files, &BTreeSet::from([100]));
        }
        other => panic!("unexpected payload {other:?}"),
    }
}

#[test]
fn ignored_container_suppresses_node_churn() {
    let mut store = AlertStore::default();
    store.ignore_next_shared_nodes_under(5);
    store.note_shared_node(
        1,
        AlertType::RemovedSharedNode,
        10,
        &node(100, 5, NodeKind::File),
    );
    store.note_shared_node(
        1,
        AlertType::RemovedSharedNode,
        10,
        &node(200, 6, NodeKind::File),
    );
    store.convert_noted_shared_nodes(false, None);
    assert_eq!(store.alerts().len(), 1);
    assert!(store.alerts()[0].references_node(200));
    assert!(!store.alerts()[0].references_node(100));
}

#[test]
fn unseen_new_node_reclassifies_to_update() {
    let mut store = AlertStore::default();
    store.note_shared_node(
        1,
        AlertType::NewSharedNodes,
        10,
        &node(100, 5, NodeKind::File),
    );
    // still noted: the sub-action flips in place
    store.set_new_node_alert_to_update_node_alert(&node(100, 5, NodeKind::File));
    store.convert_noted_shared_nodes(false, None);
    assert_eq!(store.alerts().len(), 1);
    assert_eq!(
        store.alerts()[0].alert_type(),
        AlertType::UpdatedSharedNode
    );

    // already committed: the handle moves to an updated-nodes alert
    let mut store = AlertStore::default();
    store.note_shared_node(
        2,
        AlertType::NewSharedNodes,
        10,
        &node(300, 5, NodeKind::File),
    );
    store.convert_noted_shared_nodes(true, None);
    store.set_new_node_alert_to_update_node_alert(&node(300, 5, NodeKind::File));
    let live: Vec<_> = store.alerts().iter().filter(|a| !a.removed()).collect();
    assert_eq!(live.len(), 1);
    assert_eq!(live[0].alert_type(), AlertType::UpdatedSharedNode);
    assert!(live[0].references_node(300));
}

#[test]
fn removed_handle_lookup_covers_alerts_and_noted() {
    let mut store = AlertStore::default();
    store.add_from_live_event(removed_nodes_draft(1, 10, &[42]));
    assert!(store.is_handle_in_alerts_as_removed(42));
    assert!(!store.is_handle_in_alerts_as_removed(43));

    store.note_shared_node(
        1,
        AlertType::RemovedSharedNode,
        11,
        &node(43, 5, NodeKind::File),
    );
    assert!(store.is_handle_in_alerts_as_removed(43));
}

#[test]
fn emails_backfill_from_directory_and_bridge() {
    let mut store = AlertStore::default();
    let bridge = RecordingBridge::default();
    store.contacts_mut().note_email(7, "cached@example.com");
    store.add_from_live_event(AlertDraft::new(
        1,
        7,
        "",
        AlertPayload::NewShare { folder: 1 },
    ));
    // commit already resolved actor 7 from the directory
    assert_eq!(store.alerts()[0].email, "cached@example.com");

    store.add_from_live_event(AlertDraft::new(
        2,
        8,
        "",
        AlertPayload::NewShare { folder: 2 },
    ));
    assert!(store.alerts()[1].email.is_empty());
    store.update_emails(&bridge);
    assert_eq!(store.alerts()[1].email, "user8@example.com");
    // the bridge lookup was cached for the next resolution
    assert_eq!(store.contacts().email_for(8), Some("user8@example.com"));
}

struct PlainRenderer;

impl AlertRenderer for PlainRenderer {
    fn text(&self, alert: &Alert) -> AlertText {
        AlertText {
            header: alert.email.clone(),
            title: alert.alert_type().as_str().to_string(),
        }
    }
}

#[test]
fn tombstoned_alerts_are_not_rendered() {
    let mut store = AlertStore::default();
    store.add_from_live_event(removed_nodes_draft(1, 10, &[42]));
    let id = store.alerts()[0].id;
    let text = store.render(id, &PlainRenderer).unwrap();
    assert_eq!(text.title, "d");

    store.remove_node_alerts(&node(42, 0, NodeKind::File));
    assert!(store.render(id, &PlainRenderer).is_none());
    assert!(store.render(999, &PlainRenderer).is_none());
}

#[test]
fn clear_resets_the_session() {
    let mut store = AlertStore::default();
    store.begin_catchup();
    store.finish_catchup();
    store.add_from_live_event(removed_nodes_draft(1, 10, &[1]));
    store.note_shared_node(
        1,
        AlertType::RemovedSharedNode,
        11,
        &node(2, 5, NodeKind::File),
    );
    store.stash_deleted_noted_shared_nodes(1);
    store.set_sequence_checkpoints(10, 20);

    store.clear();
    assert!(store.alerts().is_empty());
    assert!(store.notify_queue().is_empty());
    assert!(store.deleted_shared_nodes_stash_empty());
    assert!(!store.catchup_done());
    assert_eq!(
        store.sequence_checkpoints(),
        (sync_alerts::UNDEF_HANDLE, sync_alerts::UNDEF_HANDLE)
    );
    // id allocation restarts
    store.add_from_live_event(removed_nodes_draft(1, 10, &[1]));
    assert_eq!(store.alerts()[0].id, 1);
}
