//! The alert store: an ordered, de-duplicated, persisted sequence of alerts
//! fed by the catch-up batch at login and by live events afterwards.
//!
//! All mutation happens on the client's single event-processing thread. The
//! store owns every alert; the notify queue holds only ids, resolved lazily
//! by the consumer, so nothing dangles across a tombstoning call.

use crate::alert::{Alert, AlertDraft, AlertPayload};
use crate::config::AlertFlags;
use crate::contacts::PendingContactDirectory;
use crate::model::{AlertType, NodeHandle, SyncNode, UserHandle, UNDEF_HANDLE};
use crate::noter::{NotedEntry, SharedNodeNoter};
use crate::raw::RawAlert;
use crate::wire;
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

/// Collaborator surface the engine needs from the surrounding client:
/// the transport used to acknowledge alerts server-side, and an on-demand
/// contact email lookup. Text rendering stays outside; it is never consulted
/// for any engine decision.
pub trait ClientBridge {
    fn acknowledge_alerts(&self);

    fn lookup_email(&self, user: UserHandle) -> Option<String> {
        let _ = user;
        None
    }
}

/// Header and title strings produced for one alert by the app layer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AlertText {
    pub header: String,
    pub title: String,
}

/// Callback the app layer supplies to produce user-facing text for an
/// alert. The engine never consults the result for any decision.
pub trait AlertRenderer {
    fn text(&self, alert: &Alert) -> AlertText;
}

#[derive(Debug)]
pub struct AlertStore {
    /// Owned alerts in id order, newest at the tail.
    alerts: Vec<Alert>,
    /// Ids of alerts pending notification to the app layer.
    notify: Vec<u32>,
    /// Candidate alerts awaiting `eval_provisional`; no ids consumed yet.
    provisionals: Vec<AlertDraft>,
    provisional_mode: bool,

    next_id: u32,
    begincatchup: bool,
    catchupdone: bool,
    /// Newest timestamp seen during catch-up: live events at or before it
    /// are another session's history and arrive already seen.
    catchup_last_timestamp: i64,

    /// Last-acknowledged / first-session sequence checkpoints reported by
    /// the server; carried for the app layer, not interpreted here.
    lsn: NodeHandle,
    fsn: NodeHandle,

    flags: AlertFlags,
    max_alerts: usize,
    contacts: PendingContactDirectory,
    noter: SharedNodeNoter,
}

pub const DEFAULT_MAX_ALERTS: usize = 200;

/// Action code in contact request update events marking an acceptance;
/// other codes are deletions, cancellations and denials.
const CONTACT_REQUEST_ACCEPTED: i64 = 2;

impl Default for AlertStore {
    fn default() -> Self {
        AlertStore::new(AlertFlags::default(), DEFAULT_MAX_ALERTS)
    }
}

impl AlertStore {
    pub fn new(flags: AlertFlags, max_alerts: usize) -> Self {
        AlertStore {
            alerts: Vec::new(),
            notify: Vec::new(),
            provisionals: Vec::new(),
            provisional_mode: false,
            next_id: 1,
            begincatchup: false,
            catchupdone: false,
            catchup_last_timestamp: 0,
            lsn: UNDEF_HANDLE,
            fsn: UNDEF_HANDLE,
            flags,
            max_alerts: max_alerts.max(1),
            contacts: PendingContactDirectory::default(),
            noter: SharedNodeNoter::new(),
        }
    }

    fn next_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    // ---- catch-up ----------------------------------------------------

    /// Arm the one-shot catch-up state machine before requesting the bulk
    /// alert history.
    pub fn begin_catchup(&mut self) {
        if self.catchupdone {
            debug!("catch-up already completed this session, ignoring");
            return;
        }
        self.begincatchup = true;
    }

    pub fn catchup_in_progress(&self) -> bool {
        self.begincatchup && !self.catchupdone
    }

    pub fn catchup_done(&self) -> bool {
        self.catchupdone
    }

    pub fn catchup_last_timestamp(&self) -> i64 {
        self.catchup_last_timestamp
    }

    /// Ingest one record of the bulk history. Catch-up records are not "new"
    /// to the user, so nothing is queued for notification. Unknown or
    /// incomplete records are dropped, never fatal.
    pub fn add_from_catchup(&mut self, raw: &RawAlert) {
        if !self.catchup_in_progress() {
            debug!(tag = %raw.tag, "catch-up record outside catch-up window, ignoring");
            return;
        }
        let Some(draft) = AlertDraft::from_raw(raw) else {
            return;
        };
        self.contacts.note_email(draft.user, &draft.email);
        self.catchup_last_timestamp = self.catchup_last_timestamp.max(draft.timestamp);
        let id = self.next_id();
        self.alerts.push(Alert::from_draft(id, draft));
    }

    /// Close the catch-up window; `catchup_last_timestamp` becomes the
    /// high-water mark for live-event relevance.
    pub fn finish_catchup(&mut self) {
        if !self.begincatchup {
            debug!("finish_catchup without begin_catchup, ignoring");
            return;
        }
        self.catchupdone = true;
        info!(
            alerts = self.alerts.len(),
            last_ts = self.catchup_last_timestamp,
            "alert catch-up complete"
        );
        self.trim_alerts_to_max_count();
    }

    // ---- live ingestion ----------------------------------------------

    /// Add an alert constructed from a live event. Disabled categories are
    /// suppressed silently (no id consumed); in provisional mode the draft
    /// is buffered for `eval_provisional` instead of being committed.
    pub fn add_from_live_event(&mut self, draft: AlertDraft) {
        if self.is_unwanted(&draft) {
            debug!(kind = draft.alert_type().as_str(), "alert category disabled, suppressed");
            return;
        }
        if self.provisional_mode {
            self.provisionals.push(draft);
            return;
        }
        self.commit(draft, true);
    }

    fn is_unwanted(&self, draft: &AlertDraft) -> bool {
        let f = &self.flags;
        let enabled = match draft.alert_type() {
            AlertType::IncomingPendingContact => {
                f.contacts_enabled && f.contacts_request_incoming
            }
            AlertType::UpdatedPendingContactIncoming
            | AlertType::UpdatedPendingContactOutgoing => {
                let accepted = matches!(
                    draft.payload,
                    AlertPayload::UpdatedPendingContactIncoming {
                        action: CONTACT_REQUEST_ACCEPTED
                    } | AlertPayload::UpdatedPendingContactOutgoing {
                        action: CONTACT_REQUEST_ACCEPTED
                    }
                );
                f.contacts_enabled
                    && if accepted {
                        f.contacts_request_accepted
                    } else {
                        f.contacts_request_deleted
                    }
            }
            AlertType::ContactChange => f.contacts_enabled,
            AlertType::NewShare => f.cloud_enabled && f.cloud_newshare,
            AlertType::DeletedShare => f.cloud_enabled && f.cloud_delshare,
            AlertType::NewSharedNodes => f.cloud_enabled && f.cloud_newfiles,
            AlertType::RemovedSharedNode
            | AlertType::UpdatedSharedNode
            | AlertType::Takedown => f.cloud_enabled,
            AlertType::Payment
            | AlertType::PaymentReminder
            | AlertType::NewScheduledMeeting
            | AlertType::UpdatedScheduledMeeting
            | AlertType::DeletedScheduledMeeting => true,
        };
        !enabled
    }

    /// Merge into an existing alert of the same kind and actor, or append
    /// with a fresh id.
    fn commit(&mut self, mut draft: AlertDraft, notify: bool) {
        if draft.email.is_empty() {
            if let Some(email) = self.contacts.email_for(draft.user) {
                draft.email = email.to_string();
            }
        }
        if let Some(idx) = self.find_alert_to_combine_with(&draft) {
            let alert = &mut self.alerts[idx];
            alert.combine_from(draft);
            alert.seen = false;
            let id = alert.id;
            if notify {
                self.push_notify(id);
            }
            return;
        }
        // live events at or before the catch-up high-water mark were already
        // delivered to another session
        let seen = self.catchupdone && draft.timestamp <= self.catchup_last_timestamp;
        let id = self.next_id();
        let mut alert = Alert::from_draft(id, draft);
        alert.seen = seen;
        self.alerts.push(alert);
        if notify {
            self.push_notify(id);
        }
        self.trim_alerts_to_max_count();
    }

    fn find_alert_to_combine_with(&self, draft: &AlertDraft) -> Option<usize> {
        self.alerts
            .iter()
            .rposition(|a| a.alert_type() == draft.alert_type() && a.combines_with(draft))
    }

    fn push_notify(&mut self, id: u32) {
        if !self.notify.contains(&id) {
            self.notify.push(id);
        }
        if let Some(alert) = self.alert_mut(id) {
            alert.tag = 1;
        }
    }

    // ---- noting of shared-node deltas --------------------------------

    pub fn begin_noting_shared_nodes(&mut self) {
        self.noter.begin();
    }

    pub fn is_noting_shared_nodes(&self) -> bool {
        self.noter.is_noting()
    }

    /// Suppress per-node churn under `container` until the next conversion,
    /// used while a whole-share removal is in flight.
    pub fn ignore_next_shared_nodes_under(&mut self, container: NodeHandle) {
        self.noter.ignore_next_under(container);
    }

    /// Record one node-level delta for later batching into a single alert
    /// per (actor, container).
    pub fn note_shared_node(
        &mut self,
        actor: UserHandle,
        sub_type: AlertType,
        timestamp: i64,
        node: &SyncNode,
    ) {
        self.noter.note(actor, sub_type, timestamp, node);
    }

    /// Flush noted entries (for one actor, or all) into concrete alerts and
    /// run them through normal live ingestion. Converting again with nothing
    /// newly noted is a no-op.
    pub fn convert_noted_shared_nodes(&mut self, added: bool, actor: Option<UserHandle>) {
        for ((user, container), entry) in self.noter.take_noted(actor) {
            self.convert_entry(user, container, entry, added);
        }
    }

    fn convert_entry(
        &mut self,
        user: UserHandle,
        container: NodeHandle,
        entry: NotedEntry,
        added: bool,
    ) {
        let timestamp = entry.timestamp;
        let email = self
            .contacts
            .email_for(user)
            .unwrap_or_default()
            .to_string();
        if added {
            let files: BTreeSet<NodeHandle> = entry.files.keys().copied().collect();
            let folders: BTreeSet<NodeHandle> = entry.folders.keys().copied().collect();
            if files.is_empty() && folders.is_empty() {
                return;
            }
            self.add_from_live_event(AlertDraft::new(
                timestamp,
                user,
                email,
                AlertPayload::NewSharedNodes {
                    parent: container,
                    files,
                    folders,
                },
            ));
            return;
        }
        let (removed_files, removed_folders) =
            entry.handles_with(AlertType::RemovedSharedNode);
        let removed: BTreeSet<NodeHandle> = removed_files
            .into_iter()
            .chain(removed_folders)
            .collect();
        if !removed.is_empty() {
            self.add_from_live_event(AlertDraft::new(
                timestamp,
                user,
                email.clone(),
                AlertPayload::RemovedSharedNode { nodes: removed },
            ));
        }
        let (updated_files, updated_folders) =
            entry.handles_with(AlertType::UpdatedSharedNode);
        let updated: BTreeSet<NodeHandle> = updated_files
            .into_iter()
            .chain(updated_folders)
            .collect();
        if !updated.is_empty() {
            self.add_from_live_event(AlertDraft::new(
                timestamp,
                user,
                email,
                AlertPayload::UpdatedSharedNode { nodes: updated },
            ));
        }
    }

    /// Hold the actor's noted removals back in the stash instead of
    /// converting them now; a larger share-removal decision is pending.
    pub fn stash_deleted_noted_shared_nodes(&mut self, actor: UserHandle) {
        self.noter.stash_deleted(actor);
    }

    pub fn deleted_shared_nodes_stash_empty(&self) -> bool {
        self.noter.stash_is_empty()
    }

    /// Promote every stashed removal into real alerts.
    pub fn convert_stashed_deleted_shared_nodes(&mut self) {
        for ((user, container), entry) in self.noter.take_stash() {
            self.convert_entry(user, container, entry, false);
        }
    }

    // ---- node-removal propagation ------------------------------------

    /// Scrub a permanently deleted node from every live alert and from the
    /// noting maps. An alert whose node set becomes empty is tombstoned and
    /// leaves the notify queue.
    pub fn remove_node_alerts(&mut self, node: &SyncNode) {
        let mut emptied: Vec<u32> = Vec::new();
        for alert in &mut self.alerts {
            if alert.removed() {
                continue;
            }
            if alert.scrub_node(node.handle) && alert.node_sets_empty() {
                alert.set_removed();
                emptied.push(alert.id);
            }
        }
        if !emptied.is_empty() {
            self.notify.retain(|id| !emptied.contains(id));
        }
        self.noter.remove_node(node.handle);
    }

    /// Reclassify a "new node" entry to an "updated node" entry when the
    /// node changed state before the original alert was surfaced, so one
    /// node does not produce a contradictory shared/removed pair.
    pub fn set_new_node_alert_to_update_node_alert(&mut self, node: &SyncNode) {
        if self.noter.set_noted_to_update(node) {
            return;
        }
        // already committed but never seen: move the handle into an
        // updated-nodes alert for the same actor
        let Some(idx) = self.alerts.iter().rposition(|a| {
            !a.removed()
                && !a.seen
                && a.alert_type() == AlertType::NewSharedNodes
                && a.references_node(node.handle)
        }) else {
            return;
        };
        let (user, timestamp, email) = {
            let alert = &mut self.alerts[idx];
            alert.scrub_node(node.handle);
            if alert.node_sets_empty() {
                alert.set_removed();
                let id = alert.id;
                self.notify.retain(|n| *n != id);
            }
            let alert = &self.alerts[idx];
            (alert.user, alert.timestamp, alert.email.clone())
        };
        self.add_from_live_event(AlertDraft::new(
            timestamp,
            user,
            email,
            AlertPayload::UpdatedSharedNode {
                nodes: BTreeSet::from([node.handle]),
            },
        ));
    }

    /// Whether the handle is currently flagged as removed, either in a
    /// committed removal alert or noted/stashed as a removal.
    pub fn is_handle_in_alerts_as_removed(&self, handle: NodeHandle) -> bool {
        self.alerts.iter().any(|a| {
            !a.removed()
                && a.alert_type() == AlertType::RemovedSharedNode
                && a.references_node(handle)
        }) || self.noter.is_noted_as_removed(handle)
    }

    // ---- provisional filtering ---------------------------------------

    /// Open a buffering window: subsequent live adds are held until
    /// `eval_provisional` decides whether they surface.
    pub fn start_provisional(&mut self) {
        debug_assert!(
            self.provisionals.is_empty(),
            "provisional buffer not drained"
        );
        self.provisional_mode = true;
    }

    /// Validate every buffered alert; self-echoes of `acting_user` are
    /// discarded without consuming an id, the rest commit as usual.
    pub fn eval_provisional(&mut self, acting_user: UserHandle) {
        self.provisional_mode = false;
        let drafts = std::mem::take(&mut self.provisionals);
        for draft in drafts {
            if draft.check_provisional(acting_user) {
                self.commit(draft, true);
            } else {
                debug!(
                    kind = draft.alert_type().as_str(),
                    actor = draft.user,
                    "provisional alert discarded as self-echo"
                );
            }
        }
    }

    // ---- trimming, acknowledgment, teardown --------------------------

    /// Tombstone the oldest alerts beyond the configured cap. Rows are kept
    /// in memory until the persistence pass deletes their durable records.
    pub fn trim_alerts_to_max_count(&mut self) {
        let live = self.alerts.iter().filter(|a| !a.removed()).count();
        if live <= self.max_alerts {
            return;
        }
        let mut excess = live - self.max_alerts;
        let mut trimmed: Vec<u32> = Vec::new();
        for alert in &mut self.alerts {
            if excess == 0 {
                break;
            }
            if !alert.removed() {
                alert.set_removed();
                trimmed.push(alert.id);
                excess -= 1;
            }
        }
        self.notify.retain(|id| !trimmed.contains(id));
        debug!(trimmed = trimmed.len(), "trimmed alert store to cap");
    }

    /// Mark everything seen and tell the server through the transport
    /// collaborator. Enqueues nothing new.
    pub fn acknowledge_all(&mut self, bridge: &dyn ClientBridge) {
        let mut changed = false;
        for alert in self.alerts.iter_mut().filter(|a| !a.removed()) {
            changed |= !alert.seen;
            alert.seen = true;
        }
        if changed {
            bridge.acknowledge_alerts();
        }
    }

    /// Another session acknowledged: an external fact, so mark seen without
    /// re-notifying the local app.
    pub fn on_acknowledge_received(&mut self) {
        for alert in self.alerts.iter_mut().filter(|a| !a.removed()) {
            alert.seen = true;
        }
    }

    /// Backfill missing actor emails from the contact directory, falling
    /// back to the bridge lookup.
    pub fn update_emails(&mut self, bridge: &dyn ClientBridge) {
        for alert in self.alerts.iter_mut().filter(|a| !a.removed()) {
            if !alert.email.is_empty() {
                continue;
            }
            if let Some(email) = self.contacts.email_for(alert.user) {
                alert.email = email.to_string();
            } else if let Some(email) = bridge.lookup_email(alert.user) {
                self.contacts.note_email(alert.user, &email);
                alert.email = email;
            }
        }
    }

    pub fn set_sequence_checkpoints(&mut self, lsn: NodeHandle, fsn: NodeHandle) {
        self.lsn = lsn;
        self.fsn = fsn;
    }

    pub fn sequence_checkpoints(&self) -> (NodeHandle, NodeHandle) {
        (self.lsn, self.fsn)
    }

    /// Re-init on logout. Drops everything; wiping the durable records is
    /// the persistence collaborator's responsibility.
    pub fn clear(&mut self) {
        self.alerts.clear();
        self.notify.clear();
        self.provisionals.clear();
        self.provisional_mode = false;
        self.next_id = 1;
        self.begincatchup = false;
        self.catchupdone = false;
        self.catchup_last_timestamp = 0;
        self.lsn = UNDEF_HANDLE;
        self.fsn = UNDEF_HANDLE;
        self.contacts.clear();
        self.noter.clear();
    }

    // ---- accessors ----------------------------------------------------

    pub fn alerts(&self) -> &[Alert] {
        &self.alerts
    }

    pub fn contacts(&self) -> &PendingContactDirectory {
        &self.contacts
    }

    pub fn contacts_mut(&mut self) -> &mut PendingContactDirectory {
        &mut self.contacts
    }

    pub fn alert(&self, id: u32) -> Option<&Alert> {
        self.alerts
            .binary_search_by_key(&id, |a| a.id)
            .ok()
            .map(|idx| &self.alerts[idx])
            .filter(|a| !a.removed())
    }

    fn alert_mut(&mut self, id: u32) -> Option<&mut Alert> {
        self.alerts
            .binary_search_by_key(&id, |a| a.id)
            .ok()
            .map(|idx| &mut self.alerts[idx])
    }

    /// Produce the display text for one alert through the app's renderer.
    /// Tombstoned and unknown ids yield nothing.
    pub fn render(&self, id: u32, renderer: &dyn AlertRenderer) -> Option<AlertText> {
        self.alert(id).map(|a| renderer.text(a))
    }

    /// Ids queued for notification. Entries are ephemeral: valid only until
    /// the next mutating call.
    pub fn notify_queue(&self) -> &[u32] {
        &self.notify
    }

    /// Drain the notify queue, resetting the per-alert notification
    /// bookkeeping it consumed.
    pub fn take_notify(&mut self) -> Vec<u32> {
        let ids = std::mem::take(&mut self.notify);
        for id in &ids {
            if let Some(alert) = self.alert_mut(*id) {
                alert.tag = 0;
            }
        }
        ids
    }

    // ---- persistence hooks --------------------------------------------

    /// Restore one durable record, assigning the next session id. Returns
    /// false (record skipped) for unknown tags or truncated payloads.
    pub fn unserialize_alert(&mut self, bytes: &[u8], dbid: i64) -> bool {
        let id = self.next_id;
        let Some(mut alert) = wire::unserialize(bytes, id) else {
            warn!(dbid, "skipping unreadable persisted alert record");
            return false;
        };
        self.next_id += 1;
        alert.dbid = Some(dbid);
        self.alerts.push(alert);
        true
    }

    /// Ids of live alerts that have no durable record yet.
    pub fn unpersisted_ids(&self) -> Vec<u32> {
        self.alerts
            .iter()
            .filter(|a| !a.removed() && a.dbid.is_none())
            .map(|a| a.id)
            .collect()
    }

    pub fn serialized(&self, id: u32) -> Option<Vec<u8>> {
        self.alert(id).map(wire::serialize)
    }

    pub fn set_dbid(&mut self, id: u32, dbid: i64) {
        if let Some(alert) = self.alert_mut(id) {
            alert.dbid = Some(dbid);
        }
    }

    /// Durable row ids of tombstoned alerts, ready for deletion.
    pub fn removed_dbids(&self) -> Vec<i64> {
        self.alerts
            .iter()
            .filter(|a| a.removed())
            .filter_map(|a| a.dbid)
            .collect()
    }

    /// Physically erase tombstoned alerts once their durable records are
    /// gone.
    pub fn drop_removed(&mut self) {
        self.alerts.retain(|a| !a.removed());
        let live: BTreeSet<u32> = self.alerts.iter().map(|a| a.id).collect();
        self.notify.retain(|id| live.contains(id));
    }
}
