//! The alert entity: one record per user-facing notification, one payload
//! variant per concrete kind. The original design used a virtual hierarchy;
//! here each capability (merge, provisional check, email backfill) is an
//! exhaustive match over the payload enum.

use crate::model::{AlertType, NodeHandle, UserHandle, UNDEF_HANDLE};
use crate::raw::RawAlert;
use std::collections::BTreeSet;
use tracing::warn;

/// Named change flags for an updated scheduled meeting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeType {
    Title,
    Description,
    Cancelled,
    Timezone,
    StartDate,
    EndDate,
    Rules,
}

impl ChangeType {
    pub const COUNT: usize = 7;

    fn bit(self) -> u8 {
        1 << match self {
            ChangeType::Title => 0,
            ChangeType::Description => 1,
            ChangeType::Cancelled => 2,
            ChangeType::Timezone => 3,
            ChangeType::StartDate => 4,
            ChangeType::EndDate => 5,
            ChangeType::Rules => 6,
        }
    }
}

/// Old and new title of a renamed meeting.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TitleChange {
    pub old: String,
    pub new: String,
}

/// Which fields of a scheduled meeting changed. The title pair is present
/// iff the title flag is set; the setters keep that invariant.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Changeset {
    flags: u8,
    title: Option<TitleChange>,
}

impl Changeset {
    pub fn add_change(&mut self, change: ChangeType) {
        if change == ChangeType::Title {
            debug_assert!(false, "title change requires old and new value");
            return;
        }
        self.flags |= change.bit();
    }

    pub fn add_title_change(&mut self, old: impl Into<String>, new: impl Into<String>) {
        self.flags |= ChangeType::Title.bit();
        self.title = Some(TitleChange {
            old: old.into(),
            new: new.into(),
        });
    }

    pub fn has_changed(&self, change: ChangeType) -> bool {
        self.flags & change.bit() != 0
    }

    pub fn updated_title(&self) -> Option<&TitleChange> {
        self.title.as_ref()
    }

    pub fn is_empty(&self) -> bool {
        self.flags == 0
    }

    pub(crate) fn bits(&self) -> u8 {
        self.flags
    }

    /// Rebuild from persisted parts; refused when the title invariant does
    /// not hold (persisted record was produced by a defective writer).
    pub(crate) fn from_parts(flags: u8, title: Option<TitleChange>) -> Option<Changeset> {
        let title_flagged = flags & ChangeType::Title.bit() != 0;
        if title_flagged != title.is_some() {
            warn!(flags, "changeset title flag and payload disagree, dropping");
            return None;
        }
        Some(Changeset { flags, title })
    }
}

/// Kind-specific payload of an alert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlertPayload {
    IncomingPendingContact {
        pcr: NodeHandle,
        request_deleted: bool,
        request_reminded: bool,
    },
    ContactChange {
        action: i64,
    },
    UpdatedPendingContactIncoming {
        action: i64,
    },
    UpdatedPendingContactOutgoing {
        action: i64,
    },
    NewShare {
        folder: NodeHandle,
    },
    DeletedShare {
        folder: NodeHandle,
        path: String,
        name: String,
        remover: UserHandle,
    },
    NewSharedNodes {
        parent: NodeHandle,
        files: BTreeSet<NodeHandle>,
        folders: BTreeSet<NodeHandle>,
    },
    RemovedSharedNode {
        nodes: BTreeSet<NodeHandle>,
    },
    UpdatedSharedNode {
        nodes: BTreeSet<NodeHandle>,
    },
    Payment {
        success: bool,
        plan: i64,
    },
    PaymentReminder {
        expiry: i64,
    },
    Takedown {
        takedown: bool,
        reinstate: bool,
        node: NodeHandle,
    },
    NewScheduledMeeting {
        meeting: NodeHandle,
        parent_meeting: NodeHandle,
    },
    UpdatedScheduledMeeting {
        meeting: NodeHandle,
        parent_meeting: NodeHandle,
        changes: Changeset,
    },
    DeletedScheduledMeeting {
        meeting: NodeHandle,
    },
}

impl AlertPayload {
    pub fn alert_type(&self) -> AlertType {
        match self {
            AlertPayload::IncomingPendingContact { .. } => AlertType::IncomingPendingContact,
            AlertPayload::ContactChange { .. } => AlertType::ContactChange,
            AlertPayload::UpdatedPendingContactIncoming { .. } => {
                AlertType::UpdatedPendingContactIncoming
            }
            AlertPayload::UpdatedPendingContactOutgoing { .. } => {
                AlertType::UpdatedPendingContactOutgoing
            }
            AlertPayload::NewShare { .. } => AlertType::NewShare,
            AlertPayload::DeletedShare { .. } => AlertType::DeletedShare,
            AlertPayload::NewSharedNodes { .. } => AlertType::NewSharedNodes,
            AlertPayload::RemovedSharedNode { .. } => AlertType::RemovedSharedNode,
            AlertPayload::UpdatedSharedNode { .. } => AlertType::UpdatedSharedNode,
            AlertPayload::Payment { .. } => AlertType::Payment,
            AlertPayload::PaymentReminder { .. } => AlertType::PaymentReminder,
            AlertPayload::Takedown { .. } => AlertType::Takedown,
            AlertPayload::NewScheduledMeeting { .. } => AlertType::NewScheduledMeeting,
            AlertPayload::UpdatedScheduledMeeting { .. } => AlertType::UpdatedScheduledMeeting,
            AlertPayload::DeletedScheduledMeeting { .. } => AlertType::DeletedScheduledMeeting,
        }
    }
}

/// An alert candidate that has not been committed to the store yet. Drafts
/// carry no id; ids are only consumed when a draft is actually appended, so
/// a provisional discard or a merge never burns one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertDraft {
    pub timestamp: i64,
    pub user: UserHandle,
    pub email: String,
    pub payload: AlertPayload,
}

impl AlertDraft {
    pub fn new(timestamp: i64, user: UserHandle, email: impl Into<String>, payload: AlertPayload) -> Self {
        AlertDraft {
            timestamp,
            user,
            email: email.into(),
            payload,
        }
    }

    pub fn alert_type(&self) -> AlertType {
        self.payload.alert_type()
    }

    /// Interpret a raw record into a typed draft. Field names follow the
    /// server wire tags. Returns `None` (record dropped) for an unknown
    /// discriminator or a missing mandatory field.
    pub fn from_raw(raw: &RawAlert) -> Option<AlertDraft> {
        let Some(kind) = AlertType::parse(&raw.tag) else {
            warn!(tag = %raw.tag, "unknown alert discriminator, dropping record");
            return None;
        };
        let timestamp = raw.get_i64("ts", 0);
        let user = raw.get_handle("u").unwrap_or(UNDEF_HANDLE);
        let email = raw.get_string("m", "");

        let payload = match kind {
            AlertType::IncomingPendingContact => {
                let dts = raw.get_i64("dts", 0);
                let rts = raw.get_i64("rts", 0);
                AlertPayload::IncomingPendingContact {
                    pcr: raw.get_handle("p")?,
                    request_deleted: dts != 0,
                    request_reminded: rts != 0,
                }
            }
            AlertType::ContactChange => AlertPayload::ContactChange {
                action: raw.get_int("c", -1),
            },
            AlertType::UpdatedPendingContactIncoming => {
                AlertPayload::UpdatedPendingContactIncoming {
                    action: raw.get_int("s", -1),
                }
            }
            AlertType::UpdatedPendingContactOutgoing => {
                AlertPayload::UpdatedPendingContactOutgoing {
                    action: raw.get_int("s", -1),
                }
            }
            AlertType::NewShare => AlertPayload::NewShare {
                folder: raw.get_handle("n")?,
            },
            AlertType::DeletedShare => AlertPayload::DeletedShare {
                folder: raw.get_handle("n")?,
                path: String::new(),
                name: String::new(),
                remover: raw.get_handle("o").unwrap_or(UNDEF_HANDLE),
            },
            AlertType::NewSharedNodes => {
                let mut files = BTreeSet::new();
                let mut folders = BTreeSet::new();
                for (h, k) in raw.get_handle_kind_array("f")? {
                    match k {
                        crate::model::NodeKind::File => files.insert(h),
                        crate::model::NodeKind::Folder => folders.insert(h),
                    };
                }
                AlertPayload::NewSharedNodes {
                    parent: raw.get_handle("n").unwrap_or(UNDEF_HANDLE),
                    files,
                    folders,
                }
            }
            AlertType::RemovedSharedNode => AlertPayload::RemovedSharedNode {
                nodes: BTreeSet::from([raw.get_handle("n")?]),
            },
            AlertType::UpdatedSharedNode => AlertPayload::UpdatedSharedNode {
                nodes: BTreeSet::from([raw.get_handle("n")?]),
            },
            AlertType::Payment => AlertPayload::Payment {
                success: raw.get_int("r", 0) != 0,
                plan: raw.get_int("p", -1),
            },
            AlertType::PaymentReminder => AlertPayload::PaymentReminder {
                expiry: raw.get_i64("e", timestamp),
            },
            AlertType::Takedown => {
                let down = raw.get_int("d", -1);
                AlertPayload::Takedown {
                    takedown: down == 1,
                    reinstate: down == 0,
                    node: raw.get_handle("h")?,
                }
            }
            // "mcsmp" is new-or-updated; a non-empty changeset means update.
            AlertType::NewScheduledMeeting | AlertType::UpdatedScheduledMeeting => {
                let meeting = raw.get_handle("id")?;
                let parent_meeting = raw.get_handle("p").unwrap_or(UNDEF_HANDLE);
                match changeset_from_raw(raw) {
                    Some(changes) if !changes.is_empty() => {
                        AlertPayload::UpdatedScheduledMeeting {
                            meeting,
                            parent_meeting,
                            changes,
                        }
                    }
                    _ => AlertPayload::NewScheduledMeeting {
                        meeting,
                        parent_meeting,
                    },
                }
            }
            AlertType::DeletedScheduledMeeting => AlertPayload::DeletedScheduledMeeting {
                meeting: raw.get_handle("id")?,
            },
        };
        Some(AlertDraft {
            timestamp,
            user,
            email,
            payload,
        })
    }

    /// Whether this draft should actually surface for a client that itself
    /// just performed `acting_user`'s actions. Contact changes and
    /// shared-node churn are an echo when the actor is the acting user.
    pub fn check_provisional(&self, acting_user: UserHandle) -> bool {
        match self.payload {
            AlertPayload::ContactChange { .. }
            | AlertPayload::NewSharedNodes { .. }
            | AlertPayload::RemovedSharedNode { .. }
            | AlertPayload::UpdatedSharedNode { .. } => self.user != acting_user,
            _ => true,
        }
    }
}

/// A renamed-field view of scheduled meeting change flags from the wire:
/// each present key marks a change, the title key carries `[old, new]`.
fn changeset_from_raw(raw: &RawAlert) -> Option<Changeset> {
    let mut cs = Changeset::default();
    if let Some(pair) = raw.get_string_array("cs_t") {
        if pair.len() == 2 {
            cs.add_title_change(pair[0].clone(), pair[1].clone());
        }
    }
    for (field, change) in [
        ("cs_d", ChangeType::Description),
        ("cs_c", ChangeType::Cancelled),
        ("cs_tz", ChangeType::Timezone),
        ("cs_sd", ChangeType::StartDate),
        ("cs_ed", ChangeType::EndDate),
        ("cs_r", ChangeType::Rules),
    ] {
        if raw.has(field) {
            cs.add_change(change);
        }
    }
    Some(cs)
}

/// One committed, persisted notification record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alert {
    /// Monotonic per session; gaps appear after merges.
    pub id: u32,
    pub timestamp: i64,
    /// The acting user the alert is attributed to.
    pub user: UserHandle,
    /// Lazily filled from the pending-contact directory.
    pub email: String,
    /// When false the alert is kept for bookkeeping but not shown.
    pub relevant: bool,
    pub seen: bool,
    removed: bool,
    /// Session-local notification bookkeeping; never persisted.
    pub tag: i32,
    /// Durable row id once the record has been written; owned by the
    /// persistence layer.
    pub dbid: Option<i64>,
    pub payload: AlertPayload,
}

impl Alert {
    pub fn from_draft(id: u32, draft: AlertDraft) -> Alert {
        let relevant = match draft.payload {
            // an already-expired reminder is not worth showing
            AlertPayload::PaymentReminder { expiry } => {
                expiry >= chrono::Utc::now().timestamp()
            }
            _ => true,
        };
        Alert {
            id,
            timestamp: draft.timestamp,
            user: draft.user,
            email: draft.email,
            relevant,
            seen: false,
            removed: false,
            tag: 0,
            dbid: None,
            payload: draft.payload,
        }
    }

    pub(crate) fn from_parts(
        id: u32,
        timestamp: i64,
        user: UserHandle,
        email: String,
        relevant: bool,
        seen: bool,
        payload: AlertPayload,
    ) -> Alert {
        Alert {
            id,
            timestamp,
            user,
            email,
            relevant,
            seen,
            removed: false,
            tag: 0,
            dbid: None,
            payload,
        }
    }

    pub fn alert_type(&self) -> AlertType {
        self.payload.alert_type()
    }

    pub fn removed(&self) -> bool {
        self.removed
    }

    pub fn set_removed(&mut self) {
        self.removed = true;
    }

    /// Whether `draft` is a continuation of this alert: same kind, same
    /// actor, and for batched node alerts the same container.
    pub fn combines_with(&self, draft: &AlertDraft) -> bool {
        if self.removed || self.user != draft.user {
            return false;
        }
        match (&self.payload, &draft.payload) {
            (
                AlertPayload::NewSharedNodes { parent: a, .. },
                AlertPayload::NewSharedNodes { parent: b, .. },
            ) => a == b,
            (AlertPayload::RemovedSharedNode { .. }, AlertPayload::RemovedSharedNode { .. })
            | (AlertPayload::UpdatedSharedNode { .. }, AlertPayload::UpdatedSharedNode { .. })
            | (AlertPayload::ContactChange { .. }, AlertPayload::ContactChange { .. })
            | (
                AlertPayload::UpdatedPendingContactIncoming { .. },
                AlertPayload::UpdatedPendingContactIncoming { .. },
            )
            | (
                AlertPayload::UpdatedPendingContactOutgoing { .. },
                AlertPayload::UpdatedPendingContactOutgoing { .. },
            ) => true,
            _ => false,
        }
    }

    /// Merge a combining draft into this alert: node-set kinds union their
    /// handle sets, scalar action kinds are overwritten. The timestamp
    /// advances to the newest seen.
    pub fn combine_from(&mut self, draft: AlertDraft) {
        debug_assert!(self.combines_with(&draft));
        self.timestamp = self.timestamp.max(draft.timestamp);
        if self.email.is_empty() {
            self.email = draft.email;
        }
        match (&mut self.payload, draft.payload) {
            (
                AlertPayload::NewSharedNodes { files, folders, .. },
                AlertPayload::NewSharedNodes {
                    files: new_files,
                    folders: new_folders,
                    ..
                },
            ) => {
                files.extend(new_files);
                folders.extend(new_folders);
            }
            (
                AlertPayload::RemovedSharedNode { nodes },
                AlertPayload::RemovedSharedNode { nodes: more },
            )
            | (
                AlertPayload::UpdatedSharedNode { nodes },
                AlertPayload::UpdatedSharedNode { nodes: more },
            ) => {
                nodes.extend(more);
            }
            (
                AlertPayload::ContactChange { action },
                AlertPayload::ContactChange { action: new_action },
            )
            | (
                AlertPayload::UpdatedPendingContactIncoming { action },
                AlertPayload::UpdatedPendingContactIncoming { action: new_action },
            )
            | (
                AlertPayload::UpdatedPendingContactOutgoing { action },
                AlertPayload::UpdatedPendingContactOutgoing { action: new_action },
            ) => {
                *action = new_action;
            }
            _ => {}
        }
    }

    /// Remove `handle` from this alert's node sets, if it has any.
    /// Returns true when the handle was present; an alert whose set becomes
    /// empty is tombstoned by the store.
    pub fn scrub_node(&mut self, handle: NodeHandle) -> bool {
        match &mut self.payload {
            AlertPayload::NewSharedNodes { files, folders, .. } => {
                files.remove(&handle) || folders.remove(&handle)
            }
            AlertPayload::RemovedSharedNode { nodes }
            | AlertPayload::UpdatedSharedNode { nodes } => nodes.remove(&handle),
            _ => false,
        }
    }

    /// Whether every node set of this alert is empty (only meaningful for
    /// the three shared-node kinds).
    pub fn node_sets_empty(&self) -> bool {
        match &self.payload {
            AlertPayload::NewSharedNodes { files, folders, .. } => {
                files.is_empty() && folders.is_empty()
            }
            AlertPayload::RemovedSharedNode { nodes }
            | AlertPayload::UpdatedSharedNode { nodes } => nodes.is_empty(),
            _ => false,
        }
    }

    pub fn references_node(&self, handle: NodeHandle) -> bool {
        match &self.payload {
            AlertPayload::NewSharedNodes { files, folders, .. } => {
                files.contains(&handle) || folders.contains(&handle)
            }
            AlertPayload::RemovedSharedNode { nodes }
            | AlertPayload::UpdatedSharedNode { nodes } => nodes.contains(&handle),
            _ => false,
        }
    }
}
