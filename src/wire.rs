//! Fixed-order binary codec for persisted alert records.
//!
//! One record per alert: `[kind tag][shared fields][kind-specific fields]`.
//! Readers tolerate short buffers and unknown tags by returning `None`, so a
//! damaged row skips only itself when the store is reloaded. The session-local
//! notification tag and removal tombstone are deliberately not persisted.

use crate::alert::{Alert, AlertPayload, Changeset, TitleChange};
use crate::model::{AlertType, NodeHandle};
use std::collections::BTreeSet;

// Kind tags of the persisted record header. Append-only: reusing or
// renumbering a tag would misread existing databases.
const TAG_IPC: u8 = 1;
const TAG_CONTACT_CHANGE: u8 = 2;
const TAG_UPCI: u8 = 3;
const TAG_UPCO: u8 = 4;
const TAG_NEW_SHARE: u8 = 5;
const TAG_DELETED_SHARE: u8 = 6;
const TAG_NEW_SHARED_NODES: u8 = 7;
const TAG_REMOVED_SHARED_NODE: u8 = 8;
const TAG_UPDATED_SHARED_NODE: u8 = 9;
const TAG_PAYMENT: u8 = 10;
const TAG_PAYMENT_REMINDER: u8 = 11;
const TAG_TAKEDOWN: u8 = 12;
const TAG_NEW_SCHED_MEETING: u8 = 13;
const TAG_UPDATED_SCHED_MEETING: u8 = 14;
const TAG_DELETED_SCHED_MEETING: u8 = 15;

fn kind_tag(t: AlertType) -> u8 {
    match t {
        AlertType::IncomingPendingContact => TAG_IPC,
        AlertType::ContactChange => TAG_CONTACT_CHANGE,
        AlertType::UpdatedPendingContactIncoming => TAG_UPCI,
        AlertType::UpdatedPendingContactOutgoing => TAG_UPCO,
        AlertType::NewShare => TAG_NEW_SHARE,
        AlertType::DeletedShare => TAG_DELETED_SHARE,
        AlertType::NewSharedNodes => TAG_NEW_SHARED_NODES,
        AlertType::RemovedSharedNode => TAG_REMOVED_SHARED_NODE,
        AlertType::UpdatedSharedNode => TAG_UPDATED_SHARED_NODE,
        AlertType::Payment => TAG_PAYMENT,
        AlertType::PaymentReminder => TAG_PAYMENT_REMINDER,
        AlertType::Takedown => TAG_TAKEDOWN,
        AlertType::NewScheduledMeeting => TAG_NEW_SCHED_MEETING,
        AlertType::UpdatedScheduledMeeting => TAG_UPDATED_SCHED_MEETING,
        AlertType::DeletedScheduledMeeting => TAG_DELETED_SCHED_MEETING,
    }
}

struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    fn new() -> Self {
        Writer { buf: Vec::new() }
    }

    fn u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    fn bool(&mut self, v: bool) {
        self.buf.push(v as u8);
    }

    fn i64(&mut self, v: i64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn handle(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn string(&mut self, s: &str) {
        let mut len = s.len().min(u16::MAX as usize);
        // never split a multi-byte character, the reader validates UTF-8
        while !s.is_char_boundary(len) {
            len -= 1;
        }
        self.buf.extend_from_slice(&(len as u16).to_le_bytes());
        self.buf.extend_from_slice(&s.as_bytes()[..len]);
    }

    fn handle_set(&mut self, set: &BTreeSet<NodeHandle>) {
        let len = set.len().min(u16::MAX as usize) as u16;
        self.buf.extend_from_slice(&len.to_le_bytes());
        for h in set.iter().take(len as usize) {
            self.handle(*h);
        }
    }
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Reader { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        let end = self.pos.checked_add(n)?;
        let slice = self.buf.get(self.pos..end)?;
        self.pos = end;
        Some(slice)
    }

    fn u8(&mut self) -> Option<u8> {
        Some(self.take(1)?[0])
    }

    fn bool(&mut self) -> Option<bool> {
        Some(self.u8()? != 0)
    }

    fn u16(&mut self) -> Option<u16> {
        Some(u16::from_le_bytes(self.take(2)?.try_into().ok()?))
    }

    fn i64(&mut self) -> Option<i64> {
        Some(i64::from_le_bytes(self.take(8)?.try_into().ok()?))
    }

    fn handle(&mut self) -> Option<u64> {
        Some(u64::from_le_bytes(self.take(8)?.try_into().ok()?))
    }

    fn string(&mut self) -> Option<String> {
        let len = self.u16()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).ok()
    }

    fn handle_set(&mut self) -> Option<BTreeSet<NodeHandle>> {
        let len = self.u16()? as usize;
        let mut set = BTreeSet::new();
        for _ in 0..len {
            set.insert(self.handle()?);
        }
        Some(set)
    }

    fn finished(&self) -> bool {
        self.pos == self.buf.len()
    }
}

fn write_changeset(w: &mut Writer, cs: &Changeset) {
    w.u8(cs.bits());
    if let Some(title) = cs.updated_title() {
        w.string(&title.old);
        w.string(&title.new);
    }
}

fn read_changeset(r: &mut Reader) -> Option<Changeset> {
    let bits = r.u8()?;
    let title = if bits & 1 != 0 {
        Some(TitleChange {
            old: r.string()?,
            new: r.string()?,
        })
    } else {
        None
    };
    Changeset::from_parts(bits, title)
}

/// Encode one alert into its durable record.
pub fn serialize(alert: &Alert) -> Vec<u8> {
    let mut w = Writer::new();
    w.u8(kind_tag(alert.alert_type()));
    w.i64(alert.timestamp);
    w.handle(alert.user);
    w.string(&alert.email);
    w.bool(alert.relevant);
    w.bool(alert.seen);

    match &alert.payload {
        AlertPayload::IncomingPendingContact {
            pcr,
            request_deleted,
            request_reminded,
        } => {
            w.handle(*pcr);
            w.bool(*request_deleted);
            w.bool(*request_reminded);
        }
        AlertPayload::ContactChange { action }
        | AlertPayload::UpdatedPendingContactIncoming { action }
        | AlertPayload::UpdatedPendingContactOutgoing { action } => {
            w.i64(*action);
        }
        AlertPayload::NewShare { folder } => {
            w.handle(*folder);
        }
        AlertPayload::DeletedShare {
            folder,
            path,
            name,
            remover,
        } => {
            w.handle(*folder);
            w.string(path);
            w.string(name);
            w.handle(*remover);
        }
        AlertPayload::NewSharedNodes {
            parent,
            files,
            folders,
        } => {
            w.handle(*parent);
            w.handle_set(files);
            w.handle_set(folders);
        }
        AlertPayload::RemovedSharedNode { nodes }
        | AlertPayload::UpdatedSharedNode { nodes } => {
            w.handle_set(nodes);
        }
        AlertPayload::Payment { success, plan } => {
            w.bool(*success);
            w.i64(*plan);
        }
        AlertPayload::PaymentReminder { expiry } => {
            w.i64(*expiry);
        }
        AlertPayload::Takedown {
            takedown,
            reinstate,
            node,
        } => {
            w.bool(*takedown);
            w.bool(*reinstate);
            w.handle(*node);
        }
        AlertPayload::NewScheduledMeeting {
            meeting,
            parent_meeting,
        } => {
            w.handle(*meeting);
            w.handle(*parent_meeting);
        }
        AlertPayload::UpdatedScheduledMeeting {
            meeting,
            parent_meeting,
            changes,
        } => {
            w.handle(*meeting);
            w.handle(*parent_meeting);
            write_changeset(&mut w, changes);
        }
        AlertPayload::DeletedScheduledMeeting { meeting } => {
            w.handle(*meeting);
        }
    }
    w.buf
}

/// Decode one durable record back into an alert, assigning it `id`.
/// `None` for an unknown kind tag, a short buffer or trailing garbage.
pub fn unserialize(bytes: &[u8], id: u32) -> Option<Alert> {
    let mut r = Reader::new(bytes);
    let tag = r.u8()?;
    let timestamp = r.i64()?;
    let user = r.handle()?;
    let email = r.string()?;
    let relevant = r.bool()?;
    let seen = r.bool()?;

    let payload = match tag {
        TAG_IPC => AlertPayload::IncomingPendingContact {
            pcr: r.handle()?,
            request_deleted: r.bool()?,
            request_reminded: r.bool()?,
        },
        TAG_CONTACT_CHANGE => AlertPayload::ContactChange { action: r.i64()? },
        TAG_UPCI => AlertPayload::UpdatedPendingContactIncoming { action: r.i64()? },
        TAG_UPCO => AlertPayload::UpdatedPendingContactOutgoing { action: r.i64()? },
        TAG_NEW_SHARE => AlertPayload::NewShare { folder: r.handle()? },
        TAG_DELETED_SHARE => AlertPayload::DeletedShare {
            folder: r.handle()?,
            path: r.string()?,
            name: r.string()?,
            remover: r.handle()?,
        },
        TAG_NEW_SHARED_NODES => AlertPayload::NewSharedNodes {
            parent: r.handle()?,
            files: r.handle_set()?,
            folders: r.handle_set()?,
        },
        TAG_REMOVED_SHARED_NODE => AlertPayload::RemovedSharedNode {
            nodes: r.handle_set()?,
        },
        TAG_UPDATED_SHARED_NODE => AlertPayload::UpdatedSharedNode {
            nodes: r.handle_set()?,
        },
        TAG_PAYMENT => AlertPayload::Payment {
            success: r.bool()?,
            plan: r.i64()?,
        },
        TAG_PAYMENT_REMINDER => AlertPayload::PaymentReminder { expiry: r.i64()? },
        TAG_TAKEDOWN => AlertPayload::Takedown {
            takedown: r.bool()?,
            reinstate: r.bool()?,
            node: r.handle()?,
        },
        TAG_NEW_SCHED_MEETING => AlertPayload::NewScheduledMeeting {
            meeting: r.handle()?,
            parent_meeting: r.handle()?,
        },
        TAG_UPDATED_SCHED_MEETING => AlertPayload::UpdatedScheduledMeeting {
            meeting: r.handle()?,
            parent_meeting: r.handle()?,
            changes: read_changeset(&mut r)?,
        },
        TAG_DELETED_SCHED_MEETING => AlertPayload::DeletedScheduledMeeting { meeting: r.handle()? },
        _ => return None,
    };
    if !r.finished() {
        return None;
    }
    Some(Alert::from_parts(
        id, timestamp, user, email, relevant, seen, payload,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::AlertDraft;
    use crate::model::UNDEF_HANDLE;

    fn round_trip(payload: AlertPayload) {
        let mut alert = Alert::from_draft(
            9,
            AlertDraft::new(1_700_000_000, 42, "someone@example.com", payload),
        );
        alert.seen = true;
        let bytes = serialize(&alert);
        let back = unserialize(&bytes, 9).expect("record should decode");
        assert_eq!(back, alert);
    }

    #[test]
    fn round_trip_every_kind() {
        round_trip(AlertPayload::IncomingPendingContact {
            pcr: 3,
            request_deleted: true,
            request_reminded: false,
        });
        round_trip(AlertPayload::ContactChange { action: 2 });
        round_trip(AlertPayload::UpdatedPendingContactIncoming { action: 1 });
        round_trip(AlertPayload::UpdatedPendingContactOutgoing { action: 3 });
        round_trip(AlertPayload::NewShare { folder: 88 });
        round_trip(AlertPayload::DeletedShare {
            folder: 88,
            path: "/shares/x".into(),
            name: "x".into(),
            remover: 5,
        });
        round_trip(AlertPayload::NewSharedNodes {
            parent: 1,
            files: BTreeSet::from([2, 3]),
            folders: BTreeSet::from([4]),
        });
        round_trip(AlertPayload::RemovedSharedNode {
            nodes: BTreeSet::from([9, 10, 11]),
        });
        round_trip(AlertPayload::UpdatedSharedNode {
            nodes: BTreeSet::from([12]),
        });
        round_trip(AlertPayload::Payment {
            success: false,
            plan: 101,
        });
        round_trip(AlertPayload::Takedown {
            takedown: true,
            reinstate: false,
            node: 55,
        });
        round_trip(AlertPayload::NewScheduledMeeting {
            meeting: 6,
            parent_meeting: UNDEF_HANDLE,
        });
        round_trip(AlertPayload::DeletedScheduledMeeting { meeting: 6 });
    }

    #[test]
    fn round_trip_payment_reminder_keeps_relevance() {
        // expired reminder is created irrelevant; relevance persists as-is
        let alert = Alert::from_draft(
            1,
            AlertDraft::new(50, 1, "", AlertPayload::PaymentReminder { expiry: 10 }),
        );
        assert!(!alert.relevant);
        let back = unserialize(&serialize(&alert), 1).unwrap();
        assert!(!back.relevant);
        assert_eq!(back, alert);
    }

    #[test]
    fn round_trip_changeset_with_and_without_title() {
        let mut with_title = Changeset::default();
        with_title.add_title_change("old name", "new name");
        with_title.add_change(crate::alert::ChangeType::StartDate);
        round_trip(AlertPayload::UpdatedScheduledMeeting {
            meeting: 7,
            parent_meeting: 8,
            changes: with_title,
        });

        let mut no_title = Changeset::default();
        no_title.add_change(crate::alert::ChangeType::Cancelled);
        no_title.add_change(crate::alert::ChangeType::Rules);
        round_trip(AlertPayload::UpdatedScheduledMeeting {
            meeting: 7,
            parent_meeting: 8,
            changes: no_title,
        });
    }

    #[test]
    fn truncated_and_unknown_records_are_skipped() {
        let alert = Alert::from_draft(
            1,
            AlertDraft::new(10, 2, "e@f.g", AlertPayload::NewShare { folder: 1 }),
        );
        let bytes = serialize(&alert);
        assert!(unserialize(&bytes[..bytes.len() - 1], 1).is_none());
        assert!(unserialize(&[], 1).is_none());

        let mut unknown = bytes.clone();
        unknown[0] = 200;
        assert!(unserialize(&unknown, 1).is_none());

        // trailing garbage fails the record too
        let mut long = bytes;
        long.push(0);
        assert!(unserialize(&long, 1).is_none());
    }

    #[test]
    fn oversize_string_truncates_on_a_char_boundary() {
        // two-byte characters, well past the u16 length field; 65535 falls
        // mid-character so the writer must back off to 65534
        let email = "\u{e9}".repeat(40_000);
        let alert = Alert::from_draft(
            1,
            AlertDraft::new(10, 2, email, AlertPayload::NewShare { folder: 1 }),
        );
        let back = unserialize(&serialize(&alert), 1).expect("record should decode");
        assert_eq!(back.email.len(), 65_534);
        assert!(back.email.chars().all(|c| c == '\u{e9}'));
    }
}
