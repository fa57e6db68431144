use serde::{Deserialize, Serialize};

/// Opaque 64-bit identifier for a user account.
pub type UserHandle = u64;
/// Opaque 64-bit identifier for a synced file, folder, share root,
/// contact request or scheduled meeting.
pub type NodeHandle = u64;

/// Sentinel for "no handle" (matches the sync layer's undefined handle).
pub const UNDEF_HANDLE: u64 = u64::MAX;

/// Wire discriminator of an alert record, one per concrete alert kind.
/// The string forms are the server's notification type tags.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub enum AlertType {
    IncomingPendingContact,
    ContactChange,
    UpdatedPendingContactIncoming,
    UpdatedPendingContactOutgoing,
    NewShare,
    DeletedShare,
    NewSharedNodes,
    RemovedSharedNode,
    UpdatedSharedNode,
    Payment,
    PaymentReminder,
    Takedown,
    NewScheduledMeeting,
    UpdatedScheduledMeeting,
    DeletedScheduledMeeting,
}

impl AlertType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertType::IncomingPendingContact => "ipc",
            AlertType::ContactChange => "c",
            AlertType::UpdatedPendingContactIncoming => "upci",
            AlertType::UpdatedPendingContactOutgoing => "upco",
            AlertType::NewShare => "share",
            AlertType::DeletedShare => "dshare",
            AlertType::NewSharedNodes => "put",
            AlertType::RemovedSharedNode => "d",
            AlertType::UpdatedSharedNode => "u",
            AlertType::Payment => "psts",
            AlertType::PaymentReminder => "pses",
            AlertType::Takedown => "ph",
            // "mcsmp" covers both new and updated scheduled meetings on the
            // wire; the presence of a changeset decides which one it is.
            AlertType::NewScheduledMeeting => "mcsmp",
            AlertType::UpdatedScheduledMeeting => "mcsmp",
            AlertType::DeletedScheduledMeeting => "mcsmr",
        }
    }

    pub fn parse(tag: &str) -> Option<AlertType> {
        Some(match tag {
            "ipc" => AlertType::IncomingPendingContact,
            "c" => AlertType::ContactChange,
            "upci" => AlertType::UpdatedPendingContactIncoming,
            "upco" => AlertType::UpdatedPendingContactOutgoing,
            "share" => AlertType::NewShare,
            "dshare" => AlertType::DeletedShare,
            "put" => AlertType::NewSharedNodes,
            "d" => AlertType::RemovedSharedNode,
            "u" => AlertType::UpdatedSharedNode,
            "psts" => AlertType::Payment,
            "pses" => AlertType::PaymentReminder,
            "ph" => AlertType::Takedown,
            "mcsmp" => AlertType::NewScheduledMeeting,
            "mcsmr" => AlertType::DeletedScheduledMeeting,
            _ => return None,
        })
    }
}

/// Whether a synced node is a file or a folder. Node events are partitioned
/// by this when they are batched into a single alert.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum NodeKind {
    File,
    Folder,
}

impl NodeKind {
    pub fn from_wire(t: i64) -> Option<NodeKind> {
        match t {
            0 => Some(NodeKind::File),
            1 => Some(NodeKind::Folder),
            _ => None,
        }
    }
}

/// Minimal view of a synced node, handed in by the sync layer. The engine
/// only ever needs the handle, the containing share/folder and the kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncNode {
    pub handle: NodeHandle,
    pub parent: NodeHandle,
    pub kind: NodeKind,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alert_type_tags_round_trip() {
        for t in [
            AlertType::IncomingPendingContact,
            AlertType::ContactChange,
            AlertType::UpdatedPendingContactIncoming,
            AlertType::UpdatedPendingContactOutgoing,
            AlertType::NewShare,
            AlertType::DeletedShare,
            AlertType::NewSharedNodes,
            AlertType::RemovedSharedNode,
            AlertType::UpdatedSharedNode,
            AlertType::Payment,
            AlertType::PaymentReminder,
            AlertType::Takedown,
            AlertType::DeletedScheduledMeeting,
        ] {
            assert_eq!(AlertType::parse(t.as_str()), Some(t));
        }
        // the shared meeting tag parses to the "new" kind by default
        assert_eq!(
            AlertType::parse("mcsmp"),
            Some(AlertType::NewScheduledMeeting)
        );
        assert_eq!(AlertType::parse("bogus"), None);
    }

    #[test]
    fn node_kind_from_wire() {
        assert_eq!(NodeKind::from_wire(0), Some(NodeKind::File));
        assert_eq!(NodeKind::from_wire(1), Some(NodeKind::Folder));
        assert_eq!(NodeKind::from_wire(7), None);
    }
}
