//! Read-mostly cache of contact details keyed by user handle, used to
//! backfill alert emails that were missing when the record arrived.
//! Never persisted by this engine.

use crate::model::UserHandle;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingContactInfo {
    pub user: UserHandle,
    pub email: String,
    pub alternate_emails: Vec<String>,
    pub name: String,
}

#[derive(Debug, Default)]
pub struct PendingContactDirectory {
    contacts: BTreeMap<UserHandle, PendingContactInfo>,
}

impl PendingContactDirectory {
    /// Cache an email for a user if none is known yet. Catch-up records pass
    /// through here so later live events can resolve the sender.
    pub fn note_email(&mut self, user: UserHandle, email: &str) {
        if email.is_empty() {
            return;
        }
        let entry = self.contacts.entry(user).or_insert_with(|| PendingContactInfo {
            user,
            ..Default::default()
        });
        if entry.email.is_empty() {
            entry.email = email.to_string();
        } else if entry.email != email && !entry.alternate_emails.iter().any(|e| e == email) {
            entry.alternate_emails.push(email.to_string());
        }
    }

    /// Replace the whole record, e.g. after an on-demand lookup.
    pub fn refresh(&mut self, info: PendingContactInfo) {
        self.contacts.insert(info.user, info);
    }

    pub fn email_for(&self, user: UserHandle) -> Option<&str> {
        self.contacts
            .get(&user)
            .map(|c| c.email.as_str())
            .filter(|e| !e.is_empty())
    }

    pub fn get(&self, user: UserHandle) -> Option<&PendingContactInfo> {
        self.contacts.get(&user)
    }

    pub fn clear(&mut self) {
        self.contacts.clear();
    }
}
