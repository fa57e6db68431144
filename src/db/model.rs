use chrono::{DateTime, Utc};

/// One persisted alert record as read back from the `alerts` table.
#[derive(Debug, Clone)]
pub struct AlertRow {
    pub id: i64,
    pub payload: Vec<u8>,
    pub created_at: DateTime<Utc>,
}
