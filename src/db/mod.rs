//! Durable key-value storage for alert records, backed by SQLite.
//!
//! One variable-length binary record per alert, keyed by a locally assigned
//! row id. The engine never touches SQL directly; it exchanges byte buffers
//! with this layer through the wire codec.

mod model;
mod repo;

pub use model::AlertRow;
pub use repo::{
    count_alerts, delete_alert, init_pool, insert_alert, load_alerts, run_migrations, Pool,
};
