//! Client-side alert aggregation engine for a cloud-sync client.
//!
//! Turns raw server-delivered events (bulk history at login, incremental
//! deltas during a live session) into a de-duplicated, ordered, persisted
//! stream of user-facing alerts. The engine is synchronous and driven one
//! event at a time by the surrounding client; only the durable record store
//! is async.

pub mod alert;
pub mod config;
pub mod contacts;
pub mod db;
pub mod model;
pub mod noter;
pub mod persist;
pub mod raw;
pub mod store;
pub mod wire;

pub use alert::{Alert, AlertDraft, AlertPayload, ChangeType, Changeset, TitleChange};
pub use config::{AlertFlags, Config};
pub use model::{AlertType, NodeHandle, NodeKind, SyncNode, UserHandle, UNDEF_HANDLE};
pub use raw::RawAlert;
pub use store::{AlertRenderer, AlertStore, AlertText, ClientBridge};
