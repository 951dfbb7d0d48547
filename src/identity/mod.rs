// src/identity/mod.rs
//! Visitor identity
//!
//! - **Storage**: two-scope key/value persistence (memory or SQLite)
//! - **Id**: reproducible base-36 identifier tokens
//! - **Page**: the hosting page and attributes derived from it
//! - **Visitor**: visitor/session ids, consent and staged attributes
//!
//! # Persisted layout
//!
//! ```text
//! Local   squeaky_visitor_id      long-lived visitor id
//! Local   squeaky_last_event_at   epoch ms of the last interaction
//! Local   squeaky_consent         "true" | "false" | absent
//! Session squeaky_session_id      short-lived session id
//! ```

pub mod id;
pub mod page;
pub mod storage;
pub mod visitor;

// Re-export commonly used types
pub use id::{generate_id, IdSource, RandomIdSource, SeededIdSource};
pub use page::{DeviceType, PageContext, PageState, SharedPage};
pub use storage::{MemoryStorage, Scope, SqliteStorage, Storage};
pub use visitor::{
    is_bot, AttributeValue, ExternalAttributes, IdKind, IdentityStore, Visitor, VisitorObject,
};
