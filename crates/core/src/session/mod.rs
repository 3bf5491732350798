//! Session keys, tenant scoping and session storage

pub mod key;
pub mod store;

pub use key::{
    agent_id_from_session_key, agent_main_session_key, is_within_tenant_scope, normalize_agent_id,
};
pub use store::{MemorySessionStore, SendPolicy, SessionEntry, SessionStore};
