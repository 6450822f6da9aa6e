//! Core types for vigil: events, session log, config, credentials.

pub mod config;
pub mod credentials;
pub mod error;
pub mod event;
pub mod session;

pub use config::{SecurityMode, VigilConfig};
pub use error::{Error, Result};
pub use event::{Event, EventKind};
pub use session::{
    clamp_utf8, load_session, new_correlation_id, truncate_marked, Session, SessionLog,
    SessionStatus,
};
