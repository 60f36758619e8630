//! Structured error kinds surfaced by the mux core.
//!
//! Most internal plumbing is happy to bubble up `anyhow::Error` (the teacher's
//! own convention), but the handful of operations whose failure modes are
//! part of the contract callers rely on (splitting, window/tab bookkeeping,
//! domain lifecycle) return this enum so a caller can match on `kind` rather
//! than string-sniff an error message.
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Pane,
    Tab,
    Window,
    Domain,
    Client,
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let s = match self {
            Self::Pane => "pane",
            Self::Tab => "tab",
            Self::Window => "window",
            Self::Domain => "domain",
            Self::Client => "client",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Error)]
pub enum MuxError {
    #[error("{kind} {id} not found")]
    NotFound { kind: EntityKind, id: usize },

    #[error("{kind} {id} is already present")]
    Duplicate { kind: EntityKind, id: usize },

    #[error("{kind} index {idx} is out of range")]
    InvalidIndex { kind: EntityKind, idx: usize },

    #[error("cannot split: {reason}")]
    CannotSplit { reason: &'static str },

    #[error("split would violate minimum pane size")]
    NoSpace,

    #[error("failed to attach domain {domain_id}: {cause}")]
    CannotAttach { domain_id: usize, cause: String },

    #[error("failed to spawn: {0}")]
    SpawnFailed(String),

    #[error("domain is detached")]
    Detached,

    #[error("pane was killed")]
    Killed,
}
