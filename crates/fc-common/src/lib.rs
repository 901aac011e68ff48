//! Shared primitives for the event filter subsystem.
//!
//! Kept deliberately small: types that more than one crate needs to agree
//! on (subscriber identity) plus the structured logging bootstrap every
//! binary and crate shares.

use std::sync::Arc;

pub mod logging;

/// Opaque, cheaply-clonable identity for a live subscriber endpoint.
///
/// Wraps `Arc<str>` rather than `String` so it can be copied into every
/// subscription and worker message without re-allocating.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(Arc<str>);

impl SubscriberId {
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(Arc::from(id.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SubscriberId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for SubscriberId {
    fn from(s: String) -> Self {
        Self(Arc::from(s.as_str()))
    }
}
