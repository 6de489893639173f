//! Provider kind tag
//!
//! Identifies which storage engine backs a store. The tag is persisted in
//! the store identity header, so the numeric encoding is part of the
//! on-disk format and must never be renumbered.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{StoreError, StoreResult};

/// Storage engine kind backing a key-value store
///
/// `Unknown` marks metadata this build cannot interpret (for example a
/// header written by a newer release). It is never selectable for new
/// stores and there is deliberately no `Default` impl.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProviderKind {
    /// Unreadable or legacy metadata; do not assume a specific backend
    Unknown,
    /// Page-oriented transactional engine (ESE-like)
    Ese,
    /// Log-structured, checkpointed in-memory engine (TStore-like)
    TStore,
}

/// Client-facing name for the provider kind
pub type KeyValueStoreProviderKind = ProviderKind;

impl ProviderKind {
    /// Kinds that may be chosen for new stores
    pub const SELECTABLE: [ProviderKind; 2] = [ProviderKind::Ese, ProviderKind::TStore];

    /// Persisted tag
    pub fn to_tag(self) -> u8 {
        match self {
            ProviderKind::Unknown => 0,
            ProviderKind::Ese => 1,
            ProviderKind::TStore => 2,
        }
    }

    /// Decode a persisted tag
    ///
    /// Tags this build does not know decode to `Unknown` rather than
    /// failing; callers decide whether that is acceptable.
    pub fn from_tag(tag: u8) -> Self {
        match tag {
            1 => ProviderKind::Ese,
            2 => ProviderKind::TStore,
            _ => ProviderKind::Unknown,
        }
    }

    /// Whether this kind names a concrete engine
    pub fn is_known(self) -> bool {
        !matches!(self, ProviderKind::Unknown)
    }

    /// Reject `Unknown` for new stores
    pub fn ensure_selectable(self) -> StoreResult<Self> {
        if self.is_known() {
            Ok(self)
        } else {
            Err(StoreError::validation(
                "provider kind Unknown cannot be selected for a new store",
            ))
        }
    }

    /// Lowercase name used in configuration files
    pub fn as_str(self) -> &'static str {
        match self {
            ProviderKind::Unknown => "unknown",
            ProviderKind::Ese => "ese",
            ProviderKind::TStore => "tstore",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ese" => Ok(ProviderKind::Ese),
            "tstore" => Ok(ProviderKind::TStore),
            "unknown" => Ok(ProviderKind::Unknown),
            other => Err(StoreError::validation(format!(
                "unrecognized provider kind '{}', expected \"ese\" or \"tstore\"",
                other
            ))),
        }
    }
}
