//! Cluster version value object
//!
//! A `ClusterVersion` is the software version a node reports, written as
//! dot-separated numeric components ("major.minor.build.revision").
//!
//! ## Ordering
//!
//! Versions compare numerically component by component. When one version
//! is a prefix of the other, the shorter one is lower: `2.1 < 2.1.0.0`.
//! Equality and hashing follow the same rule, so `02.1` and `2.1` are
//! equal versions even though [`ClusterVersion::version`] echoes each
//! string exactly as reported.
//!
//! ## Decoding
//!
//! Persisted or wire versions go through [`ClusterVersion::decode`], which
//! runs the same validation as [`ClusterVersion::parse`]. Serde uses that
//! path too, so a deserialized value always satisfies the invariants.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use crate::error::StoreError;

/// Reasons a version string is rejected
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClusterVersionError {
    /// Empty input
    #[error("version string is empty")]
    Empty,

    /// A component between dots is empty
    #[error("version '{input}' has an empty component at position {position}")]
    EmptyComponent {
        /// Original input
        input: String,
        /// Zero-based component index
        position: usize,
    },

    /// A component is not a plain decimal number
    #[error("version '{input}' has a non-numeric component '{component}'")]
    NonNumeric {
        /// Original input
        input: String,
        /// Offending component text
        component: String,
    },

    /// A component does not fit in 64 bits
    #[error("version '{input}' has a component that overflows: '{component}'")]
    Overflow {
        /// Original input
        input: String,
        /// Offending component text
        component: String,
    },
}

impl From<ClusterVersionError> for StoreError {
    fn from(e: ClusterVersionError) -> Self {
        StoreError::Validation(e.to_string())
    }
}

/// Totally ordered, immutable cluster version
#[derive(Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ClusterVersion {
    raw: String,
    components: Vec<u64>,
}

impl ClusterVersion {
    /// Parse a reported version string
    pub fn parse(input: &str) -> Result<Self, ClusterVersionError> {
        if input.is_empty() {
            return Err(ClusterVersionError::Empty);
        }

        let mut components = Vec::with_capacity(4);
        for (position, part) in input.split('.').enumerate() {
            if part.is_empty() {
                return Err(ClusterVersionError::EmptyComponent {
                    input: input.to_string(),
                    position,
                });
            }
            if !part.bytes().all(|b| b.is_ascii_digit()) {
                return Err(ClusterVersionError::NonNumeric {
                    input: input.to_string(),
                    component: part.to_string(),
                });
            }
            let value = part.parse::<u64>().map_err(|_| ClusterVersionError::Overflow {
                input: input.to_string(),
                component: part.to_string(),
            })?;
            components.push(value);
        }

        Ok(ClusterVersion {
            raw: input.to_string(),
            components,
        })
    }

    /// Decode a persisted version string
    pub fn decode(input: &str) -> Result<Self, ClusterVersionError> {
        Self::parse(input)
    }

    /// Build a version from numeric components
    ///
    /// An empty slice yields the single component `0`.
    pub fn from_components(components: &[u64]) -> Self {
        let components = if components.is_empty() {
            vec![0]
        } else {
            components.to_vec()
        };
        let raw = components
            .iter()
            .map(|c| c.to_string())
            .collect::<Vec<_>>()
            .join(".");
        ClusterVersion { raw, components }
    }

    /// The version exactly as reported
    pub fn version(&self) -> &str {
        &self.raw
    }

    /// Parsed numeric components
    pub fn components(&self) -> &[u64] {
        &self.components
    }

    /// Major component
    pub fn major(&self) -> u64 {
        self.components[0]
    }
}

impl PartialEq for ClusterVersion {
    fn eq(&self, other: &Self) -> bool {
        self.components == other.components
    }
}

impl Eq for ClusterVersion {}

impl Hash for ClusterVersion {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.components.hash(state);
    }
}

impl PartialOrd for ClusterVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ClusterVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        // Vec ordering is lexicographic with shorter-prefix-first
        self.components.cmp(&other.components)
    }
}

impl fmt::Debug for ClusterVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ClusterVersion({})", self.raw)
    }
}

impl fmt::Display for ClusterVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for ClusterVersion {
    type Err = ClusterVersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ClusterVersion {
    type Error = ClusterVersionError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<ClusterVersion> for String {
    fn from(v: ClusterVersion) -> Self {
        v.raw
    }
}
