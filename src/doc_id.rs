use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Length of the hex prefix shown to humans.
pub const SHORT_LEN: usize = 8;

/// An opaque document identifier, a random UUID assigned at ingest.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
)]
#[serde(transparent)]
pub struct DocumentId(Uuid);

impl DocumentId {
    pub fn new_random() -> Self {
        Self(Uuid::new_v4())
    }

    /// The short hex prefix for human display (e.g. "a1b2c3d4").
    pub fn short(&self) -> String {
        self.0.simple().to_string()[..SHORT_LEN].to_string()
    }

    /// Whether `prefix` identifies this document, ignoring hyphens and case.
    pub fn matches_prefix(&self, prefix: &str) -> bool {
        let wanted: String = prefix
            .chars()
            .filter(|c| *c != '-')
            .map(|c| c.to_ascii_lowercase())
            .collect();
        !wanted.is_empty() && self.0.simple().to_string().starts_with(&wanted)
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl FromStr for DocumentId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}
