//! Process states and process identifiers.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Deployment state of a process and of the resources it declares.
///
/// `New` and `Missing` only ever appear as old states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessState {
    /// Never seen before
    New,
    /// Tracked and expected to exist, but not found on the server
    Missing,
    Active,
    Draft,
    Retired,
    Excluded,
}

impl ProcessState {
    pub const ALL: [ProcessState; 6] = [
        Self::New,
        Self::Missing,
        Self::Active,
        Self::Draft,
        Self::Retired,
        Self::Excluded,
    ];

    /// Larger wins when merging. `New > Missing > Active > Draft > Retired > Excluded`.
    fn priority(self) -> u8 {
        match self {
            Self::New => 6,
            Self::Missing => 5,
            Self::Active => 4,
            Self::Draft => 3,
            Self::Retired => 2,
            Self::Excluded => 1,
        }
    }

    pub fn is_higher_priority(self, other: ProcessState) -> bool {
        self.priority() > other.priority()
    }

    /// The higher-priority state of the two.
    #[must_use]
    pub fn max_priority(self, other: ProcessState) -> ProcessState {
        if other.is_higher_priority(self) {
            other
        } else {
            self
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::New => "NEW",
            Self::Missing => "MISSING",
            Self::Active => "ACTIVE",
            Self::Draft => "DRAFT",
            Self::Retired => "RETIRED",
            Self::Excluded => "EXCLUDED",
        }
    }
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A deployed process definition, `key|version` in text form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ProcessKeyAndVersion {
    pub key: String,
    pub version: String,
}

impl ProcessKeyAndVersion {
    pub fn new(key: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            version: version.into(),
        }
    }
}

impl fmt::Display for ProcessKeyAndVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}", self.key, self.version)
    }
}

impl FromStr for ProcessKeyAndVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('|') {
            Some((key, version))
                if !key.trim().is_empty()
                    && !version.trim().is_empty()
                    && !version.contains('|') =>
            {
                Ok(Self::new(key.trim(), version.trim()))
            }
            _ => Err(format!("'{s}' is not a process key and version of the form key|version")),
        }
    }
}

impl TryFrom<String> for ProcessKeyAndVersion {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ProcessKeyAndVersion> for String {
    fn from(value: ProcessKeyAndVersion) -> Self {
        value.to_string()
    }
}

/// One process transition computed from the deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessStateChange {
    pub process: ProcessKeyAndVersion,
    pub old_state: ProcessState,
    pub new_state: ProcessState,
}

impl ProcessStateChange {
    pub fn new(
        process: ProcessKeyAndVersion,
        old_state: ProcessState,
        new_state: ProcessState,
    ) -> Self {
        Self {
            process,
            old_state,
            new_state,
        }
    }
}
