//! Module identity

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identity of one module in a module set: a `(groupId, artifactId)` pair.
///
/// Orders by groupId, then artifactId. Serializes as `group:artifact`, so
/// it can key JSON maps.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ModuleName {
    pub group_id: String,
    pub artifact_id: String,
}

impl ModuleName {
    /// Create a module name
    pub fn new(group_id: impl Into<String>, artifact_id: impl Into<String>) -> Self {
        Self {
            group_id: group_id.into(),
            artifact_id: artifact_id.into(),
        }
    }

    /// Name usable as a directory name: `group$artifact`
    pub fn to_file_system_name(&self) -> String {
        format!("{}${}", self.group_id, self.artifact_id)
    }

    /// Inverse of [`ModuleName::to_file_system_name`]
    pub fn from_file_system_name(n: &str) -> Option<Self> {
        n.split_once('$')
            .map(|(group, artifact)| Self::new(group, artifact))
    }
}

impl fmt::Display for ModuleName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.group_id, self.artifact_id)
    }
}

impl FromStr for ModuleName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some((group, artifact)) if !group.is_empty() && !artifact.is_empty() => {
                Ok(Self::new(group, artifact))
            }
            _ => Err(format!("expected groupId:artifactId, got '{}'", s)),
        }
    }
}

impl TryFrom<String> for ModuleName {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<ModuleName> for String {
    fn from(name: ModuleName) -> Self {
        name.to_string()
    }
}
