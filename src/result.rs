//! Build results

use serde::{Deserialize, Serialize};
use std::fmt;

/// Outcome of a build, ordered from best to worst
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BuildResult {
    Success,
    Unstable,
    Failure,
    NotBuilt,
    Aborted,
}

impl BuildResult {
    /// The worse of two results
    pub fn combine(self, other: BuildResult) -> BuildResult {
        self.max(other)
    }

    /// Whether this result is at least as good as `other`
    pub fn is_better_or_equal_to(self, other: BuildResult) -> bool {
        self <= other
    }

    /// Combine a module-set build's own result with its module builds.
    ///
    /// NOT_BUILT modules are ignored; an unset own result takes the first
    /// module result.
    pub fn combine_modules(
        own: Option<BuildResult>,
        modules: impl IntoIterator<Item = Option<BuildResult>>,
    ) -> Option<BuildResult> {
        let mut r = own;
        for br in modules {
            r = match (r, br) {
                (None, br) => br,
                (Some(_), Some(BuildResult::NotBuilt)) => r,
                (Some(r), Some(br)) => Some(r.combine(br)),
                (Some(r), None) => Some(r),
            };
        }
        r
    }
}

impl fmt::Display for BuildResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Success => "SUCCESS",
            Self::Unstable => "UNSTABLE",
            Self::Failure => "FAILURE",
            Self::NotBuilt => "NOT_BUILT",
            Self::Aborted => "ABORTED",
        };
        write!(f, "{}", name)
    }
}
