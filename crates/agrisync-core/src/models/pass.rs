//! Aggregate outcome of a sync pass

use serde::{Deserialize, Serialize};

/// Overall result of a pass across its modules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PassStatus {
    /// Every module succeeded
    Success,
    /// At least one module succeeded
    Partial,
    /// No module succeeded
    Failed,
}

impl PassStatus {
    /// Fold per-module success flags into a pass status.
    ///
    /// An empty pass has nothing outstanding and counts as a success.
    pub fn aggregate(results: impl IntoIterator<Item = bool>) -> Self {
        let (mut succeeded, mut failed) = (0usize, 0usize);
        for ok in results {
            if ok {
                succeeded += 1;
            } else {
                failed += 1;
            }
        }
        match (succeeded, failed) {
            (_, 0) => Self::Success,
            (0, _) => Self::Failed,
            _ => Self::Partial,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Partial => "partial",
            Self::Failed => "failed",
        }
    }
}
