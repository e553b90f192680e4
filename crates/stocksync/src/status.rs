//! Status carried by every maintenance report.

use serde::{Deserialize, Serialize};

/// Outcome of a recovery or fallback operation.
///
/// "Nothing to do" is a status, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    Success,
    Error,
    NoAction,
    NoCache,
    NoData,
}

impl OperationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            OperationStatus::Success => "success",
            OperationStatus::Error => "error",
            OperationStatus::NoAction => "no_action",
            OperationStatus::NoCache => "no_cache",
            OperationStatus::NoData => "no_data",
        }
    }

    pub fn is_error(self) -> bool {
        self == OperationStatus::Error
    }
}

impl std::fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
