//! Run status enum.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Whether a pipeline run found a stage for the query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// A stage accepted the query and produced a response.
    Handled,
    /// No stage claimed the query.
    Unhandled,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Handled => write!(f, "handled"),
            Self::Unhandled => write!(f, "unhandled"),
        }
    }
}

impl RunStatus {
    /// Returns true if a stage handled the query.
    #[must_use]
    pub fn is_handled(&self) -> bool {
        matches!(self, Self::Handled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_status_display() {
        assert_eq!(RunStatus::Handled.to_string(), "handled");
        assert_eq!(RunStatus::Unhandled.to_string(), "unhandled");
    }

    #[test]
    fn test_run_status_serialize() {
        let json = serde_json::to_string(&RunStatus::Unhandled).unwrap();
        assert_eq!(json, r#""unhandled""#);

        let deserialized: RunStatus = serde_json::from_str(r#""handled""#).unwrap();
        assert!(deserialized.is_handled());
    }
}
