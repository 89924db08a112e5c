//! Enumeration types shared across the Ecosim workspace.

use serde::{Deserialize, Serialize};

/// Which backend slot a prediction or session belongs to.
///
/// A zone may run both slots at once; each slot keeps its own manipulation
/// session and its own prediction queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// The classic web-service simulation engine.
    Classic,
    /// The alternate trophic-network (ATN) engine.
    Trophic,
}

impl BackendKind {
    /// Both slots, in dispatch order.
    pub const ALL: [Self; 2] = [Self::Classic, Self::Trophic];

    /// Stable lowercase name for logs and storage.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Classic => "classic",
            Self::Trophic => "trophic",
        }
    }
}

impl core::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal outcome of a simulation job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    /// Every enabled backend completed and the job was persisted.
    Success,
    /// At least one phase failed and was rolled back.
    Failure,
}

impl JobStatus {
    /// Storage representation.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::Failure => "FAILURE",
        }
    }

    /// Parse the storage representation. Unknown values map to `Failure`.
    pub fn from_db(raw: &str) -> Self {
        if raw == "SUCCESS" {
            Self::Success
        } else {
            Self::Failure
        }
    }
}

/// Kind of player action recorded in the statistics table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatAction {
    /// The player bought biomass of a species.
    Purchase,
}

impl StatAction {
    /// Storage representation.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Purchase => "Purchase",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_status_roundtrips_through_storage_form() {
        assert_eq!(JobStatus::from_db(JobStatus::Success.as_str()), JobStatus::Success);
        assert_eq!(JobStatus::from_db(JobStatus::Failure.as_str()), JobStatus::Failure);
        assert_eq!(JobStatus::from_db("garbage"), JobStatus::Failure);
    }

    #[test]
    fn backend_kind_deserializes_from_snake_case() {
        let kind: Result<BackendKind, _> = serde_json::from_str("\"trophic\"");
        assert_eq!(kind.ok(), Some(BackendKind::Trophic));
    }
}
