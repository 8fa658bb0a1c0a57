//! Conflict classification.

use serde::{Deserialize, Serialize};

/// How two devices' edits to the same entity diverged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConflictType {
    /// Both sides modified the entity.
    UpdateUpdate,
    /// Local side modified, remote side deleted.
    UpdateDelete,
    /// Local side deleted, remote side modified.
    DeleteUpdate,
}

impl ConflictType {
    /// The string form used in storage.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::UpdateUpdate => "update_update",
            Self::UpdateDelete => "update_delete",
            Self::DeleteUpdate => "delete_update",
        }
    }

    /// Parses a conflict type from its stored string form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "update_update" => Some(Self::UpdateUpdate),
            "update_delete" => Some(Self::UpdateDelete),
            "delete_update" => Some(Self::DeleteUpdate),
            _ => None,
        }
    }
}

impl std::fmt::Display for ConflictType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
