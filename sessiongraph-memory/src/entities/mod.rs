//! Node types stored in the session graph
//!
//! Every versioned type is a flat serde struct: `id`, the four bitemporal
//! fields, then its payload. Field names are the stored property names.

/// Implements the accessor half of `VersionedEntity` for a struct with `id`
/// and `temporal` fields
macro_rules! versioned_accessors {
    () => {
        fn id(&self) -> $crate::id::EntityId {
            self.id
        }

        fn set_id(&mut self, id: $crate::id::EntityId) {
            self.id = id;
        }

        fn temporal(&self) -> &$crate::temporal::Bitemporal {
            &self.temporal
        }

        fn temporal_mut(&mut self) -> &mut $crate::temporal::Bitemporal {
            &mut self.temporal
        }
    };
}

pub(crate) use versioned_accessors;

mod community;
mod conflict;
mod entity;
mod file_edit;
mod memory;
mod reasoning;
mod tool_call;
mod turn;

pub use community::{Community, CommunityDraft, CommunityPatch};
pub use conflict::{ConflictDraft, ConflictReport, ConflictStatus, ConflictStore};
pub use entity::{Entity, EntityDraft, EntityPatch};
pub use file_edit::{ChangeKind, FileEdit, FileEditDraft, FileEditPatch};
pub use memory::{content_hash, Memory, MemoryDraft, MemoryPatch, MemoryType};
pub use reasoning::{ReasoningDraft, ReasoningPatch, ReasoningTrace};
pub use tool_call::{ToolCall, ToolCallDraft, ToolCallPatch, ToolStatus};
pub use turn::{Role, Turn, TurnDraft, TurnPatch};

use serde_json::Value;

/// Parse an auxiliary JSON blob, logging instead of failing on bad input
pub(crate) fn lenient_json(owner: &str, field: &str, raw: Option<&str>) -> Option<Value> {
    let raw = raw?;
    match serde_json::from_str(raw) {
        Ok(value) => Some(value),
        Err(e) => {
            log::warn!("Malformed {} on {}: {}", field, owner, e);
            None
        }
    }
}
