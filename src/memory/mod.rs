//! Working and conversation memory.
//!
//! Working memory is per-user bounded ring buffers refreshed on every
//! turn; conversation memory is per-session exchange history with
//! importance-ranked long-term promotion. Both are process-wide
//! concurrent services with explicit clear/sweep operations.

pub mod conversation;
pub mod working;

pub use conversation::{
    ConversationMemoryService, Exchange, LongTermMemory, RetrievedMemories,
};
pub use working::{RememberedOutput, WorkingMemoryService, WorkingMemorySnapshot};
