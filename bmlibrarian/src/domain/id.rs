//! Task identifier generation.
//!
//! Ids only need to be opaque, unique, and monotonically assigned at
//! enqueue time; UUIDv7 already encodes a millisecond timestamp in its
//! leading bits, so lexical and chronological order coincide.

/// Generate a new, unique task id.
pub fn generate_task_id() -> String {
    uuid::Uuid::now_v7().to_string()
}
