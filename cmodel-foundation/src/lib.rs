//! Foundational types for the cmodel front-end.

pub mod errors;
pub mod source;
pub mod source_arena;
pub mod span;
