// Shared domain types and protocol definitions for all coedit crates.

pub mod error;
pub mod op;
pub mod protocol;
pub mod types;
