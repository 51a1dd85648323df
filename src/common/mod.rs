//! Shared building blocks: errors, value types, collaborator traits

pub mod channels;
pub mod errors;
pub mod rate_limit;
pub mod retry;
pub mod traits;
pub mod types;
