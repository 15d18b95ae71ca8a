//! Domain layer types and invariants.

pub mod entities;
pub mod error;
pub mod meta_value;
pub mod ordering;
pub mod posts;
pub mod types;
pub mod variants;
